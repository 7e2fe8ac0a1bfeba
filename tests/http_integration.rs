//! Integration tests for the Azure and Loki HTTP adapters using wiremock
//!
//! These tests verify the REST adapters against mocked endpoints, covering
//! request shape, authentication headers, paging and error handling.

use rgcollector::azure::auth::{AzureCredentials, CredentialSource};
use rgcollector::azure::blob::AzureBlobStore;
use rgcollector::azure::client::AzureClient;
use rgcollector::azure::http::AzureHttpClient;
use rgcollector::azure::table::TableStore;
use rgcollector::enrich::{EnrichmentSpec, Enricher, EntityStore};
use rgcollector::graph::{
    list_subscriptions, GraphClient, InventoryQuery, QueryRequest, QueryResolver,
    ResourceLocator, SubscriptionScope, SubscriptionSource,
};
use rgcollector::labels::LabelSet;
use rgcollector::sinks::{LogSink, LokiAuth, LokiPublisher, ObjectStore};
use rgcollector::CollectorError;
use serde_json::json;
use wiremock::matchers::{basic_auth, bearer_token, body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_ID: &str =
    "/subscriptions/S/resourceGroups/G/providers/Microsoft.ResourceGraph/queries/Q";

fn static_client(server: &MockServer) -> AzureClient {
    let http = AzureHttpClient::new().expect("http client");
    let credentials = AzureCredentials::new(
        CredentialSource::Static {
            token: "test-token".to_string(),
        },
        http.clone(),
    );
    AzureClient::new(credentials, http, &server.uri())
}

/// Test module for ARM client integration tests
mod arm_tests {
    use super::*;

    /// Stored query lookup is scoped to the query's own subscription
    #[tokio::test]
    async fn test_resolve_stored_query() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .and(query_param("api-version", "2021-03-01"))
            .and(bearer_token("test-token"))
            .and(header_exists("x-ms-client-request-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalRecords": 1,
                "count": 1,
                "data": [{
                    "id": QUERY_ID,
                    "name": "Q",
                    "properties": {"query": "Resources | project id"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = static_client(&server);
        let locator = ResourceLocator::parse(QUERY_ID).unwrap();
        let text = QueryResolver::new(&locator)
            .bind(&client)
            .resolve_query_text()
            .await
            .expect("query should resolve");

        assert_eq!(text, "Resources | project id");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["subscriptions"], json!(["S"]));
        assert!(body["query"].as_str().unwrap().contains("where name == \"Q\""));
    }

    /// An empty lookup result is a named error, not an index fault
    #[tokio::test]
    async fn test_resolve_missing_stored_query() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalRecords": 0,
                "count": 0,
                "data": []
            })))
            .mount(&server)
            .await;

        let client = static_client(&server);
        let locator = ResourceLocator::parse(QUERY_ID).unwrap();
        let err = QueryResolver::new(&locator)
            .bind(&client)
            .resolve_query_text()
            .await
            .unwrap_err();

        assert!(matches!(err, CollectorError::QueryNotFound { .. }));
    }

    /// Inventory query carries the whole scope in one request
    #[tokio::test]
    async fn test_inventory_query_single_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .and(body_json(json!({
                "subscriptions": ["S1", "S2"],
                "query": "Resources | project id",
                "options": {"resultFormat": "objectArray"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalRecords": 2,
                "count": 2,
                "data": [
                    {"id": "a", "subscriptionId": "S1"},
                    {"id": "b", "subscriptionId": "S2"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = static_client(&server);
        let rows = InventoryQuery::new("Resources | project id")
            .execute(&client, &SubscriptionScope::new(["S1", "S2"]))
            .await
            .expect("query should succeed");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], "b");
    }

    /// Non-success responses surface as query execution errors
    #[tokio::test]
    async fn test_inventory_query_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "BadRequest", "message": "Query is invalid"}
            })))
            .mount(&server)
            .await;

        let client = static_client(&server);
        let err = InventoryQuery::new("Resources | bogus")
            .execute(&client, &SubscriptionScope::new(["S1"]))
            .await
            .unwrap_err();

        match err {
            CollectorError::QueryExecution(source) => {
                assert!(format!("{source:#}").contains("400"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Subscription listing follows nextLink until exhausted
    #[tokio::test]
    async fn test_subscription_paging() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"subscriptionId": "S3"}, {"subscriptionId": "S1"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("api-version", "2022-12-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"subscriptionId": "S1"}, {"subscriptionId": "S2"}],
                "nextLink": format!("{}/subscriptions?page=2", server.uri())
            })))
            .mount(&server)
            .await;

        let client = static_client(&server);
        let raw = client.subscription_ids().await.expect("listing should succeed");
        assert_eq!(raw, vec!["S1", "S2", "S3", "S1"]);

        let scope = list_subscriptions(&client).await.unwrap();
        assert_eq!(scope.ids(), ["S1", "S2", "S3"]);
    }

    /// Direct use of the GraphClient trait
    #[tokio::test]
    async fn test_graph_client_reports_skip_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/providers/Microsoft.ResourceGraph/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalRecords": 5000,
                "count": 1,
                "data": [{"id": "a"}],
                "$skipToken": "next"
            })))
            .mount(&server)
            .await;

        let client = static_client(&server);
        let response = client
            .resources(&QueryRequest::new(vec!["S1".into()], "Resources"))
            .await
            .unwrap();
        assert_eq!(response.total_records, Some(5000));
        assert_eq!(response.skip_token.as_deref(), Some("next"));
    }
}

/// Test module for credential flows
mod auth_tests {
    use super::*;

    /// Service principal tokens come from the v2 token endpoint and are cached
    #[tokio::test]
    async fn test_client_secret_flow() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "sp-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = AzureCredentials::new(
            CredentialSource::ClientSecret {
                authority_host: server.uri(),
                tenant_id: "tenant-1".into(),
                client_id: "client".into(),
                client_secret: "secret".into(),
            },
            AzureHttpClient::new().unwrap(),
        );

        assert_eq!(credentials.get_token().await.unwrap(), "sp-token");
        assert_eq!(credentials.get_token().await.unwrap(), "sp-token");

        let requests = server.received_requests().await.unwrap();
        let form = String::from_utf8_lossy(&requests[0].body).to_string();
        assert!(form.contains("grant_type=client_credentials"));
        assert!(form.contains("scope=https%3A%2F%2Fmanagement.azure.com%2F.default"));
    }

    /// Managed identity requests carry the identity header and client id
    #[tokio::test]
    async fn test_managed_identity_flow() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/msi/token"))
            .and(header("X-IDENTITY-HEADER", "identity-secret"))
            .and(query_param("client_id", "uai-app-id"))
            .and(query_param("resource", "https://management.azure.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "mi-token",
                "expires_on": "9999999999"
            })))
            .mount(&server)
            .await;

        let credentials = AzureCredentials::new(
            CredentialSource::ManagedIdentity {
                endpoint: format!("{}/msi/token", server.uri()),
                header: "identity-secret".into(),
                client_id: Some("uai-app-id".into()),
            },
            AzureHttpClient::new().unwrap(),
        );

        assert_eq!(credentials.get_token().await.unwrap(), "mi-token");
    }

    /// Token endpoint failures propagate
    #[tokio::test]
    async fn test_token_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client"
            })))
            .mount(&server)
            .await;

        let credentials = AzureCredentials::new(
            CredentialSource::ClientSecret {
                authority_host: server.uri(),
                tenant_id: "tenant-1".into(),
                client_id: "client".into(),
                client_secret: "wrong".into(),
            },
            AzureHttpClient::new().unwrap(),
        );

        let err = credentials.get_token().await.unwrap_err();
        assert!(format!("{err:#}").contains("401"));
    }
}

/// Test module for the Loki sink
mod loki_tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet::from([
            ("graph_query_name".to_string(), "Q".to_string()),
            ("id".to_string(), "a".to_string()),
        ])
    }

    /// Push body carries the labels as the stream and the record as the line
    #[tokio::test]
    async fn test_publish_pushes_stream() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/loki/api/v1/push"))
            .and(basic_auth("user", "pass"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = LokiPublisher::new(
            AzureHttpClient::new().unwrap(),
            &format!("{}/loki/api/v1/push", server.uri()),
            Some(LokiAuth {
                username: "user".into(),
                password: "pass".into(),
            }),
        );

        let record = json!({"id": "a", "subscriptionId": "S1", "tags": {"env": "prod"}})
            .as_object()
            .cloned()
            .unwrap();
        publisher.publish(&record, &labels()).await.expect("push should succeed");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let stream = &body["streams"][0];
        assert_eq!(stream["stream"], json!({"graph_query_name": "Q", "id": "a"}));

        let line: serde_json::Value =
            serde_json::from_str(stream["values"][0][1].as_str().unwrap()).unwrap();
        assert_eq!(line["tags"]["env"], "prod");
        assert!(stream["values"][0][0].as_str().unwrap().parse::<i64>().is_ok());
    }

    /// Rejected pushes are sink errors the caller can skip
    #[tokio::test]
    async fn test_publish_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/loki/api/v1/push"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "entry has 16 label names; limit 15",
            ))
            .mount(&server)
            .await;

        let publisher = LokiPublisher::new(
            AzureHttpClient::new().unwrap(),
            &format!("{}/loki/api/v1/push", server.uri()),
            None,
        );

        let record = json!({"id": "a"}).as_object().cloned().unwrap();
        let err = publisher.publish(&record, &labels()).await.unwrap_err();
        assert!(err.is_per_record());
    }
}

/// Test module for the storage adapters
mod storage_tests {
    use super::*;

    /// Blob uploads are block blob PUTs signed with SharedKey
    #[tokio::test]
    async fn test_blob_upload_shared_key() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/inventory/Q-20261018-090507.csv"))
            .and(header("x-ms-blob-type", "BlockBlob"))
            .and(header_exists("x-ms-date"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = AzureBlobStore::new(
            AzureHttpClient::new().unwrap(),
            &format!("AccountName=acct;AccountKey=c2VjcmV0LWtleQ==;BlobEndpoint={}", server.uri()),
            "inventory",
        )
        .unwrap();

        store
            .upload("Q-20261018-090507.csv", "text/csv", b"id\na\n".to_vec())
            .await
            .expect("upload should succeed");

        let requests = server.received_requests().await.unwrap();
        let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedKey acct:"));
        assert_eq!(requests[0].body, b"id\na\n");
    }

    /// SAS connection strings authorize through the query string
    #[tokio::test]
    async fn test_blob_upload_sas() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/inventory/Q.csv"))
            .and(query_param("sig", "abc"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = AzureBlobStore::new(
            AzureHttpClient::new().unwrap(),
            &format!("BlobEndpoint={};SharedAccessSignature=sv=2021-08-06&sig=abc", server.uri()),
            "inventory",
        )
        .unwrap();

        store.upload("Q.csv", "text/csv", b"id\n".to_vec()).await.unwrap();
        assert!(store.location().contains("inventory"));
    }

    /// Table lookups follow continuation headers
    #[tokio::test]
    async fn test_table_query_continuation() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/subscriptions()"))
            .and(query_param("NextPartitionKey", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"PartitionKey": "p2", "RowKey": "S1", "pu": "second"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/subscriptions()"))
            .and(query_param("$filter", "RowKey eq 'S1'"))
            .and(header("x-ms-version", "2021-08-06"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-continuation-NextPartitionKey", "p2")
                    .insert_header("x-ms-continuation-NextRowKey", "S1")
                    .set_body_json(json!({
                        "value": [{"PartitionKey": "p1", "RowKey": "S1", "pu": "retail", "techContact": "ops@example.com"}]
                    })),
            )
            .mount(&server)
            .await;

        let table = TableStore::new(
            AzureHttpClient::new().unwrap(),
            &format!("AccountName=acct;AccountKey=c2VjcmV0LWtleQ==;TableEndpoint={}", server.uri()),
            "subscriptions",
        )
        .unwrap();

        let entities = table.query_entities("RowKey eq 'S1'").await.unwrap();
        assert_eq!(entities.len(), 2);

        let requests = server.received_requests().await.unwrap();
        let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("SharedKeyLite acct:"));

        // First match wins when enriching.
        let enricher = Enricher::new(&table, EnrichmentSpec::default());
        let record = json!({"id": "a", "subscriptionId": "S1"}).as_object().cloned().unwrap();
        let enriched = enricher.enrich(record).await.unwrap();
        assert_eq!(enriched["pu"], "retail");
    }
}
