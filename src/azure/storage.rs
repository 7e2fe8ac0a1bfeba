//! Storage account connection strings and request signing
//!
//! Shared by the Table (enrichment) and Blob (export) adapters. Supports
//! account-key connection strings, signed with Shared Key / Shared Key Lite,
//! and SAS connection strings.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use reqwest::RequestBuilder;
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Storage REST API version sent with every request
pub const STORAGE_API_VERSION: &str = "2021-08-06";

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// How storage requests are authorized
#[derive(Clone)]
pub enum StorageAuth {
    /// Account key, decoded from base64
    SharedKey { account: String, key: Vec<u8> },
    /// Shared access signature query string, without the leading `?`
    Sas(String),
}

impl std::fmt::Debug for StorageAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => write!(f, "SharedKey({account})"),
            Self::Sas(_) => f.write_str("Sas"),
        }
    }
}

/// A parsed storage connection string
#[derive(Debug, Clone)]
pub struct StorageAccount {
    blob_endpoint: Option<Url>,
    table_endpoint: Option<Url>,
    pub auth: StorageAuth,
}

impl StorageAccount {
    /// Parse an Azure storage connection string
    pub fn from_connection_string(raw: &str) -> Result<Self> {
        let mut parts = BTreeMap::new();
        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                bail!("malformed connection string segment: [{}]", redact(pair));
            };
            parts.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let account = parts.get("accountname").cloned();
        let protocol = parts
            .get("defaultendpointsprotocol")
            .map(String::as_str)
            .unwrap_or("https");
        let suffix = parts
            .get("endpointsuffix")
            .map(String::as_str)
            .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);

        // A SAS string may only name the endpoints it grants access to.
        let endpoint = |explicit: &str, service: &str| -> Result<Option<Url>> {
            let raw = match (parts.get(explicit), account.as_deref()) {
                (Some(url), _) => url.clone(),
                (None, Some(account)) => format!("{protocol}://{account}.{service}.{suffix}"),
                (None, None) => return Ok(None),
            };
            Url::parse(&raw)
                .map(Some)
                .with_context(|| format!("invalid {service} endpoint"))
        };
        let blob_endpoint = endpoint("blobendpoint", "blob")?;
        let table_endpoint = endpoint("tableendpoint", "table")?;
        if blob_endpoint.is_none() && table_endpoint.is_none() {
            bail!("connection string has no AccountName and no service endpoint");
        }

        let auth = match (parts.get("sharedaccesssignature"), parts.get("accountkey")) {
            (Some(sas), _) => StorageAuth::Sas(sas.trim_start_matches('?').to_string()),
            (None, Some(key)) => {
                let Some(account) = account else {
                    bail!("connection string has AccountKey but no AccountName");
                };
                let key = BASE64
                    .decode(key)
                    .context("AccountKey is not valid base64")?;
                StorageAuth::SharedKey { account, key }
            }
            (None, None) => bail!("connection string has neither AccountKey nor SharedAccessSignature"),
        };

        Ok(Self {
            blob_endpoint,
            table_endpoint,
            auth,
        })
    }

    pub fn blob_endpoint(&self) -> Result<&Url> {
        self.blob_endpoint
            .as_ref()
            .context("connection string has no blob endpoint")
    }

    pub fn table_endpoint(&self) -> Result<&Url> {
        self.table_endpoint
            .as_ref()
            .context("connection string has no table endpoint")
    }

    /// Join path segments onto an endpoint, percent-encoding each one
    pub fn service_url(endpoint: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("endpoint cannot be a base URL: {}", endpoint))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Append the SAS token, if any, to a request URL
    pub fn authorize_url(&self, url: &mut Url) {
        if let StorageAuth::Sas(sas) = &self.auth {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{sas}"),
                _ => sas.clone(),
            };
            url.set_query(Some(&query));
        }
    }
}

/// RFC 1123 date for the `x-ms-date` header
pub fn ms_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key).context("invalid account key")?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Blob service request description used to build the Shared Key signature
pub struct BlobRequestParts<'a> {
    pub verb: &'a str,
    pub content_length: usize,
    pub content_type: &'a str,
    /// All `x-ms-*` headers sent with the request
    pub ms_headers: &'a [(&'a str, &'a str)],
    pub url: &'a Url,
}

/// Shared Key string-to-sign for the Blob service
pub fn blob_string_to_sign(account: &str, parts: &BlobRequestParts<'_>) -> String {
    let length = if parts.content_length == 0 {
        String::new()
    } else {
        parts.content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = parts
        .ms_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .collect();
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    let mut canonical_resource = format!("/{}{}", account, parts.url.path());
    let mut query: Vec<(String, String)> = parts
        .url
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    query.sort();
    for (k, v) in query {
        canonical_resource.push_str(&format!("\n{k}:{v}"));
    }

    format!(
        "{verb}\n\n\n{length}\n\n{ctype}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}",
        verb = parts.verb,
        ctype = parts.content_type,
    )
}

/// Sign a Blob request with Shared Key; a no-op for SAS accounts
pub fn authorize_blob(
    account: &StorageAccount,
    request: RequestBuilder,
    parts: &BlobRequestParts<'_>,
) -> Result<RequestBuilder> {
    match &account.auth {
        StorageAuth::Sas(_) => Ok(request),
        StorageAuth::SharedKey { account, key } => {
            let signature = sign(key, &blob_string_to_sign(account, parts))?;
            Ok(request.header("Authorization", format!("SharedKey {account}:{signature}")))
        }
    }
}

/// Sign a Table request with Shared Key Lite; a no-op for SAS accounts
pub fn authorize_table(
    account: &StorageAccount,
    request: RequestBuilder,
    url: &Url,
    date: &str,
) -> Result<RequestBuilder> {
    match &account.auth {
        StorageAuth::Sas(_) => Ok(request),
        StorageAuth::SharedKey { account, key } => {
            let string_to_sign = format!("{date}\n/{account}{}", url.path());
            let signature = sign(key, &string_to_sign)?;
            Ok(request.header(
                "Authorization",
                format!("SharedKeyLite {account}:{signature}"),
            ))
        }
    }
}

/// Hide the value half of a connection string segment
fn redact(pair: &str) -> String {
    match pair.split_once('=') {
        Some((k, _)) => format!("{k}=***"),
        None => pair.chars().take(16).collect(),
    }
}
