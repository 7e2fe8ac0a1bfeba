//! Configuration Management
//!
//! Settings come from environment variables, optionally seeded from a flat
//! JSON or YAML file of the same keys. Environment variables win. Everything
//! is validated here, before any network call.

use crate::azure::auth::{CredentialSource, DEFAULT_AUTHORITY_HOST};
use crate::azure::client::DEFAULT_ARM_URL;
use crate::enrich::{EnrichmentSpec, DEFAULT_FIELDS, DEFAULT_KEY_FIELD};
use crate::error::CollectorError;
use crate::graph::{parse_locator_list, ResourceLocator};
use crate::labels::{parse_field_list, LabelCapScope};
use crate::sinks::LokiAuth;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const QUERY_ID_KEY: &str = "RESOURCE_GRAPH_QUERY_ID";
pub const DEFAULT_INVENTORY_TYPE: &str = "reference_architecture";

/// Every key the collector reads
pub const KNOWN_KEYS: &[&str] = &[
    QUERY_ID_KEY,
    "LOKI_ENABLED",
    "LOKI_ENDPOINT",
    "LOKI_USERNAME",
    "LOKI_PASSWORD",
    "LOKI_LABEL_FIELDS",
    "LOKI_LABEL_CAP_SCOPE",
    "INVENTORY_TYPE",
    "BLOB_ENABLED",
    "BLOB_CONNECTION_STRING",
    "BLOB_CONTAINER_NAME",
    "STORAGE_ACCOUNT_CONNECTION",
    "TABLE_NAME",
    "ENRICHMENT_KEY_FIELD",
    "ENRICHMENT_FIELDS",
    "AZURE_ACCESS_TOKEN",
    "AZURE_TENANT_ID",
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_AUTHORITY_HOST",
    "IDENTITY_ENDPOINT",
    "IDENTITY_HEADER",
    "USER_ASSIGNED_IDENTITY_APP_ID",
    "AZURE_RESOURCE_MANAGER_URL",
];

#[derive(Debug, Clone)]
pub struct LokiSettings {
    pub endpoint: String,
    pub auth: Option<LokiAuth>,
}

#[derive(Clone)]
pub struct BlobSettings {
    pub connection_string: String,
    pub container: String,
}

impl std::fmt::Debug for BlobSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSettings")
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct EnrichmentSettings {
    pub connection_string: String,
    pub table: String,
    pub spec: EnrichmentSpec,
}

impl std::fmt::Debug for EnrichmentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentSettings")
            .field("table", &self.table)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSettings {
    pub fields: Vec<String>,
    pub cap_scope: LabelCapScope,
    pub inventory_type: String,
}

/// Validated collector settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub queries: Vec<ResourceLocator>,
    /// `None` when the Loki sink is disabled
    pub loki: Option<LokiSettings>,
    /// `None` when the blob sink is disabled
    pub blob: Option<BlobSettings>,
    /// `None` when no enrichment table is configured
    pub enrichment: Option<EnrichmentSettings>,
    pub labels: LabelSettings,
    pub credentials: CredentialSource,
    pub arm_url: String,
}

impl Settings {
    /// Load from the process environment, seeded by an optional config file.
    ///
    /// Without an explicit path the default file is used only if it exists.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file_values = match config_file {
            Some(path) => read_config_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => read_config_file(&path)?,
                None => BTreeMap::new(),
            },
        };

        let settings = Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_values.get(key).cloned())
        })?;
        Ok(settings)
    }

    /// Build settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CollectorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str, why: &str| {
            get(key).ok_or_else(|| CollectorError::Config(format!("{key} is required {why}")))
        };

        let queries = parse_locator_list(&require(QUERY_ID_KEY, "to locate the graph query")?)?;

        let loki = if parse_flag("LOKI_ENABLED", get("LOKI_ENABLED"), true)? {
            let auth = match (get("LOKI_USERNAME"), get("LOKI_PASSWORD")) {
                (Some(username), Some(password)) => Some(LokiAuth { username, password }),
                (None, None) => None,
                _ => {
                    return Err(CollectorError::Config(
                        "LOKI_USERNAME and LOKI_PASSWORD must be set together".to_string(),
                    ))
                }
            };
            Some(LokiSettings {
                endpoint: require("LOKI_ENDPOINT", "when the Loki sink is enabled")?,
                auth,
            })
        } else {
            None
        };

        let blob = if parse_flag("BLOB_ENABLED", get("BLOB_ENABLED"), false)? {
            Some(BlobSettings {
                connection_string: require(
                    "BLOB_CONNECTION_STRING",
                    "when the blob sink is enabled",
                )?,
                container: require("BLOB_CONTAINER_NAME", "when the blob sink is enabled")?,
            })
        } else {
            None
        };

        let enrichment = match (get("STORAGE_ACCOUNT_CONNECTION"), get("TABLE_NAME")) {
            (Some(connection_string), Some(table)) => Some(EnrichmentSettings {
                connection_string,
                table,
                spec: EnrichmentSpec {
                    key_field: get("ENRICHMENT_KEY_FIELD")
                        .unwrap_or_else(|| DEFAULT_KEY_FIELD.to_string()),
                    fields: get("ENRICHMENT_FIELDS")
                        .map(|raw| parse_field_list(&raw))
                        .unwrap_or_else(|| DEFAULT_FIELDS.iter().map(|s| s.to_string()).collect()),
                },
            }),
            (None, None) => None,
            _ => {
                return Err(CollectorError::Config(
                    "STORAGE_ACCOUNT_CONNECTION and TABLE_NAME must be set together".to_string(),
                ))
            }
        };

        let labels = LabelSettings {
            fields: get("LOKI_LABEL_FIELDS")
                .map(|raw| parse_field_list(&raw))
                .unwrap_or_default(),
            cap_scope: get("LOKI_LABEL_CAP_SCOPE")
                .map(|raw| raw.parse::<LabelCapScope>())
                .transpose()?
                .unwrap_or_default(),
            inventory_type: get("INVENTORY_TYPE")
                .unwrap_or_else(|| DEFAULT_INVENTORY_TYPE.to_string()),
        };

        Ok(Self {
            queries,
            loki,
            blob,
            enrichment,
            labels,
            credentials: credential_source(&get)?,
            arm_url: get("AZURE_RESOURCE_MANAGER_URL")
                .unwrap_or_else(|| DEFAULT_ARM_URL.to_string()),
        })
    }
}

/// Pick the first fully configured credential source
fn credential_source<G>(get: &G) -> Result<CredentialSource, CollectorError>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(token) = get("AZURE_ACCESS_TOKEN") {
        return Ok(CredentialSource::Static { token });
    }

    if let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
        get("AZURE_TENANT_ID"),
        get("AZURE_CLIENT_ID"),
        get("AZURE_CLIENT_SECRET"),
    ) {
        return Ok(CredentialSource::ClientSecret {
            authority_host: get("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            tenant_id,
            client_id,
            client_secret,
        });
    }

    if let (Some(endpoint), Some(header)) = (get("IDENTITY_ENDPOINT"), get("IDENTITY_HEADER")) {
        return Ok(CredentialSource::ManagedIdentity {
            endpoint,
            header,
            client_id: get("USER_ASSIGNED_IDENTITY_APP_ID"),
        });
    }

    Err(CollectorError::Config(
        "no Azure credentials found: set AZURE_ACCESS_TOKEN, a service principal \
         (AZURE_TENANT_ID, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET) or run with a managed identity"
            .to_string(),
    ))
}

/// Parse a `"true"`/`"false"` flag, case-insensitively
pub fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool, CollectorError> {
    match raw {
        None => Ok(default),
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(CollectorError::Config(format!(
            "{key} must be 'true' or 'false', got [{value}]"
        ))),
    }
}

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rgcollector").join("config.json"))
}

/// Scalar values accepted in the config file
#[derive(Deserialize)]
#[serde(untagged)]
enum FileValue {
    Text(String),
    Flag(bool),
    Integer(i64),
    Float(f64),
}

impl FileValue {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Flag(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

/// Read a flat key/value config file (YAML for `.yaml`/`.yml`, JSON otherwise)
pub fn read_config_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let raw: BTreeMap<String, FileValue> = if is_yaml {
        serde_yaml::from_str(&content).context("Failed to parse YAML config file")?
    } else {
        serde_json::from_str(&content).context("Failed to parse JSON config file")?
    };

    let values: BTreeMap<String, String> = raw
        .into_iter()
        .map(|(k, v)| (k, v.into_string()))
        .collect();

    for key in values.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
        tracing::warn!("Ignoring unknown config key {}", key);
    }

    tracing::info!("Loaded {} settings from {}", values.len(), path.display());
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ID: &str =
        "/subscriptions/S/resourceGroups/G/providers/Microsoft.ResourceGraph/queries/Q";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            (QUERY_ID_KEY, ID),
            ("LOKI_ENDPOINT", "http://loki:3100/loki/api/v1/push"),
            ("AZURE_ACCESS_TOKEN", "token"),
        ]
    }

    #[test]
    fn test_minimal_settings() {
        let settings = Settings::from_lookup(lookup(&minimal())).unwrap();
        assert_eq!(settings.queries.len(), 1);
        assert_eq!(settings.queries[0].name(), "Q");
        assert!(settings.loki.is_some());
        assert!(settings.blob.is_none());
        assert!(settings.enrichment.is_none());
        assert!(settings.labels.fields.is_empty());
        assert_eq!(settings.labels.cap_scope, LabelCapScope::Requested);
        assert_eq!(settings.labels.inventory_type, DEFAULT_INVENTORY_TYPE);
        assert_eq!(settings.arm_url, DEFAULT_ARM_URL);
    }

    #[test]
    fn test_flags_are_case_insensitive() {
        assert!(parse_flag("X", Some("TRUE".into()), false).unwrap());
        assert!(!parse_flag("X", Some("False".into()), true).unwrap());
        assert!(parse_flag("X", None, true).unwrap());
        assert!(matches!(
            parse_flag("X", Some("yes".into()), true),
            Err(CollectorError::Config(_))
        ));
    }

    #[test]
    fn test_disabled_loki_needs_no_endpoint() {
        let settings = Settings::from_lookup(lookup(&[
            (QUERY_ID_KEY, ID),
            ("LOKI_ENABLED", "false"),
            ("AZURE_ACCESS_TOKEN", "token"),
        ]))
        .unwrap();
        assert!(settings.loki.is_none());
    }

    #[test]
    fn test_enabled_blob_requires_target() {
        let mut pairs = minimal();
        pairs.push(("BLOB_ENABLED", "true"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("BLOB_CONNECTION_STRING"));

        pairs.push(("BLOB_CONNECTION_STRING", "AccountName=a;AccountKey=a2V5"));
        pairs.push(("BLOB_CONTAINER_NAME", "inventory"));
        let settings = Settings::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(settings.blob.unwrap().container, "inventory");
    }

    #[test]
    fn test_enrichment_defaults() {
        let mut pairs = minimal();
        pairs.push(("STORAGE_ACCOUNT_CONNECTION", "AccountName=a;AccountKey=a2V5"));
        pairs.push(("TABLE_NAME", "subscriptions"));
        let enrichment = Settings::from_lookup(lookup(&pairs))
            .unwrap()
            .enrichment
            .unwrap();
        assert_eq!(enrichment.spec, EnrichmentSpec::default());

        let mut partial = minimal();
        partial.push(("TABLE_NAME", "subscriptions"));
        assert!(Settings::from_lookup(lookup(&partial)).is_err());
    }

    #[test]
    fn test_missing_query_id() {
        let err = Settings::from_lookup(lookup(&[("AZURE_ACCESS_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains(QUERY_ID_KEY));
    }

    #[test]
    fn test_invalid_query_id_fails_at_load() {
        let mut pairs = minimal();
        pairs[0] = (QUERY_ID_KEY, "/subscriptions/S/resourceGroups/G");
        assert!(matches!(
            Settings::from_lookup(lookup(&pairs)),
            Err(CollectorError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_label_settings() {
        let mut pairs = minimal();
        pairs.push(("LOKI_LABEL_FIELDS", "id, location"));
        pairs.push(("LOKI_LABEL_CAP_SCOPE", "merged"));
        pairs.push(("INVENTORY_TYPE", "landing_zone"));
        let labels = Settings::from_lookup(lookup(&pairs)).unwrap().labels;
        assert_eq!(labels.fields, vec!["id".to_string(), "location".to_string()]);
        assert_eq!(labels.cap_scope, LabelCapScope::Merged);
        assert_eq!(labels.inventory_type, "landing_zone");
    }

    #[test]
    fn test_credential_precedence() {
        let creds = credential_source(&lookup(&[
            ("AZURE_TENANT_ID", "t"),
            ("AZURE_CLIENT_ID", "c"),
            ("AZURE_CLIENT_SECRET", "s"),
            ("IDENTITY_ENDPOINT", "http://localhost:8081/msi/token"),
            ("IDENTITY_HEADER", "h"),
        ]))
        .unwrap();
        assert_eq!(creds.kind(), "service principal");

        let creds = credential_source(&lookup(&[
            ("IDENTITY_ENDPOINT", "http://localhost:8081/msi/token"),
            ("IDENTITY_HEADER", "h"),
            ("USER_ASSIGNED_IDENTITY_APP_ID", "uai"),
        ]))
        .unwrap();
        assert_eq!(
            creds,
            CredentialSource::ManagedIdentity {
                endpoint: "http://localhost:8081/msi/token".into(),
                header: "h".into(),
                client_id: Some("uai".into()),
            }
        );

        assert!(credential_source(&lookup(&[])).is_err());
    }

    #[test]
    fn test_read_yaml_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            format!("{QUERY_ID_KEY}: {ID}\nBLOB_ENABLED: true\nLOKI_ENABLED: false\n"),
        )
        .unwrap();
        let values = read_config_file(&path).unwrap();
        assert_eq!(values["BLOB_ENABLED"], "true");
        assert_eq!(values[QUERY_ID_KEY], ID);
    }

    #[test]
    fn test_read_json_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"LOKI_ENABLED": false, "INVENTORY_TYPE": "x"}"#).unwrap();
        let values = read_config_file(&path).unwrap();
        assert_eq!(values["LOKI_ENABLED"], "false");
        assert_eq!(values["INVENTORY_TYPE"], "x");
    }
}
