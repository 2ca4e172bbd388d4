//! The `google_firebase_store` configuration block

use ha_config::{component_config, ConfigResult, Value};
use ha_entity_filter::EntityFilterConfig;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::DOMAIN;

pub const DEFAULT_WATCH_COLLECTION: &str = "exposed_devices";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Integration configuration from YAML
///
/// ```yaml
/// google_firebase_store:
///   credentials_json: firebase-adminsdk.json
///   web_token: !secret ha_token
///   filter:
///     include_domains: [light, switch]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirebaseStoreConfig {
    /// Service account key file, relative to the config directory
    pub credentials_json: PathBuf,

    /// Long-lived access token used for service calls
    #[serde(default)]
    pub web_token: Option<String>,

    #[serde(default)]
    pub filter: EntityFilterConfig,

    /// Collection whose changes trigger service calls
    #[serde(default = "default_watch_collection")]
    pub watch_collection: String,

    #[serde(default)]
    pub service: ServiceTarget,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds between Firestore listings
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_seconds"
    )]
    pub poll_interval: Duration,

    /// Only act on documents that carry a `state` field
    #[serde(default)]
    pub require_marker: bool,
}

fn default_watch_collection() -> String {
    DEFAULT_WATCH_COLLECTION.to_string()
}

fn default_base_url() -> String {
    ha_remote::DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(serde::de::Error::custom(format!(
            "poll_interval must be a positive number of seconds, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

impl FirebaseStoreConfig {
    /// Read the integration block from a loaded configuration
    pub fn from_root(root: &Value) -> ConfigResult<Self> {
        component_config(root, DOMAIN)
    }

    /// The credentials path, resolved against `config_dir` when relative
    pub fn credentials_path(&self, config_dir: &Path) -> PathBuf {
        if self.credentials_json.is_absolute() {
            self.credentials_json.clone()
        } else {
            config_dir.join(&self.credentials_json)
        }
    }
}

/// The service called for each triggered document, written `domain.service`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ServiceTarget {
    pub domain: String,
    pub service: String,
}

impl Default for ServiceTarget {
    fn default() -> Self {
        Self {
            domain: "homeassistant".to_string(),
            service: "toggle".to_string(),
        }
    }
}

impl TryFrom<String> for ServiceTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('.') {
            Some((domain, service))
                if !domain.is_empty() && !service.is_empty() && !service.contains('.') =>
            {
                Ok(Self {
                    domain: domain.to_string(),
                    service: service.to_string(),
                })
            }
            _ => Err(format!("invalid service '{}', expected domain.service", value)),
        }
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_config::ConfigError;

    fn parse(yaml: &str) -> ConfigResult<FirebaseStoreConfig> {
        let root: Value = serde_yaml::from_str(yaml).unwrap();
        FirebaseStoreConfig::from_root(&root)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse(
            r#"
homeassistant:
  name: Home
google_firebase_store:
  credentials_json: firebase.json
"#,
        )
        .unwrap();

        assert_eq!(config.credentials_json, PathBuf::from("firebase.json"));
        assert!(config.web_token.is_none());
        assert!(config.filter.is_empty());
        assert_eq!(config.watch_collection, "exposed_devices");
        assert_eq!(config.service.to_string(), "homeassistant.toggle");
        assert_eq!(config.base_url, "http://localhost:8123");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert!(!config.require_marker);
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
google_firebase_store:
  credentials_json: /etc/ha/firebase.json
  web_token: abc
  watch_collection: triggers
  service: homeassistant.turn_on
  base_url: http://ha.local:8123
  poll_interval: 0.5
  require_marker: true
  filter:
    include_domains: [light]
    exclude_entities: [light.attic]
"#,
        )
        .unwrap();

        assert_eq!(config.web_token.as_deref(), Some("abc"));
        assert_eq!(config.watch_collection, "triggers");
        assert_eq!(config.service.service, "turn_on");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(config.require_marker);
        assert_eq!(config.filter.include_domains, vec!["light"]);
        assert_eq!(
            config.credentials_path(Path::new("/config")),
            PathBuf::from("/etc/ha/firebase.json")
        );
    }

    #[test]
    fn test_credentials_path_relative_to_config_dir() {
        let config = parse("google_firebase_store:\n  credentials_json: keys/fb.json\n").unwrap();
        assert_eq!(
            config.credentials_path(Path::new("/config")),
            PathBuf::from("/config/keys/fb.json")
        );
    }

    #[test]
    fn test_rejects_invalid_blocks() {
        for yaml in [
            "google_firebase_store:\n  web_token: abc\n",
            "google_firebase_store:\n  credentials_json: a.json\n  colour: blue\n",
            "google_firebase_store:\n  credentials_json: a.json\n  service: toggle\n",
            "google_firebase_store:\n  credentials_json: a.json\n  poll_interval: 0\n",
            "google_firebase_store:\n  credentials_json: a.json\n  poll_interval: 1e30\n",
            "google_firebase_store:\n  credentials_json: a.json\n  filter:\n    include: [light]\n",
        ] {
            assert!(
                matches!(parse(yaml), Err(ConfigError::InvalidValue { .. })),
                "accepted: {}",
                yaml
            );
        }
    }

    #[test]
    fn test_missing_block() {
        assert!(matches!(
            parse("homeassistant: {}\n"),
            Err(ConfigError::MissingSection { .. })
        ));
    }
}
