//! YAML configuration loading
//!
//! Reads `configuration.yaml` the way Home Assistant does, resolving
//! `!secret`, `!include` and `!env_var` tags, and hands component blocks
//! to serde.
//!
//! ```ignore
//! use ha_config::{component_config, load_yaml};
//!
//! let root = load_yaml("/config", "configuration.yaml")?;
//! let block: MyConfig = component_config(&root, "google_firebase_store")?;
//! ```

mod error;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use loader::{component_config, load_yaml, YamlLoader};

pub use serde_yaml::Value;
