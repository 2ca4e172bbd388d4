//! `secrets.yaml` files backing `!secret` tags
//!
//! Every directory may carry its own `secrets.yaml`. A lookup starts in the
//! directory of the file holding the tag and walks up to the config
//! directory, so packages can override the top-level secrets.

use crate::error::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const SECRETS_FILE: &str = "secrets.yaml";

/// One parsed `secrets.yaml`
#[derive(Debug, Clone)]
pub struct Secrets {
    values: HashMap<String, String>,
    path: PathBuf,
}

impl Secrets {
    /// Load `secrets.yaml` from `dir`; `None` when the directory has none
    pub fn load(dir: &Path) -> ConfigResult<Option<Self>> {
        let path = dir.join(SECRETS_FILE);
        if !path.is_file() {
            trace!(dir = %dir.display(), "No secrets.yaml");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        // An empty file parses as null.
        let raw: Option<HashMap<String, serde_yaml::Value>> = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseYaml {
                path: path.clone(),
                source: e,
            })?;

        let values: HashMap<String, String> = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(name, v)| (name, scalar_to_string(v)))
            .collect();

        debug!(count = values.len(), path = %path.display(), "Loaded secrets");
        Ok(Some(Self { values, path }))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves secrets for files below one config directory
///
/// Each directory's `secrets.yaml` is read at most once.
#[derive(Debug)]
pub(crate) struct SecretResolver {
    config_dir: PathBuf,
    loaded: HashMap<PathBuf, Option<Secrets>>,
}

impl SecretResolver {
    pub(crate) fn new(config_dir: PathBuf) -> Self {
        Self {
            config_dir,
            loaded: HashMap::new(),
        }
    }

    /// Look up `name` for the tag found under `key` in `source`
    pub(crate) fn resolve(
        &mut self,
        name: &str,
        key: &str,
        source: &Path,
    ) -> ConfigResult<String> {
        let mut dir = source.parent().map(Path::to_path_buf);

        while let Some(current) = dir {
            if !self.loaded.contains_key(&current) {
                let secrets = Secrets::load(&current)?;
                self.loaded.insert(current.clone(), secrets);
            }
            if let Some(Some(secrets)) = self.loaded.get(&current) {
                if let Some(value) = secrets.get(name) {
                    debug!(
                        secret = name,
                        key,
                        path = %secrets.path().display(),
                        "Substituted secret"
                    );
                    return Ok(value.to_string());
                }
            }

            if current == self.config_dir || !current.starts_with(&self.config_dir) {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        Err(ConfigError::SecretNotFound {
            name: name.to_string(),
            key: key.to_string(),
            file: source.to_path_buf(),
        })
    }
}

// Tokens are often unquoted numbers or booleans in secrets.yaml.
fn scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(&other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}
