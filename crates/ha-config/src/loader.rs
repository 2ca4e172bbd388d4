//! YAML loader understanding Home Assistant's custom tags
//!
//! - `!include path` - replaced by the parsed contents of another file
//! - `!secret key` - replaced by the value from `secrets.yaml`
//! - `!env_var VAR` - replaced by an environment variable

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::SecretResolver;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Key reported for tags that sit at the top level of a file
const ROOT_KEY: &str = "<root>";

pub struct YamlLoader {
    /// Base directory for relative paths
    config_dir: PathBuf,
    secrets: SecretResolver,
    /// Files currently being loaded, for cycle detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            secrets: SecretResolver::new(config_dir.clone()),
            config_dir,
            include_stack: HashSet::new(),
        }
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = %path.display(), "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.parse(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    fn parse(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, ROOT_KEY, source_path)
    }

    /// Resolve tags in `value`; `key` is the nearest enclosing mapping key
    fn process_value(
        &mut self,
        value: Value,
        key: &str,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, key, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let k = self.process_value(k, key, source_path)?;
                    let child_key = match &k {
                        Value::String(s) => s.clone(),
                        other => format!("{:?}", other),
                    };
                    let v = self.process_value(v, &child_key, source_path)?;
                    result.insert(k, v);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, key, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        key: &str,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, key, "Processing tag");

        match tag.as_str() {
            "!include" => {
                let path = self.include_path(&tagged.value, source_path)?;
                self.load_file(path)
            }
            "!secret" => {
                let name = tag_string(tagged.value, "!secret")?;
                let secret = self.secrets.resolve(&name, key, source_path)?;
                Ok(Value::String(secret))
            }
            "!env_var" => {
                let var = tag_string(tagged.value, "!env_var")?;
                let value = std::env::var(&var)
                    .map_err(|_| ConfigError::EnvVarNotFound { var: var.clone() })?;
                debug!(var = %var, key, "Substituted env var");
                Ok(Value::String(value))
            }
            _ => {
                // Unknown tags are kept; their contents still get processed.
                let value = self.process_value(tagged.value, key, source_path)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    /// Resolve an include relative to the including file
    fn include_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let path = value
            .as_str()
            .ok_or_else(|| ConfigError::InvalidIncludePath {
                path: format!("{:?}", value),
                reason: "path must be a string".to_string(),
            })?;

        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        Ok(if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            base_dir.join(path)
        })
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

fn tag_string(value: Value, tag: &str) -> ConfigResult<String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(ConfigError::InvalidValue {
            key: tag.to_string(),
            reason: "argument must be a string".to_string(),
        }),
    }
}

/// Load a YAML file relative to the config directory
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}

/// Deserialize the block for one component from the loaded configuration
///
/// Other top-level keys are ignored.
pub fn component_config<T: DeserializeOwned>(root: &Value, domain: &str) -> ConfigResult<T> {
    let section = root
        .get(domain)
        .ok_or_else(|| ConfigError::MissingSection {
            domain: domain.to_string(),
        })?;

    serde_yaml::from_value(section.clone()).map_err(|e| ConfigError::InvalidValue {
        key: domain.to_string(),
        reason: e.to_string(),
    })
}
