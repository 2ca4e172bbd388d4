//! Include/exclude entity filters
//!
//! Implements the filter block Home Assistant integrations accept:
//!
//! ```yaml
//! filter:
//!   include_domains: [light, switch]
//!   include_entity_globs: ["sensor.*_temperature"]
//!   include_entities: [binary_sensor.front_door]
//!   exclude_domains: [automation]
//!   exclude_entity_globs: ["light.*_debug"]
//!   exclude_entities: [light.attic]
//! ```
//!
//! The precedence rules match Home Assistant's `generate_filter`: explicit
//! entity lists beat globs, and globs beat domains.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid entity glob '{glob}': {source}")]
    InvalidGlob {
        glob: String,
        #[source]
        source: regex::Error,
    },
}

/// The filter block as written in YAML
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityFilterConfig {
    #[serde(default)]
    pub include_domains: Vec<String>,
    #[serde(default)]
    pub include_entity_globs: Vec<String>,
    #[serde(default)]
    pub include_entities: Vec<String>,
    #[serde(default)]
    pub exclude_domains: Vec<String>,
    #[serde(default)]
    pub exclude_entity_globs: Vec<String>,
    #[serde(default)]
    pub exclude_entities: Vec<String>,
}

impl EntityFilterConfig {
    pub fn is_empty(&self) -> bool {
        self.include_domains.is_empty()
            && self.include_entity_globs.is_empty()
            && self.include_entities.is_empty()
            && self.exclude_domains.is_empty()
            && self.exclude_entity_globs.is_empty()
            && self.exclude_entities.is_empty()
    }
}

/// Compiled filter predicate over entity ids
#[derive(Debug, Clone)]
pub struct EntityFilter {
    include_e: HashSet<String>,
    include_d: HashSet<String>,
    include_eg: Option<Regex>,
    exclude_e: HashSet<String>,
    exclude_d: HashSet<String>,
    exclude_eg: Option<Regex>,
}

impl EntityFilter {
    pub fn new(config: &EntityFilterConfig) -> Result<Self, FilterError> {
        Ok(Self {
            include_e: config.include_entities.iter().cloned().collect(),
            include_d: config.include_domains.iter().cloned().collect(),
            include_eg: globs_to_regex(&config.include_entity_globs)?,
            exclude_e: config.exclude_entities.iter().cloned().collect(),
            exclude_d: config.exclude_domains.iter().cloned().collect(),
            exclude_eg: globs_to_regex(&config.exclude_entity_globs)?,
        })
    }

    /// A filter that lets every entity through
    pub fn allow_all() -> Self {
        Self {
            include_e: HashSet::new(),
            include_d: HashSet::new(),
            include_eg: None,
            exclude_e: HashSet::new(),
            exclude_d: HashSet::new(),
            exclude_eg: None,
        }
    }

    pub fn is_allow_all(&self) -> bool {
        !self.has_include() && !self.has_exclude()
    }

    fn has_include(&self) -> bool {
        !self.include_e.is_empty() || !self.include_d.is_empty() || self.include_eg.is_some()
    }

    fn has_exclude(&self) -> bool {
        !self.exclude_e.is_empty() || !self.exclude_d.is_empty() || self.exclude_eg.is_some()
    }

    /// Whether the entity passes the filter
    pub fn matches(&self, entity_id: &str) -> bool {
        let domain = entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(entity_id);
        let included_glob = glob_match(&self.include_eg, entity_id);
        let excluded_glob = glob_match(&self.exclude_eg, entity_id);

        match (self.has_include(), self.has_exclude()) {
            (false, false) => true,
            (true, false) => {
                self.include_e.contains(entity_id)
                    || self.include_d.contains(domain)
                    || included_glob
            }
            (false, true) => {
                !(self.exclude_e.contains(entity_id)
                    || self.exclude_d.contains(domain)
                    || excluded_glob)
            }
            (true, true) if !self.include_d.is_empty() || self.include_eg.is_some() => {
                self.include_e.contains(entity_id)
                    || (!self.exclude_e.contains(entity_id)
                        && (included_glob || (self.include_d.contains(domain) && !excluded_glob)))
            }
            (true, true) if !self.exclude_d.is_empty() || self.exclude_eg.is_some() => {
                if self.exclude_d.contains(domain) || excluded_glob {
                    self.include_e.contains(entity_id)
                } else {
                    !self.exclude_e.contains(entity_id)
                }
            }
            (true, true) => self.include_e.contains(entity_id),
        }
    }
}

impl Default for EntityFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl TryFrom<&EntityFilterConfig> for EntityFilter {
    type Error = FilterError;

    fn try_from(config: &EntityFilterConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

fn glob_match(re: &Option<Regex>, entity_id: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(entity_id))
}

fn globs_to_regex(globs: &[String]) -> Result<Option<Regex>, FilterError> {
    if globs.is_empty() {
        return Ok(None);
    }

    let alternatives: Vec<String> = globs.iter().map(|g| translate_glob(g)).collect();
    let pattern = format!("^(?:{})$", alternatives.join("|"));

    Regex::new(&pattern)
        .map(Some)
        .map_err(|source| FilterError::InvalidGlob {
            glob: globs.join(", "),
            source,
        })
}

/// Translate a shell-style glob into a regex fragment
///
/// `*` matches any run of characters, `?` one character, and `[...]` a
/// character class (`[!...]` negated). An unterminated `[` is literal.
fn translate_glob(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("(?s:");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                    continue;
                }

                let mut class: &[char] = &chars[i..j];
                out.push('[');
                if class.first() == Some(&'!') {
                    out.push('^');
                    class = &class[1..];
                }
                for &cc in class {
                    match cc {
                        '\\' | '[' | ']' | '^' | '&' | '~' => {
                            out.push('\\');
                            out.push(cc);
                        }
                        _ => out.push(cc),
                    }
                }
                out.push(']');
                i = j + 1;
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(yaml: &str) -> EntityFilter {
        let config: EntityFilterConfig = serde_yaml::from_str(yaml).unwrap();
        EntityFilter::new(&config).unwrap()
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let f = filter("{}");
        assert!(f.is_allow_all());
        assert!(f.matches("light.kitchen"));
        assert!(f.matches("sensor.anything"));
    }

    #[test]
    fn test_include_only() {
        let f = filter(
            r#"
include_domains: [light]
include_entities: [switch.porch]
include_entity_globs: ["sensor.*_temperature"]
"#,
        );
        assert!(f.matches("light.kitchen"));
        assert!(f.matches("switch.porch"));
        assert!(f.matches("sensor.attic_temperature"));
        assert!(!f.matches("switch.garage"));
        assert!(!f.matches("sensor.attic_humidity"));
    }

    #[test]
    fn test_exclude_only() {
        let f = filter(
            r#"
exclude_domains: [automation]
exclude_entities: [light.attic]
exclude_entity_globs: ["sensor.*_debug"]
"#,
        );
        assert!(f.matches("light.kitchen"));
        assert!(!f.matches("light.attic"));
        assert!(!f.matches("automation.wake_up"));
        assert!(!f.matches("sensor.cpu_debug"));
        assert!(f.matches("sensor.cpu"));
    }

    #[test]
    fn test_include_domain_with_excludes() {
        let f = filter(
            r#"
include_domains: [light]
include_entities: [switch.porch]
exclude_entities: [light.attic]
exclude_entity_globs: ["light.*_night"]
"#,
        );
        assert!(f.matches("light.kitchen"));
        assert!(f.matches("switch.porch"));
        assert!(!f.matches("light.attic"));
        assert!(!f.matches("light.hall_night"));
        assert!(!f.matches("switch.garage"));
    }

    #[test]
    fn test_include_glob_beats_exclude_glob() {
        let f = filter(
            r#"
include_entity_globs: ["light.hall_*"]
exclude_entity_globs: ["light.*_night"]
"#,
        );
        assert!(f.matches("light.hall_night"));
        assert!(!f.matches("light.bed_night"));
        assert!(!f.matches("light.bed"));
    }

    #[test]
    fn test_exclude_domain_with_include_entities() {
        let f = filter(
            r#"
include_entities: [sensor.keep_me]
exclude_domains: [sensor]
exclude_entities: [light.attic]
"#,
        );
        assert!(f.matches("sensor.keep_me"));
        assert!(!f.matches("sensor.other"));
        assert!(!f.matches("light.attic"));
        assert!(f.matches("light.kitchen"));
    }

    #[test]
    fn test_entity_lists_only() {
        let f = filter(
            r#"
include_entities: [light.kitchen]
exclude_entities: [light.attic]
"#,
        );
        assert!(f.matches("light.kitchen"));
        assert!(!f.matches("light.attic"));
        assert!(!f.matches("light.hall"));
    }

    #[test]
    fn test_glob_syntax() {
        let f = filter(r#"include_entity_globs: ["light.room_?", "switch.[!x]*", "fan.a.b"]"#);
        assert!(f.matches("light.room_1"));
        assert!(!f.matches("light.room_12"));
        assert!(f.matches("switch.porch"));
        assert!(!f.matches("switch.xmas"));
        // dots are literal
        assert!(f.matches("fan.a.b"));
        assert!(!f.matches("fan.aXb"));
    }

    #[test]
    fn test_unterminated_bracket_is_literal() {
        let f = filter(r#"include_entity_globs: ["light.[oops"]"#);
        assert!(f.matches("light.[oops"));
        assert!(!f.matches("light.o"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<EntityFilterConfig, _> = serde_yaml::from_str("include_domain: [light]");
        assert!(result.is_err());
    }
}
