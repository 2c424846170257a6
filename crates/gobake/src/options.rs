//! Invocation inputs for a bake.

use std::collections::BTreeMap;

use gobake_interp::DEFAULT_MAX_MEMORY_PAGES;
use serde::{Deserialize, Serialize};

/// What the program sees as its command line and environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeOptions {
    /// Program arguments; the first is the program name.
    pub args: Vec<String>,
    /// Environment, laid out in key order after the arguments.
    pub env: BTreeMap<String, String>,
    /// Memory cap in pages when the module declares no maximum.
    pub max_memory_pages: u32,
}

impl Default for BakeOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: BTreeMap::new(),
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
        }
    }
}

impl BakeOptions {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Parse `NAME=VALUE`, splitting at the first `=`; a missing `=` gives an
    /// empty value.
    pub fn with_env_entry(mut self, entry: &str) -> Self {
        let (key, value) = entry.split_once('=').unwrap_or((entry, ""));
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_entries_split_at_first_equals() {
        let options = BakeOptions::default()
            .with_env_entry("A=b=c")
            .with_env_entry("EMPTY");
        assert_eq!(options.env["A"], "b=c");
        assert_eq!(options.env["EMPTY"], "");
        assert_eq!(options.max_memory_pages, 16_384);
    }

    #[test]
    fn missing_fields_take_defaults_when_deserialized() {
        let options: BakeOptions = serde_json::from_str(r#"{"args":["prog"]}"#).unwrap();
        assert_eq!(options, BakeOptions::new(vec!["prog".into()]));
    }
}
