//! Policy configuration.
//!
//! Settings are read from a TOML file. Every field has a default, so an
//! empty file gives the built-in rules with auditing enabled.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigurationError;
use crate::store::RuleIndex;

fn default_audit_capacity() -> usize {
    1024
}

fn default_warn_on_hierarchy_gaps() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Rule file to load. The built-in rules are used when absent.
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Decisions kept in the audit log. Zero disables auditing.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Log a warning for every hierarchy gap found at load.
    #[serde(default = "default_warn_on_hierarchy_gaps")]
    pub warn_on_hierarchy_gaps: bool,

    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            audit_capacity: default_audit_capacity(),
            warn_on_hierarchy_gaps: default_warn_on_hierarchy_gaps(),
            log_filter: default_log_filter(),
        }
    }
}

impl PolicyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(text).map_err(|e| ConfigurationError::Config(e.to_string()))
    }

    /// Read a TOML file. A relative `rules_file` is resolved against the
    /// directory holding the configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;

        if let (Some(rules_file), Some(dir)) = (config.rules_file.as_mut(), path.parent()) {
            if rules_file.is_relative() {
                *rules_file = dir.join(&*rules_file);
            }
        }
        Ok(config)
    }

    /// Build the configured rule index.
    pub fn load_index(&self) -> Result<RuleIndex, ConfigurationError> {
        let index = match &self.rules_file {
            Some(path) => RuleIndex::from_file(path)?,
            None => {
                let index = RuleIndex::builtin()?;
                info!(rules = index.len(), "Using built-in policy rules");
                index
            }
        };

        if self.warn_on_hierarchy_gaps {
            index.warn_hierarchy_gaps();
        }
        Ok(index)
    }
}
