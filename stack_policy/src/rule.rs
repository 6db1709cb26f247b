//! Policy rules.
//!
//! A rule maps a set of actions within one scope to the personas that are
//! allowed and denied. `RuleRecord` is the shape rules take in a rule file;
//! `PolicyRule` is the validated form the store indexes.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::persona::PersonaSet;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z0-9_.:*-]+$").unwrap();
}

/// One entry of a declarative rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleRecord {
    pub scope: String,

    pub actions: Vec<String>,

    #[serde(default)]
    pub allowed: PersonaSet,

    #[serde(default)]
    pub denied: PersonaSet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RuleRecord {
    /// Create a record with no personas.
    pub fn new<S, A>(scope: impl Into<String>, actions: A) -> Self
    where
        S: Into<String>,
        A: IntoIterator<Item = S>,
    {
        Self {
            scope: scope.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            allowed: PersonaSet::empty(),
            denied: PersonaSet::empty(),
            description: None,
        }
    }

    /// Set the allowed personas.
    pub fn allow(mut self, personas: impl IntoIterator<Item = crate::Persona>) -> Self {
        self.allowed = personas.into_iter().collect();
        self
    }

    /// Set the denied personas.
    pub fn deny(mut self, personas: impl IntoIterator<Item = crate::Persona>) -> Self {
        self.denied = personas.into_iter().collect();
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A validated rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRule {
    name: String,
    scope: String,
    actions: Vec<String>,
    allowed: PersonaSet,
    denied: PersonaSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl PolicyRule {
    /// Validate a record under the given rule name.
    ///
    /// Catches problems local to one rule. Clashes between rules are
    /// detected by the store.
    pub fn compile(name: impl Into<String>, record: RuleRecord) -> Result<Self, ConfigurationError> {
        let name = name.into();
        check_identifier(&name, "rule name", &name)?;
        check_identifier(&name, "scope", &record.scope)?;

        if record.actions.is_empty() {
            return Err(ConfigurationError::EmptyActions(name));
        }

        let mut actions: Vec<String> = Vec::with_capacity(record.actions.len());
        for action in record.actions {
            check_identifier(&name, "action", &action)?;
            if actions.contains(&action) {
                return Err(ConfigurationError::DuplicateAction {
                    scope: record.scope,
                    action,
                    first: name.clone(),
                    second: name,
                });
            }
            actions.push(action);
        }

        Ok(Self {
            name,
            scope: record.scope,
            actions,
            allowed: record.allowed,
            denied: record.denied,
            description: record.description,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Actions in the order they were authored.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn allowed(&self) -> PersonaSet {
        self.allowed
    }

    pub fn denied(&self) -> PersonaSet {
        self.denied
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn covers(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

fn check_identifier(rule: &str, field: &'static str, value: &str) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        return Err(ConfigurationError::EmptyIdentifier {
            rule: rule.to_string(),
            field,
        });
    }
    if !IDENTIFIER.is_match(value) {
        return Err(ConfigurationError::InvalidIdentifier {
            rule: rule.to_string(),
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Format of a rule document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Yaml,
    Json,
}

impl RuleFormat {
    /// Pick a format from a file extension. Anything that isn't `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => RuleFormat::Json,
            _ => RuleFormat::Yaml,
        }
    }
}

/// Parse a rule document into named records, preserving document order.
pub fn parse_records(
    text: &str,
    format: RuleFormat,
    path: Option<&Path>,
) -> Result<Vec<(String, RuleRecord)>, ConfigurationError> {
    let parse_error = |message: String| ConfigurationError::Parse {
        path: path.map(PathBuf::from),
        message,
    };

    // Both formats go through serde_yaml's ordered mapping; JSON is
    // converted first so document order survives either way.
    let document: serde_yaml::Value = match format {
        RuleFormat::Yaml => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
        RuleFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?;
            serde_yaml::to_value(value).map_err(|e| parse_error(e.to_string()))?
        }
    };

    let mapping = match document {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => serde_yaml::Mapping::new(),
        other => return Err(ConfigurationError::InvalidDocument(describe(&other).to_string())),
    };

    let mut records = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            serde_yaml::Value::String(name) => name,
            other => {
                return Err(parse_error(format!(
                    "rule names must be strings, found {}",
                    describe(&other)
                )))
            }
        };
        let record: RuleRecord = serde_yaml::from_value(value)
            .map_err(|e| parse_error(format!("rule '{}': {}", name, e)))?;
        records.push((name, record));
    }

    Ok(records)
}

fn describe(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}
