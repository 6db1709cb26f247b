//! Error types for the stack policy system.
//!
//! Load-time problems are `ConfigurationError`s and must stop the service
//! from starting. Query-time problems are `PolicyError`s.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or compiling a rule set.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Action '{action}' in scope '{scope}' is listed by both rule '{first}' and rule '{second}'")]
    DuplicateAction {
        scope: String,
        action: String,
        first: String,
        second: String,
    },

    #[error("Rule '{0}' is defined more than once")]
    DuplicateRule(String),

    #[error("Rule '{rule}' has an empty {field}")]
    EmptyIdentifier { rule: String, field: &'static str },

    #[error("Rule '{rule}' has an invalid {field}: '{value}'")]
    InvalidIdentifier {
        rule: String,
        field: &'static str,
        value: String,
    },

    #[error("Rule '{0}' lists no actions")]
    EmptyActions(String),

    #[error("Failed to parse rule set{}: {message}", source_suffix(.path))]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule set document must be a mapping of rule name to rule, found {0}")]
    InvalidDocument(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn source_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" from {}", path.display()),
        None => String::new(),
    }
}

/// Errors returned at the evaluation boundary.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid policy query: {0}")]
    InvalidQuery(String),

    /// The single external rejection signal. Carries no detail so callers
    /// cannot learn how the policy is structured.
    #[error("Forbidden")]
    Forbidden,
}

impl PolicyError {
    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Forbidden => 403,
            Self::InvalidQuery(_) => 400,
            Self::Configuration(_) => 500,
        }
    }
}

/// Result type used throughout the policy crate.
pub type Result<T> = std::result::Result<T, PolicyError>;
