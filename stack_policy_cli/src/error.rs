//! Error types for the stack policy CLI.

use thiserror::Error;

/// Errors that can occur in the CLI
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] stack_policy::ConfigurationError),

    #[error("Policy error: {0}")]
    Policy(#[from] stack_policy::PolicyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
