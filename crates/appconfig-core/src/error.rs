//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] appconfig_client::StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Configuration has no content: {0}")]
    EmptyConfiguration(String),

    #[error("Deployment strategy missing: {0}")]
    DeploymentStrategyMissing(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Network, timeout and unexpected store failures. Callers may retry
    /// these; every other variant is a definitive answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Store(_))
    }
}
