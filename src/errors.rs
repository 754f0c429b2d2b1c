//! Typed error hierarchy for the pipeline factory.
//!
//! `FactoryError` follows the failure taxonomy the reconciliation core relies on:
//! - malformed data (`MalformedSettings`) aborts one repository's pass
//! - transient I/O (`GitHub`, `StackRegistry`, `Queue`, `Notification`) is
//!   isolated per branch or per message by the coordinator and worker
//! - preconditions (`Config`, `MissingCredentials`) are fatal at start-up
//!
//! Not-found conditions (absent settings file, no matching stack) are not
//! errors at all; gateways return `None` or an empty collection for them.

use thiserror::Error;

/// Errors from the discovery, reconciliation and notification subsystems.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Malformed settings file in {owner}/{repository}@{branch}: {source}")]
    MalformedSettings {
        owner: String,
        repository: String,
        branch: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Repository {owner}/{repository} not found")]
    RepositoryNotFound { owner: String, repository: String },

    #[error("GitHub API error: {0}")]
    GitHub(String),

    #[error("Stack registry error: {0}")]
    StackRegistry(String),

    #[error("Work queue error: {0}")]
    Queue(String),

    #[error("Notification delivery error: {0}")]
    Notification(String),

    #[error("Pipeline execution {execution_id} of {pipeline} not found")]
    ExecutionNotFound {
        pipeline: String,
        execution_id: String,
    },

    #[error("No GitHub credentials configured for organization {organization}")]
    MissingCredentials { organization: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FactoryError {
    /// True for errors caused by repository content rather than infrastructure.
    /// Retrying will not help until someone fixes the data.
    pub fn is_data_error(&self) -> bool {
        matches!(self, FactoryError::MalformedSettings { .. })
    }
}

pub type FactoryResult<T> = std::result::Result<T, FactoryError>;
