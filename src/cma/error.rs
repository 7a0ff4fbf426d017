//! Error taxonomy for CMA generation

use crate::cma::types::CmaStatus;
use thiserror::Error;
use uuid::Uuid;

/// Rejected caller input. Raised before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid input: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// A single provider could not answer
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{source_tag}: {message}")]
pub struct DataSourceError {
    pub source_tag: String,
    pub message: String,
    pub retryable: bool,
}

impl DataSourceError {
    pub fn transient(source_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(source_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

/// Why one provider in the chain was given up on
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAttempt {
    pub source: String,
    pub reason: String,
}

/// Every provider in the chain was unavailable or failed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("All data sources exhausted: {}", format_attempts(.attempts))]
pub struct AllSourcesExhausted {
    pub attempts: Vec<SourceAttempt>,
}

fn format_attempts(attempts: &[SourceAttempt]) -> String {
    if attempts.is_empty() {
        return "no data sources configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.source, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CMA request not found: {0}")]
    NotFound(Uuid),

    #[error("CMA request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: CmaStatus,
        to: CmaStatus,
    },
}

/// Errors surfaced by `CmaService`
#[derive(Error, Debug)]
pub enum CmaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    AllSourcesExhausted(#[from] AllSourcesExhausted),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type CmaResult<T> = std::result::Result<T, CmaError>;
