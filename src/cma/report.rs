//! Report artifact collaborator
//!
//! Rendering lives outside this crate. The orchestrator only asks for an
//! artifact locator after a request completes and never lets a failure
//! here affect the request's status.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Report generation failed: {0}")]
pub struct ReportError(pub String);

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Produce the report for a completed request and return where it lives
    async fn generate(&self, request_id: Uuid, requester_id: &str) -> Result<String, ReportError>;
}
