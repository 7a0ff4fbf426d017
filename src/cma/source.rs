//! Data source abstraction - anything that can produce comps for an address

use crate::cma::error::DataSourceError;
use crate::cma::types::{Comp, PropertyDetails};
use async_trait::async_trait;

/// Outcome of a provider's access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCheck {
    pub available: bool,
    pub error: Option<String>,
}

impl AccessCheck {
    pub fn available() -> Self {
        Self {
            available: true,
            error: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            error: Some(reason.into()),
        }
    }
}

/// A provider of comparable property records.
///
/// Providers are registered in a `FallbackChain` in priority order. The
/// chain calls `validate_access` first and only calls `fetch_comps` when
/// the provider reports itself available.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Provenance tag written to every comp this provider backs (e.g. `"mock"`)
    fn source_tag(&self) -> &str;

    /// Whether this provider can answer for `address` at all
    async fn validate_access(&self, address: &str) -> AccessCheck;

    /// Fetch raw comps. An empty list is a successful answer.
    ///
    /// Each returned comp has consistent price fields and at least one of
    /// `sold_date` / `list_date`. `similarity_score` is left unset.
    async fn fetch_comps(
        &self,
        address: &str,
        target: Option<&PropertyDetails>,
    ) -> Result<Vec<Comp>, DataSourceError>;
}
