//! Fallback chain - try providers in priority order until one answers

use crate::cma::error::{AllSourcesExhausted, DataSourceError, SourceAttempt};
use crate::cma::source::DataSource;
use crate::cma::types::{Comp, PropertyDetails};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Backoff settings for retryable provider failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

/// Comps adopted from exactly one provider
#[derive(Debug, Clone)]
pub struct SourcedComps {
    pub data_source: String,
    pub comps: Vec<Comp>,
}

/// Ordered list of providers, most authoritative first
#[derive(Clone, Default)]
pub struct FallbackChain {
    providers: Vec<Arc<dyn DataSource>>,
    retry: RetryPolicy,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn DataSource>>) -> Self {
        Self {
            providers,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn source_tags(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.source_tag().to_string())
            .collect()
    }

    /// Run the chain. Providers are tried strictly one after another; the first
    /// successful fetch wins, even when it returns no comps.
    pub async fn fetch(
        &self,
        address: &str,
        target: Option<&PropertyDetails>,
    ) -> Result<SourcedComps, AllSourcesExhausted> {
        let mut attempts = Vec::new();

        for provider in &self.providers {
            let tag = provider.source_tag().to_string();

            let access = provider.validate_access(address).await;
            if !access.available {
                let reason = access
                    .error
                    .unwrap_or_else(|| "no reason given".to_string());
                warn!("Data source {} unavailable for {}: {}", tag, address, reason);
                attempts.push(SourceAttempt {
                    source: tag,
                    reason: format!("unavailable: {}", reason),
                });
                continue;
            }

            match self.fetch_with_retry(provider.as_ref(), address, target).await {
                Ok(mut comps) => {
                    // Provenance is always the adopting provider
                    for comp in &mut comps {
                        comp.data_source.clone_from(&tag);
                    }
                    info!("Fetched {} comps from {} for {}", comps.len(), tag, address);
                    return Ok(SourcedComps {
                        data_source: tag,
                        comps,
                    });
                }
                Err(e) => {
                    warn!("Data source {} failed for {}: {}", tag, address, e);
                    attempts.push(SourceAttempt {
                        source: tag,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(AllSourcesExhausted { attempts })
    }

    async fn fetch_with_retry(
        &self,
        provider: &dyn DataSource,
        address: &str,
        target: Option<&PropertyDetails>,
    ) -> Result<Vec<Comp>, DataSourceError> {
        let mut attempt = 0;
        loop {
            match provider.fetch_comps(address, target).await {
                Ok(comps) => return Ok(comps),
                Err(e) if e.retryable && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    debug!(
                        "Retrying {} ({}/{}) after {:?}: {}",
                        provider.source_tag(),
                        attempt,
                        self.retry.max_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("providers", &self.source_tags())
            .field("retry", &self.retry)
            .finish()
    }
}
