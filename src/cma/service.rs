//! CMA orchestrator - validate, fetch, rank, value, persist

use crate::cma::chain::FallbackChain;
use crate::cma::error::{CmaError, CmaResult};
use crate::cma::estimate::estimate_value;
use crate::cma::report::ReportGenerator;
use crate::cma::score::rank_comps;
use crate::cma::store::CmaStore;
use crate::cma::types::{
    CmaReport, CmaRequest, CmaStatus, CompletedCma, NewCmaRequest, PropertyDetails,
    PropertyDetailsInput,
};
use crate::cma::validate::{extract_zip, validate_property_address, validate_property_details};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Owns the CMA request lifecycle.
///
/// Cheap to clone; clones share the store, chain and report generator.
#[derive(Clone)]
pub struct CmaService {
    store: Arc<dyn CmaStore>,
    chain: Arc<FallbackChain>,
    reports: Option<Arc<dyn ReportGenerator>>,
    history_limit: usize,
}

impl CmaService {
    pub fn new(store: Arc<dyn CmaStore>, chain: FallbackChain) -> Self {
        Self {
            store,
            chain: Arc::new(chain),
            reports: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_reports(mut self, reports: Arc<dyn ReportGenerator>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Generate a CMA and return the request id.
    ///
    /// Invalid input is rejected before anything is stored. Once the request
    /// row exists it ends either `completed` or `failed`; the failure message
    /// stays readable through `get_request`.
    pub async fn generate(
        &self,
        requester_id: &str,
        address: &str,
        details: Option<&PropertyDetailsInput>,
    ) -> CmaResult<Uuid> {
        let address = validate_property_address(address)?;
        let details = details.map(validate_property_details).transpose()?;

        info!(
            "Generating CMA for {} (requester: {}, details: {:?})",
            address, requester_id, details
        );

        let request = self
            .store
            .create_request(NewCmaRequest {
                requester_id: requester_id.to_string(),
                property_zip: extract_zip(&address),
                property_address: address.clone(),
                property_details: details.clone(),
            })
            .await?;

        if let Err(e) = self
            .store
            .update_status(request.id, CmaStatus::Processing)
            .await
        {
            let e = CmaError::from(e);
            error!("CMA {} could not start processing: {}", request.id, e);
            self.record_failure(request.id, &e).await;
            return Err(e);
        }

        match self.run(request.id, &address, details.as_ref()).await {
            Ok(completed) => {
                info!(
                    "CMA {} completed: {} comps from {} ({})",
                    request.id, completed.comps_count, completed.data_source, completed.estimated_value
                );
                self.spawn_report(request.id, requester_id);
                Ok(request.id)
            }
            Err(e) => {
                error!("CMA {} failed: {}", request.id, e);
                self.record_failure(request.id, &e).await;
                Err(e)
            }
        }
    }

    /// Steps between `processing` and `completed`
    async fn run(
        &self,
        id: Uuid,
        address: &str,
        details: Option<&PropertyDetails>,
    ) -> CmaResult<CompletedCma> {
        let sourced = self.chain.fetch(address, details).await?;

        let ranked = rank_comps(sourced.comps, details);
        self.store.insert_comps(id, &ranked).await?;

        let completed = CompletedCma {
            data_source: sourced.data_source,
            comps_count: ranked.len() as i32,
            estimated_value: estimate_value(&ranked),
            generated_at: Utc::now(),
        };
        self.store.mark_completed(id, &completed).await?;

        Ok(completed)
    }

    /// Best effort: the original error is what the caller sees
    async fn record_failure(&self, id: Uuid, err: &CmaError) {
        if let CmaError::Persistence(_) = err {
            if let Err(e) = self.store.delete_comps(id).await {
                warn!("Could not remove comps of failed CMA {}: {}", id, e);
            }
        }

        if let Err(e) = self.store.mark_failed(id, &err.to_string()).await {
            error!("Could not mark CMA {} as failed: {}", id, e);
        }
    }

    /// Report generation runs detached so it never holds up completion
    fn spawn_report(&self, id: Uuid, requester_id: &str) {
        let Some(reports) = self.reports.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let requester_id = requester_id.to_string();

        tokio::spawn(async move {
            match reports.generate(id, &requester_id).await {
                Ok(url) => match store.set_report_url(id, &url).await {
                    Ok(()) => info!("CMA {} report generated: {}", id, url),
                    Err(e) => warn!("CMA {} report generated but not recorded: {}", id, e),
                },
                Err(e) => warn!("CMA {} continuing without report: {}", id, e),
            }
        });
    }

    /// A request and its ranked comps, or `None` when it does not exist or
    /// belongs to another requester
    pub async fn get_request(&self, id: Uuid, requester_id: &str) -> CmaResult<Option<CmaReport>> {
        let request = match self.store.get_request(id).await? {
            Some(request) if request.requester_id == requester_id => request,
            _ => return Ok(None),
        };

        let comps = self.store.get_comps(id).await?;
        Ok(Some(CmaReport { request, comps }))
    }

    /// Most recent requests first; `None` uses the configured default limit
    pub async fn get_history(
        &self,
        requester_id: &str,
        limit: Option<usize>,
    ) -> CmaResult<Vec<CmaRequest>> {
        let limit = limit.unwrap_or(self.history_limit);
        Ok(self.store.list_requests(requester_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cma::chain::tests::{sold_comp, ScriptedSource};
    use crate::cma::chain::RetryPolicy;
    use crate::cma::error::{DataSourceError, PersistenceError};
    use crate::cma::report::ReportError;
    use crate::cma::source::DataSource;
    use crate::cma::store::{MemoryCmaStore, StoreResult};
    use crate::cma::synthetic::{SyntheticProfile, SyntheticSource};
    use crate::cma::types::{CmaComp, Comp};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ADDRESS: &str = "123 Main St, Denver, CO 80202";

    fn mock_chain(seed: u64) -> FallbackChain {
        let mock: Arc<dyn DataSource> =
            Arc::new(SyntheticSource::seeded(SyntheticProfile::mock(), seed));
        FallbackChain::new(vec![mock]).with_retry(RetryPolicy::none())
    }

    fn service(store: Arc<MemoryCmaStore>, chain: FallbackChain) -> CmaService {
        CmaService::new(store, chain)
    }

    struct StaticReport {
        result: Result<String, ReportError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportGenerator for StaticReport {
        async fn generate(&self, _id: Uuid, _requester_id: &str) -> Result<String, ReportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Memory store with switchable write failures
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryCmaStore,
        fail_status: bool,
        fail_comps: bool,
    }

    #[async_trait]
    impl CmaStore for FaultyStore {
        async fn create_request(&self, new: NewCmaRequest) -> StoreResult<CmaRequest> {
            self.inner.create_request(new).await
        }
        async fn update_status(&self, id: Uuid, status: CmaStatus) -> StoreResult<()> {
            if self.fail_status {
                return Err(PersistenceError::NotFound(id));
            }
            self.inner.update_status(id, status).await
        }
        async fn insert_comps(&self, id: Uuid, comps: &[Comp]) -> StoreResult<usize> {
            if self.fail_comps {
                return Err(PersistenceError::NotFound(id));
            }
            self.inner.insert_comps(id, comps).await
        }
        async fn delete_comps(&self, id: Uuid) -> StoreResult<u64> {
            self.inner.delete_comps(id).await
        }
        async fn mark_completed(&self, id: Uuid, result: &CompletedCma) -> StoreResult<()> {
            self.inner.mark_completed(id, result).await
        }
        async fn mark_failed(&self, id: Uuid, message: &str) -> StoreResult<()> {
            self.inner.mark_failed(id, message).await
        }
        async fn set_report_url(&self, id: Uuid, url: &str) -> StoreResult<()> {
            self.inner.set_report_url(id, url).await
        }
        async fn get_request(&self, id: Uuid) -> StoreResult<Option<CmaRequest>> {
            self.inner.get_request(id).await
        }
        async fn get_comps(&self, id: Uuid) -> StoreResult<Vec<CmaComp>> {
            self.inner.get_comps(id).await
        }
        async fn list_requests(&self, requester_id: &str, limit: usize) -> StoreResult<Vec<CmaRequest>> {
            self.inner.list_requests(requester_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_generate_with_mock_completes() {
        let store = Arc::new(MemoryCmaStore::new());
        let service = service(store.clone(), mock_chain(42));

        let id = service.generate("agent-1", ADDRESS, None).await.unwrap();
        let report = service.get_request(id, "agent-1").await.unwrap().unwrap();

        let request = &report.request;
        assert_eq!(request.status, CmaStatus::Completed);
        assert_eq!(request.property_zip.as_deref(), Some("80202"));
        assert_eq!(request.data_source.as_deref(), Some("mock"));
        assert_eq!(request.comps_count, Some(10));
        assert!(request.generated_at.is_some());
        assert!(request.error_message.is_none());

        let value = request.estimated_value.unwrap();
        assert!(value.low >= 0 && value.low <= value.mid && value.mid <= value.high);

        assert_eq!(report.comps.len(), 10);
        let dates: Vec<NaiveDate> = report
            .comps
            .iter()
            .map(|c| c.sold_date.or(c.list_date).unwrap())
            .collect();
        assert!(dates.windows(2).all(|w| w[0] >= w[1]), "not by recency: {:?}", dates);
        assert!(report.comps.iter().all(|c| c.similarity_score == 0.5));
    }

    #[tokio::test]
    async fn test_generate_with_details_stores_validated_target() {
        let store = Arc::new(MemoryCmaStore::new());
        let service = service(store, mock_chain(5));

        let input = PropertyDetailsInput {
            beds: Some(4.7),
            sqft: Some(2200.0),
            ..Default::default()
        };
        let id = service.generate("agent-1", ADDRESS, Some(&input)).await.unwrap();
        let report = service.get_request(id, "agent-1").await.unwrap().unwrap();

        let target = report.request.property_details.unwrap();
        assert_eq!(target.beds, Some(4));
        assert_eq!(target.sqft, Some(2200));

        let ranks: Vec<i32> = report.comps.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, (0..10).collect::<Vec<i32>>());
        assert!(report
            .comps
            .iter()
            .all(|c| (0.0..=1.0).contains(&c.similarity_score)));
    }

    #[tokio::test]
    async fn test_validation_error_creates_nothing() {
        let store = Arc::new(MemoryCmaStore::new());
        let service = service(store.clone(), mock_chain(1));

        let err = service.generate("agent-1", "Main St Denver", None).await.unwrap_err();
        assert!(matches!(err, CmaError::Validation(_)));

        let bad = PropertyDetailsInput {
            beds: Some(60.0),
            ..Default::default()
        };
        let err = service.generate("agent-1", ADDRESS, Some(&bad)).await.unwrap_err();
        match err {
            CmaError::Validation(v) => assert_eq!(v.field, "beds"),
            other => panic!("unexpected error: {}", other),
        }

        assert_eq!(store.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_sources_mark_failed() {
        let store = Arc::new(MemoryCmaStore::new());
        let failing: Arc<dyn DataSource> = Arc::new(ScriptedSource::new(
            "public_records",
            true,
            vec![Err(DataSourceError::permanent("public_records", "county offline"))],
        ));
        let chain = FallbackChain::new(vec![failing]).with_retry(RetryPolicy::none());
        let service = service(store.clone(), chain);

        let err = service.generate("agent-1", ADDRESS, None).await.unwrap_err();
        assert!(matches!(err, CmaError::AllSourcesExhausted(_)));

        let history = service.get_history("agent-1", None).await.unwrap();
        assert_eq!(history.len(), 1);
        let request = &history[0];
        assert_eq!(request.status, CmaStatus::Failed);
        assert_eq!(request.error_message.as_deref(), Some(err.to_string().as_str()));
        assert!(request.estimated_value.is_none());

        let report = service.get_request(request.id, "agent-1").await.unwrap().unwrap();
        assert!(report.comps.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_error_surfaces_and_fails_request() {
        let store = Arc::new(FaultyStore {
            fail_comps: true,
            ..Default::default()
        });
        let service = CmaService::new(store.clone(), mock_chain(9));

        let err = service.generate("agent-1", ADDRESS, None).await.unwrap_err();
        assert!(matches!(err, CmaError::Persistence(PersistenceError::NotFound(_))));

        let history = service.get_history("agent-1", None).await.unwrap();
        assert_eq!(history[0].status, CmaStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_processing_transition_fails_request() {
        let store = Arc::new(FaultyStore {
            fail_status: true,
            ..Default::default()
        });
        let service = CmaService::new(store.clone(), mock_chain(10));

        let err = service.generate("agent-1", ADDRESS, None).await.unwrap_err();
        assert!(matches!(err, CmaError::Persistence(PersistenceError::NotFound(_))));

        // Never left pending
        let history = service.get_history("agent-1", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, CmaStatus::Failed);
        assert_eq!(
            history[0].error_message.as_deref(),
            Some(err.to_string().as_str())
        );
        assert!(history[0].estimated_value.is_none());
    }

    #[tokio::test]
    async fn test_fallback_source_tag_recorded() {
        let store = Arc::new(MemoryCmaStore::new());
        let primary: Arc<dyn DataSource> =
            Arc::new(ScriptedSource::new("public_records", false, vec![Ok(vec![])]));
        let backup: Arc<dyn DataSource> = Arc::new(ScriptedSource::new(
            "mls",
            true,
            vec![Ok(vec![sold_comp(
                "9 Pine St",
                510_000,
                NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
            )])],
        ));
        let service = service(store, FallbackChain::new(vec![primary, backup]));

        let id = service.generate("agent-1", ADDRESS, None).await.unwrap();
        let report = service.get_request(id, "agent-1").await.unwrap().unwrap();

        assert_eq!(report.request.data_source.as_deref(), Some("mls"));
        assert_eq!(report.comps[0].data_source, "mls");
        assert_eq!(
            report.request.estimated_value.unwrap(),
            crate::cma::types::EstimatedValue { low: 510_000, mid: 510_000, high: 510_000 }
        );
    }

    #[tokio::test]
    async fn test_empty_comps_complete_with_zero_estimate() {
        let store = Arc::new(MemoryCmaStore::new());
        let empty: Arc<dyn DataSource> =
            Arc::new(ScriptedSource::new("public_records", true, vec![Ok(vec![])]));
        let service = service(store, FallbackChain::new(vec![empty]));

        let id = service.generate("agent-1", ADDRESS, None).await.unwrap();
        let report = service.get_request(id, "agent-1").await.unwrap().unwrap();

        assert_eq!(report.request.status, CmaStatus::Completed);
        assert_eq!(report.request.comps_count, Some(0));
        assert_eq!(report.request.estimated_value, Some(Default::default()));
    }

    #[tokio::test]
    async fn test_get_request_is_scoped_to_requester() {
        let store = Arc::new(MemoryCmaStore::new());
        let service = service(store, mock_chain(2));

        let id = service.generate("agent-1", ADDRESS, None).await.unwrap();

        assert!(service.get_request(id, "agent-2").await.unwrap().is_none());
        assert!(service
            .get_request(Uuid::new_v4(), "agent-1")
            .await
            .unwrap()
            .is_none());

        let first = service.get_request(id, "agent-1").await.unwrap();
        let second = service.get_request(id, "agent-1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_report_keeps_request_completed() {
        let store = Arc::new(MemoryCmaStore::new());
        let reports = Arc::new(StaticReport {
            result: Err(ReportError("renderer down".to_string())),
            calls: AtomicUsize::new(0),
        });
        let service = service(store, mock_chain(3)).with_reports(reports.clone());

        let id = service.generate("agent-1", ADDRESS, None).await.unwrap();

        for _ in 0..100 {
            if reports.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reports.calls.load(Ordering::SeqCst), 1);

        let report = service.get_request(id, "agent-1").await.unwrap().unwrap();
        assert_eq!(report.request.status, CmaStatus::Completed);
        assert!(report.request.report_url.is_none());
    }

    #[tokio::test]
    async fn test_report_url_arrives_after_completion() {
        let store = Arc::new(MemoryCmaStore::new());
        let reports = Arc::new(StaticReport {
            result: Ok("reports/cma.pdf".to_string()),
            calls: AtomicUsize::new(0),
        });
        let service = service(store, mock_chain(4)).with_reports(reports);

        let id = service.generate("agent-1", ADDRESS, None).await.unwrap();

        let mut url = None;
        for _ in 0..100 {
            let report = service.get_request(id, "agent-1").await.unwrap().unwrap();
            if report.request.report_url.is_some() {
                url = report.request.report_url;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(url.as_deref(), Some("reports/cma.pdf"));
    }

    #[tokio::test]
    async fn test_history_uses_default_limit() {
        let store = Arc::new(MemoryCmaStore::new());
        let service = service(store, mock_chain(8)).with_history_limit(2);

        for _ in 0..3 {
            service.generate("agent-1", ADDRESS, None).await.unwrap();
        }

        assert_eq!(service.get_history("agent-1", None).await.unwrap().len(), 2);
        assert_eq!(service.get_history("agent-1", Some(5)).await.unwrap().len(), 3);
        assert!(service.get_history("agent-2", None).await.unwrap().is_empty());
    }
}
