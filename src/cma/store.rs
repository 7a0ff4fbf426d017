//! Persistence for CMA requests and their ranked comps

use crate::cma::error::PersistenceError;
use crate::cma::types::{
    CmaComp, CmaRequest, CmaStatus, Comp, CompletedCma, NewCmaRequest,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

/// Storage operations the orchestrator needs.
///
/// Status-changing writes must refuse transitions that
/// `CmaStatus::can_transition_to` does not allow.
#[async_trait]
pub trait CmaStore: Send + Sync {
    /// Insert a new request in `pending`
    async fn create_request(&self, new: NewCmaRequest) -> StoreResult<CmaRequest>;

    async fn update_status(&self, id: Uuid, status: CmaStatus) -> StoreResult<()>;

    /// Insert ranked comps atomically; `comps[i]` gets rank `i`
    async fn insert_comps(&self, id: Uuid, comps: &[Comp]) -> StoreResult<usize>;

    async fn delete_comps(&self, id: Uuid) -> StoreResult<u64>;

    async fn mark_completed(&self, id: Uuid, result: &CompletedCma) -> StoreResult<()>;

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> StoreResult<()>;

    /// Attach a report artifact; allowed after the request is terminal
    async fn set_report_url(&self, id: Uuid, url: &str) -> StoreResult<()>;

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<CmaRequest>>;

    /// Comps ordered by rank
    async fn get_comps(&self, id: Uuid) -> StoreResult<Vec<CmaComp>>;

    /// Requests for one requester, newest first
    async fn list_requests(&self, requester_id: &str, limit: usize)
        -> StoreResult<Vec<CmaRequest>>;
}

#[derive(Default)]
struct MemoryTables {
    requests: HashMap<Uuid, CmaRequest>,
    comps: HashMap<Uuid, Vec<CmaComp>>,
}

/// In-process store; writes are serialized behind one lock
#[derive(Default)]
pub struct MemoryCmaStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryCmaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn request_count(&self) -> usize {
        self.tables.read().await.requests.len()
    }
}

fn transition(request: &mut CmaRequest, to: CmaStatus) -> StoreResult<()> {
    if !request.status.can_transition_to(to) {
        return Err(PersistenceError::InvalidTransition {
            id: request.id,
            from: request.status,
            to,
        });
    }
    request.status = to;
    request.updated_at = Utc::now();
    Ok(())
}

#[async_trait]
impl CmaStore for MemoryCmaStore {
    async fn create_request(&self, new: NewCmaRequest) -> StoreResult<CmaRequest> {
        let now = Utc::now();
        let request = CmaRequest {
            id: Uuid::new_v4(),
            requester_id: new.requester_id,
            property_address: new.property_address,
            property_zip: new.property_zip,
            property_details: new.property_details,
            status: CmaStatus::Pending,
            data_source: None,
            comps_count: None,
            estimated_value: None,
            report_url: None,
            error_message: None,
            requested_at: now,
            generated_at: None,
            updated_at: now,
        };

        let mut tables = self.tables.write().await;
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn update_status(&self, id: Uuid, status: CmaStatus) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let request = tables
            .requests
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;
        transition(request, status)
    }

    async fn insert_comps(&self, id: Uuid, comps: &[Comp]) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        if !tables.requests.contains_key(&id) {
            return Err(PersistenceError::NotFound(id));
        }

        let rows: Vec<CmaComp> = comps
            .iter()
            .enumerate()
            .map(|(rank, comp)| CmaComp::from_ranked(id, rank, comp))
            .collect();
        let inserted = rows.len();
        // One batch per request, as a single transaction would leave it
        tables.comps.insert(id, rows);
        Ok(inserted)
    }

    async fn delete_comps(&self, id: Uuid) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        Ok(tables.comps.remove(&id).map(|c| c.len() as u64).unwrap_or(0))
    }

    async fn mark_completed(&self, id: Uuid, result: &CompletedCma) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let request = tables
            .requests
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;

        transition(request, CmaStatus::Completed)?;
        request.data_source = Some(result.data_source.clone());
        request.comps_count = Some(result.comps_count);
        request.estimated_value = Some(result.estimated_value);
        request.generated_at = Some(result.generated_at);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let request = tables
            .requests
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;

        transition(request, CmaStatus::Failed)?;
        request.error_message = Some(error_message.to_string());
        Ok(())
    }

    async fn set_report_url(&self, id: Uuid, url: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let request = tables
            .requests
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;

        request.report_url = Some(url.to_string());
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<CmaRequest>> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn get_comps(&self, id: Uuid) -> StoreResult<Vec<CmaComp>> {
        let tables = self.tables.read().await;
        let mut comps = tables.comps.get(&id).cloned().unwrap_or_default();
        comps.sort_by_key(|c| c.rank);
        Ok(comps)
    }

    async fn list_requests(
        &self,
        requester_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<CmaRequest>> {
        let tables = self.tables.read().await;
        let mut requests: Vec<CmaRequest> = tables
            .requests
            .values()
            .filter(|r| r.requester_id == requester_id)
            .cloned()
            .collect();

        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        requests.truncate(limit);
        Ok(requests)
    }
}
