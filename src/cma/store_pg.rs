//! PostgreSQL-backed CMA store

use crate::cma::error::PersistenceError;
use crate::cma::store::{CmaStore, StoreResult};
use crate::cma::types::{
    CmaComp, CmaRequest, CmaStatus, Comp, CompletedCma, EstimatedValue, NewCmaRequest,
    PropertyDetails,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgHasArrayType, PgTypeInfo};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

/// Create the CMA schema if it does not exist yet
pub async fn run_migrations(db: &PgPool) -> Result<(), sqlx::Error> {
    info!("Running CMA migrations");

    sqlx::query(
        r#"
        DO $$ BEGIN
            CREATE TYPE cma_status_enum AS ENUM ('pending', 'processing', 'completed', 'failed');
        EXCEPTION
            WHEN duplicate_object THEN NULL;
        END $$;
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cma_requests (
            id UUID PRIMARY KEY,
            requester_id TEXT NOT NULL,
            property_address TEXT NOT NULL,
            property_zip TEXT,
            property_details JSONB,
            status cma_status_enum NOT NULL DEFAULT 'pending',
            data_source TEXT,
            comps_count INTEGER,
            estimated_value JSONB,
            report_url TEXT,
            error_message TEXT,
            requested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            generated_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS cma_requests_requester_idx
            ON cma_requests (requester_id, requested_at DESC)
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cma_comps (
            id UUID PRIMARY KEY,
            cma_request_id UUID NOT NULL REFERENCES cma_requests (id) ON DELETE CASCADE,
            rank INTEGER NOT NULL,
            address TEXT NOT NULL,
            sale_price NUMERIC,
            list_price NUMERIC,
            sold_date DATE,
            list_date DATE,
            beds INTEGER,
            baths NUMERIC,
            sqft INTEGER,
            lot_size NUMERIC,
            year_built INTEGER,
            data_source TEXT NOT NULL,
            source_url TEXT,
            similarity_score DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS cma_comps_request_rank_idx
            ON cma_comps (cma_request_id, rank)
        "#,
    )
    .execute(db)
    .await?;

    Ok(())
}

/// Database row from cma_requests
#[derive(Debug, sqlx::FromRow)]
struct CmaRequestRow {
    id: Uuid,
    requester_id: String,
    property_address: String,
    property_zip: Option<String>,
    property_details: Option<Json<PropertyDetails>>,
    status: CmaStatus,
    data_source: Option<String>,
    comps_count: Option<i32>,
    estimated_value: Option<Json<EstimatedValue>>,
    report_url: Option<String>,
    error_message: Option<String>,
    requested_at: DateTime<Utc>,
    generated_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<CmaRequestRow> for CmaRequest {
    fn from(row: CmaRequestRow) -> Self {
        CmaRequest {
            id: row.id,
            requester_id: row.requester_id,
            property_address: row.property_address,
            property_zip: row.property_zip,
            property_details: row.property_details.map(|d| d.0),
            status: row.status,
            data_source: row.data_source,
            comps_count: row.comps_count,
            estimated_value: row.estimated_value.map(|v| v.0),
            report_url: row.report_url,
            error_message: row.error_message,
            requested_at: row.requested_at,
            generated_at: row.generated_at,
            updated_at: row.updated_at,
        }
    }
}

const REQUEST_COLUMNS: &str = r#"
    id, requester_id, property_address, property_zip, property_details,
    status, data_source, comps_count, estimated_value, report_url,
    error_message, requested_at, generated_at, updated_at
"#;

/// CMA store on a shared connection pool
#[derive(Clone)]
pub struct PgCmaStore {
    db: PgPool,
}

impl PgCmaStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn current_status(&self, id: Uuid) -> StoreResult<CmaStatus> {
        sqlx::query_scalar::<_, CmaStatus>("SELECT status FROM cma_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(PersistenceError::NotFound(id))
    }

    /// Explain why a guarded UPDATE touched no rows
    async fn rejected_transition(&self, id: Uuid, to: CmaStatus) -> PersistenceError {
        match self.current_status(id).await {
            Ok(from) => PersistenceError::InvalidTransition { id, from, to },
            Err(e) => e,
        }
    }
}

impl PgHasArrayType for CmaStatus {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_cma_status_enum")
    }
}

/// Statuses a request may be in to move to `to`
fn allowed_from(to: CmaStatus) -> Vec<CmaStatus> {
    [
        CmaStatus::Pending,
        CmaStatus::Processing,
        CmaStatus::Completed,
        CmaStatus::Failed,
    ]
    .into_iter()
    .filter(|from| from.can_transition_to(to))
    .collect()
}

#[async_trait]
impl CmaStore for PgCmaStore {
    async fn create_request(&self, new: NewCmaRequest) -> StoreResult<CmaRequest> {
        let row = sqlx::query_as::<_, CmaRequestRow>(&format!(
            r#"
            INSERT INTO cma_requests (
                id, requester_id, property_address, property_zip, property_details,
                status, requested_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.requester_id)
        .bind(&new.property_address)
        .bind(&new.property_zip)
        .bind(new.property_details.map(Json))
        .bind(CmaStatus::Pending)
        .fetch_one(&self.db)
        .await?;

        debug!("Inserted CMA request {}", row.id);
        Ok(row.into())
    }

    async fn update_status(&self, id: Uuid, status: CmaStatus) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE cma_requests SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = ANY($3)
            "#,
        )
        .bind(status)
        .bind(id)
        .bind(allowed_from(status))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, status).await);
        }
        Ok(())
    }

    async fn insert_comps(&self, id: Uuid, comps: &[Comp]) -> StoreResult<usize> {
        let mut tx = self.db.begin().await?;

        for (rank, comp) in comps.iter().enumerate() {
            let row = CmaComp::from_ranked(id, rank, comp);
            sqlx::query(
                r#"
                INSERT INTO cma_comps (
                    id, cma_request_id, rank, address, sale_price, list_price,
                    sold_date, list_date, beds, baths, sqft, lot_size, year_built,
                    data_source, source_url, similarity_score, created_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17
                )
                "#,
            )
            .bind(row.id)
            .bind(row.cma_request_id)
            .bind(row.rank)
            .bind(&row.address)
            .bind(row.sale_price)
            .bind(row.list_price)
            .bind(row.sold_date)
            .bind(row.list_date)
            .bind(row.beds)
            .bind(row.baths)
            .bind(row.sqft)
            .bind(row.lot_size)
            .bind(row.year_built)
            .bind(&row.data_source)
            .bind(&row.source_url)
            .bind(row.similarity_score)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted {} comps for CMA request {}", comps.len(), id);
        Ok(comps.len())
    }

    async fn delete_comps(&self, id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM cma_comps WHERE cma_request_id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_completed(&self, id: Uuid, result: &CompletedCma) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE cma_requests SET
                status = $1, data_source = $2, comps_count = $3,
                estimated_value = $4, generated_at = $5, updated_at = NOW()
            WHERE id = $6 AND status = ANY($7)
            "#,
        )
        .bind(CmaStatus::Completed)
        .bind(&result.data_source)
        .bind(result.comps_count)
        .bind(Json(result.estimated_value))
        .bind(result.generated_at)
        .bind(id)
        .bind(allowed_from(CmaStatus::Completed))
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.rejected_transition(id, CmaStatus::Completed).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE cma_requests SET status = $1, error_message = $2, updated_at = NOW()
            WHERE id = $3 AND status = ANY($4)
            "#,
        )
        .bind(CmaStatus::Failed)
        .bind(error_message)
        .bind(id)
        .bind(allowed_from(CmaStatus::Failed))
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.rejected_transition(id, CmaStatus::Failed).await);
        }
        Ok(())
    }

    async fn set_report_url(&self, id: Uuid, url: &str) -> StoreResult<()> {
        let updated = sqlx::query(
            "UPDATE cma_requests SET report_url = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(url)
        .bind(id)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(id));
        }
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<CmaRequest>> {
        let row = sqlx::query_as::<_, CmaRequestRow>(&format!(
            "SELECT {} FROM cma_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(CmaRequest::from))
    }

    async fn get_comps(&self, id: Uuid) -> StoreResult<Vec<CmaComp>> {
        let comps = sqlx::query_as::<_, CmaComp>(
            r#"
            SELECT id, cma_request_id, rank, address, sale_price, list_price,
                   sold_date, list_date, beds, baths, sqft, lot_size, year_built,
                   data_source, source_url, similarity_score, created_at
            FROM cma_comps
            WHERE cma_request_id = $1
            ORDER BY rank
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(comps)
    }

    async fn list_requests(
        &self,
        requester_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<CmaRequest>> {
        let rows = sqlx::query_as::<_, CmaRequestRow>(&format!(
            r#"
            SELECT {} FROM cma_requests
            WHERE requester_id = $1
            ORDER BY requested_at DESC
            LIMIT $2
            "#,
            REQUEST_COLUMNS
        ))
        .bind(requester_id)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(CmaRequest::from).collect())
    }
}
