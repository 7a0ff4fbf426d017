//! Core data types for the CMA pipeline
//! Mostly plain data; the small helpers here carry no I/O

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

/// Attributes of a target property or a comp.
/// `None` means unknown, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDetails {
    pub beds: Option<i32>,
    pub baths: Option<Decimal>,
    pub sqft: Option<i32>,
    pub lot_size: Option<Decimal>,
    pub year_built: Option<i32>,
}

/// Unvalidated detail hints as a caller supplies them.
/// Turned into `PropertyDetails` by `validate::validate_property_details`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDetailsInput {
    pub beds: Option<f64>,
    pub baths: Option<f64>,
    pub sqft: Option<f64>,
    pub lot_size: Option<f64>,
    pub year_built: Option<f64>,
}

/// A comparable property as produced by a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comp {
    pub address: String,
    pub sale_price: Option<Decimal>,
    pub list_price: Option<Decimal>,
    pub sold_date: Option<NaiveDate>,
    pub list_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub details: PropertyDetails,
    pub data_source: String,
    pub source_url: Option<String>,
    /// Assigned by the scorer; `None` on a raw fetch
    pub similarity_score: Option<f64>,
}

impl Comp {
    /// Price used for valuation: sale price wins over list price
    pub fn usable_price(&self) -> Option<Decimal> {
        self.sale_price.or(self.list_price)
    }

    /// Date used for recency ordering. Undated comps sort as the epoch.
    pub fn recency_date(&self) -> NaiveDate {
        // NaiveDate::default() is 1970-01-01
        self.sold_date.or(self.list_date).unwrap_or_default()
    }
}

/// Lifecycle status of a CMA request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "cma_status_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CmaStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CmaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CmaStatus::Completed | CmaStatus::Failed)
    }

    /// pending -> processing -> {completed | failed}; pending may also fail
    /// outright when processing never starts
    pub fn can_transition_to(&self, next: CmaStatus) -> bool {
        matches!(
            (self, next),
            (CmaStatus::Pending, CmaStatus::Processing)
                | (CmaStatus::Pending, CmaStatus::Failed)
                | (CmaStatus::Processing, CmaStatus::Completed)
                | (CmaStatus::Processing, CmaStatus::Failed)
        )
    }
}

impl std::fmt::Display for CmaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CmaStatus::Pending => write!(f, "pending"),
            CmaStatus::Processing => write!(f, "processing"),
            CmaStatus::Completed => write!(f, "completed"),
            CmaStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Low/mid/high value estimate in whole currency units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatedValue {
    pub low: i64,
    pub mid: i64,
    pub high: i64,
}

impl std::fmt::Display for EstimatedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "low: {}, mid: {}, high: {}", self.low, self.mid, self.high)
    }
}

/// A CMA request record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmaRequest {
    pub id: Uuid,
    pub requester_id: String,
    pub property_address: String,
    pub property_zip: Option<String>,
    pub property_details: Option<PropertyDetails>,
    pub status: CmaStatus,
    pub data_source: Option<String>,
    pub comps_count: Option<i32>,
    pub estimated_value: Option<EstimatedValue>,
    pub report_url: Option<String>,
    pub error_message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub generated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a request row
#[derive(Debug, Clone)]
pub struct NewCmaRequest {
    pub requester_id: String,
    pub property_address: String,
    pub property_zip: Option<String>,
    pub property_details: Option<PropertyDetails>,
}

/// Result data written on the `completed` transition
#[derive(Debug, Clone)]
pub struct CompletedCma {
    pub data_source: String,
    pub comps_count: i32,
    pub estimated_value: EstimatedValue,
    pub generated_at: DateTime<Utc>,
}

/// A persisted, ranked comp belonging to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CmaComp {
    pub id: Uuid,
    pub cma_request_id: Uuid,
    /// Zero-based position in the similarity ranking
    pub rank: i32,
    pub address: String,
    pub sale_price: Option<Decimal>,
    pub list_price: Option<Decimal>,
    pub sold_date: Option<NaiveDate>,
    pub list_date: Option<NaiveDate>,
    pub beds: Option<i32>,
    pub baths: Option<Decimal>,
    pub sqft: Option<i32>,
    pub lot_size: Option<Decimal>,
    pub year_built: Option<i32>,
    pub data_source: String,
    pub source_url: Option<String>,
    pub similarity_score: f64,
    pub created_at: DateTime<Utc>,
}

impl CmaComp {
    /// Build the row for `comp` at position `rank`
    pub fn from_ranked(cma_request_id: Uuid, rank: usize, comp: &Comp) -> Self {
        CmaComp {
            id: Uuid::new_v4(),
            cma_request_id,
            rank: rank as i32,
            address: comp.address.clone(),
            sale_price: comp.sale_price,
            list_price: comp.list_price,
            sold_date: comp.sold_date,
            list_date: comp.list_date,
            beds: comp.details.beds,
            baths: comp.details.baths,
            sqft: comp.details.sqft,
            lot_size: comp.details.lot_size,
            year_built: comp.details.year_built,
            data_source: comp.data_source.clone(),
            source_url: comp.source_url.clone(),
            similarity_score: comp.similarity_score.unwrap_or(0.0),
            created_at: Utc::now(),
        }
    }
}

/// A request together with its ranked comps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmaReport {
    #[serde(flatten)]
    pub request: CmaRequest,
    pub comps: Vec<CmaComp>,
}
