//! CMA engine - comparable sales, similarity ranking and value estimates

pub mod chain;
pub mod error;
pub mod estimate;
pub mod report;
pub mod score;
pub mod service;
pub mod source;
pub mod store;
pub mod store_pg;
pub mod synthetic;
pub mod types;
pub mod validate;

pub use chain::{FallbackChain, RetryPolicy, SourcedComps};
pub use error::{
    AllSourcesExhausted, CmaError, CmaResult, DataSourceError, PersistenceError, ValidationError,
};
pub use report::{ReportError, ReportGenerator};
pub use service::CmaService;
pub use source::{AccessCheck, DataSource};
pub use store::{CmaStore, MemoryCmaStore};
pub use store_pg::PgCmaStore;
pub use synthetic::{SyntheticProfile, SyntheticSource};
pub use types::*;
