// Library module for CMA generation

pub mod cma;
pub mod config;

pub use cma::{CmaError, CmaService};
pub use config::Config;
