//! CMA runner - generate and inspect CMAs against PostgreSQL

use anyhow::{bail, Context, Result};
use cma_engine::cma::store_pg::{run_migrations, PgCmaStore};
use cma_engine::cma::{CmaService, PropertyDetailsInput};
use cma_engine::Config;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

const USAGE: &str = "usage:
  cma-runner generate <requester> <address> [beds=N baths=N sqft=N lot_size=N year_built=N]
  cma-runner show <requester> <request-id>
  cma-runner history <requester> [limit]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    info!("Configuration loaded");

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        bail!("{}", USAGE);
    }

    // Connect to database
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run CMA migrations")?;
    info!("Database connected");

    let service = CmaService::new(Arc::new(PgCmaStore::new(pool)), config.build_chain())
        .with_history_limit(config.history_limit);

    match args[0].as_str() {
        "generate" => {
            let (requester, address) = match (args.get(1), args.get(2)) {
                (Some(r), Some(a)) => (r, a),
                _ => bail!("{}", USAGE),
            };
            let details = parse_details(&args[3..])?;

            match service.generate(requester, address, details.as_ref()).await {
                Ok(id) => {
                    info!("CMA {} generated", id);
                    print_report(&service, id, requester).await?;
                }
                Err(e) => {
                    error!("CMA generation failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        "show" => {
            let (requester, id) = match (args.get(1), args.get(2)) {
                (Some(r), Some(id)) => (r, id),
                _ => bail!("{}", USAGE),
            };
            let id = Uuid::parse_str(id).context("request-id must be a UUID")?;
            print_report(&service, id, requester).await?;
        }
        "history" => {
            let requester = match args.get(1) {
                Some(r) => r,
                None => bail!("{}", USAGE),
            };
            let limit = args
                .get(2)
                .map(|l| l.parse::<usize>())
                .transpose()
                .context("limit must be a number")?;

            let history = service.get_history(requester, limit).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }

    Ok(())
}

async fn print_report(service: &CmaService, id: Uuid, requester: &str) -> Result<()> {
    match service.get_request(id, requester).await? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => bail!("CMA {} not found", id),
    }
    Ok(())
}

/// Parse `key=value` detail hints; none given means no target details
fn parse_details(args: &[String]) -> Result<Option<PropertyDetailsInput>> {
    if args.is_empty() {
        return Ok(None);
    }

    let mut details = PropertyDetailsInput::default();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .with_context(|| format!("expected key=value, got {:?}", arg))?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("{} must be a number", key))?;

        match key {
            "beds" => details.beds = Some(value),
            "baths" => details.baths = Some(value),
            "sqft" => details.sqft = Some(value),
            "lot_size" => details.lot_size = Some(value),
            "year_built" => details.year_built = Some(value),
            _ => bail!("unknown detail {:?}", key),
        }
    }

    Ok(Some(details))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_details() {
        let args = vec!["beds=3".to_string(), "baths=2.5".to_string()];
        let details = parse_details(&args).unwrap().unwrap();
        assert_eq!(details.beds, Some(3.0));
        assert_eq!(details.baths, Some(2.5));
        assert!(details.sqft.is_none());

        assert!(parse_details(&[]).unwrap().is_none());
        assert!(parse_details(&["pool=1".to_string()]).is_err());
        assert!(parse_details(&["beds".to_string()]).is_err());
    }
}
