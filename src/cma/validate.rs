//! Input validation and address helpers
//! Pure functions - no side effects

use crate::cma::error::ValidationError;
use crate::cma::types::{PropertyDetails, PropertyDetailsInput};
use chrono::{Datelike, Utc};
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::LazyLock;

/// Pre-compiled address patterns
static ZIP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9]{5}\b").expect("valid ZIP pattern"));
static STATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2})\s+[0-9]{5}\b").expect("valid state pattern"));

/// Validate a property address and return it trimmed
pub fn validate_property_address(address: &str) -> Result<String, ValidationError> {
    let trimmed = address.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::new(
            "address",
            "Property address cannot be empty",
        ));
    }

    if trimmed.chars().count() < 5 {
        return Err(ValidationError::new(
            "address",
            "Property address must be at least 5 characters",
        ));
    }

    // At least one digit, read as the street number
    if !trimmed.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new(
            "address",
            "Property address should include a street number",
        ));
    }

    Ok(trimmed.to_string())
}

/// Validate detail hints against their bounds, using the current year
pub fn validate_property_details(
    details: &PropertyDetailsInput,
) -> Result<PropertyDetails, ValidationError> {
    validate_property_details_for_year(details, Utc::now().year())
}

/// Validate detail hints against their bounds.
/// beds, sqft and year_built are floored to integers; nothing else is adjusted.
pub fn validate_property_details_for_year(
    details: &PropertyDetailsInput,
    current_year: i32,
) -> Result<PropertyDetails, ValidationError> {
    let mut validated = PropertyDetails::default();

    if let Some(beds) = details.beds {
        if !in_bounds(beds, 0.0, 50.0) {
            return Err(ValidationError::new(
                "beds",
                "Beds must be a number between 0 and 50",
            ));
        }
        validated.beds = Some(beds.floor() as i32);
    }

    if let Some(baths) = details.baths {
        if !in_bounds(baths, 0.0, 50.0) {
            return Err(ValidationError::new(
                "baths",
                "Baths must be a number between 0 and 50",
            ));
        }
        validated.baths = Some(to_decimal("baths", baths)?);
    }

    if let Some(sqft) = details.sqft {
        if !in_bounds(sqft, 0.0, 100_000.0) {
            return Err(ValidationError::new(
                "sqft",
                "Square footage must be a number between 0 and 100,000",
            ));
        }
        validated.sqft = Some(sqft.floor() as i32);
    }

    if let Some(lot_size) = details.lot_size {
        if !in_bounds(lot_size, 0.0, 1_000_000.0) {
            return Err(ValidationError::new(
                "lot_size",
                "Lot size must be a number between 0 and 1,000,000",
            ));
        }
        validated.lot_size = Some(to_decimal("lot_size", lot_size)?);
    }

    if let Some(year_built) = details.year_built {
        let max_year = current_year + 1;
        if !in_bounds(year_built, 1800.0, max_year as f64) {
            return Err(ValidationError::new(
                "year_built",
                format!("Year built must be a number between 1800 and {}", max_year),
            ));
        }
        validated.year_built = Some(year_built.floor() as i32);
    }

    Ok(validated)
}

fn in_bounds(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value >= min && value <= max
}

fn to_decimal(field: &'static str, value: f64) -> Result<Decimal, ValidationError> {
    Decimal::from_f64(value)
        .ok_or_else(|| ValidationError::new(field, format!("{} is not representable", value)))
}

/// First standalone 5-digit run in the address
pub fn extract_zip(address: &str) -> Option<String> {
    ZIP_PATTERN.find(address).map(|m| m.as_str().to_string())
}

/// Two-letter state code preceding the ZIP, e.g. "CO" in "Denver, CO 80202"
pub fn extract_state(address: &str) -> Option<String> {
    STATE_PATTERN
        .captures(address)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// City segment, taken as the second-to-last comma-separated part
pub fn extract_city(address: &str) -> Option<String> {
    let parts: Vec<&str> = address.split(',').collect();
    if parts.len() >= 2 {
        let city = parts[parts.len() - 2].trim();
        if !city.is_empty() {
            return Some(city.to_string());
        }
    }
    None
}
