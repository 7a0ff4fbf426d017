//! Synthetic comp generators
//!
//! Two profiles share one generator: `mock`, the lowest-priority fallback,
//! and `public_records`, which stands in for a county-assessor feed until a
//! real integration exists. Both vary a target property's attributes and
//! price the result off a per-square-foot band.

use crate::cma::error::DataSourceError;
use crate::cma::source::{AccessCheck, DataSource};
use crate::cma::types::{Comp, PropertyDetails};
use crate::cma::validate::{extract_city, extract_state, extract_zip};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::ops::Range;
use std::sync::Mutex;
use tracing::{info, warn};

const DEFAULT_BEDS: i32 = 3;
const DEFAULT_BATHS: f64 = 2.0;
const DEFAULT_SQFT: i32 = 1800;
const DEFAULT_YEAR_BUILT: i32 = 2010;

const STREETS: [&str; 8] = [
    "Main", "Oak", "Elm", "Park", "First", "Second", "Maple", "Cedar",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticKind {
    Mock,
    PublicRecords,
}

/// Shape of the generated data
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticProfile {
    pub kind: SyntheticKind,
    pub source_tag: String,
    /// Inclusive bounds on how many comps one fetch returns
    pub min_comps: usize,
    pub max_comps: usize,
    /// Year built varies by +/- this many years
    pub year_spread: i32,
    /// Share of comps generated as sold (the rest are active listings)
    pub sold_ratio: f64,
    pub sold_days_ago: Range<i64>,
    pub listed_days_ago: Range<i64>,
    pub price_per_sqft_min: f64,
    pub price_per_sqft_max: f64,
}

impl SyntheticProfile {
    pub fn mock() -> Self {
        Self {
            kind: SyntheticKind::Mock,
            source_tag: "mock".to_string(),
            min_comps: 10,
            max_comps: 10,
            year_spread: 5,
            sold_ratio: 0.7,
            sold_days_ago: 0..180,
            listed_days_ago: 0..30,
            price_per_sqft_min: 200.0,
            price_per_sqft_max: 300.0,
        }
    }

    /// Recorded deeds: more comps, older sales, wider age spread
    pub fn public_records() -> Self {
        Self {
            kind: SyntheticKind::PublicRecords,
            source_tag: "public_records".to_string(),
            min_comps: 10,
            max_comps: 15,
            year_spread: 10,
            sold_ratio: 0.8,
            sold_days_ago: 30..180,
            listed_days_ago: 0..30,
            price_per_sqft_min: 200.0,
            price_per_sqft_max: 300.0,
        }
    }

    pub fn with_comp_count(mut self, count: usize) -> Self {
        self.min_comps = count;
        self.max_comps = count;
        self
    }

    pub fn with_price_band(mut self, min: f64, max: f64) -> Self {
        self.price_per_sqft_min = min;
        self.price_per_sqft_max = max;
        self
    }
}

/// Data source backed by the synthetic generator
pub struct SyntheticSource {
    profile: SyntheticProfile,
    rng: Mutex<StdRng>,
    reference_date: Option<NaiveDate>,
}

impl SyntheticSource {
    pub fn new(profile: SyntheticProfile) -> Self {
        Self {
            profile,
            rng: Mutex::new(StdRng::from_entropy()),
            reference_date: None,
        }
    }

    /// Same seed, same profile, same reference date: same comps
    pub fn seeded(profile: SyntheticProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            reference_date: None,
        }
    }

    pub fn mock() -> Self {
        Self::new(SyntheticProfile::mock())
    }

    pub fn public_records() -> Self {
        Self::new(SyntheticProfile::public_records())
    }

    /// Pin "today" for sold/listed dates
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Generate comps around `target`, filling unknown attributes with defaults
    pub fn generate(&self, address: &str, target: Option<&PropertyDetails>) -> Vec<Comp> {
        let today = self
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive());

        // A zero attribute seeds nothing useful; treat it as unknown
        let target_beds = target
            .and_then(|t| t.beds)
            .filter(|b| *b > 0)
            .unwrap_or(DEFAULT_BEDS);
        let target_baths = target
            .and_then(|t| t.baths)
            .and_then(|b| b.to_f64())
            .filter(|b| *b > 0.0)
            .unwrap_or(DEFAULT_BATHS);
        let target_sqft = target
            .and_then(|t| t.sqft)
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_SQFT);
        let target_year = target
            .and_then(|t| t.year_built)
            .filter(|y| *y > 0)
            .unwrap_or(DEFAULT_YEAR_BUILT);

        let zip = extract_zip(address);
        let city = extract_city(address).unwrap_or_else(|| "Denver".to_string());
        let state = extract_state(address).unwrap_or_else(|| "CO".to_string());

        let profile = &self.profile;
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let count = if profile.max_comps > profile.min_comps {
            rng.gen_range(profile.min_comps..=profile.max_comps)
        } else {
            profile.min_comps
        };

        let mut comps = Vec::with_capacity(count);

        for i in 0..count {
            let beds = (target_beds + rng.gen_range(-1..=1)).max(1);

            let baths = (target_baths + rng.gen_range(-0.75..0.75)).max(0.5);
            let baths = (baths * 2.0).round() / 2.0;

            let sqft_variation = 1.0 + rng.gen_range(-0.2..0.2);
            let sqft = (target_sqft as f64 * sqft_variation).floor() as i32;

            let year_built =
                target_year + rng.gen_range(-profile.year_spread..=profile.year_spread);

            let price_per_sqft = if profile.price_per_sqft_max > profile.price_per_sqft_min {
                rng.gen_range(profile.price_per_sqft_min..profile.price_per_sqft_max)
            } else {
                profile.price_per_sqft_min
            };
            let price = Decimal::from((sqft as f64 * price_per_sqft).floor() as i64);

            let is_sold = rng.gen_bool(profile.sold_ratio);

            let street_number = rng.gen_range(1..=9999);
            let street = STREETS[rng.gen_range(0..STREETS.len())];
            let comp_zip = match &zip {
                Some(z) => z.clone(),
                None => format!("8020{}", rng.gen_range(0..10)),
            };

            let source_url = match profile.kind {
                SyntheticKind::Mock => format!(
                    "https://mock-mls.example.com/listing/{}",
                    rng.gen_range(0..10_000)
                ),
                SyntheticKind::PublicRecords => {
                    format!("https://assessor.example.com/property/{}/{}", comp_zip, i)
                }
            };

            let lot_size = Decimal::from(rng.gen_range(5000i64..10_000));

            let mut comp = Comp {
                address: format!(
                    "{} {} St, {}, {} {}",
                    street_number, street, city, state, comp_zip
                ),
                sale_price: None,
                list_price: None,
                sold_date: None,
                list_date: None,
                details: PropertyDetails {
                    beds: Some(beds),
                    baths: Decimal::from_f64(baths),
                    sqft: Some(sqft),
                    lot_size: Some(lot_size),
                    year_built: Some(year_built),
                },
                data_source: profile.source_tag.clone(),
                source_url: Some(source_url),
                similarity_score: None,
            };

            if is_sold {
                let days_ago = days_in(&mut rng, &profile.sold_days_ago);
                comp.sale_price = Some(price);
                comp.sold_date = Some(today - Duration::days(days_ago));
            } else {
                let days_ago = days_in(&mut rng, &profile.listed_days_ago);
                comp.list_price = Some(price);
                comp.list_date = Some(today - Duration::days(days_ago));
            }

            comps.push(comp);
        }

        comps
    }
}

fn days_in(rng: &mut StdRng, range: &Range<i64>) -> i64 {
    if range.end > range.start {
        rng.gen_range(range.clone())
    } else {
        range.start
    }
}

#[async_trait]
impl DataSource for SyntheticSource {
    fn source_tag(&self) -> &str {
        &self.profile.source_tag
    }

    async fn validate_access(&self, address: &str) -> AccessCheck {
        match self.profile.kind {
            SyntheticKind::Mock => AccessCheck::available(),
            SyntheticKind::PublicRecords => {
                if extract_zip(address).is_some() {
                    AccessCheck::available()
                } else {
                    AccessCheck::unavailable("Could not extract ZIP code from address")
                }
            }
        }
    }

    async fn fetch_comps(
        &self,
        address: &str,
        target: Option<&PropertyDetails>,
    ) -> Result<Vec<Comp>, DataSourceError> {
        if self.profile.kind == SyntheticKind::PublicRecords && extract_zip(address).is_none() {
            warn!("Could not extract ZIP code from {}", address);
            return Ok(Vec::new());
        }

        let comps = self.generate(address, target);
        info!(
            "Generated {} {} comps for {}",
            comps.len(),
            self.profile.source_tag,
            address
        );
        Ok(comps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "123 Main St, Denver, CO 80202";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn seeded_mock(seed: u64) -> SyntheticSource {
        SyntheticSource::seeded(SyntheticProfile::mock(), seed).with_reference_date(today())
    }

    #[test]
    fn test_same_seed_same_comps() {
        let a = seeded_mock(42).generate(ADDRESS, None);
        let b = seeded_mock(42).generate(ADDRESS, None);
        assert_eq!(a, b);

        let c = seeded_mock(43).generate(ADDRESS, None);
        assert_ne!(a, c);
    }

    #[test]
    fn test_mock_defaults_and_variation_bounds() {
        let comps = seeded_mock(7).generate(ADDRESS, None);
        assert_eq!(comps.len(), 10);

        for comp in &comps {
            let beds = comp.details.beds.unwrap();
            assert!((2..=4).contains(&beds), "beds {}", beds);

            let baths = comp.details.baths.unwrap().to_f64().unwrap();
            assert!((1.0..=3.0).contains(&baths), "baths {}", baths);
            assert_eq!((baths * 2.0).fract(), 0.0, "baths {} not a half step", baths);

            let sqft = comp.details.sqft.unwrap();
            assert!((1439..=2160).contains(&sqft), "sqft {}", sqft);

            let year = comp.details.year_built.unwrap();
            assert!((2005..=2015).contains(&year), "year {}", year);

            let price = comp.usable_price().unwrap().to_f64().unwrap();
            assert!(price >= sqft as f64 * 200.0 - 1.0);
            assert!(price <= sqft as f64 * 300.0);

            assert_eq!(comp.data_source, "mock");
            assert!(comp.similarity_score.is_none());
            assert!(comp.address.ends_with("Denver, CO 80202"));
        }
    }

    #[test]
    fn test_each_comp_is_either_sold_or_listed() {
        let comps = seeded_mock(99).generate(ADDRESS, None);

        for comp in &comps {
            match (comp.sale_price, comp.list_price) {
                (Some(_), None) => {
                    let sold = comp.sold_date.unwrap();
                    assert!(comp.list_date.is_none());
                    assert!(sold <= today() && sold > today() - Duration::days(180));
                }
                (None, Some(_)) => {
                    let listed = comp.list_date.unwrap();
                    assert!(comp.sold_date.is_none());
                    assert!(listed <= today() && listed > today() - Duration::days(30));
                }
                other => panic!("inconsistent prices: {:?}", other),
            }
        }
    }

    #[test]
    fn test_target_details_drive_generation() {
        let target = PropertyDetails {
            beds: Some(5),
            baths: Some(Decimal::new(35, 1)),
            sqft: Some(3000),
            lot_size: None,
            year_built: Some(1960),
        };

        let comps = seeded_mock(3).generate(ADDRESS, Some(&target));
        for comp in &comps {
            assert!((4..=6).contains(&comp.details.beds.unwrap()));
            assert!((2399..=3600).contains(&comp.details.sqft.unwrap()));
            assert!((1955..=1965).contains(&comp.details.year_built.unwrap()));
        }
    }

    #[test]
    fn test_zero_target_attributes_use_defaults() {
        let target = PropertyDetails {
            beds: Some(0),
            baths: Some(Decimal::ZERO),
            sqft: Some(0),
            lot_size: None,
            year_built: None,
        };

        let comps = seeded_mock(12).generate(ADDRESS, Some(&target));
        assert_eq!(comps.len(), 10);
        for comp in &comps {
            assert!((2..=4).contains(&comp.details.beds.unwrap()));
            assert!(comp.details.baths.unwrap() >= Decimal::ONE);
            assert!((1439..=2160).contains(&comp.details.sqft.unwrap()));
            assert!(comp.usable_price().unwrap() > Decimal::ZERO);
        }
    }

    #[test]
    fn test_mock_without_zip_uses_default_area() {
        let comps = seeded_mock(1).generate("77 Sunset Blvd", None);
        for comp in &comps {
            assert!(comp.address.contains(", Denver, CO 8020"), "{}", comp.address);
        }
    }

    #[test]
    fn test_configurable_count_and_price_band() {
        let profile = SyntheticProfile::mock()
            .with_comp_count(4)
            .with_price_band(100.0, 100.0);
        let comps = SyntheticSource::seeded(profile, 5)
            .with_reference_date(today())
            .generate(ADDRESS, None);

        assert_eq!(comps.len(), 4);
        for comp in &comps {
            let expected = Decimal::from(comp.details.sqft.unwrap() as i64 * 100);
            assert_eq!(comp.usable_price(), Some(expected));
        }
    }

    #[test]
    fn test_public_records_profile() {
        let source = SyntheticSource::seeded(SyntheticProfile::public_records(), 11)
            .with_reference_date(today());
        let comps = source.generate(ADDRESS, None);

        assert!((10..=15).contains(&comps.len()));
        for (i, comp) in comps.iter().enumerate() {
            assert_eq!(comp.data_source, "public_records");
            assert_eq!(
                comp.source_url.as_deref(),
                Some(format!("https://assessor.example.com/property/80202/{}", i).as_str())
            );
            if let Some(sold) = comp.sold_date {
                assert!(sold <= today() - Duration::days(30));
            }
        }
    }

    #[tokio::test]
    async fn test_public_records_requires_zip() {
        let source = SyntheticSource::public_records();

        let check = source.validate_access("123 Main St, Denver").await;
        assert!(!check.available);
        assert_eq!(
            check.error.as_deref(),
            Some("Could not extract ZIP code from address")
        );

        assert!(source.validate_access(ADDRESS).await.available);
        assert!(source.fetch_comps("123 Main St", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_always_available() {
        let source = SyntheticSource::mock();
        assert!(source.validate_access("anything 1").await.available);
        assert_eq!(source.fetch_comps(ADDRESS, None).await.unwrap().len(), 10);
    }
}
