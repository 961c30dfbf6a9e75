#![deny(warnings)]

//! Core domain models and invariants for Handset Tycoon.
//!
//! This crate defines the serializable value types shared across the
//! simulation with validation helpers to guarantee basic invariants.
//! All maps are `BTreeMap` so iteration order and the serialized form
//! are deterministic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Unique identifier for a competing team, e.g. "alpha", "team-3".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TeamId(pub String);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The five fixed market tiers phones compete in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Entry-level devices; price-driven.
    Budget,
    /// Mainstream devices for the broad market.
    General,
    /// Feature-heavy devices for hobbyists.
    Enthusiast,
    /// Premium devices for business users; quality- and brand-driven.
    Professional,
    /// Rugged/outdoor devices.
    ActiveLifestyle,
}

impl Segment {
    /// All segments in canonical order.
    pub const ALL: [Segment; 5] = [
        Segment::Budget,
        Segment::General,
        Segment::Enthusiast,
        Segment::Professional,
        Segment::ActiveLifestyle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Segment::Budget => "Budget",
            Segment::General => "General",
            Segment::Enthusiast => "Enthusiast",
            Segment::Professional => "Professional",
            Segment::ActiveLifestyle => "Active Lifestyle",
        }
    }
}

/// Manufacturing region, used for revenue attribution and FX exposure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
    NorthAmerica,
    Europe,
    AsiaPacific,
    LatinAmerica,
}

/// Settlement currency for a region's revenue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    Usd,
    Eur,
    Cny,
    Jpy,
}

impl Region {
    /// Currency revenue booked in this region settles in.
    pub fn currency(&self) -> Currency {
        match self {
            Region::NorthAmerica | Region::LatinAmerica => Currency::Usd,
            Region::Europe => Currency::Eur,
            Region::AsiaPacific => Currency::Cny,
        }
    }
}

/// Development lifecycle of a product. Only `Ready` and `Launched`
/// products compete for market share.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductPhase {
    InDevelopment,
    Ready,
    Launched,
}

/// A phone model owned by exactly one team.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    /// Stable identifier, e.g. "product-alpha-r2-1".
    pub id: String,
    /// Segment this model targets.
    pub segment: Segment,
    /// List price in USD.
    pub price: Decimal,
    /// Build quality in [0, 100].
    pub quality: f64,
    /// Feature richness index, >= 0 (100 is segment-typical).
    pub features: f64,
    /// Reliability in [0, 100]; drives warranty returns.
    pub reliability: f64,
    /// Unit manufacturing cost in USD.
    pub unit_cost: Decimal,
    /// Development lifecycle phase.
    pub phase: ProductPhase,
    /// Rounds of development left; 0 once `Ready`/`Launched`.
    pub rounds_remaining: u32,
}

impl Product {
    /// Whether this product competes for market share this round.
    pub fn is_sellable(&self) -> bool {
        matches!(self.phase, ProductPhase::Ready | ProductPhase::Launched)
    }
}

/// A production site owned by a team.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Factory {
    pub id: String,
    pub region: Region,
    /// Units per round at full utilization.
    pub capacity: u64,
    /// Operational efficiency in [0, 1].
    pub efficiency: f64,
    /// Fraction of output with manufacturing defects, in [0, 1].
    pub defect_rate: f64,
}

/// Snapshot of a team's financial statement, refreshed once per round.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub revenue: Decimal,
    pub costs: Decimal,
    pub net_income: Decimal,
    pub total_assets: Decimal,
    pub total_equity: Decimal,
    pub eps: Decimal,
    pub share_price: Decimal,
    pub market_cap: Decimal,
    pub shares_outstanding: u64,
}

/// Complete per-team state. Exclusively owned by its team; the round
/// orchestrator clones it before mutating so caller-held copies are
/// never aliased.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamState {
    pub cash: Decimal,
    pub revenue: Decimal,
    pub net_income: Decimal,
    pub products: Vec<Product>,
    pub factories: Vec<Factory>,
    /// Brand strength in [0, 1].
    pub brand_value: f64,
    /// ESG score, >= 0; typically 0-1000. Only low values have a
    /// mechanical effect (revenue penalty below 300).
    pub esg_score: f64,
    /// Workforce morale in [0, 1].
    pub morale: f64,
    /// Last allocated share per segment, in [0, 1].
    pub market_share: BTreeMap<Segment, f64>,
    pub patents: u32,
    pub statement: FinancialStatement,
}

impl TeamState {
    /// Sellable products targeting `segment`.
    pub fn sellable_in(&self, segment: Segment) -> impl Iterator<Item = &Product> {
        self.products
            .iter()
            .filter(move |p| p.segment == segment && p.is_sellable())
    }
}

/// Macro-economic indicators for one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EconomicIndicators {
    /// Annualized GDP growth, e.g. 0.03 = 3%.
    pub gdp_growth: f64,
    /// Annualized inflation, e.g. 0.02 = 2%.
    pub inflation: f64,
    /// Consumer confidence index in [0, 100].
    pub consumer_confidence: f64,
    /// Unemployment rate in percent, e.g. 5.0.
    pub unemployment: f64,
}

/// Slowly drifting competitive pressures, multipliers around 1.0.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketPressures {
    pub price_competition: f64,
    pub quality_expectations: f64,
    pub sustainability_premium: f64,
}

/// Demand characteristics of one segment for one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentDemand {
    /// Baseline demand in units, before macro factors and noise.
    pub base_demand: u64,
    /// Lower bound of the accepted price range.
    pub min_price: Decimal,
    /// Nominal upper bound of the accepted price range.
    pub max_price: Decimal,
    /// Per-round demand growth, e.g. 0.02.
    pub growth_rate: f64,
}

/// Shared market snapshot for one round. Immutable while the round is
/// resolved; `sim-market` produces a wholesale replacement for the next
/// round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketState {
    pub round: u32,
    pub indicators: EconomicIndicators,
    /// Short-term interest rate in percent.
    pub interest_rate: f64,
    /// Units of USD per unit of foreign currency, baseline 1.0.
    pub fx_rates: BTreeMap<Currency, f64>,
    pub segments: BTreeMap<Segment, SegmentDemand>,
    pub pressures: MarketPressures,
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Unit-interval field outside [0, 1].
    #[error("{0} must be within [0,1]")]
    UnitIntervalOut(&'static str),
    /// Percent-scale field outside [0, 100].
    #[error("{0} must be within [0,100]")]
    PercentOut(&'static str),
    /// Numeric field must be finite.
    #[error("non-finite numeric value in {0}")]
    NonFinite(&'static str),
    /// Price or cost must be non-negative.
    #[error("negative monetary value in {0}")]
    NegativeMoney(&'static str),
    /// Segment price range must satisfy 0 < min <= max.
    #[error("invalid price range for segment {0}")]
    InvalidPriceRange(&'static str),
    /// Identifier must be non-empty.
    #[error("empty identifier")]
    EmptyId,
    /// Market state must cover every segment.
    #[error("missing demand entry for segment {0}")]
    MissingSegment(&'static str),
}

/// Validate a product.
pub fn validate_product(p: &Product) -> Result<(), ValidationError> {
    if p.id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if p.price < Decimal::ZERO || p.unit_cost < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney("product"));
    }
    if !(p.quality.is_finite() && p.features.is_finite() && p.reliability.is_finite()) {
        return Err(ValidationError::NonFinite("product"));
    }
    if !(0.0..=100.0).contains(&p.quality) {
        return Err(ValidationError::PercentOut("quality"));
    }
    if !(0.0..=100.0).contains(&p.reliability) {
        return Err(ValidationError::PercentOut("reliability"));
    }
    if p.features < 0.0 {
        return Err(ValidationError::NonFinite("features"));
    }
    Ok(())
}

/// Validate a factory.
pub fn validate_factory(f: &Factory) -> Result<(), ValidationError> {
    if f.id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if !(f.efficiency.is_finite() && f.defect_rate.is_finite()) {
        return Err(ValidationError::NonFinite("factory"));
    }
    if !(0.0..=1.0).contains(&f.efficiency) {
        return Err(ValidationError::UnitIntervalOut("efficiency"));
    }
    if !(0.0..=1.0).contains(&f.defect_rate) {
        return Err(ValidationError::UnitIntervalOut("defect_rate"));
    }
    Ok(())
}

/// Validate a team's state, including owned products and factories.
pub fn validate_team_state(t: &TeamState) -> Result<(), ValidationError> {
    if !(t.brand_value.is_finite() && t.esg_score.is_finite() && t.morale.is_finite()) {
        return Err(ValidationError::NonFinite("team"));
    }
    if !(0.0..=1.0).contains(&t.brand_value) {
        return Err(ValidationError::UnitIntervalOut("brand_value"));
    }
    if !(0.0..=1.0).contains(&t.morale) {
        return Err(ValidationError::UnitIntervalOut("morale"));
    }
    if t.esg_score < 0.0 {
        return Err(ValidationError::NonFinite("esg_score"));
    }
    for p in &t.products {
        validate_product(p)?;
    }
    for f in &t.factories {
        validate_factory(f)?;
    }
    for share in t.market_share.values() {
        if !share.is_finite() || *share < 0.0 {
            return Err(ValidationError::NonFinite("market_share"));
        }
    }
    Ok(())
}

/// Validate a market state, including coverage of all five segments.
pub fn validate_market_state(m: &MarketState) -> Result<(), ValidationError> {
    let i = &m.indicators;
    if !(i.gdp_growth.is_finite()
        && i.inflation.is_finite()
        && i.consumer_confidence.is_finite()
        && i.unemployment.is_finite()
        && m.interest_rate.is_finite())
    {
        return Err(ValidationError::NonFinite("indicators"));
    }
    if !(0.0..=100.0).contains(&i.consumer_confidence) {
        return Err(ValidationError::PercentOut("consumer_confidence"));
    }
    for seg in Segment::ALL {
        let d = m
            .segments
            .get(&seg)
            .ok_or(ValidationError::MissingSegment(seg.name()))?;
        if d.min_price <= Decimal::ZERO || d.max_price < d.min_price {
            return Err(ValidationError::InvalidPriceRange(seg.name()));
        }
        if !d.growth_rate.is_finite() {
            return Err(ValidationError::NonFinite("growth_rate"));
        }
    }
    for rate in m.fx_rates.values() {
        if !rate.is_finite() || *rate <= 0.0 {
            return Err(ValidationError::NonFinite("fx_rates"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn product(segment: Segment) -> Product {
        Product {
            id: "product-test-r1-1".to_string(),
            segment,
            price: Decimal::new(399, 0),
            quality: 60.0,
            features: 80.0,
            reliability: 90.0,
            unit_cost: Decimal::new(180, 0),
            phase: ProductPhase::Launched,
            rounds_remaining: 0,
        }
    }

    fn team() -> TeamState {
        TeamState {
            cash: Decimal::new(10_000_000, 0),
            revenue: Decimal::ZERO,
            net_income: Decimal::ZERO,
            products: vec![product(Segment::General)],
            factories: vec![Factory {
                id: "factory-test-r1-1".to_string(),
                region: Region::AsiaPacific,
                capacity: 500_000,
                efficiency: 0.8,
                defect_rate: 0.04,
            }],
            brand_value: 0.5,
            esg_score: 450.0,
            morale: 0.7,
            market_share: BTreeMap::new(),
            patents: 2,
            statement: FinancialStatement {
                shares_outstanding: 1_000_000,
                ..FinancialStatement::default()
            },
        }
    }

    #[test]
    fn serde_roundtrip_team_state() {
        let t = team();
        let s = serde_json::to_string(&t).unwrap();
        let back: TeamState = serde_json::from_str(&s).unwrap();
        assert_eq!(back.products.len(), 1);
        assert_eq!(back.products[0].segment, Segment::General);
        assert_eq!(back.cash, Decimal::new(10_000_000, 0));
    }

    #[test]
    fn only_ready_or_launched_sell() {
        let mut p = product(Segment::Budget);
        assert!(p.is_sellable());
        p.phase = ProductPhase::Ready;
        assert!(p.is_sellable());
        p.phase = ProductPhase::InDevelopment;
        assert!(!p.is_sellable());
    }

    #[test]
    fn sellable_in_filters_by_segment_and_phase() {
        let mut t = team();
        let mut dev = product(Segment::General);
        dev.id = "product-test-r1-2".to_string();
        dev.phase = ProductPhase::InDevelopment;
        t.products.push(dev);
        t.products.push(product(Segment::Budget));
        assert_eq!(t.sellable_in(Segment::General).count(), 1);
        assert_eq!(t.sellable_in(Segment::Enthusiast).count(), 0);
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let mut t = team();
        t.brand_value = 1.5;
        assert_eq!(
            validate_team_state(&t),
            Err(ValidationError::UnitIntervalOut("brand_value"))
        );
        let mut p = product(Segment::General);
        p.quality = 120.0;
        assert_eq!(
            validate_product(&p),
            Err(ValidationError::PercentOut("quality"))
        );
        let f = Factory {
            id: "f".to_string(),
            region: Region::Europe,
            capacity: 1,
            efficiency: 0.5,
            defect_rate: -0.1,
        };
        assert_eq!(
            validate_factory(&f),
            Err(ValidationError::UnitIntervalOut("defect_rate"))
        );
    }

    #[test]
    fn market_state_requires_all_segments() {
        let mut m = MarketState {
            round: 1,
            indicators: EconomicIndicators {
                gdp_growth: 0.03,
                inflation: 0.02,
                consumer_confidence: 70.0,
                unemployment: 5.0,
            },
            interest_rate: 4.0,
            fx_rates: BTreeMap::new(),
            segments: BTreeMap::new(),
            pressures: MarketPressures {
                price_competition: 1.0,
                quality_expectations: 1.0,
                sustainability_premium: 1.0,
            },
        };
        assert!(matches!(
            validate_market_state(&m),
            Err(ValidationError::MissingSegment(_))
        ));
        for seg in Segment::ALL {
            m.segments.insert(
                seg,
                SegmentDemand {
                    base_demand: 1_000_000,
                    min_price: Decimal::new(100, 0),
                    max_price: Decimal::new(500, 0),
                    growth_rate: 0.02,
                },
            );
        }
        assert!(validate_market_state(&m).is_ok());
    }

    #[test]
    fn region_currency_mapping() {
        assert_eq!(Region::Europe.currency(), Currency::Eur);
        assert_eq!(Region::LatinAmerica.currency(), Currency::Usd);
        assert_eq!(Region::AsiaPacific.currency(), Currency::Cny);
    }

    proptest! {
        #[test]
        fn valid_products_pass(quality in 0.0f64..=100.0,
                               reliability in 0.0f64..=100.0,
                               features in 0.0f64..500.0,
                               price in 1i64..5_000) {
            let p = Product {
                id: "p".to_string(),
                segment: Segment::Enthusiast,
                price: Decimal::new(price, 0),
                quality,
                features,
                reliability,
                unit_cost: Decimal::new(price / 2, 0),
                phase: ProductPhase::Ready,
                rounds_remaining: 0,
            };
            prop_assert!(validate_product(&p).is_ok());
        }

        #[test]
        fn unit_fields_bounded(brand in 0.0f64..=1.0,
                               morale in 0.0f64..=1.0,
                               esg in 0.0f64..2000.0) {
            let mut t = team();
            t.brand_value = brand;
            t.morale = morale;
            t.esg_score = esg;
            prop_assert!(validate_team_state(&t).is_ok());
        }
    }
}
