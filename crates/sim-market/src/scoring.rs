//! Competitive scoring: five weighted sub-scores per (product, segment).
//!
//! Weight vectors are fixed per segment and sum to 100, so a raw total
//! lands roughly in [0, 130] once the diminishing-returns bonuses are
//! counted. The curves here are the balancing levers of the whole game:
//! the price floor penalty makes race-to-the-bottom pricing unprofitable,
//! and the square-root dampening keeps quality/feature stacking from
//! running away.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sim_core::{MarketPressures, Product, Segment, SegmentDemand, TeamState};

/// Quality headroom: a 100-quality product stretches the accepted price
/// ceiling by this fraction.
const PRICE_HEADROOM: f64 = 0.25;
/// Fraction below segment minimum before the floor penalty starts.
pub(crate) const PRICE_FLOOR_THRESHOLD: f64 = 0.15;
/// Penalty growth per unit of depth below the floor.
const PRICE_FLOOR_SLOPE: f64 = 1.2;
/// Multiplier the floor penalty bottoms out at.
const PRICE_FLOOR_MIN_MULT: f64 = 0.4;
/// Dampening applied to quality/feature ratios above expectation.
const EXCESS_DAMPENING: f64 = 0.35;
/// Cap on the above-expectation bonus, as a multiple of the weight.
const EXCESS_CAP: f64 = 1.3;
/// Additive per-point quality incentive, independent of segment weights.
const QUALITY_INCENTIVE: f64 = 0.05;

/// Per-segment scoring weights; non-negative, summing to 100.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub price: f64,
    pub quality: f64,
    pub brand: f64,
    pub esg: f64,
    pub features: f64,
}

/// Fixed weight vector for a segment. Price dominates at the cheap end,
/// quality and brand at the premium end.
pub fn segment_weights(segment: Segment) -> ScoreWeights {
    match segment {
        Segment::Budget => ScoreWeights {
            price: 40.0,
            quality: 20.0,
            brand: 10.0,
            esg: 10.0,
            features: 20.0,
        },
        Segment::General => ScoreWeights {
            price: 25.0,
            quality: 25.0,
            brand: 20.0,
            esg: 10.0,
            features: 20.0,
        },
        Segment::Enthusiast => ScoreWeights {
            price: 15.0,
            quality: 25.0,
            brand: 15.0,
            esg: 10.0,
            features: 35.0,
        },
        Segment::Professional => ScoreWeights {
            price: 10.0,
            quality: 35.0,
            brand: 25.0,
            esg: 10.0,
            features: 20.0,
        },
        Segment::ActiveLifestyle => ScoreWeights {
            price: 20.0,
            quality: 20.0,
            brand: 20.0,
            esg: 15.0,
            features: 25.0,
        },
    }
}

/// Quality level a segment expects, scaled by the drifting
/// quality-expectations pressure.
pub fn expected_quality(segment: Segment, pressures: &MarketPressures) -> f64 {
    let base = match segment {
        Segment::Budget => 40.0,
        Segment::General => 55.0,
        Segment::Enthusiast => 70.0,
        Segment::Professional => 85.0,
        Segment::ActiveLifestyle => 65.0,
    };
    base * pressures.quality_expectations
}

/// Feature level a segment expects.
pub fn expected_features(segment: Segment) -> f64 {
    match segment {
        Segment::Budget => 40.0,
        Segment::General => 60.0,
        Segment::Enthusiast => 90.0,
        Segment::Professional => 75.0,
        Segment::ActiveLifestyle => 70.0,
    }
}

/// The five weighted sub-scores plus total for one product in one segment.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub price: f64,
    pub quality: f64,
    pub brand: f64,
    pub esg: f64,
    pub features: f64,
    pub total: f64,
}

/// Score one sellable product against one segment.
pub fn score_product(
    product: &Product,
    team: &TeamState,
    demand: &SegmentDemand,
    pressures: &MarketPressures,
) -> ScoreBreakdown {
    let w = segment_weights(product.segment);

    let price = price_score(product, demand, w.price);
    let quality = ratio_score(
        product.quality,
        expected_quality(product.segment, pressures),
        w.quality,
    );
    let brand = team.brand_value.max(0.0).sqrt() * w.brand;
    let esg = (team.esg_score / 1000.0) * pressures.sustainability_premium * w.esg;
    let features = ratio_score(product.features, expected_features(product.segment), w.features);

    let total = price + quality + brand + esg + features + QUALITY_INCENTIVE * product.quality;
    ScoreBreakdown {
        price,
        quality,
        brand,
        esg,
        features,
        total,
    }
}

/// Price sub-score. Position within [segment_min, adjusted_max], where
/// higher quality buys more pricing headroom; inverted so a lower price
/// scores higher. Prices more than `PRICE_FLOOR_THRESHOLD` below the
/// segment minimum take a multiplicative penalty that deepens with
/// distance, bottoming out at `PRICE_FLOOR_MIN_MULT`.
fn price_score(product: &Product, demand: &SegmentDemand, weight: f64) -> f64 {
    let min = demand.min_price.to_f64().unwrap_or(0.0);
    let max = demand.max_price.to_f64().unwrap_or(min);
    let price = product.price.to_f64().unwrap_or(min);

    let adjusted_max = max * (1.0 + PRICE_HEADROOM * (product.quality / 100.0));
    let span = (adjusted_max - min).max(f64::EPSILON);
    let position = ((adjusted_max - price) / span).clamp(0.0, 1.0);
    let mut score = position * weight;

    let floor = min * (1.0 - PRICE_FLOOR_THRESHOLD);
    if price < floor && floor > 0.0 {
        let depth = ((floor - price) / floor).clamp(0.0, 1.0);
        let mult = (1.0 - depth * PRICE_FLOOR_SLOPE).max(PRICE_FLOOR_MIN_MULT);
        score *= mult;
    }
    score
}

/// Shared shape for quality and features: linear up to expectation,
/// square-root-dampened bonus above it, capped at `EXCESS_CAP` times the
/// weight.
fn ratio_score(actual: f64, expected: f64, weight: f64) -> f64 {
    if expected <= 0.0 {
        return weight;
    }
    let ratio = (actual / expected).max(0.0);
    if ratio <= 1.0 {
        ratio * weight
    } else {
        (1.0 + EXCESS_DAMPENING * (ratio - 1.0).sqrt()).min(EXCESS_CAP) * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sim_core::{FinancialStatement, ProductPhase};
    use std::collections::BTreeMap;

    fn pressures() -> MarketPressures {
        MarketPressures {
            price_competition: 1.0,
            quality_expectations: 1.0,
            sustainability_premium: 1.0,
        }
    }

    fn demand() -> SegmentDemand {
        SegmentDemand {
            base_demand: 1_000_000,
            min_price: Decimal::new(200, 0),
            max_price: Decimal::new(600, 0),
            growth_rate: 0.02,
        }
    }

    fn product(price: i64) -> Product {
        Product {
            id: "p".to_string(),
            segment: Segment::General,
            price: Decimal::new(price, 0),
            quality: 55.0,
            features: 60.0,
            reliability: 90.0,
            unit_cost: Decimal::new(150, 0),
            phase: ProductPhase::Launched,
            rounds_remaining: 0,
        }
    }

    fn team() -> TeamState {
        TeamState {
            cash: Decimal::ZERO,
            revenue: Decimal::ZERO,
            net_income: Decimal::ZERO,
            products: vec![],
            factories: vec![],
            brand_value: 0.5,
            esg_score: 500.0,
            morale: 0.7,
            market_share: BTreeMap::new(),
            patents: 0,
            statement: FinancialStatement::default(),
        }
    }

    #[test]
    fn weights_sum_to_one_hundred() {
        for segment in Segment::ALL {
            let w = segment_weights(segment);
            let sum = w.price + w.quality + w.brand + w.esg + w.features;
            assert!((sum - 100.0).abs() < 1e-9, "{}: {}", segment.name(), sum);
            for part in [w.price, w.quality, w.brand, w.esg, w.features] {
                assert!(part >= 0.0);
            }
        }
    }

    #[test]
    fn lower_price_scores_higher_within_range() {
        let t = team();
        let cheap = score_product(&product(250), &t, &demand(), &pressures());
        let pricey = score_product(&product(550), &t, &demand(), &pressures());
        assert!(cheap.price > pricey.price);
    }

    #[test]
    fn price_floor_penalty_beats_dumping() {
        let t = team();
        let d = demand();
        // 15% below a 200 minimum is 170; price well below that.
        let dumped = score_product(&product(120), &t, &d, &pressures());
        let at_min = score_product(&product(200), &t, &d, &pressures());
        assert!(
            dumped.price < at_min.price,
            "dumped {} vs at-min {}",
            dumped.price,
            at_min.price
        );
    }

    #[test]
    fn quality_bonus_is_capped() {
        let w = segment_weights(Segment::General);
        let mut p = product(400);
        p.quality = 100.0;
        let mut hot = team();
        hot.brand_value = 0.0;
        hot.esg_score = 0.0;
        // Expectation far below actual quality: bonus must cap at 1.3x.
        let low_expect = MarketPressures {
            price_competition: 1.0,
            quality_expectations: 0.2,
            sustainability_premium: 1.0,
        };
        let s = score_product(&p, &hot, &demand(), &low_expect);
        assert!(s.quality <= EXCESS_CAP * w.quality + 1e-9);
    }

    #[test]
    fn quality_ratio_linear_below_expectation() {
        let w = segment_weights(Segment::General);
        let mut p = product(400);
        p.quality = 27.5; // half of the General expectation of 55
        let s = score_product(&p, &team(), &demand(), &pressures());
        assert!((s.quality - 0.5 * w.quality).abs() < 1e-9);
    }

    #[test]
    fn brand_is_sublinear() {
        let d = demand();
        let mut low = team();
        low.brand_value = 0.25;
        let mut high = team();
        high.brand_value = 1.0;
        let p = product(400);
        let s_low = score_product(&p, &low, &d, &pressures());
        let s_high = score_product(&p, &high, &d, &pressures());
        // 4x the brand value buys only 2x the brand score.
        assert!((s_high.brand / s_low.brand - 2.0).abs() < 1e-9);
    }

    #[test]
    fn esg_scales_with_premium() {
        let d = demand();
        let p = product(400);
        let t = team();
        let mut hot = pressures();
        hot.sustainability_premium = 1.5;
        let base = score_product(&p, &t, &d, &pressures());
        let boosted = score_product(&p, &t, &d, &hot);
        assert!(boosted.esg > base.esg);
    }
}
