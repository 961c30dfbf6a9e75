//! Next-round market evolution: bounded random walks on the macro
//! indicators, configured demand growth, and optional market events.
//!
//! Events are a closed enum with fixed, deterministic effects; custom
//! effects target a closed vocabulary so unknown targets are a compile
//! error rather than a silent no-op at runtime.

use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_context::{Context, StreamKind};
use sim_core::{
    Currency, EconomicIndicators, MarketPressures, MarketState, Segment, SegmentDemand,
};
use std::collections::BTreeMap;
use tracing::info;

/// A named market shock with fixed effects, or a list of custom effects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MarketEvent {
    Recession,
    Boom,
    InflationSpike,
    TechBreakthrough,
    SustainabilityRegulation,
    PriceWar,
    SupplyChainCrisis,
    CurrencyCrisis,
    Custom(Vec<CustomEffect>),
}

/// One custom adjustment. Demand and FX targets interpret `modifier`
/// multiplicatively; all other targets add it to the indicator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomEffect {
    pub target: EffectTarget,
    pub modifier: f64,
}

/// Closed vocabulary of custom-effect targets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum EffectTarget {
    GdpGrowth,
    Inflation,
    ConsumerConfidence,
    Unemployment,
    InterestRate,
    /// Multiplies demand in every segment.
    DemandAll,
    /// Multiplies demand in one segment.
    DemandSegment(Segment),
    SustainabilityPremium,
    PriceCompetition,
    QualityExpectations,
    /// Multiplies one FX rate.
    FxRate(Currency),
}

/// Baseline market for round 1 of a fresh match.
pub fn initial_market_state() -> MarketState {
    let mut segments = BTreeMap::new();
    segments.insert(
        Segment::Budget,
        segment(2_500_000, 80, 250, 0.010),
    );
    segments.insert(
        Segment::General,
        segment(3_000_000, 200, 600, 0.020),
    );
    segments.insert(
        Segment::Enthusiast,
        segment(1_200_000, 500, 1_100, 0.030),
    );
    segments.insert(
        Segment::Professional,
        segment(900_000, 700, 1_600, 0.015),
    );
    segments.insert(
        Segment::ActiveLifestyle,
        segment(800_000, 300, 900, 0.025),
    );

    let mut fx_rates = BTreeMap::new();
    fx_rates.insert(Currency::Usd, 1.0);
    fx_rates.insert(Currency::Eur, 1.08);
    fx_rates.insert(Currency::Cny, 0.14);
    fx_rates.insert(Currency::Jpy, 0.0067);

    MarketState {
        round: 1,
        indicators: EconomicIndicators {
            gdp_growth: 0.025,
            inflation: 0.02,
            consumer_confidence: 70.0,
            unemployment: 5.0,
        },
        interest_rate: 4.0,
        fx_rates,
        segments,
        pressures: MarketPressures {
            price_competition: 1.0,
            quality_expectations: 1.0,
            sustainability_premium: 1.0,
        },
    }
}

fn segment(base_demand: u64, min: i64, max: i64, growth_rate: f64) -> SegmentDemand {
    SegmentDemand {
        base_demand,
        min_price: Decimal::new(min, 0),
        max_price: Decimal::new(max, 0),
        growth_rate,
    }
}

/// Produce the next round's market state: advance the round counter,
/// walk every indicator within its clamp range, grow each segment's
/// demand by its configured rate, then apply the optional event.
pub fn evolve_market(
    market: &MarketState,
    ctx: &mut Context,
    event: Option<&MarketEvent>,
) -> MarketState {
    let mut next = market.clone();
    next.round = market.round + 1;

    // Draw order is fixed; reordering these lines changes every replay.
    {
        let rng = ctx.stream(StreamKind::Market);
        next.indicators.gdp_growth += rng.gen_range(-0.005..=0.005);
        next.indicators.inflation += rng.gen_range(-0.004..=0.004);
        next.indicators.consumer_confidence += rng.gen_range(-3.0..=3.0);
        next.indicators.unemployment += rng.gen_range(-0.3..=0.3);
        next.interest_rate += rng.gen_range(-0.25..=0.25);
        for rate in next.fx_rates.values_mut() {
            *rate *= 1.0 + rng.gen_range(-0.02..=0.02);
        }
        next.pressures.price_competition += rng.gen_range(-0.03..=0.03);
        next.pressures.quality_expectations += rng.gen_range(-0.02..=0.02);
        next.pressures.sustainability_premium += rng.gen_range(-0.03..=0.03);
    }

    for demand in next.segments.values_mut() {
        demand.base_demand = scale_units(demand.base_demand, 1.0 + demand.growth_rate);
    }

    if let Some(event) = event {
        info!(?event, round = next.round, "applying market event");
        apply_event(&mut next, event);
    }

    clamp_market(&mut next);
    next
}

fn apply_event(market: &mut MarketState, event: &MarketEvent) {
    match event {
        MarketEvent::Recession => {
            market.indicators.gdp_growth -= 0.04;
            market.indicators.consumer_confidence -= 15.0;
            market.indicators.unemployment += 2.5;
            scale_all_demand(market, 0.85);
        }
        MarketEvent::Boom => {
            market.indicators.gdp_growth += 0.03;
            market.indicators.consumer_confidence += 10.0;
            scale_all_demand(market, 1.15);
        }
        MarketEvent::InflationSpike => {
            market.indicators.inflation += 0.04;
            market.interest_rate += 1.5;
        }
        MarketEvent::TechBreakthrough => {
            market.pressures.quality_expectations += 0.1;
            scale_segment_demand(market, Segment::Enthusiast, 1.2);
            scale_segment_demand(market, Segment::Professional, 1.1);
        }
        MarketEvent::SustainabilityRegulation => {
            market.pressures.sustainability_premium += 0.2;
        }
        MarketEvent::PriceWar => {
            market.pressures.price_competition += 0.2;
            for demand in market.segments.values_mut() {
                demand.max_price = scale_price(demand.max_price, 0.92);
                if demand.max_price < demand.min_price {
                    demand.max_price = demand.min_price;
                }
            }
        }
        MarketEvent::SupplyChainCrisis => {
            market.indicators.unemployment += 1.0;
            scale_all_demand(market, 0.9);
        }
        MarketEvent::CurrencyCrisis => {
            market.indicators.consumer_confidence -= 8.0;
            for (currency, rate) in market.fx_rates.iter_mut() {
                if *currency != Currency::Usd {
                    *rate *= 0.85;
                }
            }
        }
        MarketEvent::Custom(effects) => {
            for effect in effects {
                apply_custom_effect(market, effect);
            }
        }
    }
}

fn apply_custom_effect(market: &mut MarketState, effect: &CustomEffect) {
    let m = effect.modifier;
    match effect.target {
        EffectTarget::GdpGrowth => market.indicators.gdp_growth += m,
        EffectTarget::Inflation => market.indicators.inflation += m,
        EffectTarget::ConsumerConfidence => market.indicators.consumer_confidence += m,
        EffectTarget::Unemployment => market.indicators.unemployment += m,
        EffectTarget::InterestRate => market.interest_rate += m,
        EffectTarget::DemandAll => scale_all_demand(market, m),
        EffectTarget::DemandSegment(segment) => scale_segment_demand(market, segment, m),
        EffectTarget::SustainabilityPremium => market.pressures.sustainability_premium += m,
        EffectTarget::PriceCompetition => market.pressures.price_competition += m,
        EffectTarget::QualityExpectations => market.pressures.quality_expectations += m,
        EffectTarget::FxRate(currency) => {
            if let Some(rate) = market.fx_rates.get_mut(&currency) {
                *rate *= m;
            }
        }
    }
}

fn scale_all_demand(market: &mut MarketState, factor: f64) {
    for demand in market.segments.values_mut() {
        demand.base_demand = scale_units(demand.base_demand, factor);
    }
}

fn scale_segment_demand(market: &mut MarketState, segment: Segment, factor: f64) {
    if let Some(demand) = market.segments.get_mut(&segment) {
        demand.base_demand = scale_units(demand.base_demand, factor);
    }
}

fn scale_units(units: u64, factor: f64) -> u64 {
    let scaled = (units as f64 * factor.max(0.0)).floor();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled.max(0.0) as u64
    }
}

fn scale_price(price: Decimal, factor: f64) -> Decimal {
    match (price.to_f64(), Decimal::from_f64(factor)) {
        (Some(_), Some(f)) => price * f,
        _ => price,
    }
}

/// Clamp every indicator to its plausible range. Applied after walks
/// and events so no combination can push the market into nonsense.
fn clamp_market(market: &mut MarketState) {
    let i = &mut market.indicators;
    i.gdp_growth = i.gdp_growth.clamp(-0.05, 0.08);
    i.inflation = i.inflation.clamp(-0.01, 0.15);
    i.consumer_confidence = i.consumer_confidence.clamp(10.0, 95.0);
    i.unemployment = i.unemployment.clamp(2.0, 20.0);
    market.interest_rate = market.interest_rate.clamp(0.5, 12.0);
    for rate in market.fx_rates.values_mut() {
        *rate = rate.clamp(0.001, 2.0);
    }
    let p = &mut market.pressures;
    p.price_competition = p.price_competition.clamp(0.7, 1.5);
    p.quality_expectations = p.quality_expectations.clamp(0.8, 1.4);
    p.sustainability_premium = p.sustainability_premium.clamp(0.8, 1.6);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::validate_market_state;

    #[test]
    fn initial_state_is_valid() {
        validate_market_state(&initial_market_state()).unwrap();
    }

    #[test]
    fn evolution_is_deterministic() {
        let market = initial_market_state();
        let mut a = Context::for_market(11, 1);
        let mut b = Context::for_market(11, 1);
        let next_a = evolve_market(&market, &mut a, None);
        let next_b = evolve_market(&market, &mut b, None);
        assert_eq!(
            serde_json::to_string(&next_a).unwrap(),
            serde_json::to_string(&next_b).unwrap()
        );
        assert_eq!(next_a.round, 2);
    }

    #[test]
    fn recession_cuts_demand() {
        let market = initial_market_state();
        let mut ctx = Context::for_market(11, 1);
        let mut quiet_ctx = Context::for_market(11, 1);
        let normal = evolve_market(&market, &mut quiet_ctx, None);
        let hit = evolve_market(&market, &mut ctx, Some(&MarketEvent::Recession));
        for segment in Segment::ALL {
            assert!(
                hit.segments[&segment].base_demand < normal.segments[&segment].base_demand
            );
        }
        assert!(hit.indicators.gdp_growth < normal.indicators.gdp_growth);
    }

    #[test]
    fn price_war_never_inverts_price_range() {
        let mut market = initial_market_state();
        // Force a tight range so the max-price cut would cross the min.
        if let Some(d) = market.segments.get_mut(&Segment::Budget) {
            d.max_price = d.min_price;
        }
        let mut ctx = Context::for_market(3, 1);
        let next = evolve_market(&market, &mut ctx, Some(&MarketEvent::PriceWar));
        for segment in Segment::ALL {
            let d = &next.segments[&segment];
            assert!(d.max_price >= d.min_price);
        }
    }

    #[test]
    fn custom_effects_hit_their_targets() {
        let market = initial_market_state();
        let mut ctx = Context::for_market(5, 1);
        let event = MarketEvent::Custom(vec![
            CustomEffect {
                target: EffectTarget::ConsumerConfidence,
                modifier: -20.0,
            },
            CustomEffect {
                target: EffectTarget::DemandSegment(Segment::Budget),
                modifier: 0.5,
            },
        ]);
        let mut quiet_ctx = Context::for_market(5, 1);
        let normal = evolve_market(&market, &mut quiet_ctx, None);
        let hit = evolve_market(&market, &mut ctx, Some(&event));
        assert!(
            hit.indicators.consumer_confidence < normal.indicators.consumer_confidence
        );
        assert!(
            hit.segments[&Segment::Budget].base_demand
                < normal.segments[&Segment::Budget].base_demand
        );
        assert_eq!(
            hit.segments[&Segment::General].base_demand,
            normal.segments[&Segment::General].base_demand
        );
    }

    #[test]
    fn clamps_hold_after_many_rounds() {
        let mut market = initial_market_state();
        for round in 1..=50 {
            let mut ctx = Context::for_market(99, round);
            market = evolve_market(&market, &mut ctx, None);
            validate_market_state(&market).unwrap();
            assert!(market.indicators.gdp_growth <= 0.08);
            assert!(market.indicators.consumer_confidence >= 10.0);
            assert!(market.pressures.sustainability_premium <= 1.6);
        }
    }
}
