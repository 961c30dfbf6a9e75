#![deny(warnings)]

//! Market allocation engine for Handset Tycoon.
//!
//! Takes every team's post-decision state plus the shared market
//! snapshot and produces competitive shares, units, revenue, warranty
//! cost, the ESG revenue adjustment, and the optional rubber-banding
//! correction, all in one deterministic pass. Demand noise is the only
//! randomness and comes from the caller's [`Context`].
//!
//! Monetary amounts are `Decimal`; scores and shares are `f64` with
//! conversion at the boundary.

pub mod evolve;
pub mod scoring;

pub use evolve::{evolve_market, initial_market_state, CustomEffect, EffectTarget, MarketEvent};
pub use scoring::{
    expected_features, expected_quality, score_product, segment_weights, ScoreBreakdown,
    ScoreWeights,
};

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_context::{Context, StreamKind};
use sim_core::{
    validate_market_state, MarketState, Product, Region, Segment, TeamId, TeamState,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Softmax temperature. Scores land roughly in [0, 130]; at 25.0 a
/// 10-point score gap is about a 1.5x share ratio.
const SOFTMAX_TEMPERATURE: f64 = 25.0;
/// Half-width of the uniform demand noise band.
const DEMAND_NOISE_FRAC: f64 = 0.05;
/// First round in which rubber-banding may activate.
pub const RUBBER_BAND_MIN_ROUND: u32 = 3;
/// Trailing teams below this fraction of the cross-team average get the boost.
const RUBBER_BAND_LOW_RATIO: f64 = 0.5;
/// Leading teams above this multiple of the cross-team average get the penalty.
const RUBBER_BAND_HIGH_RATIO: f64 = 2.0;
const RUBBER_BAND_BOOST: f64 = 1.15;
const RUBBER_BAND_PENALTY: f64 = 0.92;
/// ESG score at and above which no revenue penalty applies.
const ESG_BASELINE: f64 = 300.0;
/// Defect rate assumed for teams selling without any factory.
const DEFAULT_FACTORY_DEFECT: f64 = 0.05;

/// Errors produced by the allocation engine.
#[derive(Debug, Error)]
pub enum MarketError {
    /// The market snapshot failed validation.
    #[error("invalid market state: {0}")]
    InvalidMarket(#[from] sim_core::ValidationError),
    /// A numeric boundary conversion produced a non-finite value.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// One team's computed position in one segment. Ephemeral: consumed by
/// the orchestrator right after allocation, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamMarketPosition {
    pub product_id: String,
    pub scores: ScoreBreakdown,
    /// Allocated share of segment demand, in [0, 1] before rubber-banding.
    pub share: f64,
    pub units: u64,
    pub revenue: Decimal,
    pub warranty_cost: Decimal,
    price: Decimal,
    unit_cost: Decimal,
    effective_defect_rate: f64,
}

/// ESG revenue adjustment for one team (always a penalty; `amount <= 0`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EsgAdjustment {
    pub penalty_rate: Decimal,
    pub amount: Decimal,
}

/// Per-team aggregate across all segments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamMarketOutcome {
    pub team_id: TeamId,
    pub positions: BTreeMap<Segment, TeamMarketPosition>,
    /// Sum of segment revenue before the ESG adjustment.
    pub gross_revenue: Decimal,
    /// Gross revenue plus the (non-positive) ESG adjustment.
    pub total_revenue: Decimal,
    pub total_units: u64,
    pub warranty_cost: Decimal,
    pub esg_adjustment: Option<EsgAdjustment>,
    /// Revenue attributed to factory regions, proportional to capacity.
    pub revenue_by_region: BTreeMap<Region, Decimal>,
    /// Mean share across all five segments (absent positions count 0).
    pub average_share: f64,
}

/// Which teams rubber-banding touched this round.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RubberBandReport {
    pub cross_team_average: f64,
    pub boosted: Vec<TeamId>,
    pub penalized: Vec<TeamId>,
}

/// Full result of one allocation pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketOutcome {
    /// Realized demand per segment after macro factors and noise.
    pub demand: BTreeMap<Segment, u64>,
    /// One entry per input team, in input order.
    pub teams: Vec<TeamMarketOutcome>,
    /// Present when rubber-banding adjusted at least one team.
    pub rubber_banding: Option<RubberBandReport>,
}

struct Contender {
    team_index: usize,
    product_id: String,
    price: Decimal,
    unit_cost: Decimal,
    effective_defect_rate: f64,
    scores: ScoreBreakdown,
}

/// Resolve market competition across all teams for one round.
///
/// Rubber-banding runs only when `rubber_banding_enabled` AND
/// `market.round >= RUBBER_BAND_MIN_ROUND`.
pub fn allocate(
    teams: &[(TeamId, TeamState)],
    market: &MarketState,
    ctx: &mut Context,
    rubber_banding_enabled: bool,
) -> Result<MarketOutcome, MarketError> {
    validate_market_state(market)?;

    let mut outcome = MarketOutcome {
        demand: BTreeMap::new(),
        teams: teams
            .iter()
            .map(|(id, _)| TeamMarketOutcome {
                team_id: id.clone(),
                positions: BTreeMap::new(),
                gross_revenue: Decimal::ZERO,
                total_revenue: Decimal::ZERO,
                total_units: 0,
                warranty_cost: Decimal::ZERO,
                esg_adjustment: None,
                revenue_by_region: BTreeMap::new(),
                average_share: 0.0,
            })
            .collect(),
        rubber_banding: None,
    };

    // Segment order is fixed: demand noise draws must not depend on map
    // iteration or team count.
    for segment in Segment::ALL {
        let demand_spec = &market.segments[&segment];
        let realized = realized_demand(
            demand_spec.base_demand,
            demand_spec.growth_rate,
            market,
            ctx,
        );
        outcome.demand.insert(segment, realized);

        let contenders = contenders_for(teams, segment, market);
        if contenders.is_empty() {
            debug!(segment = segment.name(), "no sellable products");
            continue;
        }

        let scores: Vec<f64> = contenders.iter().map(|c| c.scores.total).collect();
        let shares = softmax_shares(&scores);
        for (contender, share) in contenders.into_iter().zip(shares) {
            let position = position_from_share(&contender, share, realized)?;
            outcome.teams[contender.team_index]
                .positions
                .insert(segment, position);
        }
    }

    if rubber_banding_enabled && market.round >= RUBBER_BAND_MIN_ROUND {
        outcome.rubber_banding = apply_rubber_banding(&mut outcome)?;
    }

    for (team_outcome, (_, state)) in outcome.teams.iter_mut().zip(teams) {
        finalize_team(team_outcome, state)?;
    }

    if let Some(report) = &outcome.rubber_banding {
        info!(
            boosted = report.boosted.len(),
            penalized = report.penalized.len(),
            "rubber-banding adjusted shares"
        );
    }
    Ok(outcome)
}

/// Demand for one segment this round: base times macro factors times a
/// ±5% noise draw from the market stream, floored to whole units.
fn realized_demand(
    base: u64,
    growth_rate: f64,
    market: &MarketState,
    ctx: &mut Context,
) -> u64 {
    let i = &market.indicators;
    let gdp_factor = 1.0 + i.gdp_growth;
    let confidence_factor = 0.75 + (i.consumer_confidence / 100.0) * 0.5;
    let inflation_factor = 1.0 - i.inflation * 0.5;
    let growth_factor = 1.0 + growth_rate;
    let noise = 1.0
        + ctx
            .stream(StreamKind::Market)
            .gen_range(-DEMAND_NOISE_FRAC..=DEMAND_NOISE_FRAC);
    let realized =
        base as f64 * gdp_factor * confidence_factor * inflation_factor * growth_factor * noise;
    realized.max(0.0).floor() as u64
}

/// Best sellable product per team for this segment; teams without one
/// are simply absent (score zero, excluded from the softmax).
fn contenders_for(
    teams: &[(TeamId, TeamState)],
    segment: Segment,
    market: &MarketState,
) -> Vec<Contender> {
    let demand_spec = &market.segments[&segment];
    let mut contenders = Vec::new();
    for (team_index, (_, state)) in teams.iter().enumerate() {
        let mut best: Option<(&Product, ScoreBreakdown)> = None;
        for product in state.sellable_in(segment) {
            let scores = score_product(product, state, demand_spec, &market.pressures);
            let better = match &best {
                Some((_, current)) => scores.total > current.total,
                None => true,
            };
            if better {
                best = Some((product, scores));
            }
        }
        if let Some((product, scores)) = best {
            contenders.push(Contender {
                team_index,
                product_id: product.id.clone(),
                price: product.price,
                unit_cost: product.unit_cost,
                effective_defect_rate: effective_defect_rate(state, product),
                scores,
            });
        }
    }
    contenders
}

/// Softmax over total scores with max-subtraction for numeric stability.
/// Zero-score entries are excluded unless every entry is zero, in which
/// case demand splits evenly.
fn softmax_shares(scores: &[f64]) -> Vec<f64> {
    let competing: Vec<bool> = scores.iter().map(|s| *s > 0.0).collect();
    if competing.iter().all(|c| !c) {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    let max = scores
        .iter()
        .zip(&competing)
        .filter(|(_, c)| **c)
        .map(|(s, _)| *s)
        .fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = scores
        .iter()
        .zip(&competing)
        .map(|(s, c)| {
            if *c {
                ((s - max) / SOFTMAX_TEMPERATURE).exp()
            } else {
                0.0
            }
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

fn position_from_share(
    contender: &Contender,
    share: f64,
    demand: u64,
) -> Result<TeamMarketPosition, MarketError> {
    let units = (demand as f64 * share).floor().max(0.0) as u64;
    let revenue = Decimal::from(units) * contender.price;
    let warranty_cost = warranty_cost(units, contender.effective_defect_rate, contender.unit_cost)?;
    Ok(TeamMarketPosition {
        product_id: contender.product_id.clone(),
        scores: contender.scores,
        share,
        units,
        revenue,
        warranty_cost,
        price: contender.price,
        unit_cost: contender.unit_cost,
        effective_defect_rate: contender.effective_defect_rate,
    })
}

/// Rewrite a position from an adjusted share: units, revenue, and
/// warranty all follow.
fn recompute_position(
    position: &mut TeamMarketPosition,
    share: f64,
    demand: u64,
) -> Result<(), MarketError> {
    position.share = share;
    position.units = (demand as f64 * share).floor().max(0.0) as u64;
    position.revenue = Decimal::from(position.units) * position.price;
    position.warranty_cost = warranty_cost(
        position.units,
        position.effective_defect_rate,
        position.unit_cost,
    )?;
    Ok(())
}

fn warranty_cost(units: u64, defect_rate: f64, unit_cost: Decimal) -> Result<Decimal, MarketError> {
    let rate = Decimal::from_f64(defect_rate).ok_or(MarketError::NonFinite)?;
    Ok(Decimal::from(units) * rate * unit_cost)
}

/// Mean factory defect rate scaled by product reliability, clamped to a
/// plausible band.
fn effective_defect_rate(state: &TeamState, product: &Product) -> f64 {
    let factory_defect = if state.factories.is_empty() {
        DEFAULT_FACTORY_DEFECT
    } else {
        state.factories.iter().map(|f| f.defect_rate).sum::<f64>() / state.factories.len() as f64
    };
    (factory_defect * (1.5 - product.reliability / 100.0)).clamp(0.01, 0.30)
}

/// ESG revenue adjustment. Scores at or above the 300 baseline have no
/// effect; below it the penalty rate interpolates linearly from 1% near
/// the threshold to 8% at zero: `rate = 8% - (score/300) * 7%`.
pub fn esg_revenue_adjustment(esg_score: f64, revenue: Decimal) -> Option<EsgAdjustment> {
    if !esg_score.is_finite() || esg_score >= ESG_BASELINE {
        return None;
    }
    let fraction = Decimal::from_f64(esg_score.max(0.0) / ESG_BASELINE)?;
    let penalty_rate = Decimal::new(8, 2) - fraction * Decimal::new(7, 2);
    Some(EsgAdjustment {
        penalty_rate,
        amount: -(revenue * penalty_rate),
    })
}

/// Conditional catch-up adjustment. Teams whose average share trails
/// half the cross-team average get a boost multiplier on every segment
/// share; teams above twice the average get a penalty multiplier. Units,
/// revenue, and warranty are recomputed from the adjusted shares: a
/// full recomputation, not an incremental patch. Shares are NOT
/// renormalized afterwards.
fn apply_rubber_banding(
    outcome: &mut MarketOutcome,
) -> Result<Option<RubberBandReport>, MarketError> {
    let averages: Vec<f64> = outcome.teams.iter().map(average_share).collect();
    if averages.is_empty() {
        return Ok(None);
    }
    let cross_team_average = averages.iter().sum::<f64>() / averages.len() as f64;
    if cross_team_average <= 0.0 {
        return Ok(None);
    }

    let mut report = RubberBandReport {
        cross_team_average,
        ..RubberBandReport::default()
    };
    let demand = outcome.demand.clone();
    for (team_outcome, average) in outcome.teams.iter_mut().zip(&averages) {
        let multiplier = if *average < cross_team_average * RUBBER_BAND_LOW_RATIO {
            report.boosted.push(team_outcome.team_id.clone());
            RUBBER_BAND_BOOST
        } else if *average > cross_team_average * RUBBER_BAND_HIGH_RATIO {
            report.penalized.push(team_outcome.team_id.clone());
            RUBBER_BAND_PENALTY
        } else {
            continue;
        };
        for (segment, position) in team_outcome.positions.iter_mut() {
            let adjusted = position.share * multiplier;
            recompute_position(position, adjusted, demand[segment])?;
        }
    }

    if report.boosted.is_empty() && report.penalized.is_empty() {
        Ok(None)
    } else {
        Ok(Some(report))
    }
}

fn average_share(team_outcome: &TeamMarketOutcome) -> f64 {
    let total: f64 = Segment::ALL
        .iter()
        .map(|segment| {
            team_outcome
                .positions
                .get(segment)
                .map(|p| p.share)
                .unwrap_or(0.0)
        })
        .sum();
    total / Segment::ALL.len() as f64
}

/// Totals, ESG adjustment, and region attribution for one team.
fn finalize_team(
    team_outcome: &mut TeamMarketOutcome,
    state: &TeamState,
) -> Result<(), MarketError> {
    let mut gross = Decimal::ZERO;
    let mut units = 0u64;
    let mut warranty = Decimal::ZERO;
    for position in team_outcome.positions.values() {
        gross += position.revenue;
        units += position.units;
        warranty += position.warranty_cost;
    }
    team_outcome.gross_revenue = gross;
    team_outcome.total_units = units;
    team_outcome.warranty_cost = warranty;
    team_outcome.average_share = average_share(team_outcome);
    team_outcome.esg_adjustment = esg_revenue_adjustment(state.esg_score, gross);
    team_outcome.total_revenue = gross
        + team_outcome
            .esg_adjustment
            .as_ref()
            .map(|a| a.amount)
            .unwrap_or(Decimal::ZERO);
    team_outcome.revenue_by_region = attribute_revenue(state, team_outcome.total_revenue);
    Ok(())
}

/// Split revenue across factory regions proportional to capacity;
/// factoryless teams book everything to the home market.
fn attribute_revenue(state: &TeamState, total: Decimal) -> BTreeMap<Region, Decimal> {
    let mut by_region = BTreeMap::new();
    let total_capacity: u64 = state.factories.iter().map(|f| f.capacity).sum();
    if state.factories.is_empty() || total_capacity == 0 {
        by_region.insert(Region::NorthAmerica, total);
        return by_region;
    }
    for factory in &state.factories {
        let fraction = Decimal::from(factory.capacity) / Decimal::from(total_capacity);
        *by_region.entry(factory.region).or_insert(Decimal::ZERO) += total * fraction;
    }
    by_region
}
