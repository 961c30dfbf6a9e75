#![deny(warnings)]

//! Round orchestrator for Handset Tycoon.
//!
//! [`process_round`] drives one round end to end: per-team collaborator
//! pipeline, one market allocation pass across all teams, financial
//! write-back, rankings, next-round market evolution, and the audit
//! trail. The collaborator modules themselves live outside this crate
//! and are injected through [`CollaboratorPipeline`].
//!
//! Two-phase ordering is a hard dependency, not a style choice: every
//! team's pipeline must finish before allocation runs, because
//! allocation needs simultaneous visibility of every competitor's
//! post-decision state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_context::{derive_seed_bundle, hash_state, ContextError, SeedBundle};

pub use sim_context::Context;
use sim_core::{FinancialStatement, MarketState, Segment, TeamId, TeamState};
use sim_market::{allocate, evolve_market, MarketError, MarketEvent, RUBBER_BAND_MIN_ROUND};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Schema version stamped into every audit trail.
const SCHEMA_VERSION: u32 = 1;
/// Book value per unit of factory capacity, for the balance sheet.
const FACTORY_BOOK_VALUE_PER_UNIT: i64 = 40;
/// Book value per granted patent.
const PATENT_BOOK_VALUE: i64 = 250_000;
/// Earnings multiple used for the market-cap estimate.
const EARNINGS_MULTIPLE: i64 = 15;

/// Opaque decision payload, interpreted by collaborator modules only.
pub type TeamDecisions = serde_json::Value;

/// Errors that abort a round before any output is produced.
#[derive(Debug, Error)]
pub enum RoundError {
    /// No match seed was supplied. Generated seeds would break the
    /// replay guarantee, so this is a configuration error.
    #[error("match seed is required for reproducible rounds")]
    MissingMatchSeed,
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error("audit hashing failed: {0}")]
    Audit(#[from] ContextError),
}

/// The fixed collaborator stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CollaboratorStage {
    Materials,
    Factory,
    Hr,
    Research,
    Marketing,
    Finance,
}

impl CollaboratorStage {
    pub const ALL: [CollaboratorStage; 6] = [
        CollaboratorStage::Materials,
        CollaboratorStage::Factory,
        CollaboratorStage::Hr,
        CollaboratorStage::Research,
        CollaboratorStage::Marketing,
        CollaboratorStage::Finance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CollaboratorStage::Materials => "materials",
            CollaboratorStage::Factory => "factory",
            CollaboratorStage::Hr => "hr",
            CollaboratorStage::Research => "research",
            CollaboratorStage::Marketing => "marketing",
            CollaboratorStage::Finance => "finance",
        }
    }
}

/// What one collaborator reported for one team.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleResult {
    pub success: bool,
    pub changes: Vec<String>,
    pub costs: Decimal,
    pub revenue: Decimal,
    pub messages: Vec<String>,
}

impl ModuleResult {
    /// Successful result with no costs, revenue, or messages.
    pub fn success() -> Self {
        Self {
            success: true,
            changes: Vec::new(),
            costs: Decimal::ZERO,
            revenue: Decimal::ZERO,
            messages: Vec::new(),
        }
    }

    /// Failed result carrying a human-readable reason. The module's
    /// state change is discarded by the orchestrator.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            changes: Vec::new(),
            costs: Decimal::ZERO,
            revenue: Decimal::ZERO,
            messages: vec![message.into()],
        }
    }
}

/// A collaborator's output: the state it wants adopted plus its report.
pub struct ModuleOutcome {
    pub new_state: TeamState,
    pub result: ModuleResult,
}

/// Contract for the external per-domain decision calculators.
///
/// Implementations must not panic for expected failure modes (e.g. a
/// decision the team cannot afford); they return `success: false` with
/// the state they received, plus messages explaining what was wrong.
pub trait DecisionModule {
    fn process(
        &self,
        state: TeamState,
        decisions: &TeamDecisions,
        ctx: &mut Context,
    ) -> ModuleOutcome;
}

/// At most one module per fixed stage; unbound stages are skipped.
#[derive(Default)]
pub struct CollaboratorPipeline {
    modules: BTreeMap<CollaboratorStage, Box<dyn DecisionModule>>,
}

impl CollaboratorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(
        mut self,
        stage: CollaboratorStage,
        module: Box<dyn DecisionModule>,
    ) -> Self {
        self.modules.insert(stage, module);
        self
    }

    fn get(&self, stage: CollaboratorStage) -> Option<&dyn DecisionModule> {
        self.modules.get(&stage).map(|m| m.as_ref())
    }
}

/// A one-off round-scoped adjustment targeting a single team.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamEvent {
    pub team_id: TeamId,
    pub effect: TeamEffect,
}

/// Effect vocabulary for team events; every variant clamps to the
/// target field's valid range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TeamEffect {
    /// Multiplies every factory's efficiency; clamped to [0.05, 1.0].
    Efficiency(f64),
    /// Adds to morale; clamped to [0, 1].
    Morale(f64),
    /// Adds to brand value; clamped to [0, 1].
    BrandValue(f64),
    /// Adds to cash (may be negative).
    Cash(Decimal),
    /// Adds to the ESG score; floored at 0.
    EsgScore(f64),
}

fn apply_team_event(state: &mut TeamState, effect: &TeamEffect) {
    match effect {
        TeamEffect::Efficiency(mult) => {
            for factory in &mut state.factories {
                factory.efficiency = (factory.efficiency * mult).clamp(0.05, 1.0);
            }
        }
        TeamEffect::Morale(delta) => {
            state.morale = (state.morale + delta).clamp(0.0, 1.0);
        }
        TeamEffect::BrandValue(delta) => {
            state.brand_value = (state.brand_value + delta).clamp(0.0, 1.0);
        }
        TeamEffect::Cash(delta) => {
            state.cash += *delta;
        }
        TeamEffect::EsgScore(delta) => {
            state.esg_score = (state.esg_score + delta).max(0.0);
        }
    }
}

/// One team's slot in the round input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamEntry {
    pub id: TeamId,
    pub state: TeamState,
    pub decisions: TeamDecisions,
}

/// Everything the orchestrator needs to resolve one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundInput {
    pub round: u32,
    pub teams: Vec<TeamEntry>,
    pub market: MarketState,
    /// Mandatory in practice; `None` is rejected with
    /// [`RoundError::MissingMatchSeed`].
    pub match_seed: Option<u64>,
    pub market_event: Option<MarketEvent>,
    pub team_events: Vec<TeamEvent>,
}

/// Per-team result block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamRoundResult {
    pub team_id: TeamId,
    pub new_state: TeamState,
    pub module_results: BTreeMap<CollaboratorStage, ModuleResult>,
    pub sales_by_segment: BTreeMap<Segment, u64>,
    pub market_share_by_segment: BTreeMap<Segment, f64>,
    pub total_revenue: Decimal,
    pub total_costs: Decimal,
    pub net_income: Decimal,
    /// 1-based ranks; ties broken by input order.
    pub revenue_rank: usize,
    pub eps_rank: usize,
    pub share_rank: usize,
}

/// One team's ranks across the three independent orderings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRanking {
    pub team_id: TeamId,
    pub revenue_rank: usize,
    pub eps_rank: usize,
    pub share_rank: usize,
}

/// Proof-of-replay record for one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditTrail {
    pub seed_bundle: SeedBundle,
    pub final_state_hashes: BTreeMap<TeamId, String>,
    pub engine_version: String,
    pub schema_version: u32,
}

/// Complete round output. Always well-formed: expected failures inside
/// the round (collaborator failures, statement refresh problems) are
/// reported in the structures, never raised.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundOutput {
    pub round: u32,
    pub results: Vec<TeamRoundResult>,
    pub new_market: MarketState,
    pub rankings: Vec<TeamRanking>,
    pub summary: Vec<String>,
    pub audit: AuditTrail,
}

/// Resolve one round end to end.
pub fn process_round(
    input: &RoundInput,
    pipeline: &CollaboratorPipeline,
) -> Result<RoundOutput, RoundError> {
    let match_seed = input.match_seed.ok_or(RoundError::MissingMatchSeed)?;
    let seed_bundle = derive_seed_bundle(match_seed, input.round);
    let mut summary: Vec<String> = Vec::new();

    info!(round = input.round, teams = input.teams.len(), "processing round");

    // Phase 1: every team's decision pipeline, in input order. Each
    // stage sees the previous stage's output; a failed stage is rolled
    // back without touching the other stages or teams.
    let mut teams: Vec<(TeamId, TeamState)> = Vec::with_capacity(input.teams.len());
    let mut module_results: Vec<BTreeMap<CollaboratorStage, ModuleResult>> =
        Vec::with_capacity(input.teams.len());
    for entry in &input.teams {
        let mut ctx = Context::for_team(match_seed, input.round, &entry.id);
        let mut state = entry.state.clone();
        let mut results = BTreeMap::new();
        for stage in CollaboratorStage::ALL {
            let Some(module) = pipeline.get(stage) else {
                continue;
            };
            let before = state.clone();
            let outcome = module.process(state, &entry.decisions, &mut ctx);
            if outcome.result.success {
                state = outcome.new_state;
            } else {
                warn!(team = %entry.id, stage = stage.name(), "collaborator failed, stage rolled back");
                summary.push(format!(
                    "{}: {} stage failed and was rolled back",
                    entry.id,
                    stage.name()
                ));
                state = before;
            }
            results.insert(stage, outcome.result);
        }
        for event in input.team_events.iter().filter(|e| e.team_id == entry.id) {
            apply_team_event(&mut state, &event.effect);
        }
        teams.push((entry.id.clone(), state));
        module_results.push(results);
    }

    // Phase 2: one allocation pass across all teams.
    let mut market_ctx = Context::for_market(match_seed, input.round);
    let rubber_banding = input.round >= RUBBER_BAND_MIN_ROUND;
    let market_outcome = allocate(&teams, &input.market, &mut market_ctx, rubber_banding)?;

    if let Some(report) = &market_outcome.rubber_banding {
        for team_id in &report.boosted {
            summary.push(format!("{team_id}: trailing, share boosted"));
        }
        for team_id in &report.penalized {
            summary.push(format!("{team_id}: leading, share reduced"));
        }
    }

    // Phase 3: financial write-back.
    let mut results: Vec<TeamRoundResult> = Vec::with_capacity(teams.len());
    for (((team_id, mut state), team_market), stage_results) in teams
        .into_iter()
        .zip(market_outcome.teams)
        .zip(module_results)
    {
        let mut sales_by_segment = BTreeMap::new();
        let mut market_share_by_segment = BTreeMap::new();
        for segment in Segment::ALL {
            let (units, share) = team_market
                .positions
                .get(&segment)
                .map(|p| (p.units, p.share))
                .unwrap_or((0, 0.0));
            sales_by_segment.insert(segment, units);
            market_share_by_segment.insert(segment, share);
        }
        state.market_share = market_share_by_segment.clone();

        let module_costs: Decimal = stage_results.values().map(|r| r.costs).sum();
        let module_revenue: Decimal = stage_results.values().map(|r| r.revenue).sum();
        let total_revenue = team_market.total_revenue + module_revenue;
        let total_costs = module_costs + team_market.warranty_cost;
        let net_income = total_revenue - total_costs;
        state.revenue = total_revenue;
        state.net_income = net_income;
        state.cash += net_income;

        match build_statement(&state, total_revenue, total_costs, net_income) {
            Ok(statement) => state.statement = statement,
            Err(err) => {
                // A broken statement must not sink the round; the prior
                // snapshot stays in place.
                warn!(team = %team_id, error = %err, "financial statement refresh failed");
                summary.push(format!("{team_id}: statement refresh failed ({err})"));
            }
        }

        summary.push(format!(
            "{team_id}: revenue {total_revenue}, net income {net_income}"
        ));
        results.push(TeamRoundResult {
            team_id,
            new_state: state,
            module_results: stage_results,
            sales_by_segment,
            market_share_by_segment,
            total_revenue,
            total_costs,
            net_income,
            revenue_rank: 0,
            eps_rank: 0,
            share_rank: 0,
        });
    }

    // Phase 4: three independent rankings, stable on input order.
    let rankings = compute_rankings(&mut results);

    // Phase 5: next round's market.
    let new_market = evolve_market(&input.market, &mut market_ctx, input.market_event.as_ref());

    // Phase 6: audit trail.
    let mut final_state_hashes = BTreeMap::new();
    for result in &results {
        final_state_hashes.insert(result.team_id.clone(), hash_state(&result.new_state)?);
    }

    Ok(RoundOutput {
        round: input.round,
        results,
        new_market,
        rankings,
        summary,
        audit: AuditTrail {
            seed_bundle,
            final_state_hashes,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: SCHEMA_VERSION,
        },
    })
}

/// Statement refresh errors. Reported, never fatal.
#[derive(Debug, Error, PartialEq)]
pub enum StatementError {
    #[error("no shares outstanding, EPS undefined")]
    NoSharesOutstanding,
}

fn build_statement(
    state: &TeamState,
    revenue: Decimal,
    costs: Decimal,
    net_income: Decimal,
) -> Result<FinancialStatement, StatementError> {
    let shares_outstanding = state.statement.shares_outstanding;
    if shares_outstanding == 0 {
        return Err(StatementError::NoSharesOutstanding);
    }
    let shares_dec = Decimal::from(shares_outstanding);
    let eps = net_income / shares_dec;

    let factory_book: Decimal = state
        .factories
        .iter()
        .map(|f| Decimal::from(f.capacity) * Decimal::new(FACTORY_BOOK_VALUE_PER_UNIT, 0))
        .sum();
    let patent_book = Decimal::from(state.patents) * Decimal::new(PATENT_BOOK_VALUE, 0);
    let total_assets = state.cash + factory_book + patent_book;
    let total_equity = total_assets;
    let earnings_value = net_income * Decimal::new(EARNINGS_MULTIPLE, 0);
    let market_cap = earnings_value.max(total_equity).max(Decimal::ZERO);
    let share_price = market_cap / shares_dec;

    Ok(FinancialStatement {
        revenue,
        costs,
        net_income,
        total_assets,
        total_equity,
        eps,
        share_price,
        market_cap,
        shares_outstanding,
    })
}

/// Rank by descending key with stable sort, so ties keep input order.
fn ranks_by_key<K, F>(results: &[TeamRoundResult], key: F) -> Vec<usize>
where
    K: PartialOrd,
    F: Fn(&TeamRoundResult) -> K,
{
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| {
        key(&results[b])
            .partial_cmp(&key(&results[a]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut ranks = vec![0; results.len()];
    for (position, index) in order.into_iter().enumerate() {
        ranks[index] = position + 1;
    }
    ranks
}

fn compute_rankings(results: &mut [TeamRoundResult]) -> Vec<TeamRanking> {
    let revenue_ranks = ranks_by_key(results, |r| r.total_revenue);
    let eps_ranks = ranks_by_key(results, |r| r.new_state.statement.eps);
    let share_ranks = ranks_by_key(results, |r| {
        r.market_share_by_segment.values().sum::<f64>()
    });
    results
        .iter_mut()
        .zip(revenue_ranks)
        .zip(eps_ranks)
        .zip(share_ranks)
        .map(|(((result, revenue_rank), eps_rank), share_rank)| {
            result.revenue_rank = revenue_rank;
            result.eps_rank = eps_rank;
            result.share_rank = share_rank;
            TeamRanking {
                team_id: result.team_id.clone(),
                revenue_rank,
                eps_rank,
                share_rank,
            }
        })
        .collect()
}
