#![deny(warnings)]

//! Headless CLI: seeds a demo match and resolves rounds end to end.
//!
//! Collaborator modules here are small demo stand-ins; the real
//! per-domain calculators live outside this workspace and plug into the
//! same [`DecisionModule`] contract.

use anyhow::Result;
use rust_decimal::Decimal;
use sim_core::{
    validate_market_state, validate_team_state, Factory, FinancialStatement, Product,
    ProductPhase, Region, Segment, TeamId, TeamState,
};
use sim_round::{
    process_round, CollaboratorPipeline, CollaboratorStage, Context, DecisionModule,
    ModuleOutcome, ModuleResult, RoundInput, TeamDecisions, TeamEntry,
};
use std::collections::BTreeMap;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

fn parse_args() -> (usize, u32, u64) {
    let mut teams = 4usize;
    let mut rounds = 5u32;
    let mut seed = 42u64;
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--teams" => teams = it.next().and_then(|s| s.parse().ok()).unwrap_or(teams),
            "--rounds" => rounds = it.next().and_then(|s| s.parse().ok()).unwrap_or(rounds),
            "--seed" => seed = it.next().and_then(|s| s.parse().ok()).unwrap_or(seed),
            _ => {}
        }
    }
    (teams, rounds, seed)
}

fn demo_product(team: &str, segment: Segment, price: i64, quality: f64) -> Product {
    Product {
        id: format!("product-{team}-{}", segment.name().to_lowercase().replace(' ', "-")),
        segment,
        price: Decimal::new(price, 0),
        quality,
        features: quality + 5.0,
        reliability: 88.0,
        unit_cost: Decimal::new(price / 2, 0),
        phase: ProductPhase::Launched,
        rounds_remaining: 0,
    }
}

fn demo_team(name: &str, index: usize) -> TeamState {
    // Slightly staggered starting positions so the demo match is not a tie.
    let tilt = index as f64 * 2.0;
    TeamState {
        cash: Decimal::new(25_000_000, 0),
        revenue: Decimal::ZERO,
        net_income: Decimal::ZERO,
        products: vec![
            demo_product(name, Segment::Budget, 140 + 10 * index as i64, 42.0 + tilt),
            demo_product(name, Segment::General, 380 + 20 * index as i64, 58.0 + tilt),
            demo_product(name, Segment::Enthusiast, 820, 72.0 + tilt),
            demo_product(name, Segment::Professional, 1_150, 84.0 + tilt),
            demo_product(name, Segment::ActiveLifestyle, 590, 66.0 + tilt),
        ],
        factories: vec![Factory {
            id: format!("factory-{name}-1"),
            region: Region::AsiaPacific,
            capacity: 2_500_000,
            efficiency: 0.75 + 0.03 * index as f64,
            defect_rate: 0.05,
        }],
        brand_value: 0.40 + 0.05 * index as f64,
        esg_score: 350.0 + 60.0 * index as f64,
        morale: 0.7,
        market_share: BTreeMap::new(),
        patents: index as u32,
        statement: FinancialStatement {
            shares_outstanding: 2_000_000,
            ..FinancialStatement::default()
        },
    }
}

/// Demo R&D: counts development down and launches finished models.
struct ResearchModule;

impl DecisionModule for ResearchModule {
    fn process(
        &self,
        mut state: TeamState,
        _decisions: &TeamDecisions,
        _ctx: &mut Context,
    ) -> ModuleOutcome {
        let mut result = ModuleResult::success();
        for product in state.products.iter_mut() {
            match product.phase {
                ProductPhase::InDevelopment => {
                    product.rounds_remaining = product.rounds_remaining.saturating_sub(1);
                    if product.rounds_remaining == 0 {
                        product.phase = ProductPhase::Ready;
                        result.changes.push(format!("{} finished development", product.id));
                    }
                }
                ProductPhase::Ready => {
                    product.phase = ProductPhase::Launched;
                    result.changes.push(format!("{} launched", product.id));
                }
                ProductPhase::Launched => {}
            }
        }
        ModuleOutcome {
            new_state: state,
            result,
        }
    }
}

/// Demo marketing: fixed spend for steady brand upkeep.
struct MarketingModule {
    budget: Decimal,
}

impl DecisionModule for MarketingModule {
    fn process(
        &self,
        mut state: TeamState,
        _decisions: &TeamDecisions,
        _ctx: &mut Context,
    ) -> ModuleOutcome {
        if state.cash < self.budget {
            return ModuleOutcome {
                new_state: state,
                result: ModuleResult::failure("insufficient cash for marketing budget"),
            };
        }
        state.cash -= self.budget;
        state.brand_value = (state.brand_value + 0.02).clamp(0.0, 1.0);
        let mut result = ModuleResult::success();
        result.costs = self.budget;
        result.changes.push("brand campaign ran".to_string());
        ModuleOutcome {
            new_state: state,
            result,
        }
    }
}

/// Demo finance: interest income on positive cash balances.
struct FinanceModule;

impl DecisionModule for FinanceModule {
    fn process(
        &self,
        state: TeamState,
        _decisions: &TeamDecisions,
        _ctx: &mut Context,
    ) -> ModuleOutcome {
        let mut result = ModuleResult::success();
        if state.cash > Decimal::ZERO {
            result.revenue = state.cash * Decimal::new(5, 3); // 0.5% per round
        }
        ModuleOutcome {
            new_state: state,
            result,
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let (team_count, rounds, seed) = parse_args();
    info!(team_count, rounds, seed, "starting demo match");

    let market = sim_market::initial_market_state();
    validate_market_state(&market)?;

    let names = ["aurora", "bastion", "cobalt", "dynamo", "ember", "flint", "garnet"];
    let teams: Vec<TeamEntry> = (0..team_count.min(names.len()))
        .map(|i| {
            let state = demo_team(names[i], i);
            TeamEntry {
                id: TeamId(names[i].to_string()),
                state,
                decisions: serde_json::json!({}),
            }
        })
        .collect();
    for entry in &teams {
        validate_team_state(&entry.state)?;
    }

    let pipeline = CollaboratorPipeline::new()
        .with_module(CollaboratorStage::Research, Box::new(ResearchModule))
        .with_module(
            CollaboratorStage::Marketing,
            Box::new(MarketingModule {
                budget: Decimal::new(500_000, 0),
            }),
        )
        .with_module(CollaboratorStage::Finance, Box::new(FinanceModule));

    let mut input = RoundInput {
        round: 1,
        teams,
        market,
        match_seed: Some(seed),
        market_event: None,
        team_events: Vec::new(),
    };

    for _ in 0..rounds {
        let output = process_round(&input, &pipeline)?;

        println!("== round {} ==", output.round);
        for ranking in &output.rankings {
            let result = output
                .results
                .iter()
                .find(|r| r.team_id == ranking.team_id)
                .expect("ranking refers to a result");
            println!(
                "  #{:<2} {:<8} revenue ${} | net ${} | eps rank {} | share rank {}",
                ranking.revenue_rank,
                ranking.team_id,
                result.total_revenue.round(),
                result.net_income.round(),
                ranking.eps_rank,
                ranking.share_rank
            );
        }
        for (team_id, hash) in &output.audit.final_state_hashes {
            println!("  audit {team_id}: {}", &hash[..16]);
        }

        let teams = output
            .results
            .iter()
            .map(|result| TeamEntry {
                id: result.team_id.clone(),
                state: result.new_state.clone(),
                decisions: serde_json::json!({}),
            })
            .collect();
        input = RoundInput {
            round: output.round + 1,
            teams,
            market: output.new_market,
            match_seed: Some(seed),
            market_event: None,
            team_events: Vec::new(),
        };
    }

    println!(
        "Match complete | seed {seed} | rounds {rounds} | engine v{}",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}
