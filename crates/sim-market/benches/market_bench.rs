use criterion::{criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use sim_core::{Factory, FinancialStatement, Product, ProductPhase, Region, TeamId, TeamState};
use std::collections::BTreeMap;

fn team(name: &str, brand: f64) -> (TeamId, TeamState) {
    let products = sim_core::Segment::ALL
        .iter()
        .enumerate()
        .map(|(i, segment)| Product {
            id: format!("product-{name}-{i}"),
            segment: *segment,
            price: Decimal::new(200 + 300 * i as i64, 0),
            quality: 50.0 + 8.0 * i as f64,
            features: 60.0 + 5.0 * i as f64,
            reliability: 90.0,
            unit_cost: Decimal::new(100 + 150 * i as i64, 0),
            phase: ProductPhase::Launched,
            rounds_remaining: 0,
        })
        .collect();
    let state = TeamState {
        cash: Decimal::new(10_000_000, 0),
        revenue: Decimal::ZERO,
        net_income: Decimal::ZERO,
        products,
        factories: vec![Factory {
            id: format!("factory-{name}"),
            region: Region::AsiaPacific,
            capacity: 2_000_000,
            efficiency: 0.8,
            defect_rate: 0.04,
        }],
        brand_value: brand,
        esg_score: 450.0,
        morale: 0.7,
        market_share: BTreeMap::new(),
        patents: 0,
        statement: FinancialStatement::default(),
    };
    (TeamId(name.to_string()), state)
}

fn bench_allocate(c: &mut Criterion) {
    let teams: Vec<_> = (0..7)
        .map(|i| team(&format!("team-{i}"), 0.3 + 0.08 * i as f64))
        .collect();
    let mut market = sim_market::initial_market_state();
    market.round = 4;
    c.bench_function("allocate_7_teams", |b| {
        b.iter(|| {
            let mut ctx = sim_context::Context::for_market(42, 4);
            sim_market::allocate(&teams, &market, &mut ctx, true).unwrap()
        })
    });
}

criterion_group!(benches, bench_allocate);
criterion_main!(benches);
