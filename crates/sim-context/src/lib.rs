#![deny(warnings)]

//! Deterministic randomness and audit hashing for Handset Tycoon.
//!
//! Every random draw in the engine flows through a [`Context`]: a set of
//! named ChaCha8 substreams derived from `(match seed, round, scope,
//! stream)`. Identical construction arguments yield byte-identical draw
//! sequences; different scopes (teams) yield independent streams, so one
//! team's random outcomes can never leak into another's.
//!
//! There is deliberately no fallback generator. Code that needs
//! randomness takes a `&mut Context`; a missing match seed is a
//! configuration error surfaced at the orchestrator boundary.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::TeamId;
use std::collections::BTreeMap;
use thiserror::Error;

/// Scope name used for the cross-team market stream.
const MARKET_SCOPE: &str = "__market__";

/// Errors produced by context/hashing helpers.
#[derive(Debug, Error)]
pub enum ContextError {
    /// State could not be canonically serialized for hashing.
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Seeds in effect for one round, recorded in the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedBundle {
    pub match_seed: u64,
    pub round_seed: u64,
}

/// Named random-number substreams. Each gets an independent generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKind {
    /// Demand noise and macro random walks.
    Market,
    /// R&D outcomes.
    Research,
    /// Hiring and training outcomes.
    Hiring,
    /// Everything else.
    General,
}

impl StreamKind {
    fn name(&self) -> &'static str {
        match self {
            StreamKind::Market => "market",
            StreamKind::Research => "research",
            StreamKind::Hiring => "hiring",
            StreamKind::General => "general",
        }
    }
}

/// Entity kinds the ID generator namespaces by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Factory,
    Product,
}

impl EntityKind {
    fn name(&self) -> &'static str {
        match self {
            EntityKind::Factory => "factory",
            EntityKind::Product => "product",
        }
    }
}

/// Derive the per-round seed bundle. Pure function of its inputs.
pub fn derive_seed_bundle(match_seed: u64, round: u32) -> SeedBundle {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"round-seed");
    hasher.update(&match_seed.to_le_bytes());
    hasher.update(&round.to_le_bytes());
    SeedBundle {
        match_seed,
        round_seed: first_u64(hasher.finalize().as_bytes()),
    }
}

fn first_u64(bytes: &[u8; 32]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

fn stream_seed(match_seed: u64, round: u32, scope: &str, stream: StreamKind) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"stream-seed");
    hasher.update(&match_seed.to_le_bytes());
    hasher.update(&round.to_le_bytes());
    hasher.update(scope.as_bytes());
    // Separator so ("ab", "c") and ("a", "bc") cannot collide.
    hasher.update(&[0xff]);
    hasher.update(stream.name().as_bytes());
    first_u64(hasher.finalize().as_bytes())
}

/// Deterministic context for one `(round, scope)` pair. Substreams are
/// created lazily on first use and drawn from monotonically thereafter.
#[derive(Debug)]
pub struct Context {
    match_seed: u64,
    round: u32,
    scope: String,
    streams: BTreeMap<StreamKind, ChaCha8Rng>,
    counters: BTreeMap<EntityKind, u64>,
}

impl Context {
    /// Context for one team's decision pipeline.
    pub fn for_team(match_seed: u64, round: u32, team_id: &TeamId) -> Self {
        Self::new(match_seed, round, team_id.0.clone())
    }

    /// Context for the cross-team market allocation and evolution steps.
    pub fn for_market(match_seed: u64, round: u32) -> Self {
        Self::new(match_seed, round, MARKET_SCOPE.to_string())
    }

    fn new(match_seed: u64, round: u32, scope: String) -> Self {
        Self {
            match_seed,
            round,
            scope,
            streams: BTreeMap::new(),
            counters: BTreeMap::new(),
        }
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The named substream, created on first use.
    pub fn stream(&mut self, kind: StreamKind) -> &mut ChaCha8Rng {
        let seed = stream_seed(self.match_seed, self.round, &self.scope, kind);
        self.streams
            .entry(kind)
            .or_insert_with(|| ChaCha8Rng::seed_from_u64(seed))
    }

    /// Next entity ID, monotonic per kind within this context, e.g.
    /// "product-alpha-r3-1".
    pub fn next_id(&mut self, kind: EntityKind) -> String {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        format!("{}-{}-r{}-{}", kind.name(), self.scope, self.round, counter)
    }
}

/// Stable content hash of any serializable state, hex-encoded.
///
/// Canonical JSON (struct fields in declaration order, maps in BTreeMap
/// key order) hashed with blake3. Used only for audit/replay comparison,
/// never for business logic.
pub fn hash_state<T: serde::Serialize>(state: &T) -> Result<String, ContextError> {
    let bytes = serde_json::to_vec(state)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::Rng;

    fn draws(ctx: &mut Context, kind: StreamKind, n: usize) -> Vec<f64> {
        (0..n).map(|_| ctx.stream(kind).gen_range(0.0..1.0)).collect()
    }

    #[test]
    fn seed_bundle_is_pure() {
        let a = derive_seed_bundle(42, 3);
        let b = derive_seed_bundle(42, 3);
        assert_eq!(a, b);
        assert_ne!(a.round_seed, derive_seed_bundle(42, 4).round_seed);
        assert_ne!(a.round_seed, derive_seed_bundle(43, 3).round_seed);
    }

    #[test]
    fn identical_contexts_draw_identically() {
        let team = TeamId("alpha".to_string());
        let mut a = Context::for_team(7, 2, &team);
        let mut b = Context::for_team(7, 2, &team);
        assert_eq!(draws(&mut a, StreamKind::Market, 16), draws(&mut b, StreamKind::Market, 16));
        assert_eq!(draws(&mut a, StreamKind::Hiring, 16), draws(&mut b, StreamKind::Hiring, 16));
    }

    #[test]
    fn teams_get_independent_streams() {
        let mut a = Context::for_team(7, 2, &TeamId("alpha".to_string()));
        let mut b = Context::for_team(7, 2, &TeamId("bravo".to_string()));
        assert_ne!(draws(&mut a, StreamKind::Market, 16), draws(&mut b, StreamKind::Market, 16));
    }

    #[test]
    fn streams_within_a_context_differ() {
        let team = TeamId("alpha".to_string());
        let mut a = Context::for_team(7, 2, &team);
        let mut b = Context::for_team(7, 2, &team);
        assert_ne!(draws(&mut a, StreamKind::Market, 16), draws(&mut b, StreamKind::Research, 16));
    }

    #[test]
    fn market_scope_differs_from_teams() {
        let mut m = Context::for_market(7, 2);
        let mut t = Context::for_team(7, 2, &TeamId("alpha".to_string()));
        assert_ne!(draws(&mut m, StreamKind::Market, 16), draws(&mut t, StreamKind::Market, 16));
    }

    #[test]
    fn ids_are_monotonic_and_namespaced() {
        let mut ctx = Context::for_team(7, 3, &TeamId("alpha".to_string()));
        assert_eq!(ctx.next_id(EntityKind::Product), "product-alpha-r3-1");
        assert_eq!(ctx.next_id(EntityKind::Product), "product-alpha-r3-2");
        assert_eq!(ctx.next_id(EntityKind::Factory), "factory-alpha-r3-1");
    }

    proptest! {
        #[test]
        fn seed_bundle_pure_for_any_input(seed in any::<u64>(), round in 0u32..10_000) {
            let a = derive_seed_bundle(seed, round);
            let b = derive_seed_bundle(seed, round);
            prop_assert_eq!(a, b);
            prop_assert_eq!(a.match_seed, seed);
        }

        #[test]
        fn stream_draws_replay_for_any_team(seed in any::<u64>(),
                                            round in 0u32..100,
                                            name in "[a-z]{1,12}") {
            let team = TeamId(name);
            let mut a = Context::for_team(seed, round, &team);
            let mut b = Context::for_team(seed, round, &team);
            prop_assert_eq!(
                draws(&mut a, StreamKind::General, 4),
                draws(&mut b, StreamKind::General, 4)
            );
        }
    }

    #[test]
    fn hash_is_stable_and_order_independent() {
        use std::collections::BTreeMap;
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), 1u32);
        a.insert("y".to_string(), 2u32);
        let mut b = BTreeMap::new();
        b.insert("y".to_string(), 2u32);
        b.insert("x".to_string(), 1u32);
        assert_eq!(hash_state(&a).unwrap(), hash_state(&b).unwrap());
        let mut c = a.clone();
        c.insert("z".to_string(), 3u32);
        assert_ne!(hash_state(&a).unwrap(), hash_state(&c).unwrap());
    }
}
