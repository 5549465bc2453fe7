//! Provers: approximate random-walk scores over a lazily expanded proof graph.
//!
//! Every prover implements [`Prover`] and is built by name through a
//! [`ProverRegistry`]. The map-based provers walk a state-addressed proof
//! graph; the id provers need a [`CachingIdProofGraph`].
//!
//! A prover instance runs one proof at a time. Concurrent use of one instance
//! fails with [`ProveError::Reentrant`]; workers each take a [`Prover::copy`].

pub mod dfs;
pub mod dpr;
pub mod id_dpr;
pub mod id_ppr;
pub mod ppr;
pub mod priority_queue;
pub mod weighter;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::AprOptions;
use crate::error::{ConfigError, ProResult, ProveError};
use crate::graph::{CachingIdProofGraph, ProofGraph, ProofGraphKind};
use crate::ground::InferenceExample;
use crate::plugins::WamPlugin;
use crate::registry::FeatureTable;
use crate::status::StatusLogger;
use crate::wam::{Outlink, State, WamProgram};

pub use dfs::DfsProver;
pub use dpr::DprProver;
pub use id_dpr::IdDprProver;
pub use id_ppr::IdPprProver;
pub use ppr::PprProver;
pub use priority_queue::PriorityQueueProver;
pub use weighter::Weighter;

/// Registry names, in display order.
pub const PROVER_NAMES: &[&str] = &["dfs", "ppr", "dpr", "idppr", "iddpr", "qpr"];

/// Scores of every state a proof touched.
pub type StateScores = HashMap<State, f64>;

/// A random-walk prover.
pub trait Prover: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// The proof graph this prover walks.
    fn graph_kind(&self) -> ProofGraphKind;

    fn weighter(&self) -> &Weighter;

    fn set_weighter(&mut self, weighter: Weighter);

    /// An independent prover sharing this one's weighter.
    fn copy(&self) -> Box<dyn Prover>;

    /// Score every state reachable from the start state of `pg`.
    fn prove(&self, pg: &mut dyn ProofGraph, status: &StatusLogger) -> ProResult<StateScores>;

    /// A fresh proof graph of the kind this prover walks.
    fn make_proof_graph(
        &self,
        example: InferenceExample,
        program: Arc<WamProgram>,
        plugins: Vec<Arc<dyn WamPlugin>>,
        features: Arc<FeatureTable>,
    ) -> ProResult<Box<dyn ProofGraph>> {
        self.graph_kind().build(example, program, plugins, features)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds a prover from walk options and a weighter.
pub type ProverFactory = fn(&AprOptions, Weighter) -> Box<dyn Prover>;

/// Registry of prover constructors keyed by name.
pub struct ProverRegistry {
    factories: HashMap<String, ProverFactory>,
}

impl ProverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in prover.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("dfs", |apr, w| Box::new(DfsProver::new(*apr, w)));
        registry.register("ppr", |apr, w| Box::new(PprProver::new(*apr, w)));
        registry.register("dpr", |apr, w| Box::new(DprProver::new(*apr, w)));
        registry.register("idppr", |apr, w| Box::new(IdPprProver::new(*apr, w)));
        registry.register("iddpr", |apr, w| Box::new(IdDprProver::new(*apr, w)));
        registry.register("qpr", |apr, w| Box::new(PriorityQueueProver::new(*apr, w)));
        registry
    }

    /// Register a factory. An existing factory of the same name is replaced.
    pub fn register(&mut self, name: &str, factory: ProverFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Build the prover called `name`.
    pub fn build(&self, name: &str, apr: &AprOptions, weighter: Weighter) -> ProResult<Box<dyn Prover>> {
        let factory = self.factories.get(name).ok_or_else(|| ConfigError::UnknownComponent {
            kind: "prover".into(),
            name: name.into(),
            expected: PROVER_NAMES.join(", "),
        })?;
        Ok(factory(apr, weighter))
    }

    /// Number of registered provers.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ProverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProverRegistry")
            .field("provers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Marks a prover busy for the length of one proof.
pub(crate) struct ProofGuard<'a>(&'a AtomicBool);

impl<'a> ProofGuard<'a> {
    pub(crate) fn enter(busy: &'a AtomicBool, prover: &str) -> ProResult<Self> {
        if busy.swap(true, Ordering::AcqRel) {
            return Err(ProveError::Reentrant {
                prover: prover.to_string(),
            }
            .into());
        }
        Ok(Self(busy))
    }
}

impl Drop for ProofGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Edge weights of `links` and their total. Non-finite weights are reported.
pub(crate) fn weigh(weighter: &Weighter, links: &[Outlink]) -> (Vec<f64>, f64) {
    let weights: Vec<f64> = links.iter().map(|o| weighter.weight(&o.features)).collect();
    for (o, w) in links.iter().zip(&weights) {
        if !w.is_finite() {
            tracing::warn!(weight = w, features = ?o.features, "illegal edge weight");
        }
    }
    let z = weights.iter().sum();
    (weights, z)
}

/// `(child id, weight)` pairs of node `u` and their total.
pub(crate) fn weigh_ids(
    cg: &mut CachingIdProofGraph,
    weighter: &Weighter,
    u: usize,
    true_loop: bool,
) -> ProResult<(Vec<(usize, f64)>, f64)> {
    let links = cg.id_outlinks(u, true_loop)?;
    let mut out = Vec::with_capacity(links.len());
    let mut z = 0.0;
    for link in links {
        let w = weighter.weight(&link.features);
        if !w.is_finite() {
            tracing::warn!(weight = w, node = u, "illegal edge weight");
        }
        z += w;
        out.push((link.child, w));
    }
    Ok((out, z))
}

/// The id view of `pg`, or a `WrongGraphKind` error naming `prover`.
pub(crate) fn require_caching<'a>(
    pg: &'a mut dyn ProofGraph,
    prover: &str,
) -> ProResult<&'a mut CachingIdProofGraph> {
    pg.as_caching_id().ok_or_else(|| {
        ProveError::WrongGraphKind {
            prover: prover.to_string(),
            expected: ProofGraphKind::CachingId.to_string(),
        }
        .into()
    })
}

/// Dense id-indexed scores to a state map, dropping zeros.
pub(crate) fn id_scores(cg: &CachingIdProofGraph, p: &[f64]) -> ProResult<StateScores> {
    let mut out = StateScores::with_capacity(p.len());
    for (id, &score) in p.iter().enumerate() {
        if score != 0.0 {
            out.insert(cg.state_of(id)?.clone(), score);
        }
    }
    Ok(out)
}

/// Grow `v` so index `id` is valid.
pub(crate) fn ensure_len(v: &mut Vec<f64>, id: usize) {
    if v.len() <= id {
        v.resize(id + 1, 0.0);
    }
}

/// Scores of the completed states only, in descending order.
pub fn completed_scores(scores: &StateScores) -> Vec<(State, f64)> {
    let mut out: Vec<(State, f64)> = scores
        .iter()
        .filter(|(s, _)| s.is_completed())
        .map(|(s, w)| (s.clone(), *w))
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::*;
    use crate::squash::SquashingFunction;

    fn solution_scores(name: &str, apr: AprOptions) -> HashMap<String, f64> {
        let prover = ProverRegistry::with_defaults()
            .build(name, &apr, Weighter::uniform(SquashingFunction::ReLU))
            .unwrap();
        let mut pg = build(prover.graph_kind(), DIAMOND_RULES, DIAMOND_FACTS, "p(a,P)");
        let scores = prover.prove(pg.as_mut(), &StatusLogger::new()).unwrap();
        completed_scores(&scores)
            .into_iter()
            .map(|(s, w)| (pg.fill(&s).to_string(), w))
            .collect()
    }

    fn assert_close(a: &HashMap<String, f64>, b: &HashMap<String, f64>, tol: f64) {
        assert_eq!(a.len(), b.len(), "{a:?} vs {b:?}");
        for (k, v) in a {
            let w = b[k];
            assert!((v - w).abs() < tol, "{k}: {v} vs {w}");
        }
    }

    #[test]
    fn registry_knows_every_prover() {
        let registry = ProverRegistry::with_defaults();
        assert_eq!(registry.len(), PROVER_NAMES.len());
        for name in PROVER_NAMES {
            let p = registry
                .build(name, &AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU))
                .unwrap();
            assert_eq!(p.name(), *name);
        }
        assert!(
            registry
                .build("bfs", &AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU))
                .is_err()
        );
    }

    #[test]
    fn id_provers_match_their_map_counterparts() {
        let apr = AprOptions::default();
        assert_close(&solution_scores("dpr", apr), &solution_scores("iddpr", apr), 1e-9);
        assert_close(&solution_scores("ppr", apr), &solution_scores("idppr", apr), 1e-9);
    }

    #[test]
    fn push_provers_agree_with_power_iteration() {
        let apr = AprOptions {
            max_depth: 100,
            epsilon: 1e-6,
            ..AprOptions::default()
        };
        let ppr = solution_scores("ppr", apr);
        assert_eq!(ppr.len(), 1);
        assert!(ppr["p(a,d)"] > 0.0);
        assert_close(&ppr, &solution_scores("dpr", apr), 0.01);
        assert_close(&ppr, &solution_scores("iddpr", apr), 0.01);
        assert_close(&ppr, &solution_scores("qpr", apr), 0.02);
    }

    #[test]
    fn id_prover_rejects_state_graph() {
        let prover = IdDprProver::new(AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::State, DIAMOND_RULES, DIAMOND_FACTS, "p(a,P)");
        assert!(prover.prove(pg.as_mut(), &StatusLogger::new()).is_err());
    }

    #[test]
    fn guard_rejects_overlapping_proofs() {
        let busy = AtomicBool::new(false);
        let guard = ProofGuard::enter(&busy, "dpr").unwrap();
        assert!(ProofGuard::enter(&busy, "dpr").is_err());
        drop(guard);
        assert!(ProofGuard::enter(&busy, "dpr").is_ok());
    }
}
