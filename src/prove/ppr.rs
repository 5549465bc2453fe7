//! Power-iteration personalized PageRank.
//!
//! Runs exactly `max_depth` rounds of
//! `p' = alpha * seed + (1 - alpha) * p M` from the start state, with no
//! convergence test.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use crate::config::AprOptions;
use crate::error::ProResult;
use crate::graph::{ProofGraph, ProofGraphKind};
use crate::status::StatusLogger;

use super::{ProofGuard, Prover, StateScores, Weighter, weigh};

pub struct PprProver {
    apr: AprOptions,
    weighter: Weighter,
    busy: AtomicBool,
}

impl PprProver {
    pub fn new(apr: AprOptions, weighter: Weighter) -> Self {
        Self {
            apr,
            weighter,
            busy: AtomicBool::new(false),
        }
    }

    fn walk_once(&self, pg: &mut dyn ProofGraph, vec: &StateScores) -> ProResult<StateScores> {
        let start = pg.start_state().clone();
        let alpha = self.apr.alpha;
        let mut next: StateScores = HashMap::with_capacity(vec.len() * 2);
        next.insert(start, alpha);
        for (u, pu) in vec {
            let links = pg.outlinks(u, true)?;
            let (weights, z) = weigh(&self.weighter, &links);
            if z == 0.0 {
                tracing::warn!(state = %u, "total outlink weight is zero; absorbing");
                *next.entry(u.clone()).or_insert(0.0) += (1.0 - alpha) * pu;
                continue;
            }
            for (link, w) in links.into_iter().zip(weights) {
                *next.entry(link.child).or_insert(0.0) += (1.0 - alpha) * (w / z) * pu;
            }
        }
        Ok(next)
    }
}

impl Prover for PprProver {
    fn name(&self) -> &'static str {
        "ppr"
    }

    fn graph_kind(&self) -> ProofGraphKind {
        ProofGraphKind::State
    }

    fn weighter(&self) -> &Weighter {
        &self.weighter
    }

    fn set_weighter(&mut self, weighter: Weighter) {
        self.weighter = weighter;
    }

    fn copy(&self) -> Box<dyn Prover> {
        Box::new(PprProver::new(self.apr, self.weighter.clone()))
    }

    fn prove(&self, pg: &mut dyn ProofGraph, status: &StatusLogger) -> ProResult<StateScores> {
        let _guard = ProofGuard::enter(&self.busy, self.name())?;
        let mut vec = StateScores::from([(pg.start_state().clone(), 1.0)]);
        for i in 0..self.apr.max_depth {
            vec = self.walk_once(pg, &vec)?;
            if status.due(1) {
                tracing::info!(iteration = i + 1, states = vec.len(), "ppr iteration");
            }
        }
        Ok(vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::*;
    use crate::squash::SquashingFunction;

    #[test]
    fn every_round_preserves_mass() {
        let apr = AprOptions {
            max_depth: 7,
            ..AprOptions::default()
        };
        let prover = PprProver::new(apr, Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::State, RECURSION_RULES, RECURSION_FACTS, "p(a,P)");
        let scores = prover.prove(pg.as_mut(), &StatusLogger::new()).unwrap();
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_rounds_return_the_seed() {
        let apr = AprOptions {
            max_depth: 0,
            ..AprOptions::default()
        };
        let prover = PprProver::new(apr, Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::State, LOOP_RULES, LOOP_FACTS, "p(a,P)");
        let scores = prover.prove(pg.as_mut(), &StatusLogger::new()).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[pg.start_state()], 1.0);
    }
}
