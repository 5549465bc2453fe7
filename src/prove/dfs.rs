//! Depth-first proof enumeration.
//!
//! Each state receives the product of normalized branch weights along the
//! path that reached it, minus what it passed on to its children. Restart
//! edges count towards the normalizer but are never followed. A state reached
//! along several paths accumulates the weight of each.

use std::sync::atomic::AtomicBool;

use crate::config::AprOptions;
use crate::error::ProResult;
use crate::graph::{ProofGraph, ProofGraphKind};
use crate::status::StatusLogger;
use crate::wam::State;

use super::{ProofGuard, Prover, StateScores, Weighter, weigh};

pub struct DfsProver {
    apr: AprOptions,
    weighter: Weighter,
    true_loop: bool,
    busy: AtomicBool,
}

impl DfsProver {
    pub fn new(apr: AprOptions, weighter: Weighter) -> Self {
        Self {
            apr,
            weighter,
            true_loop: true,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether completed states offer their self-loop while normalizing.
    pub fn with_true_loop(mut self, true_loop: bool) -> Self {
        self.true_loop = true_loop;
        self
    }

    fn dfs(
        &self,
        pg: &mut dyn ProofGraph,
        state: &State,
        depth: usize,
        incoming: f64,
        trail: &mut Vec<(State, f64)>,
    ) -> ProResult<()> {
        let at = trail.len();
        trail.push((state.clone(), incoming));
        if state.is_completed() || depth >= self.apr.max_depth {
            tracing::trace!(depth, completed = state.is_completed(), "dfs leaf");
            return Ok(());
        }
        let links = pg.outlinks(state, self.true_loop)?;
        let (weights, z) = weigh(&self.weighter, &links);
        if z == 0.0 {
            tracing::warn!(%state, "total outlink weight is zero; keeping mass in place");
            return Ok(());
        }
        let start = pg.start_state().clone();
        for (link, w) in links.iter().zip(weights) {
            if link.child == start {
                continue;
            }
            let share = incoming * w / z;
            trail[at].1 -= share;
            self.dfs(pg, &link.child, depth + 1, share, trail)?;
        }
        Ok(())
    }
}

impl Prover for DfsProver {
    fn name(&self) -> &'static str {
        "dfs"
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
        Box::new(DfsProver::new(self.apr, self.weighter.clone()).with_true_loop(self.true_loop))
    }

    fn prove(&self, pg: &mut dyn ProofGraph, _status: &StatusLogger) -> ProResult<StateScores> {
        let _guard = ProofGuard::enter(&self.busy, self.name())?;
        let start = pg.start_state().clone();
        let mut trail = Vec::new();
        self.dfs(pg, &start, 0, 1.0, &mut trail)?;
        let mut scores = StateScores::new();
        for (state, w) in trail {
            *scores.entry(state).or_insert(0.0) += w;
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::*;
    use crate::prove::completed_scores;
    use crate::squash::SquashingFunction;

    #[test]
    fn branch_weights_follow_the_tree() {
        let prover = DfsProver::new(AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::State, TRAPEZOID_RULES, TRAPEZOID_FACTS, "p(a,P)");
        let scores = prover.prove(pg.as_mut(), &StatusLogger::new()).unwrap();
        // start splits three ways (two clauses and the restart): 1/3 to the
        // fact p(a,d), 1/3 to the body, of which 1/12 reaches p(a,d) again
        let start = pg.start_state().clone();
        assert!((scores[&start] - 1.0 / 3.0).abs() < 1e-12);
        let done = completed_scores(&scores);
        assert_eq!(done.len(), 1);
        assert!((done[0].1 - 5.0 / 12.0).abs() < 1e-12);
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn depth_bound_stops_expansion() {
        let apr = AprOptions {
            max_depth: 1,
            ..AprOptions::default()
        };
        let prover = DfsProver::new(apr, Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::State, DIAMOND_RULES, DIAMOND_FACTS, "p(a,P)");
        let scores = prover.prove(pg.as_mut(), &StatusLogger::new()).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(completed_scores(&scores).is_empty());
    }
}
