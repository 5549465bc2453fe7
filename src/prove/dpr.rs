//! Local-push approximate personalized PageRank over a state-addressed graph.
//!
//! Residual mass `r` starts at the start state. A state whose residual per
//! outlink exceeds the current threshold is pushed: `alpha` of its residual
//! settles into `p`, a `stay` share of the rest remains, and the remainder
//! spreads over the outlinks in proportion to their weights. The threshold
//! starts at 0.1 and tightens tenfold per pass down to `epsilon`; the walk
//! ends after a pass at `epsilon` that pushes nothing.
//!
//! Pushes recurse depth first into children in outlink order.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use crate::config::AprOptions;
use crate::error::ProResult;
use crate::graph::{ProofGraph, ProofGraphKind};
use crate::status::StatusLogger;
use crate::wam::State;

use super::{ProofGuard, Prover, StateScores, Weighter, weigh};

/// Settled and residual mass of one walk.
#[derive(Debug, Default)]
pub struct PushState {
    pub p: HashMap<State, f64>,
    pub r: HashMap<State, f64>,
}

impl PushState {
    /// Total settled plus residual mass; 1.0 up to rounding.
    pub fn mass(&self) -> f64 {
        self.p.values().sum::<f64>() + self.r.values().sum::<f64>()
    }
}

pub struct DprProver {
    apr: AprOptions,
    weighter: Weighter,
    busy: AtomicBool,
}

impl DprProver {
    pub fn new(apr: AprOptions, weighter: Weighter) -> Self {
        Self {
            apr,
            weighter,
            busy: AtomicBool::new(false),
        }
    }

    /// Run the push loop and keep the residuals.
    pub fn prove_with_residual(&self, pg: &mut dyn ProofGraph, status: &StatusLogger) -> ProResult<PushState> {
        let _guard = ProofGuard::enter(&self.busy, self.name())?;
        let start = pg.start_state().clone();
        let mut walk = PushState::default();
        walk.r.insert(start.clone(), 1.0);

        let mut iter_eps = 1.0_f64;
        let mut iterations = 0;
        let mut total_pushes = 0;
        loop {
            iter_eps = (iter_eps / 10.0).max(self.apr.epsilon);
            let pushes = self.prove_state(pg, &mut walk, &start, 1, iter_eps, status)?;
            iterations += 1;
            total_pushes += pushes;
            if status.due(1) {
                tracing::info!(
                    iterations,
                    pushes,
                    r_states = walk.r.len(),
                    p_states = walk.p.len(),
                    "dpr iteration"
                );
            }
            if iter_eps == self.apr.epsilon && pushes == 0 {
                break;
            }
        }
        tracing::debug!(iterations, total_pushes, states = walk.p.len(), "dpr converged");
        Ok(walk)
    }

    fn prove_state(
        &self,
        pg: &mut dyn ProofGraph,
        walk: &mut PushState,
        u: &State,
        depth: usize,
        iter_eps: f64,
        status: &StatusLogger,
    ) -> ProResult<usize> {
        if self.apr.max_tree_depth.is_some_and(|max| depth > max) {
            return Ok(0);
        }
        let deg = pg.degree(u, true)? as f64;
        let residual = |walk: &PushState| walk.r.get(u).copied().unwrap_or(0.0);
        if residual(walk) / deg <= iter_eps {
            return Ok(0);
        }

        let links = pg.outlinks(u, true)?;
        let (weights, z) = weigh(&self.weighter, &links);
        let mut pushes = 1;
        if z == 0.0 {
            tracing::warn!(state = %u, "total outlink weight is zero; absorbing residual");
            let ru = walk.r.insert(u.clone(), 0.0).unwrap_or(0.0);
            *walk.p.entry(u.clone()).or_insert(0.0) += ru;
            return Ok(pushes);
        }

        let alpha = self.apr.alpha;
        let stay = self.apr.stay_probability;
        while residual(walk) / deg > iter_eps {
            let ru = residual(walk);
            if status.due(2) {
                tracing::info!(iter_eps, depth, ru, deg, z, state = %u, "pushing");
            }
            *walk.p.entry(u.clone()).or_insert(0.0) += alpha * ru;
            walk.r.insert(u.clone(), (1.0 - alpha) * stay * ru);
            for (link, w) in links.iter().zip(&weights) {
                if *w == 0.0 {
                    continue;
                }
                *walk.r.entry(link.child.clone()).or_insert(0.0) += (1.0 - alpha) * (1.0 - stay) * (w / z) * ru;
            }
        }

        let start = pg.start_state().clone();
        for (link, w) in links.iter().zip(&weights) {
            if link.child == start || *w == 0.0 {
                continue;
            }
            pushes += self.prove_state(pg, walk, &link.child, depth + 1, iter_eps, status)?;
        }
        Ok(pushes)
    }
}

impl Prover for DprProver {
    fn name(&self) -> &'static str {
        "dpr"
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
        Box::new(DprProver::new(self.apr, self.weighter.clone()))
    }

    fn prove(&self, pg: &mut dyn ProofGraph, status: &StatusLogger) -> ProResult<StateScores> {
        Ok(self.prove_with_residual(pg, status)?.p)
    }
}
