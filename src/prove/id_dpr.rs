//! Local-push PageRank over dense node ids.
//!
//! The same push schedule as [`DprProver`](super::DprProver), with residual
//! and settled mass held in id-indexed vectors.

use std::sync::atomic::AtomicBool;

use crate::config::AprOptions;
use crate::error::ProResult;
use crate::graph::{CachingIdProofGraph, ProofGraph, ProofGraphKind};
use crate::status::StatusLogger;

use super::{ProofGuard, Prover, StateScores, Weighter, ensure_len, id_scores, require_caching, weigh_ids};

pub struct IdDprProver {
    apr: AprOptions,
    weighter: Weighter,
    busy: AtomicBool,
}

struct DenseWalk {
    p: Vec<f64>,
    r: Vec<f64>,
}

impl DenseWalk {
    fn residual(&self, u: usize) -> f64 {
        self.r.get(u).copied().unwrap_or(0.0)
    }

    fn add_p(&mut self, u: usize, v: f64) {
        ensure_len(&mut self.p, u);
        self.p[u] += v;
    }

    fn add_r(&mut self, u: usize, v: f64) {
        ensure_len(&mut self.r, u);
        self.r[u] += v;
    }

    fn set_r(&mut self, u: usize, v: f64) {
        ensure_len(&mut self.r, u);
        self.r[u] = v;
    }
}

impl IdDprProver {
    pub fn new(apr: AprOptions, weighter: Weighter) -> Self {
        Self {
            apr,
            weighter,
            busy: AtomicBool::new(false),
        }
    }

    /// Settled and residual vectors indexed by node id.
    pub fn prove_vecs(&self, cg: &mut CachingIdProofGraph, status: &StatusLogger) -> ProResult<(Vec<f64>, Vec<f64>)> {
        let root = cg.start_id();
        let mut walk = DenseWalk {
            p: Vec::new(),
            r: Vec::new(),
        };
        walk.set_r(root, 1.0);
        let mut iter_eps = 1.0_f64;
        let mut iterations = 0;
        loop {
            iter_eps = (iter_eps / 10.0).max(self.apr.epsilon);
            let pushes = self.prove_state(cg, &mut walk, root, 1, iter_eps, status)?;
            iterations += 1;
            if status.due(1) {
                tracing::info!(iterations, pushes, nodes = cg.node_count(), "iddpr iteration");
            }
            if iter_eps == self.apr.epsilon && pushes == 0 {
                break;
            }
        }
        Ok((walk.p, walk.r))
    }

    fn prove_state(
        &self,
        cg: &mut CachingIdProofGraph,
        walk: &mut DenseWalk,
        u: usize,
        depth: usize,
        iter_eps: f64,
        status: &StatusLogger,
    ) -> ProResult<usize> {
        if self.apr.max_tree_depth.is_some_and(|max| depth > max) {
            return Ok(0);
        }
        let deg = cg.id_degree(u, true)? as f64;
        if walk.residual(u) / deg <= iter_eps {
            return Ok(0);
        }
        let (links, z) = weigh_ids(cg, &self.weighter, u, true)?;
        if z == 0.0 {
            tracing::warn!(node = u, "total outlink weight is zero; absorbing residual");
            let ru = walk.residual(u);
            walk.set_r(u, 0.0);
            walk.add_p(u, ru);
            return Ok(1);
        }

        let alpha = self.apr.alpha;
        let stay = self.apr.stay_probability;
        while walk.residual(u) / deg > iter_eps {
            let ru = walk.residual(u);
            if status.due(2) {
                tracing::info!(iter_eps, depth, ru, deg, z, node = u, "pushing");
            }
            walk.add_p(u, alpha * ru);
            walk.set_r(u, (1.0 - alpha) * stay * ru);
            for &(v, w) in &links {
                if w == 0.0 {
                    continue;
                }
                walk.add_r(v, (1.0 - alpha) * (1.0 - stay) * (w / z) * ru);
            }
        }

        let root = cg.start_id();
        let mut pushes = 1;
        for (v, w) in links {
            if v == root || w == 0.0 {
                continue;
            }
            pushes += self.prove_state(cg, walk, v, depth + 1, iter_eps, status)?;
        }
        Ok(pushes)
    }
}

impl Prover for IdDprProver {
    fn name(&self) -> &'static str {
        "iddpr"
    }

    fn graph_kind(&self) -> ProofGraphKind {
        ProofGraphKind::CachingId
    }

    fn weighter(&self) -> &Weighter {
        &self.weighter
    }

    fn set_weighter(&mut self, weighter: Weighter) {
        self.weighter = weighter;
    }

    fn copy(&self) -> Box<dyn Prover> {
        Box::new(IdDprProver::new(self.apr, self.weighter.clone()))
    }

    fn prove(&self, pg: &mut dyn ProofGraph, status: &StatusLogger) -> ProResult<StateScores> {
        let _guard = ProofGuard::enter(&self.busy, self.name())?;
        let cg = require_caching(pg, self.name())?;
        let (p, _) = self.prove_vecs(cg, status)?;
        id_scores(cg, &p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::*;
    use crate::squash::SquashingFunction;

    #[test]
    fn mass_is_conserved() {
        let prover = IdDprProver::new(AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::CachingId, RECURSION_RULES, RECURSION_FACTS, "p(a,P)");
        let cg = pg.as_caching_id().unwrap();
        let (p, r) = prover.prove_vecs(cg, &StatusLogger::new()).unwrap();
        let mass = p.iter().sum::<f64>() + r.iter().sum::<f64>();
        assert!((mass - 1.0).abs() < 1e-9);
        assert_eq!(cg.node_count(), 7);
    }
}
