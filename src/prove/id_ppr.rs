//! Power iteration over dense node ids.

use std::sync::atomic::AtomicBool;

use crate::config::AprOptions;
use crate::error::ProResult;
use crate::graph::{CachingIdProofGraph, ProofGraph, ProofGraphKind};
use crate::status::StatusLogger;

use super::{ProofGuard, Prover, StateScores, Weighter, ensure_len, id_scores, require_caching, weigh_ids};

pub struct IdPprProver {
    apr: AprOptions,
    weighter: Weighter,
    busy: AtomicBool,
}

impl IdPprProver {
    pub fn new(apr: AprOptions, weighter: Weighter) -> Self {
        Self {
            apr,
            weighter,
            busy: AtomicBool::new(false),
        }
    }

    /// The score vector indexed by node id.
    pub fn prove_vec(&self, cg: &mut CachingIdProofGraph, status: &StatusLogger) -> ProResult<Vec<f64>> {
        let alpha = self.apr.alpha;
        let root = cg.start_id();
        let mut vec = vec![0.0; root + 1];
        vec[root] = 1.0;
        let mut next = Vec::new();
        for i in 0..self.apr.max_depth {
            next.clear();
            ensure_len(&mut next, root);
            next[root] = alpha;
            for u in root..vec.len() {
                let vu = vec[u];
                if vu <= 0.0 {
                    continue;
                }
                let (links, z) = weigh_ids(cg, &self.weighter, u, true)?;
                if z == 0.0 {
                    tracing::warn!(node = u, "total outlink weight is zero; absorbing");
                    ensure_len(&mut next, u);
                    next[u] += (1.0 - alpha) * vu;
                    continue;
                }
                for (v, w) in links {
                    ensure_len(&mut next, v);
                    next[v] += vu * (1.0 - alpha) * (w / z);
                }
            }
            std::mem::swap(&mut vec, &mut next);
            if status.due(1) {
                tracing::info!(depth = i + 1, size = vec.len(), "idppr iteration");
            }
        }
        Ok(vec)
    }
}

impl Prover for IdPprProver {
    fn name(&self) -> &'static str {
        "idppr"
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
        Box::new(IdPprProver::new(self.apr, self.weighter.clone()))
    }

    fn prove(&self, pg: &mut dyn ProofGraph, status: &StatusLogger) -> ProResult<StateScores> {
        let _guard = ProofGuard::enter(&self.busy, self.name())?;
        let cg = require_caching(pg, self.name())?;
        let p = self.prove_vec(cg, status)?;
        id_scores(cg, &p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::*;
    use crate::squash::SquashingFunction;

    #[test]
    fn dense_vector_sums_to_one() {
        let prover = IdPprProver::new(AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::CachingId, DIAMOND_RULES, DIAMOND_FACTS, "p(a,P)");
        let cg = pg.as_caching_id().unwrap();
        let vec = prover.prove_vec(cg, &StatusLogger::new()).unwrap();
        assert!((vec.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(vec[0], 0.0);
        assert_eq!(vec.len(), cg.node_count() + 1);
    }
}
