//! Local push ordered by residual per outlink, largest first.
//!
//! Nodes wait in a max-heap keyed by `r[u] / degree(u)`. Stale heap entries
//! are skipped on pop rather than removed in place. The walk stops when the
//! heap empties or after `ceil(1 / epsilon)` pops.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::AtomicBool;

use crate::config::AprOptions;
use crate::error::ProResult;
use crate::graph::{CachingIdProofGraph, ProofGraph, ProofGraphKind};
use crate::status::StatusLogger;

use super::{ProofGuard, Prover, StateScores, Weighter, ensure_len, id_scores, require_caching, weigh_ids};

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    score: f64,
    id: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Higher score first; lower id first among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

pub struct PriorityQueueProver {
    apr: AprOptions,
    weighter: Weighter,
    busy: AtomicBool,
}

impl PriorityQueueProver {
    pub fn new(apr: AprOptions, weighter: Weighter) -> Self {
        Self {
            apr,
            weighter,
            busy: AtomicBool::new(false),
        }
    }

    /// Settled and residual vectors indexed by node id.
    pub fn prove_vecs(&self, cg: &mut CachingIdProofGraph, status: &StatusLogger) -> ProResult<(Vec<f64>, Vec<f64>)> {
        let alpha = self.apr.alpha;
        let stay = self.apr.stay_probability;
        let eps = self.apr.epsilon;
        let root = cg.start_id();
        let mut p = Vec::new();
        let mut r = Vec::new();
        ensure_len(&mut r, root);
        r[root] = 1.0;

        let mut queue = BinaryHeap::new();
        let deg = cg.id_degree(root, true)? as f64;
        queue.push(QueueEntry { score: 1.0 / deg, id: root });

        let max_iterations = (1.0 / eps).ceil() as usize;
        let mut iterations = 0;
        while iterations < max_iterations {
            let Some(head) = queue.pop() else {
                break;
            };
            let u = head.id;
            let deg = cg.id_degree(u, true)? as f64;
            let current = r.get(u).copied().unwrap_or(0.0) / deg;
            if current != head.score {
                continue;
            }
            iterations += 1;
            if head.score <= eps {
                continue;
            }

            let (links, z) = weigh_ids(cg, &self.weighter, u, true)?;
            if z == 0.0 {
                tracing::warn!(node = u, "total outlink weight is zero; absorbing residual");
                ensure_len(&mut p, u);
                p[u] += r[u];
                r[u] = 0.0;
                continue;
            }
            while r[u] / deg > eps {
                let ru = r[u];
                ensure_len(&mut p, u);
                p[u] += alpha * ru;
                r[u] = (1.0 - alpha) * stay * ru;
                for &(v, w) in &links {
                    ensure_len(&mut r, v);
                    r[v] += (1.0 - alpha) * (1.0 - stay) * (w / z) * ru;
                }
            }
            let mut touched: Vec<usize> = links.iter().map(|(v, _)| *v).collect();
            touched.push(u);
            touched.sort_unstable();
            touched.dedup();
            for v in touched {
                let dv = cg.id_degree(v, true)? as f64;
                queue.push(QueueEntry { score: r[v] / dv, id: v });
            }
        }
        if status.due(1) {
            tracing::info!(iterations, nodes = cg.node_count(), queued = queue.len(), "qpr finished");
        }
        Ok((p, r))
    }
}

impl Prover for PriorityQueueProver {
    fn name(&self) -> &'static str {
        "qpr"
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
        Box::new(PriorityQueueProver::new(self.apr, self.weighter.clone()))
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
    fn heap_pops_highest_score_first() {
        let mut heap = BinaryHeap::new();
        heap.push(QueueEntry { score: 0.2, id: 3 });
        heap.push(QueueEntry { score: 0.5, id: 7 });
        heap.push(QueueEntry { score: 0.5, id: 2 });
        assert_eq!(heap.pop().map(|e| e.id), Some(2));
        assert_eq!(heap.pop().map(|e| e.id), Some(7));
        assert_eq!(heap.pop().map(|e| e.id), Some(3));
    }

    #[test]
    fn mass_is_conserved() {
        let prover = PriorityQueueProver::new(AprOptions::default(), Weighter::uniform(SquashingFunction::ReLU));
        let mut pg = build(ProofGraphKind::CachingId, DIAMOND_RULES, DIAMOND_FACTS, "p(a,P)");
        let cg = pg.as_caching_id().unwrap();
        let (p, r) = prover.prove_vecs(cg, &StatusLogger::new()).unwrap();
        let mass = p.iter().sum::<f64>() + r.iter().sum::<f64>();
        assert!((mass - 1.0).abs() < 1e-9);
        assert!(p.iter().all(|&x| x >= 0.0));
    }
}
