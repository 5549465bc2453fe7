//! Local-push learner: approximate PageRank scores with their gradients.
//!
//! Pushes residual mass exactly like the `dpr` prover, but on the compact
//! learning graph and carrying a residual gradient `dr` beside each residual
//! `r`. A push settles `alpha` of the residual and its gradient into the
//! node's score and spreads the rest along the outlinks by the product rule.

use crate::config::AprOptions;
use crate::error::ProResult;
use crate::learn::example::PosNegRWExample;
use crate::status::StatusLogger;

use super::srw::{SrwCore, Transitions, Walk};
use super::Learner;

/// Learner propagating by thresholded local pushes.
#[derive(Debug)]
pub struct DprSrw {
    core: SrwCore,
}

impl DprSrw {
    pub fn new(core: SrwCore) -> Self {
        Self { core }
    }

    /// Run the push loop and return settled scores and leftover residuals.
    pub fn push_walk(
        &self,
        example: &PosNegRWExample,
        transitions: &Transitions,
        status: &StatusLogger,
    ) -> ProResult<(Walk, Walk)> {
        let graph = &example.graph;
        let (n, features) = (graph.node_count(), graph.feature_count());
        let epsilon = self.core.apr().epsilon;
        let mut push = Push {
            example,
            transitions,
            settled: Walk::zeros(n, features),
            residual: Walk::seeded(n, features, &example.query_vec),
            scratch: Vec::with_capacity(features),
            iter_eps: 1.0,
        };

        let mut iterations = 0;
        loop {
            push.iter_eps = (push.iter_eps / 10.0).max(epsilon);
            let mut pushes = 0;
            for &(start, _) in &example.query_vec {
                pushes += push.node(self.core.apr(), start, 1);
            }
            iterations += 1;
            if status.due(2) {
                tracing::info!(query = %example.query, iterations, pushes, iter_eps = push.iter_eps, "dpr-srw iteration");
            }
            if push.iter_eps == epsilon && pushes == 0 {
                break;
            }
        }
        tracing::trace!(query = %example.query, iterations, "dpr-srw converged");
        Ok((push.settled, push.residual))
    }
}

struct Push<'a> {
    example: &'a PosNegRWExample,
    transitions: &'a Transitions,
    settled: Walk,
    residual: Walk,
    /// Gradient row of the node being pushed.
    scratch: Vec<f64>,
    iter_eps: f64,
}

impl Push<'_> {
    fn node(&mut self, apr: &AprOptions, u: usize, depth: usize) -> usize {
        if apr.max_tree_depth.is_some_and(|max| depth > max) {
            return 0;
        }
        let (example, transitions) = (self.example, self.transitions);
        let graph = &example.graph;
        let deg = graph.degree(u).max(1) as f64;
        if self.residual.p[u] / deg <= self.iter_eps {
            return 0;
        }
        if transitions.is_absorbing(u) {
            self.residual.spread(u, &mut self.settled, u, 1.0);
            self.residual.p[u] = 0.0;
            self.residual.dp[u].fill(0.0);
            return 1;
        }

        let alpha = apr.alpha;
        let stay = apr.stay_probability;
        let spread = (1.0 - alpha) * (1.0 - stay);
        let mut dru = std::mem::take(&mut self.scratch);
        while self.residual.p[u] / deg > self.iter_eps {
            let ru = self.residual.p[u];
            dru.clear();
            dru.extend_from_slice(&self.residual.dp[u]);
            self.settled.p[u] += alpha * ru;
            for (d, s) in self.settled.dp[u].iter_mut().zip(&dru) {
                *d += alpha * s;
            }
            self.residual.p[u] = (1.0 - alpha) * stay * ru;
            for d in self.residual.dp[u].iter_mut() {
                *d *= (1.0 - alpha) * stay;
            }
            for e in graph.edges(u) {
                let v = graph.dst(e);
                let me = transitions.m(e);
                self.residual.p[v] += spread * me * ru;
                let row = &mut self.residual.dp[v];
                for (d, s) in row.iter_mut().zip(&dru) {
                    *d += spread * me * s;
                }
                for &(k, dm) in transitions.dm(e) {
                    row[k] += spread * ru * dm;
                }
            }
        }
        self.scratch = dru;

        let mut pushes = 1;
        let start = example.query_vec.first().map_or(1, |(s, _)| *s);
        for e in graph.edges(u) {
            let v = graph.dst(e);
            if v == start || v == u || transitions.m(e) == 0.0 {
                continue;
            }
            pushes += self.node(apr, v, depth + 1);
        }
        pushes
    }
}

impl Learner for DprSrw {
    fn name(&self) -> &'static str {
        "dpr"
    }

    fn core(&self) -> &SrwCore {
        &self.core
    }

    fn copy(&self) -> Box<dyn Learner> {
        Box::new(DprSrw::new(self.core.copy()))
    }

    fn inference(&self, example: &PosNegRWExample, transitions: &Transitions, status: &StatusLogger) -> ProResult<Walk> {
        Ok(self.push_walk(example, transitions, status)?.0)
    }
}
