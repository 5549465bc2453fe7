//! Structured random walks with differentiable transition weights.
//!
//! [`SrwCore`] holds what every learner shares: walk options, squashing
//! function, loss, regularization schedule and fixed-weight rules. It turns
//! the live parameters into [`Transitions`] for one example: the probability
//! `M(e) = f(s_e) / sum_u f(s)` of every edge and its derivative by each
//! feature, where `s_e` is the weighted sum of the edge's feature weights.
//!
//! [`Srw`] propagates scores by `max_depth` rounds of power iteration,
//! carrying score derivatives along by the product rule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{AprOptions, Config};
use crate::error::{LearnError, ProResult};
use crate::learn::example::PosNegRWExample;
use crate::learn::fixed::FixedWeightRules;
use crate::learn::graph::LearningGraph;
use crate::learn::loss::{LossFunction, loss_by_name};
use crate::learn::params::ParamVector;
use crate::learn::regularize::RegularizationSchedule;
use crate::squash::SquashingFunction;
use crate::status::StatusLogger;

use super::Learner;

/// Scale of the random perturbation added to a fresh feature's weight.
const INIT_NOISE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Shared learner state
// ---------------------------------------------------------------------------

pub struct SrwCore {
    apr: AprOptions,
    squash: SquashingFunction,
    eta: f64,
    loss: Arc<dyn LossFunction>,
    schedule: Arc<RegularizationSchedule>,
    fixed: Arc<FixedWeightRules>,
    seed: u64,
    copies: Arc<AtomicU64>,
    rng: Mutex<StdRng>,
}

impl SrwCore {
    pub fn from_config(config: &Config) -> ProResult<Self> {
        let srw = &config.srw;
        let fixed = srw_fixed_rules(config);
        let seed = srw.seed.unwrap_or_else(rand::random);
        Ok(Self {
            apr: config.apr,
            squash: SquashingFunction::by_name(&srw.squashing_function)?,
            eta: srw.eta,
            loss: Arc::from(loss_by_name(&srw.loss, srw.delta)?),
            schedule: Arc::new(RegularizationSchedule::from_options(srw)?),
            fixed: Arc::new(fixed),
            seed,
            copies: Arc::new(AtomicU64::new(0)),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// Replace the fixed-weight rules.
    pub fn with_fixed(mut self, fixed: FixedWeightRules) -> Self {
        self.fixed = Arc::new(fixed);
        self
    }

    /// A core for another worker: same loss, schedule clock and rules, with
    /// its own random stream.
    pub fn copy(&self) -> Self {
        let index = self.copies.fetch_add(1, Ordering::Relaxed) + 1;
        Self {
            apr: self.apr,
            squash: self.squash,
            eta: self.eta,
            loss: Arc::clone(&self.loss),
            schedule: Arc::clone(&self.schedule),
            fixed: Arc::clone(&self.fixed),
            seed: self.seed,
            copies: Arc::clone(&self.copies),
            rng: Mutex::new(StdRng::seed_from_u64(self.seed.wrapping_add(index))),
        }
    }

    pub fn apr(&self) -> &AprOptions {
        &self.apr
    }

    pub fn squash(&self) -> SquashingFunction {
        self.squash
    }

    pub fn loss(&self) -> &dyn LossFunction {
        self.loss.as_ref()
    }

    pub fn schedule(&self) -> &RegularizationSchedule {
        &self.schedule
    }

    pub fn fixed(&self) -> &FixedWeightRules {
        &self.fixed
    }

    /// `eta / epoch^2`.
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        let epoch = epoch.max(1) as f64;
        self.eta / (epoch * epoch)
    }

    /// Local indices and names of the features of `graph` that SGD may move.
    pub fn trainable<'g>(&self, graph: &'g LearningGraph) -> Vec<(usize, &'g str)> {
        graph
            .features()
            .iter()
            .enumerate()
            .filter(|(_, f)| !self.fixed.is_fixed(f))
            .map(|(k, f)| (k, f.as_str()))
            .collect()
    }

    /// Give every unseen feature of `graph` its starting weight: 1.0 when
    /// fixed, otherwise the squashing default plus a little noise.
    pub fn initialize_features(&self, params: &ParamVector, graph: &LearningGraph) {
        for name in graph.features() {
            if params.contains(name) {
                continue;
            }
            if self.fixed.is_fixed(name) {
                self.fixed.initialize_fixed(params, name);
            } else {
                let noise = self
                    .rng
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .r#gen::<f64>();
                params.insert_if_absent(name, self.squash.default_value() + INIT_NOISE * noise);
            }
            params.touch(name, self.schedule.now());
        }
    }

    /// Edge probabilities and their feature derivatives under `params`.
    pub fn load(&self, params: &ParamVector, graph: &LearningGraph) -> ProResult<Transitions> {
        let default = self.squash.default_value();
        let theta: Vec<f64> = graph
            .features()
            .iter()
            .map(|f| params.get_or(f, default))
            .collect();
        let n = graph.node_count();
        let mut t = Transitions {
            m: vec![0.0; graph.edge_count()],
            dm: vec![Vec::new(); graph.edge_count()],
            absorbing: vec![false; n + 1],
        };

        let mut g = Vec::new();
        let mut fp = Vec::new();
        let mut du = vec![0.0; graph.feature_count()];
        let mut seen = vec![false; graph.feature_count()];
        let mut touched = Vec::new();
        for u in 1..=n {
            let edges = graph.edges(u);
            g.clear();
            fp.clear();
            let mut total = 0.0;
            for e in edges.clone() {
                let s: f64 = graph.labels(e).map(|(k, w)| theta[k] * w).sum();
                let ge = self.squash.compute(s);
                g.push(ge);
                fp.push(self.squash.compute_derivative(s));
                total += ge;
            }
            if total == 0.0 {
                if g.iter().any(|ge| *ge != 0.0) {
                    return Err(LearnError::DegenerateNode { node: u }.into());
                }
                if !edges.is_empty() {
                    tracing::warn!(node = u, "all outlinks have zero weight; node absorbs its mass");
                }
                t.absorbing[u] = true;
                continue;
            }

            // du[k] = d total / d theta_k
            for (i, e) in edges.clone().enumerate() {
                for (k, w) in graph.labels(e) {
                    du[k] += fp[i] * w;
                    if !seen[k] {
                        seen[k] = true;
                        touched.push(k);
                    }
                }
            }
            for (i, e) in edges.enumerate() {
                let me = g[i] / total;
                t.m[e] = me;
                let mut row: Vec<(usize, f64)> = touched.iter().map(|&k| (k, -me * du[k] / total)).collect();
                for (k, w) in graph.labels(e) {
                    if let Some(slot) = row.iter_mut().find(|(j, _)| *j == k) {
                        slot.1 += fp[i] * w / total;
                    }
                }
                row.retain(|(_, d)| *d != 0.0);
                t.dm[e] = row;
            }
            for k in touched.drain(..) {
                du[k] = 0.0;
                seen[k] = false;
            }
        }
        Ok(t)
    }
}

fn srw_fixed_rules(config: &Config) -> FixedWeightRules {
    config
        .fixed_weights
        .as_deref()
        .map(FixedWeightRules::parse)
        .unwrap_or_default()
}

impl std::fmt::Debug for SrwCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrwCore")
            .field("apr", &self.apr)
            .field("squash", &self.squash)
            .field("eta", &self.eta)
            .field("loss", &self.loss.name())
            .field("regularizer", &self.schedule.regularizer().name())
            .field("lazy", &self.schedule.is_lazy())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Transitions and walks
// ---------------------------------------------------------------------------

/// Edge probabilities of one example under the current parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Transitions {
    m: Vec<f64>,
    /// Sparse `(local feature, dM/dtheta)` per edge.
    dm: Vec<Vec<(usize, f64)>>,
    absorbing: Vec<bool>,
}

impl Transitions {
    pub fn m(&self, e: usize) -> f64 {
        self.m[e]
    }

    pub fn dm(&self, e: usize) -> &[(usize, f64)] {
        &self.dm[e]
    }

    /// Nodes with no usable outlink keep whatever mass reaches them.
    pub fn is_absorbing(&self, u: usize) -> bool {
        self.absorbing.get(u).copied().unwrap_or(true)
    }
}

/// Scores and score gradients, indexed by node id then local feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Walk {
    pub p: Vec<f64>,
    pub dp: Vec<Vec<f64>>,
}

impl Walk {
    /// All-zero walk over nodes `1..=nodes`.
    pub fn zeros(nodes: usize, features: usize) -> Self {
        Self {
            p: vec![0.0; nodes + 1],
            dp: vec![vec![0.0; features]; nodes + 1],
        }
    }

    /// Walk holding the start distribution.
    pub fn seeded(nodes: usize, features: usize, seed: &[(usize, f64)]) -> Self {
        let mut walk = Self::zeros(nodes, features);
        for &(u, w) in seed {
            if let Some(p) = walk.p.get_mut(u) {
                *p += w;
            }
        }
        walk
    }

    /// Reset every score and gradient to zero, keeping the allocation.
    pub fn clear(&mut self) {
        self.p.fill(0.0);
        for row in &mut self.dp {
            row.fill(0.0);
        }
    }

    /// Total score mass.
    pub fn mass(&self) -> f64 {
        self.p.iter().sum()
    }

    /// Move `scale` of node `u`'s score and gradient into `target`'s node `v`.
    pub(crate) fn spread(&self, u: usize, target: &mut Walk, v: usize, scale: f64) {
        target.p[v] += scale * self.p[u];
        for (d, s) in target.dp[v].iter_mut().zip(&self.dp[u]) {
            *d += scale * s;
        }
    }
}

// ---------------------------------------------------------------------------
// Power-iteration learner
// ---------------------------------------------------------------------------

/// Learner propagating by `max_depth` rounds of power iteration.
#[derive(Debug)]
pub struct Srw {
    core: SrwCore,
}

impl Srw {
    pub fn new(core: SrwCore) -> Self {
        Self { core }
    }
}

impl Learner for Srw {
    fn name(&self) -> &'static str {
        "srw"
    }

    fn core(&self) -> &SrwCore {
        &self.core
    }

    fn copy(&self) -> Box<dyn Learner> {
        Box::new(Srw::new(self.core.copy()))
    }

    fn inference(&self, example: &PosNegRWExample, transitions: &Transitions, status: &StatusLogger) -> ProResult<Walk> {
        let graph = &example.graph;
        let (n, features) = (graph.node_count(), graph.feature_count());
        let alpha = self.core.apr.alpha;
        let mut walk = Walk::seeded(n, features, &example.query_vec);
        let mut next = Walk::zeros(n, features);
        for round in 0..self.core.apr.max_depth {
            next.clear();
            for &(u, w) in &example.query_vec {
                if let Some(p) = next.p.get_mut(u) {
                    *p += alpha * w;
                }
            }
            for u in 1..=n {
                if transitions.is_absorbing(u) {
                    walk.spread(u, &mut next, u, 1.0 - alpha);
                    continue;
                }
                let pu = walk.p[u];
                for e in graph.edges(u) {
                    let v = graph.dst(e);
                    walk.spread(u, &mut next, v, (1.0 - alpha) * transitions.m(e));
                    for &(k, d) in transitions.dm(e) {
                        next.dp[v][k] += (1.0 - alpha) * pu * d;
                    }
                }
            }
            std::mem::swap(&mut walk, &mut next);
            if status.due(3) {
                tracing::debug!(query = %example.query, round, nodes = n, "srw iteration");
            }
        }
        Ok(walk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learn::fixtures::*;

    fn srw() -> Srw {
        Srw::new(SrwCore::from_config(&Config::default()).unwrap())
    }

    fn params() -> ParamVector {
        let params = ParamVector::new();
        params.set("posf", 1.3);
        params.set("negf", 0.8);
        params.set("id(restart)", 1.0);
        params.set("id(trueLoop)", 1.0);
        params
    }

    fn loss(learner: &Srw, params: &ParamVector) -> (f64, Vec<f64>) {
        let ex = example();
        let t = learner.core().load(params, &ex.graph).unwrap();
        let walk = learner.inference(&ex, &t, &StatusLogger::new()).unwrap();
        let out = learner.core().loss().compute(&ex, &walk.p, &walk.dp);
        (out.loss, out.gradient)
    }

    #[test]
    fn transitions_are_stochastic() {
        let ex = example();
        let t = srw().core().load(&params(), &ex.graph).unwrap();
        for u in 1..=ex.graph.node_count() {
            let total: f64 = ex.graph.edges(u).map(|e| t.m(e)).sum();
            assert!((total - 1.0).abs() < 1e-12);
            // Probabilities stay normalised, so their derivatives cancel.
            let mut sum = vec![0.0; ex.graph.feature_count()];
            for e in ex.graph.edges(u) {
                for &(k, d) in t.dm(e) {
                    sum[k] += d;
                }
            }
            assert!(sum.iter().all(|d| d.abs() < 1e-12));
        }
        let first: Vec<f64> = ex.graph.edges(1).map(|e| t.m(e)).collect();
        assert!((first[0] - 1.3 / 2.1).abs() < 1e-12);
    }

    #[test]
    fn power_iteration_conserves_mass() {
        let ex = example();
        let learner = srw();
        let t = learner.core().load(&params(), &ex.graph).unwrap();
        let walk = learner.inference(&ex, &t, &StatusLogger::new()).unwrap();
        assert!((walk.mass() - 1.0).abs() < 1e-12);
        assert!(walk.p[2] > walk.p[3]);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let learner = srw();
        let base = params();
        let (l0, gradient) = loss(&learner, &base);
        let ex = example();
        let h = 1e-6;
        for (k, name) in ex.graph.features().iter().enumerate() {
            let shifted = params();
            shifted.adjust(name, h);
            let (l1, _) = loss(&learner, &shifted);
            let numeric = (l1 - l0) / h;
            assert!(
                (numeric - gradient[k]).abs() < 1e-4,
                "{name}: numeric {numeric} analytic {}",
                gradient[k]
            );
        }
    }

    #[test]
    fn zero_weight_nodes_absorb() {
        let learner = srw();
        let params = params();
        params.set("negf", -1.0);
        params.set("id(trueLoop)", 0.0);
        params.set("id(restart)", 0.0);
        let ex = example();
        let t = learner.core().load(&params, &ex.graph).unwrap();
        assert!(t.is_absorbing(2));
        assert!(!t.is_absorbing(1));
        let walk = learner.inference(&ex, &t, &StatusLogger::new()).unwrap();
        assert!((walk.mass() - 1.0).abs() < 1e-12);
        assert_eq!(walk.p[3], 0.0);
    }

    #[test]
    fn fresh_features_get_noisy_defaults() {
        let mut config = Config::default();
        config.srw.seed = Some(7);
        let core = SrwCore::from_config(&config).unwrap();
        let params = ParamVector::new();
        core.initialize_features(&params, &example().graph);
        assert_eq!(params.get("id(trueLoop)"), Some(1.0));
        let w = params.get("posf").unwrap();
        assert!((1.0..1.0 + INIT_NOISE).contains(&w));
        assert_eq!(params.len(), 4);
        let copy = core.copy();
        assert_eq!(copy.learning_rate(2), 0.25);
    }

    #[test]
    fn each_round_starts_from_a_clean_walk() {
        let ex = example();
        let alpha = Config::default().apr.alpha;
        let t = srw().core().load(&params(), &ex.graph).unwrap();
        let n = ex.graph.node_count();

        let mut expected = vec![0.0; n + 1];
        expected[1] = 1.0;
        for rounds in 1..=3 {
            let mut next = vec![0.0; n + 1];
            next[1] = alpha;
            for u in 1..=n {
                for e in ex.graph.edges(u) {
                    next[ex.graph.dst(e)] += (1.0 - alpha) * t.m(e) * expected[u];
                }
            }
            expected = next;

            let mut config = Config::default();
            config.apr.max_depth = rounds;
            let learner = Srw::new(SrwCore::from_config(&config).unwrap());
            let walk = learner.inference(&ex, &t, &StatusLogger::new()).unwrap();
            for u in 1..=n {
                assert!((walk.p[u] - expected[u]).abs() < 1e-12, "round {rounds} node {u}");
            }
        }

        let mut walk = Walk::seeded(n, 2, &ex.query_vec);
        walk.dp[1][0] = 3.0;
        walk.clear();
        assert_eq!(walk, Walk::zeros(n, 2));
    }
}

