//! Supervised random-walk learning over grounded examples.
//!
//! A [`Learner`] turns one [`PosNegRWExample`] into a gradient step on the
//! shared [`ParamVector`]: it computes transition weights from the live
//! parameters, propagates scores and their derivatives from the query node,
//! evaluates the loss on the labelled nodes, and updates every trainable
//! feature. [`Srw`] propagates by a fixed number of power-iteration rounds,
//! [`DprSrw`] by local push.
//!
//! The [`Trainer`] streams a grounded file through a worker pool once per
//! epoch; the [`GradientFinder`] accumulates the gradient of a whole file
//! without changing the parameters.

pub mod dpr_srw;
pub mod example;
pub mod fixed;
pub mod gradient;
pub mod graph;
pub mod loss;
pub mod params;
pub mod regularize;
pub mod srw;
pub mod trainer;

use std::collections::HashMap;

use crate::error::{ConfigError, ProResult};
use crate::status::StatusLogger;

pub use dpr_srw::DprSrw;
pub use example::PosNegRWExample;
pub use fixed::FixedWeightRules;
pub use gradient::GradientFinder;
pub use graph::LearningGraph;
pub use params::ParamVector;
pub use srw::{Srw, SrwCore, Transitions, Walk};
pub use trainer::{StoppingCriterion, Trainer, TrainingStatistics};

/// Registry names, in display order.
pub const LEARNER_NAMES: &[&str] = &["srw", "dpr"];

/// What one example contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExampleStats {
    pub log_loss: f64,
    pub reg_loss: f64,
    /// The loss gradient vanished on every feature.
    pub zero_gradient: bool,
    pub nodes: usize,
    pub edges: usize,
}

/// A random-walk learner.
///
/// Implementors supply the propagation; loading, loss, SGD and
/// regularization are shared through [`SrwCore`].
pub trait Learner: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    fn core(&self) -> &SrwCore;

    /// An independent learner sharing this one's loss, rules and clock.
    fn copy(&self) -> Box<dyn Learner>;

    /// Scores and score derivatives of every node of `example`.
    fn inference(&self, example: &PosNegRWExample, transitions: &Transitions, status: &StatusLogger) -> ProResult<Walk>;

    /// Give unseen features of `example` their initial weights.
    fn initialize_features(&self, params: &ParamVector, example: &PosNegRWExample) {
        self.core().initialize_features(params, &example.graph);
    }

    /// One SGD step on `example`.
    fn train_on_example(
        &self,
        params: &ParamVector,
        example: &PosNegRWExample,
        epoch: usize,
        status: &StatusLogger,
    ) -> ProResult<ExampleStats> {
        let core = self.core();
        let tick = core.schedule().tick();
        let lr = core.learning_rate(epoch);
        let trainable = core.trainable(&example.graph);

        let mut reg_loss = core
            .schedule()
            .prepare(params, trainable.iter().map(|(_, f)| *f), tick, lr);
        let transitions = core.load(params, &example.graph)?;
        let walk = self.inference(example, &transitions, status)?;
        let out = core.loss().compute(example, &walk.p, &walk.dp);
        let length = example.length().max(1) as f64;
        let zero_gradient = out.gradient.iter().all(|g| *g == 0.0);

        for &(k, name) in &trainable {
            let g = out.gradient[k] / length;
            if g != 0.0 {
                params.adjust(name, -lr * g);
            }
        }
        reg_loss += core.schedule().apply(
            params,
            trainable.iter().map(|(_, f)| *f),
            core.fixed(),
            tick,
            lr,
        );
        if status.due(3) {
            tracing::debug!(query = %example.query, loss = out.loss, lr, "trained example");
        }
        Ok(ExampleStats {
            log_loss: out.loss,
            reg_loss,
            zero_gradient,
            nodes: example.graph.node_count(),
            edges: example.graph.edge_count(),
        })
    }

    /// Add the per-example loss gradient of `example` into `accumulator`
    /// without touching `params`.
    fn accumulate_gradient(
        &self,
        params: &ParamVector,
        example: &PosNegRWExample,
        accumulator: &ParamVector,
        status: &StatusLogger,
    ) -> ProResult<ExampleStats> {
        let core = self.core();
        let transitions = core.load(params, &example.graph)?;
        let walk = self.inference(example, &transitions, status)?;
        let out = core.loss().compute(example, &walk.p, &walk.dp);
        let length = example.length().max(1) as f64;
        for (k, name) in core.trainable(&example.graph) {
            accumulator.adjust(name, out.gradient[k] / length);
        }
        Ok(ExampleStats {
            log_loss: out.loss,
            reg_loss: 0.0,
            zero_gradient: out.gradient.iter().all(|g| *g == 0.0),
            nodes: example.graph.node_count(),
            edges: example.graph.edge_count(),
        })
    }

    /// Settle pending regularization once every example of `epoch` finished.
    fn cleanup_epoch(&self, params: &ParamVector, epoch: usize) -> f64 {
        let core = self.core();
        core.schedule()
            .cleanup(params, core.fixed(), core.learning_rate(epoch))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds a learner around shared SRW settings.
pub type LearnerFactory = fn(SrwCore) -> Box<dyn Learner>;

/// Registry of learner constructors keyed by name.
pub struct LearnerRegistry {
    factories: HashMap<String, LearnerFactory>,
}

impl LearnerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with both built-in learners.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("srw", |core| Box::new(Srw::new(core)));
        registry.register("dpr", |core| Box::new(DprSrw::new(core)));
        registry
    }

    /// Register a factory. An existing factory of the same name is replaced.
    pub fn register(&mut self, name: &str, factory: LearnerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Build the learner called `name`.
    pub fn build(&self, name: &str, core: SrwCore) -> ProResult<Box<dyn Learner>> {
        let factory = self.factories.get(name).ok_or_else(|| ConfigError::UnknownComponent {
            kind: "learner".into(),
            name: name.into(),
            expected: LEARNER_NAMES.join(", "),
        })?;
        Ok(factory(core))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for LearnerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for LearnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnerRegistry")
            .field("learners", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A two-answer example: node 2 is the positive, node 3 the negative.

    use super::*;
    use crate::config::Config;

    /// `posf` leads to the positive answer, `negf` to the negative one.
    pub(crate) const TWO_ANSWERS: &str = "q(a,X)\t2\t3\t3\t6\t8\t\
        posf:negf:id(restart):id(trueLoop)\t\
        1->2:1\t1->3:2\t2->2:4\t2->1:3\t3->3:4\t3->1:3";

    pub(crate) fn example() -> PosNegRWExample {
        PosNegRWExample::parse(TWO_ANSWERS, None).unwrap()
    }

    pub(crate) fn learner(name: &str, config: &Config) -> Box<dyn Learner> {
        LearnerRegistry::with_defaults()
            .build(name, SrwCore::from_config(config).unwrap())
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::config::Config;

    fn loss_of(learner: &dyn Learner, params: &ParamVector) -> f64 {
        let ex = example();
        let t = learner.core().load(params, &ex.graph).unwrap();
        let walk = learner.inference(&ex, &t, &StatusLogger::new()).unwrap();
        learner.core().loss().compute(&ex, &walk.p, &walk.dp).loss
    }

    #[test]
    fn registry_builds_both_learners() {
        let registry = LearnerRegistry::with_defaults();
        assert_eq!(registry.len(), LEARNER_NAMES.len());
        let config = Config::default();
        for name in LEARNER_NAMES {
            let core = SrwCore::from_config(&config).unwrap();
            assert_eq!(registry.build(name, core).unwrap().name(), *name);
        }
        assert!(registry.build("svm", SrwCore::from_config(&config).unwrap()).is_err());
    }

    #[test]
    fn gradient_favours_positive_edges() {
        for name in LEARNER_NAMES {
            let learner = learner(name, &Config::default());
            let params = ParamVector::new();
            params.set("posf", 1.1);
            params.set("negf", 1.0);
            let acc = ParamVector::new();
            learner
                .accumulate_gradient(&params, &example(), &acc, &StatusLogger::new())
                .unwrap();
            assert!(acc.get("posf").unwrap() < 0.0, "{name}");
            assert!(acc.get("negf").unwrap() > 0.0, "{name}");
            assert!(acc.get("id(restart)").is_none(), "{name}");
        }
    }

    #[test]
    fn one_step_lowers_the_loss() {
        let mut config = Config::default();
        config.srw.regularizer = "none".into();
        config.srw.eta = 0.5;
        for name in LEARNER_NAMES {
            let learner = learner(name, &config);
            let params = ParamVector::new();
            let ex = example();
            learner.initialize_features(&params, &ex);
            assert_eq!(params.get("id(restart)"), Some(1.0));
            let before = loss_of(learner.as_ref(), &params);
            learner
                .train_on_example(&params, &ex, 1, &StatusLogger::new())
                .unwrap();
            let after = loss_of(learner.as_ref(), &params);
            assert!(after < before, "{name}: {after} >= {before}");
            assert_eq!(params.get("id(restart)"), Some(1.0));
        }
    }
}
