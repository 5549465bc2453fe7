//! Whole-file loss gradient at fixed parameters.

use std::path::Path;

use crate::config::Config;
use crate::error::ProResult;
use crate::pipeline::{PerWorker, Pipeline, PipelineStats};
use crate::status::StatusLogger;

use super::example::PosNegRWExample;
use super::params::ParamVector;
use super::srw::SrwCore;
use super::trainer::{grounded_lines, load_feature_index};
use super::{Learner, LearnerRegistry};

/// Averages the per-example gradient of a grounded file.
pub struct GradientFinder {
    learner: Box<dyn Learner>,
    pipeline: Pipeline,
}

impl GradientFinder {
    pub fn new(learner: Box<dyn Learner>, pipeline: Pipeline) -> Self {
        Self { learner, pipeline }
    }

    pub fn from_config(config: &Config) -> ProResult<Self> {
        let learner = LearnerRegistry::with_defaults().build(&config.srw.learner, SrwCore::from_config(config)?)?;
        Ok(Self::new(
            learner,
            Pipeline::new(config.worker_threads(), config.throttle_limit(), config.maintain_order),
        ))
    }

    /// The gradient of the average loss over `grounded` at `params`.
    /// `params` is read, never written.
    pub fn find(&self, grounded: &Path, params: &ParamVector) -> ProResult<(ParamVector, PipelineStats)> {
        let index = load_feature_index(grounded)?;
        let learners = PerWorker::new(self.pipeline.threads(), || self.learner.copy());
        let status = StatusLogger::new();
        let gradient = ParamVector::new();
        let mut loss = 0.0;

        let stats = self.pipeline.run(
            grounded_lines(grounded)?,
            |_, line: String| {
                let example = PosNegRWExample::parse(&line, index.as_deref())?;
                let stats = learners.with(|l| l.accumulate_gradient(params, &example, &gradient, &status))?;
                Ok(Some(stats.log_loss))
            },
            |_, example_loss: f64| {
                loss += example_loss;
                Ok(())
            },
        )?;

        let n = stats.emitted.max(1) as f64;
        for name in gradient.names() {
            gradient.update(&name, 0.0, |g| g / n);
        }
        tracing::info!(
            examples = stats.emitted,
            failed = stats.failed,
            avg_loss = loss / n,
            features = gradient.len(),
            "gradient computed"
        );
        Ok((gradient, stats))
    }

    /// Compute the gradient and write it in the parameter file layout.
    pub fn write(&self, grounded: &Path, params: &ParamVector, out: &Path) -> ProResult<PipelineStats> {
        let (gradient, stats) = self.find(grounded, params)?;
        gradient.save(out)?;
        Ok(stats)
    }
}

impl std::fmt::Debug for GradientFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradientFinder")
            .field("learner", &self.learner.name())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learn::fixtures::TWO_ANSWERS;

    #[test]
    fn averages_over_examples_and_leaves_params_alone() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one.grounded");
        let two = dir.path().join("two.grounded");
        std::fs::write(&one, format!("{TWO_ANSWERS}\n")).unwrap();
        std::fs::write(&two, format!("{TWO_ANSWERS}\n{TWO_ANSWERS}\n")).unwrap();

        let mut config = Config::default();
        config.threads = 2;
        let finder = GradientFinder::from_config(&config).unwrap();
        let params = ParamVector::new();
        params.set("posf", 1.2);
        params.set("negf", 1.0);

        let (single, stats) = finder.find(&one, &params).unwrap();
        assert_eq!(stats.emitted, 1);
        let (double, _) = finder.find(&two, &params).unwrap();
        let g = single.get("posf").unwrap();
        assert!(g < 0.0);
        assert!((double.get("posf").unwrap() - g).abs() < 1e-12);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("posf"), Some(1.2));

        let out = dir.path().join("grad.params");
        finder.write(&one, &params, &out).unwrap();
        let written = ParamVector::load(&out).unwrap();
        assert!((written.get("posf").unwrap() - g).abs() < 1e-9);
        assert!(written.get("id(restart)").is_none());
    }
}
