//! Epoch loop over a grounded file.
//!
//! Every epoch re-reads the grounded file and streams its lines through the
//! [`Pipeline`]: a worker parses the line into a [`PosNegRWExample`] and
//! trains its own learner copy on it; the producer thread folds the returned
//! [`ExampleStats`] into the epoch totals. Once the pipeline drains, the
//! pending regularization is settled and the [`StoppingCriterion`] decides
//! whether to continue.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Config;
use crate::error::{LearnError, ProResult};
use crate::ground::features_path;
use crate::pipeline::{PerWorker, Pipeline};
use crate::registry::FeatureTable;
use crate::status::StatusLogger;
use crate::symbol::RESTART;

use super::example::PosNegRWExample;
use super::params::ParamVector;
use super::srw::SrwCore;
use super::{ExampleStats, Learner, LearnerRegistry};

/// Loss increases above this percentage are reported.
const INCREASE_WARNING_PERCENT: f64 = 0.5;

/// Share of zero-gradient examples above which the epoch is reported.
const ZERO_GRADIENT_WARNING: f64 = 0.2;

// ---------------------------------------------------------------------------
// Stopping
// ---------------------------------------------------------------------------

/// Stop after `max_epochs`, or once the loss improved by less than `percent`
/// for `window` consecutive epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct StoppingCriterion {
    pub max_epochs: usize,
    pub percent: f64,
    pub window: usize,
    epochs: usize,
    stalled: usize,
}

impl StoppingCriterion {
    pub fn new(max_epochs: usize, percent: f64, window: usize) -> Self {
        Self {
            max_epochs,
            percent,
            window,
            epochs: 0,
            stalled: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.epochs, config.stopping_percent, config.stopping_epoch)
    }

    pub fn record_epoch(&mut self) {
        self.epochs += 1;
    }

    /// Record the percentage by which this epoch's loss improved on the last.
    pub fn record_improvement(&mut self, percent: f64) {
        if percent < self.percent {
            self.stalled += 1;
        } else {
            self.stalled = 0;
        }
    }

    pub fn satisfied(&self) -> bool {
        self.epochs >= self.max_epochs || (self.window > 0 && self.stalled >= self.window)
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Totals of one epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub examples: usize,
    pub failed: usize,
    pub log_loss: f64,
    pub reg_loss: f64,
    pub zero_gradients: usize,
    pub nodes: usize,
    pub edges: usize,
    pub parse_ms: u64,
    pub train_ms: u64,
    pub wall_ms: u64,
    /// Improvement of the total loss over the previous epoch.
    pub improvement: Option<f64>,
    pub percent_improvement: Option<f64>,
}

impl EpochStats {
    fn new(epoch: usize) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    fn add(&mut self, stats: ExampleStats, parse: Duration, train: Duration) {
        self.examples += 1;
        self.log_loss += stats.log_loss;
        self.reg_loss += stats.reg_loss;
        self.zero_gradients += usize::from(stats.zero_gradient);
        self.nodes += stats.nodes;
        self.edges += stats.edges;
        self.parse_ms += parse.as_millis() as u64;
        self.train_ms += train.as_millis() as u64;
    }

    pub fn loss(&self) -> f64 {
        self.log_loss + self.reg_loss
    }

    /// Loss per example.
    pub fn average_loss(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.loss() / self.examples as f64
        }
    }
}

/// Per-epoch history of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingStatistics {
    pub epochs: Vec<EpochStats>,
}

impl TrainingStatistics {
    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }

    /// Close an epoch: fill in its improvement, log it, and return the
    /// percentage improvement when there was a previous epoch.
    fn finish(&mut self, mut epoch: EpochStats) -> Option<f64> {
        if let Some(previous) = self.epochs.last() {
            let improvement = previous.loss() - epoch.loss();
            epoch.improvement = Some(improvement);
            if previous.loss() != 0.0 {
                epoch.percent_improvement = Some(100.0 * improvement / previous.loss());
            }
        }
        tracing::info!(
            epoch = epoch.epoch,
            examples = epoch.examples,
            avg_loss = epoch.average_loss(),
            log_loss = epoch.log_loss,
            reg_loss = epoch.reg_loss,
            improvement = ?epoch.improvement,
            percent = ?epoch.percent_improvement,
            avg_nodes = epoch.nodes / epoch.examples.max(1),
            avg_edges = epoch.edges / epoch.examples.max(1),
            parse_ms = epoch.parse_ms,
            train_ms = epoch.train_ms,
            wall_ms = epoch.wall_ms,
            "epoch finished"
        );
        if let Some(percent) = epoch.percent_improvement
            && percent < -INCREASE_WARNING_PERCENT
        {
            tracing::warn!(epoch = epoch.epoch, percent, "loss increased; consider a smaller eta");
        }
        if epoch.examples > 0 && epoch.zero_gradients as f64 / epoch.examples as f64 > ZERO_GRADIENT_WARNING {
            tracing::warn!(
                epoch = epoch.epoch,
                zero_gradients = epoch.zero_gradients,
                examples = epoch.examples,
                "many examples had a zero gradient; check that grounded graphs reach their labels"
            );
        }
        let percent = epoch.percent_improvement;
        self.epochs.push(epoch);
        percent
    }

    pub fn to_json(&self) -> ProResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            LearnError::Io {
                path: "training statistics".into(),
                source: e.into(),
            }
            .into()
        })
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Multi-epoch SGD over a grounded file.
pub struct Trainer {
    learner: Box<dyn Learner>,
    pipeline: Pipeline,
    criterion: StoppingCriterion,
}

impl Trainer {
    pub fn new(learner: Box<dyn Learner>, pipeline: Pipeline, criterion: StoppingCriterion) -> Self {
        Self {
            learner,
            pipeline,
            criterion,
        }
    }

    pub fn from_config(config: &Config) -> ProResult<Self> {
        let learner = LearnerRegistry::with_defaults().build(&config.srw.learner, SrwCore::from_config(config)?)?;
        Ok(Self::new(
            learner,
            Pipeline::new(config.worker_threads(), config.throttle_limit(), config.maintain_order),
            StoppingCriterion::from_config(config),
        ))
    }

    pub fn learner(&self) -> &dyn Learner {
        self.learner.as_ref()
    }

    /// Train `params` in place on `grounded` until the stopping criterion
    /// holds.
    pub fn train(&self, grounded: &Path, params: &ParamVector) -> ProResult<TrainingStatistics> {
        let index = load_feature_index(grounded)?;
        let learners = PerWorker::new(self.pipeline.threads(), || self.learner.copy());
        let status = StatusLogger::new();
        let mut criterion = self.criterion.clone();
        let mut statistics = TrainingStatistics::default();
        tracing::info!(
            learner = self.learner.name(),
            core = ?self.learner.core(),
            threads = self.pipeline.threads(),
            max_epochs = criterion.max_epochs,
            "training"
        );

        let mut epoch = 0;
        while !criterion.satisfied() {
            epoch += 1;
            let started = Instant::now();
            let mut totals = EpochStats::new(epoch);
            let run = self.pipeline.run(
                grounded_lines(grounded)?,
                |_, line: String| {
                    let t0 = Instant::now();
                    let example = PosNegRWExample::parse(&line, index.as_deref())?;
                    let parse = t0.elapsed();
                    let stats = learners.with(|learner| {
                        learner.initialize_features(params, &example);
                        learner.train_on_example(params, &example, epoch, &status)
                    })?;
                    Ok(Some((stats, parse, t0.elapsed() - parse)))
                },
                |_, (stats, parse, train)| {
                    totals.add(stats, parse, train);
                    Ok(())
                },
            )?;
            // Every example of the epoch has finished past this point.
            totals.reg_loss += self.learner.cleanup_epoch(params, epoch);
            totals.failed = run.failed;
            totals.wall_ms = started.elapsed().as_millis() as u64;
            criterion.record_epoch();
            if totals.examples == 0 {
                tracing::warn!(path = %grounded.display(), "no usable examples; stopping");
                statistics.finish(totals);
                break;
            }
            if let Some(percent) = statistics.finish(totals) {
                criterion.record_improvement(percent);
            }
        }

        if let Some(w) = params.get(RESTART)
            && w != 1.0
        {
            tracing::warn!(weight = w, "{RESTART} drifted from 1.0; was it left trainable?");
        }
        tracing::info!(epochs = epoch, features = params.len(), "training finished");
        Ok(statistics)
    }
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("learner", &self.learner.name())
            .field("pipeline", &self.pipeline)
            .field("criterion", &self.criterion)
            .finish()
    }
}

/// The `.features` index beside `grounded`, when grounding wrote one.
pub(crate) fn load_feature_index(grounded: &Path) -> ProResult<Option<Arc<FeatureTable>>> {
    let path = features_path(grounded);
    if !path.exists() {
        return Ok(None);
    }
    let table = FeatureTable::load(&path)?;
    tracing::debug!(path = %path.display(), features = table.len(), "loaded feature index");
    Ok(Some(Arc::new(table)))
}

/// Non-blank, non-comment lines of a grounded file.
pub(crate) fn grounded_lines(path: &Path) -> ProResult<impl Iterator<Item = String>> {
    let file = File::open(path).map_err(|source| LearnError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let shown = path.display().to_string();
    Ok(BufReader::new(file)
        .lines()
        .map_while(move |line| {
            line.inspect_err(|e| tracing::error!(path = %shown, error = %e, "stopped reading grounded examples"))
                .ok()
        })
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learn::fixtures::TWO_ANSWERS;

    #[test]
    fn stops_on_max_epochs() {
        let mut c = StoppingCriterion::new(2, 1.0, 3);
        assert!(!c.satisfied());
        c.record_epoch();
        c.record_epoch();
        assert!(c.satisfied());
    }

    #[test]
    fn stops_after_a_window_of_small_improvements() {
        let mut c = StoppingCriterion::new(100, 1.0, 2);
        c.record_epoch();
        c.record_improvement(0.5);
        assert!(!c.satisfied());
        c.record_improvement(5.0);
        c.record_improvement(0.1);
        assert!(!c.satisfied());
        c.record_improvement(0.2);
        assert!(c.satisfied());
    }

    #[test]
    fn statistics_track_improvement() {
        let mut stats = TrainingStatistics::default();
        let mut first = EpochStats::new(1);
        first.add(
            ExampleStats {
                log_loss: 2.0,
                ..ExampleStats::default()
            },
            Duration::ZERO,
            Duration::ZERO,
        );
        assert_eq!(stats.finish(first), None);
        let mut second = EpochStats::new(2);
        second.log_loss = 1.5;
        second.examples = 1;
        assert_eq!(stats.finish(second), Some(25.0));
        assert_eq!(stats.last().and_then(|e| e.improvement), Some(0.5));
        assert!(stats.to_json().unwrap().contains("\"percent_improvement\": 25.0"));
    }

    #[test]
    fn training_lowers_the_loss_and_keeps_restart_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let grounded = dir.path().join("train.grounded");
        std::fs::write(&grounded, format!("{TWO_ANSWERS}\n# comment\n{TWO_ANSWERS}\n")).unwrap();

        let mut config = Config::default();
        config.threads = 2;
        config.epochs = 4;
        config.srw.seed = Some(1);
        config.srw.schedule = "lazy".into();
        let trainer = Trainer::from_config(&config).unwrap();
        let params = ParamVector::new();
        let stats = trainer.train(&grounded, &params).unwrap();

        assert_eq!(stats.epochs.len(), 4);
        assert!(stats.epochs.iter().all(|e| e.examples == 2));
        assert!(stats.epochs[3].log_loss < stats.epochs[0].log_loss);
        assert_eq!(params.get(RESTART), Some(1.0));
        assert!(params.get("posf").unwrap() > params.get("negf").unwrap());
    }

    #[test]
    fn malformed_lines_count_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let grounded = dir.path().join("train.grounded");
        std::fs::write(&grounded, format!("{TWO_ANSWERS}\nq(b,X)\t1\t2\n")).unwrap();

        let mut config = Config::default();
        config.epochs = 2;
        config.srw.seed = Some(1);
        let trainer = Trainer::from_config(&config).unwrap();
        let stats = trainer.train(&grounded, &ParamVector::new()).unwrap();

        assert_eq!(stats.epochs.len(), 2);
        for epoch in &stats.epochs {
            assert_eq!(epoch.examples, 1);
            assert_eq!(epoch.failed, 1);
        }
    }
}
