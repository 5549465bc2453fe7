//! Run configuration, persisted as TOML.
//!
//! A [`Config`] is built once at startup (defaults, then an optional TOML
//! file, then command-line overrides) and handed by reference to every
//! component constructor. Nothing reads configuration from global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ProResult};

// ---------------------------------------------------------------------------
// Approximate-PageRank options
// ---------------------------------------------------------------------------

/// Walk parameters shared by the provers and the learners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AprOptions {
    /// Restart (teleport) probability.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Residual threshold for the push provers.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Iteration count for power iteration; depth bound for DFS.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Lazy-walk probability of staying put during a push.
    #[serde(default)]
    pub stay_probability: f64,
    /// Optional recursion bound for the push provers.
    #[serde(default)]
    pub max_tree_depth: Option<usize>,
}

fn default_alpha() -> f64 {
    0.1
}
fn default_epsilon() -> f64 {
    1e-4
}
fn default_max_depth() -> usize {
    20
}

impl Default for AprOptions {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            epsilon: default_epsilon(),
            max_depth: default_max_depth(),
            stay_probability: 0.0,
            max_tree_depth: None,
        }
    }
}

impl AprOptions {
    /// Apply `name=value[:name=value...]` overrides, e.g. `eps=1e-5:alpha=0.2`.
    pub fn apply_overrides(&mut self, spec: &str) -> ProResult<()> {
        for (key, value) in split_overrides(spec)? {
            match key {
                "alpha" => self.alpha = parse_num(key, value)?,
                "eps" | "epsilon" => self.epsilon = parse_num(key, value)?,
                "depth" | "maxDepth" | "max_depth" => self.max_depth = parse_num(key, value)?,
                "stay" | "stayProbability" | "stay_probability" => {
                    self.stay_probability = parse_num(key, value)?
                }
                "maxTreeDepth" | "max_tree_depth" => self.max_tree_depth = Some(parse_num(key, value)?),
                other => return Err(invalid(other, "unknown apr option")),
            }
        }
        self.check()
    }

    fn check(&self) -> ProResult<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(invalid("alpha", "must lie in [0, 1]"));
        }
        if !(0.0..1.0).contains(&self.stay_probability) {
            return Err(invalid("stay", "must lie in [0, 1)"));
        }
        if self.epsilon <= 0.0 {
            return Err(invalid("eps", "must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Learner options
// ---------------------------------------------------------------------------

/// Options of the structured random-walk learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrwOptions {
    /// Regularization strength.
    #[serde(default = "default_mu")]
    pub mu: f64,
    /// Learning rate before epoch decay.
    #[serde(default = "default_eta")]
    pub eta: f64,
    /// Negative-example boost margin of the pos/neg loss.
    #[serde(default = "default_delta")]
    pub delta: f64,
    /// Laplacian smoothing strength.
    #[serde(default)]
    pub zeta: f64,
    /// Feature affinity file for the Laplacian and group-lasso regularizers.
    #[serde(default)]
    pub affinity_file: Option<PathBuf>,
    #[serde(default = "default_squash")]
    pub squashing_function: String,
    #[serde(default = "default_regularizer")]
    pub regularizer: String,
    /// `sync` or `lazy`.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_loss")]
    pub loss: String,
    /// `srw` or `dpr`.
    #[serde(default = "default_learner")]
    pub learner: String,
    /// Seed for the initial parameter perturbation.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_mu() -> f64 {
    0.001
}
fn default_eta() -> f64 {
    1.0
}
fn default_delta() -> f64 {
    0.5
}
fn default_squash() -> String {
    "relu".into()
}
fn default_regularizer() -> String {
    "l2".into()
}
fn default_schedule() -> String {
    "sync".into()
}
fn default_loss() -> String {
    "posneg".into()
}
fn default_learner() -> String {
    "srw".into()
}

impl Default for SrwOptions {
    fn default() -> Self {
        Self {
            mu: default_mu(),
            eta: default_eta(),
            delta: default_delta(),
            zeta: 0.0,
            affinity_file: None,
            squashing_function: default_squash(),
            regularizer: default_regularizer(),
            schedule: default_schedule(),
            loss: default_loss(),
            learner: default_learner(),
            seed: None,
        }
    }
}

impl SrwOptions {
    /// Apply `name=value[:name=value...]` overrides, e.g. `mu=0.01:eta=0.5`.
    pub fn apply_overrides(&mut self, spec: &str) -> ProResult<()> {
        for (key, value) in split_overrides(spec)? {
            match key {
                "mu" => self.mu = parse_num(key, value)?,
                "eta" => self.eta = parse_num(key, value)?,
                "delta" => self.delta = parse_num(key, value)?,
                "zeta" => self.zeta = parse_num(key, value)?,
                "affinity" | "affinityFile" | "affinity_file" => self.affinity_file = Some(PathBuf::from(value)),
                "squash" | "squashingFunction" | "squashing_function" => self.squashing_function = value.into(),
                "reg" | "regularizer" => self.regularizer = value.into(),
                "schedule" => self.schedule = value.into(),
                "loss" => self.loss = value.into(),
                "learner" => self.learner = value.into(),
                "seed" => self.seed = Some(parse_num(key, value)?),
                other => return Err(invalid(other, "unknown srw option")),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Whole-run configuration
// ---------------------------------------------------------------------------

/// Everything a run needs, persisted as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub apr: AprOptions,
    #[serde(default)]
    pub srw: SrwOptions,
    /// Rule program and plugin files (`.ppr`, `.wam`, `.cfacts`, `.graph`).
    #[serde(default)]
    pub programs: Vec<PathBuf>,
    /// Prover name.
    #[serde(default = "default_prover")]
    pub prover: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Maximum submitted-but-unfinished tasks; defaults to 1.5x threads.
    #[serde(default)]
    pub throttle: Option<usize>,
    /// Emit results in input order.
    #[serde(default = "default_true")]
    pub maintain_order: bool,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Stop when loss improves by less than this percentage...
    #[serde(default = "default_stopping_percent")]
    pub stopping_percent: f64,
    /// ...for this many consecutive epochs.
    #[serde(default = "default_stopping_epoch")]
    pub stopping_epoch: usize,
    /// Keep grounded examples without any labelled solution.
    #[serde(default)]
    pub include_unlabeled: bool,
    /// Fixed-weight rules, `SPEC[=y|n]:SPEC...`.
    #[serde(default)]
    pub fixed_weights: Option<String>,
    /// Optional log of grounded node ids and their states.
    #[serde(default)]
    pub graph_key: Option<PathBuf>,
    /// Normalise answer scores over completed states.
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Keep only the top-k answers.
    #[serde(default)]
    pub top_k: Option<usize>,
}

fn default_prover() -> String {
    "dpr".into()
}
fn default_threads() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_epochs() -> usize {
    5
}
fn default_stopping_percent() -> f64 {
    1.0
}
fn default_stopping_epoch() -> usize {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apr: AprOptions::default(),
            srw: SrwOptions::default(),
            programs: Vec::new(),
            prover: default_prover(),
            threads: default_threads(),
            throttle: None,
            maintain_order: true,
            epochs: default_epochs(),
            stopping_percent: default_stopping_percent(),
            stopping_epoch: default_stopping_epoch(),
            include_unlabeled: false,
            fixed_weights: None,
            graph_key: None,
            normalize: true,
            top_k: None,
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ProResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ProResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Worker threads, at least one.
    pub fn worker_threads(&self) -> usize {
        self.threads.max(1)
    }

    /// In-flight task ceiling used by the throttled pools.
    pub fn throttle_limit(&self) -> usize {
        self.throttle
            .unwrap_or_else(|| (self.worker_threads() * 3).div_ceil(2))
            .max(1)
    }

    /// Check every component name against its registry.
    pub fn validate(&self) -> ProResult<()> {
        check_name("prover", &self.prover, crate::prove::PROVER_NAMES)?;
        check_name(
            "squashing function",
            &self.srw.squashing_function,
            crate::squash::SQUASHING_FUNCTION_NAMES,
        )?;
        check_name(
            "regularizer",
            &self.srw.regularizer,
            crate::learn::regularize::REGULARIZER_NAMES,
        )?;
        check_name(
            "regularization schedule",
            &self.srw.schedule,
            crate::learn::regularize::SCHEDULE_NAMES,
        )?;
        check_name("loss function", &self.srw.loss, crate::learn::loss::LOSS_NAMES)?;
        check_name("learner", &self.srw.learner, crate::learn::LEARNER_NAMES)?;
        self.apr.check()
    }
}

fn check_name(kind: &str, name: &str, known: &[&str]) -> ProResult<()> {
    if known.contains(&name) {
        Ok(())
    } else {
        Err(ConfigError::UnknownComponent {
            kind: kind.to_string(),
            name: name.to_string(),
            expected: known.join(", "),
        }
        .into())
    }
}

fn invalid(option: &str, reason: &str) -> crate::error::ProPprError {
    ConfigError::InvalidOption {
        option: option.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn split_overrides(spec: &str) -> ProResult<Vec<(&str, &str)>> {
    spec.split(':')
        .filter(|s| !s.trim().is_empty())
        .map(|item| {
            item.split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| invalid(item, "expected name=value"))
        })
        .collect()
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> ProResult<T> {
    value
        .parse()
        .map_err(|_| invalid(key, &format!("\"{value}\" is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.apr.alpha, 0.1);
        assert_eq!(cfg.apr.max_depth, 20);
        assert_eq!(cfg.throttle_limit(), 2);
    }

    #[test]
    fn apr_overrides() {
        let mut apr = AprOptions::default();
        apr.apply_overrides("eps=1e-5:alpha=0.2:depth=8").unwrap();
        assert_eq!(apr.epsilon, 1e-5);
        assert_eq!(apr.alpha, 0.2);
        assert_eq!(apr.max_depth, 8);
        assert!(apr.apply_overrides("alpha=2").is_err());
        assert!(apr.apply_overrides("speed=3").is_err());
        assert!(apr.apply_overrides("alpha").is_err());
    }

    #[test]
    fn srw_overrides() {
        let mut srw = SrwOptions::default();
        srw.apply_overrides("mu=0.01:squash=exp:reg=l1:schedule=lazy").unwrap();
        assert_eq!(srw.mu, 0.01);
        assert_eq!(srw.squashing_function, "exp");
        assert_eq!(srw.regularizer, "l1");
        assert_eq!(srw.schedule, "lazy");
    }

    #[test]
    fn unknown_component_is_rejected() {
        let cfg = Config {
            prover: "magic".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_roundtrip_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.toml");
        let cfg = Config {
            threads: 4,
            prover: "ppr".into(),
            top_k: Some(3),
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("partial.toml");
        std::fs::write(&path, "threads = 2\n[apr]\nalpha = 0.3\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.threads, 2);
        assert_eq!(cfg.apr.alpha, 0.3);
        assert_eq!(cfg.apr.epsilon, 1e-4);
        assert_eq!(cfg.epochs, 5);
    }
}
