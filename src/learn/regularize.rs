//! Regularizers and the schedules that apply them.
//!
//! Every regularizer is expressed as a decay: `decay(feature, gap, lr)`
//! applies `gap` training steps' worth of shrinkage to one weight at once.
//! The synchronous schedule decays every trainable weight by one step after
//! each example. The lazy schedule only settles the weights an example
//! touches, using the per-feature clock in [`ParamVector`] to know how many
//! steps are pending, and settles everything at the end of the epoch so both
//! schedules leave the same weights behind.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::SrwOptions;
use crate::error::{ConfigError, LearnError, ProResult};
use crate::learn::fixed::FixedWeightRules;
use crate::learn::params::ParamVector;

/// Registry names, in display order.
pub const REGULARIZER_NAMES: &[&str] = &["none", "l1", "l2", "l1laplacian", "l1grouplasso"];

/// Schedule names.
pub const SCHEDULE_NAMES: &[&str] = &["sync", "lazy"];

// ---------------------------------------------------------------------------
// Affinity graph
// ---------------------------------------------------------------------------

/// Feature neighbourhoods for the Laplacian and group-lasso penalties.
///
/// File lines are `#feature \t neighbour`; the degree of a feature is its
/// neighbour count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Affinity {
    neighbours: HashMap<String, Vec<String>>,
}

impl Affinity {
    pub fn parse(text: &str) -> Self {
        let mut neighbours: HashMap<String, Vec<String>> = HashMap::new();
        for line in text.lines() {
            let mut parts = line.trim_end_matches('\r').split('\t');
            let (Some(key), Some(other)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.is_empty() || other.is_empty() {
                continue;
            }
            neighbours.entry(key.to_string()).or_default().push(other.to_string());
        }
        Self { neighbours }
    }

    pub fn load(path: &Path) -> ProResult<Self> {
        let io_err = |source| LearnError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = std::fs::File::open(path).map_err(io_err)?;
        let mut text = String::new();
        for line in BufReader::new(file).lines() {
            text.push_str(&line.map_err(io_err)?);
            text.push('\n');
        }
        let affinity = Self::parse(&text);
        tracing::debug!(path = %path.display(), features = affinity.len(), "loaded affinity graph");
        Ok(affinity)
    }

    /// Neighbours of `feature`.
    pub fn of(&self, feature: &str) -> Option<&[String]> {
        self.neighbours.get(&format!("#{feature}")).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Regularizers
// ---------------------------------------------------------------------------

/// A penalty expressed as a per-weight decay.
pub trait Regularizer: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Apply `gap` steps of decay at learning rate `lr` to `feature`; returns
    /// the regularization loss charged for those steps.
    fn decay(&self, params: &ParamVector, feature: &str, gap: u64, lr: f64) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegularizer;

impl Regularizer for NoRegularizer {
    fn name(&self) -> &'static str {
        "none"
    }

    fn decay(&self, _: &ParamVector, _: &str, _: u64, _: f64) -> f64 {
        0.0
    }
}

/// Squared-norm penalty `mu * w^2`: geometric shrinkage.
#[derive(Debug, Clone, Copy)]
pub struct L2 {
    pub mu: f64,
}

impl Regularizer for L2 {
    fn name(&self) -> &'static str {
        "l2"
    }

    fn decay(&self, params: &ParamVector, feature: &str, gap: u64, lr: f64) -> f64 {
        let Some(w) = params.get(feature) else {
            return 0.0;
        };
        if gap == 0 || self.mu == 0.0 {
            return 0.0;
        }
        let factor = (1.0 - 2.0 * self.mu * lr).powf(gap as f64);
        params.update(feature, w, |w| w * factor);
        gap as f64 * self.mu * w * w
    }
}

/// Absolute-value penalty `mu * |w|`, applied with the proximal operator.
#[derive(Debug, Clone, Copy)]
pub struct L1 {
    pub mu: f64,
}

impl L1 {
    fn shrink(mu: f64, params: &ParamVector, feature: &str, gap: u64, lr: f64) -> f64 {
        let Some(w) = params.get(feature) else {
            return 0.0;
        };
        let shrinkage = gap as f64 * lr * mu;
        if gap == 0 || mu == 0.0 || !shrinkage.is_finite() {
            return 0.0;
        }
        params.update(feature, w, |w| w.signum() * (w.abs() - shrinkage).max(0.0));
        gap as f64 * mu * w.abs()
    }
}

impl Regularizer for L1 {
    fn name(&self) -> &'static str {
        "l1"
    }

    fn decay(&self, params: &ParamVector, feature: &str, gap: u64, lr: f64) -> f64 {
        Self::shrink(self.mu, params, feature, gap, lr)
    }
}

/// L1 plus Laplacian smoothing `zeta * w^T L w` over the affinity graph.
///
/// Holding the neighbours fixed, one smoothing step is
/// `w <- w - 2 zeta lr (deg w - S)`, whose `gap`-fold composition is
/// `w* + (w - w*) a^gap` with `a = 1 - 2 zeta lr deg` and `w* = S / deg`.
#[derive(Debug, Clone)]
pub struct L1Laplacian {
    pub mu: f64,
    pub zeta: f64,
    pub affinity: Arc<Affinity>,
}

impl Regularizer for L1Laplacian {
    fn name(&self) -> &'static str {
        "l1laplacian"
    }

    fn decay(&self, params: &ParamVector, feature: &str, gap: u64, lr: f64) -> f64 {
        if gap == 0 {
            return 0.0;
        }
        let mut loss = 0.0;
        if let (Some(w), Some(neighbours)) = (params.get(feature), self.affinity.of(feature))
            && !neighbours.is_empty()
            && self.zeta != 0.0
        {
            let degree = neighbours.len() as f64;
            let sum: f64 = neighbours.iter().map(|s| params.get_or(s, 0.0)).sum();
            let laplacian = degree * w - sum;
            let a = (1.0 - 2.0 * self.zeta * lr * degree).powf(gap as f64);
            let target = sum / degree;
            params.update(feature, w, |w| target + (w - target) * a);
            loss += gap as f64 * self.zeta * laplacian * laplacian;
        }
        loss + L1::shrink(self.mu, params, feature, gap, lr)
    }
}

/// L1 plus a group-lasso penalty `zeta * ||group||` over each feature and
/// its affinity neighbours.
#[derive(Debug, Clone)]
pub struct L1GroupLasso {
    pub mu: f64,
    pub zeta: f64,
    pub affinity: Arc<Affinity>,
}

impl Regularizer for L1GroupLasso {
    fn name(&self) -> &'static str {
        "l1grouplasso"
    }

    fn decay(&self, params: &ParamVector, feature: &str, gap: u64, lr: f64) -> f64 {
        if gap == 0 {
            return 0.0;
        }
        let mut loss = 0.0;
        if let (Some(w), Some(neighbours)) = (params.get(feature), self.affinity.of(feature))
            && self.zeta != 0.0
        {
            let norm = (w * w + neighbours.iter().map(|s| params.get_or(s, 0.0).powi(2)).sum::<f64>()).sqrt();
            if norm > 0.0 {
                let scale = (1.0 - gap as f64 * lr * self.zeta / norm).max(0.0);
                params.update(feature, w, |w| w * scale);
                loss += gap as f64 * self.zeta * norm;
            }
        }
        loss + L1::shrink(self.mu, params, feature, gap, lr)
    }
}

/// Build the regularizer called `name`.
pub fn regularizer_by_name(name: &str, options: &SrwOptions) -> ProResult<Box<dyn Regularizer>> {
    let affinity = || -> ProResult<Arc<Affinity>> {
        match &options.affinity_file {
            Some(path) => Ok(Arc::new(Affinity::load(path)?)),
            None => {
                tracing::warn!(regularizer = name, "no affinity file given; only the L1 part applies");
                Ok(Arc::default())
            }
        }
    };
    Ok(match name {
        "none" => Box::new(NoRegularizer),
        "l1" => Box::new(L1 { mu: options.mu }),
        "l2" => Box::new(L2 { mu: options.mu }),
        "l1laplacian" => Box::new(L1Laplacian {
            mu: options.mu,
            zeta: options.zeta,
            affinity: affinity()?,
        }),
        "l1grouplasso" => Box::new(L1GroupLasso {
            mu: options.mu,
            zeta: options.zeta,
            affinity: affinity()?,
        }),
        other => {
            return Err(ConfigError::UnknownComponent {
                kind: "regularizer".into(),
                name: other.into(),
                expected: REGULARIZER_NAMES.join(", "),
            }
            .into());
        }
    })
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// When decay is applied: after every example to every weight, or lazily.
///
/// The clock ticks once per training example and is shared by every learner
/// copy of a run.
#[derive(Debug)]
pub struct RegularizationSchedule {
    regularizer: Box<dyn Regularizer>,
    lazy: bool,
    clock: AtomicU64,
}

impl RegularizationSchedule {
    pub fn new(regularizer: Box<dyn Regularizer>, lazy: bool) -> Self {
        Self {
            regularizer,
            lazy,
            clock: AtomicU64::new(0),
        }
    }

    /// Build from `srw.regularizer` and `srw.schedule`.
    pub fn from_options(options: &SrwOptions) -> ProResult<Self> {
        let lazy = match options.schedule.as_str() {
            "sync" => false,
            "lazy" => true,
            other => {
                return Err(ConfigError::UnknownComponent {
                    kind: "regularization schedule".into(),
                    name: other.into(),
                    expected: SCHEDULE_NAMES.join(", "),
                }
                .into());
            }
        };
        Ok(Self::new(regularizer_by_name(&options.regularizer, options)?, lazy))
    }

    pub fn regularizer(&self) -> &dyn Regularizer {
        self.regularizer.as_ref()
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    /// The current clock value.
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Start an example; returns its tick.
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Settle decay pending on `features` before example `tick` reads them.
    pub fn prepare<'a>(
        &self,
        params: &ParamVector,
        features: impl IntoIterator<Item = &'a str>,
        tick: u64,
        lr: f64,
    ) -> f64 {
        if !self.lazy {
            return 0.0;
        }
        features
            .into_iter()
            .map(|f| self.settle(params, f, tick.saturating_sub(1), lr))
            .sum()
    }

    /// Apply this example's decay after its gradient step. `features` are the
    /// trainable features of the example; the synchronous schedule decays
    /// every trainable weight instead.
    pub fn apply<'a>(
        &self,
        params: &ParamVector,
        features: impl IntoIterator<Item = &'a str>,
        fixed: &FixedWeightRules,
        tick: u64,
        lr: f64,
    ) -> f64 {
        if self.lazy {
            features.into_iter().map(|f| self.settle(params, f, tick, lr)).sum()
        } else {
            params
                .names()
                .iter()
                .filter(|f| !fixed.is_fixed(f))
                .map(|f| self.regularizer.decay(params, f, 1, lr))
                .sum()
        }
    }

    /// Settle every pending decay; run once all examples of an epoch finished.
    pub fn cleanup(&self, params: &ParamVector, fixed: &FixedWeightRules, lr: f64) -> f64 {
        if !self.lazy {
            return 0.0;
        }
        let now = self.now();
        params
            .names()
            .iter()
            .filter(|f| !fixed.is_fixed(f))
            .map(|f| self.settle(params, f, now, lr))
            .sum()
    }

    fn settle(&self, params: &ParamVector, feature: &str, clock: u64, lr: f64) -> f64 {
        let last = params.touch(feature, clock);
        let gap = clock.saturating_sub(last);
        self.regularizer.decay(params, feature, gap, lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_lazy_decay_matches_repeated_steps() {
        let eager = ParamVector::new();
        let lazy = ParamVector::new();
        eager.set("w", 0.8);
        lazy.set("w", 0.8);
        let reg = L2 { mu: 0.1 };
        for _ in 0..5 {
            reg.decay(&eager, "w", 1, 0.5);
        }
        reg.decay(&lazy, "w", 5, 0.5);
        assert!((eager.get("w").unwrap() - lazy.get("w").unwrap()).abs() < 1e-12);
    }

    #[test]
    fn l1_shrinks_to_zero_without_crossing() {
        let params = ParamVector::new();
        params.set("w", 0.05);
        params.set("v", -0.5);
        let reg = L1 { mu: 0.1 };
        reg.decay(&params, "w", 2, 1.0);
        reg.decay(&params, "v", 2, 1.0);
        assert_eq!(params.get("w"), Some(0.0));
        assert!((params.get("v").unwrap() + 0.3).abs() < 1e-12);
    }

    #[test]
    fn laplacian_pulls_towards_neighbours() {
        let params = ParamVector::new();
        params.set("a", 1.0);
        params.set("b", 0.0);
        let reg = L1Laplacian {
            mu: 0.0,
            zeta: 0.1,
            affinity: Arc::new(Affinity::parse("#a\tb\n")),
        };
        reg.decay(&params, "a", 3, 0.5);
        let a = params.get("a").unwrap();
        assert!(a < 1.0 && a > 0.0);
        assert!((a - 0.9f64.powi(3)).abs() < 1e-12);
    }

    #[test]
    fn group_lasso_shrinks_whole_groups() {
        let params = ParamVector::new();
        params.set("a", 0.6);
        params.set("b", 0.8);
        let reg = L1GroupLasso {
            mu: 0.0,
            zeta: 0.5,
            affinity: Arc::new(Affinity::parse("#a\tb\n")),
        };
        reg.decay(&params, "a", 1, 1.0);
        assert!((params.get("a").unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn lazy_and_sync_schedules_agree_after_cleanup() {
        let fixed = FixedWeightRules::new();
        let sync = RegularizationSchedule::new(Box::new(L2 { mu: 0.05 }), false);
        let lazy = RegularizationSchedule::new(Box::new(L2 { mu: 0.05 }), true);
        let (ps, pl) = (ParamVector::new(), ParamVector::new());
        for p in [&ps, &pl] {
            p.set("a", 1.0);
            p.set("b", -2.0);
            p.set("id(restart)", 1.0);
        }
        // Example 1 touches a, example 2 touches b, example 3 touches a.
        for touched in [["a"], ["b"], ["a"]] {
            let t = sync.tick();
            sync.apply(&ps, touched, &fixed, t, 0.5);
            let t = lazy.tick();
            lazy.prepare(&pl, touched, t, 0.5);
            lazy.apply(&pl, touched, &fixed, t, 0.5);
        }
        lazy.cleanup(&pl, &fixed, 0.5);
        for f in ["a", "b"] {
            assert!((ps.get(f).unwrap() - pl.get(f).unwrap()).abs() < 1e-12, "{f}");
        }
        assert_eq!(ps.get("id(restart)"), Some(1.0));
        assert_eq!(pl.get("id(restart)"), Some(1.0));
    }

    #[test]
    fn affinity_keys_carry_a_hash() {
        let affinity = Affinity::parse("#f\tg\n#f\th\nbroken\n");
        assert_eq!(affinity.of("f").map(<[String]>::len), Some(2));
        assert!(affinity.of("g").is_none());
        assert_eq!(affinity.len(), 1);
    }

    #[test]
    fn schedule_names_resolve() {
        let options = SrwOptions {
            regularizer: "l1".into(),
            schedule: "lazy".into(),
            ..SrwOptions::default()
        };
        let schedule = RegularizationSchedule::from_options(&options).unwrap();
        assert!(schedule.is_lazy());
        assert_eq!(schedule.regularizer().name(), "l1");
        let bad = SrwOptions {
            schedule: "weekly".into(),
            ..SrwOptions::default()
        };
        assert!(RegularizationSchedule::from_options(&bad).is_err());
    }
}
