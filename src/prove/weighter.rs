//! Edge weighting: feature maps to scalar weights through the live parameters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::learn::params::ParamVector;
use crate::squash::SquashingFunction;
use crate::wam::FeatureMap;

#[derive(Debug, Default)]
struct Coverage {
    known: AtomicUsize,
    unknown: AtomicUsize,
}

/// Inner product of parameters and edge features, then squashed.
///
/// Clones share the parameter vector and the coverage counters.
#[derive(Debug, Clone)]
pub struct Weighter {
    params: Arc<ParamVector>,
    squash: SquashingFunction,
    coverage: Arc<Coverage>,
}

impl Weighter {
    pub fn new(params: Arc<ParamVector>, squash: SquashingFunction) -> Self {
        Self {
            params,
            squash,
            coverage: Arc::default(),
        }
    }

    /// Untrained weighting: every feature weighs the squashing default.
    pub fn uniform(squash: SquashingFunction) -> Self {
        Self::new(Arc::new(ParamVector::new()), squash)
    }

    pub fn params(&self) -> &Arc<ParamVector> {
        &self.params
    }

    pub fn squashing_function(&self) -> SquashingFunction {
        self.squash
    }

    /// The unsquashed score of `features`.
    pub fn dot(&self, features: &FeatureMap) -> f64 {
        let default = self.squash.default_value();
        let mut known = 0;
        let mut total = 0.0;
        for (name, v) in features {
            match self.params.get(name) {
                Some(w) => {
                    known += 1;
                    total += w * v;
                }
                None => total += default * v,
            }
        }
        self.coverage.known.fetch_add(known, Ordering::Relaxed);
        self.coverage
            .unknown
            .fetch_add(features.len() - known, Ordering::Relaxed);
        total
    }

    /// The edge weight of `features`.
    pub fn weight(&self, features: &FeatureMap) -> f64 {
        self.squash.compute(self.dot(features))
    }

    /// Feature lookups that found a trained weight.
    pub fn known(&self) -> usize {
        self.coverage.known.load(Ordering::Relaxed)
    }

    /// Feature lookups that fell back to the default weight.
    pub fn unknown(&self) -> usize {
        self.coverage.unknown.load(Ordering::Relaxed)
    }

    /// Fraction of lookups that found a trained weight, if any were made.
    pub fn coverage(&self) -> Option<f64> {
        let (k, u) = (self.known(), self.unknown());
        (k + u > 0).then(|| k as f64 / (k + u) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_features_take_the_default() {
        let params = Arc::new(ParamVector::new());
        params.set("a", 2.0);
        let w = Weighter::new(params, SquashingFunction::ReLU);
        let f = FeatureMap::from([("a".to_string(), 1.0), ("b".to_string(), 0.5)]);
        assert_eq!(w.weight(&f), 2.5);
        assert_eq!(w.known(), 1);
        assert_eq!(w.unknown(), 1);
        assert_eq!(w.coverage(), Some(0.5));
    }

    #[test]
    fn clones_share_counters() {
        let w = Weighter::uniform(SquashingFunction::Linear);
        let copy = w.clone();
        copy.weight(&FeatureMap::from([("x".to_string(), 1.0)]));
        assert_eq!(w.unknown(), 1);
        assert_eq!(w.coverage(), Some(0.0));
    }
}
