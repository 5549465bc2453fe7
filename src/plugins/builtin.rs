//! Builtin filter predicates.
//!
//! Filters never enumerate: they succeed once, with their arguments unchanged,
//! when the arguments are bound and pass the test.

use std::collections::HashMap;
use std::sync::Arc;

use crate::wam::FeatureMap;

use super::{FactMatch, WamPlugin};

/// Feature labelling every builtin edge.
pub const BUILTIN_FEATURE: &str = "builtin";

type Filter = fn(&[Arc<str>]) -> bool;

/// The builtin filter collection, claimed by `functor/arity`.
pub struct FilterPlugin {
    filters: HashMap<&'static str, Filter>,
}

impl FilterPlugin {
    pub fn new() -> Self {
        let mut filters: HashMap<&'static str, Filter> = HashMap::new();
        filters.insert("neq/2", |args| args[0] != args[1]);
        Self { filters }
    }
}

impl Default for FilterPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPlugin")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WamPlugin for FilterPlugin {
    fn about(&self) -> String {
        "builtin filters".to_string()
    }

    fn claim(&self, jump_to: &str) -> bool {
        self.filters.contains_key(jump_to)
    }

    fn lookup(&self, jump_to: &str, args: &[Option<Arc<str>>]) -> Vec<FactMatch> {
        let Some(test) = self.filters.get(jump_to) else {
            return Vec::new();
        };
        let Some(values) = args.iter().cloned().collect::<Option<Vec<_>>>() else {
            tracing::debug!(builtin = jump_to, "builtin called with unbound arguments");
            return Vec::new();
        };
        if !test(&values) {
            return Vec::new();
        }
        vec![FactMatch {
            values,
            features: FeatureMap::from([(BUILTIN_FEATURE.to_string(), 1.0)]),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neq_filters_equal_constants() {
        let f = FilterPlugin::new();
        assert!(f.claim("neq/2"));
        assert_eq!(f.lookup("neq/2", &[Some("a".into()), Some("b".into())]).len(), 1);
        assert!(f.lookup("neq/2", &[Some("a".into()), Some("a".into())]).is_empty());
    }

    #[test]
    fn unbound_arguments_never_match() {
        let f = FilterPlugin::new();
        assert!(f.lookup("neq/2", &[Some("a".into()), None]).is_empty());
    }
}
