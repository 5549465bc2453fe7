//! Fixed-weight rules: which features training must not move.
//!
//! Rules come from a colon-separated list of `SPEC[=y|n]` entries. A spec
//! ending in `*` matches by prefix, anything else matches exactly; the
//! decision defaults to `y` (fixed). The first matching rule decides, and a
//! feature no rule matches is trainable. The reserved restart and self-loop
//! features are always fixed, whatever the configured rules say.

use crate::learn::params::ParamVector;
use crate::symbol::{RESTART, TRUE_LOOP, TRUE_LOOP_RESTART};

#[derive(Debug, Clone, PartialEq, Eq)]
struct DecisionRule {
    spec: String,
    prefix: bool,
    fixed: bool,
}

impl DecisionRule {
    fn new(spec: &str, fixed: bool) -> Self {
        match spec.strip_suffix('*') {
            Some(stem) => Self {
                spec: stem.to_string(),
                prefix: true,
                fixed,
            },
            None => Self {
                spec: spec.to_string(),
                prefix: false,
                fixed,
            },
        }
    }

    fn claims(&self, feature: &str) -> bool {
        if self.prefix {
            feature.starts_with(&self.spec)
        } else {
            feature == self.spec
        }
    }
}

impl std::fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "if feature {} {} it is {}fixed",
            if self.prefix { "starts with" } else { "is" },
            self.spec,
            if self.fixed { "" } else { "not " }
        )
    }
}

/// First-match-wins fixed-weight decision list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWeightRules {
    rules: Vec<DecisionRule>,
}

impl FixedWeightRules {
    /// Only the reserved features are fixed.
    pub fn new() -> Self {
        Self {
            rules: [RESTART, TRUE_LOOP, TRUE_LOOP_RESTART]
                .iter()
                .map(|f| DecisionRule::new(f, true))
                .collect(),
        }
    }

    /// Parse `SPEC[=y|n]:SPEC...`.
    pub fn parse(spec: &str) -> Self {
        let mut rules = Self::new();
        for entry in spec.split(':').filter(|e| !e.is_empty()) {
            let (pattern, fixed) = match entry.split_once('=') {
                Some((pattern, decision)) => (pattern, decision == "y"),
                None => (entry, true),
            };
            rules.rules.push(DecisionRule::new(pattern, fixed));
        }
        rules
    }

    /// Append an exact-match rule fixing `feature`.
    pub fn add_exact(&mut self, feature: &str) {
        self.rules.push(DecisionRule::new(feature, true));
    }

    pub fn is_fixed(&self, feature: &str) -> bool {
        self.rules
            .iter()
            .find(|r| r.claims(feature))
            .is_some_and(|r| r.fixed)
    }

    /// Initial value of a fixed feature.
    pub fn initialize_fixed(&self, params: &ParamVector, feature: &str) {
        params.insert_if_absent(feature, 1.0);
    }
}

impl Default for FixedWeightRules {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FixedWeightRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for rule in &self.rules {
            write!(f, "{rule}; ")?;
        }
        Ok(())
    }
}
