//! Logical terms, goals, queries and rules.
//!
//! These are immutable value types. Constants compare by name; every
//! [`Variable`] carries a process-unique serial, so two variables created
//! separately never compare equal even when they share a printed name. That
//! identity is what lets [`Query::variabilize`] hand the interpreter fresh
//! variables on every run.

pub mod parse;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use parse::{parse_goal, parse_rules};

static NEXT_VARIABLE: AtomicU64 = AtomicU64::new(1);

/// A logic variable.
///
/// Equality and hashing use the serial number only.
#[derive(Debug, Clone)]
pub struct Variable {
    name: Arc<str>,
    serial: u64,
}

impl Variable {
    /// Create a brand-new variable with the given display name.
    pub fn fresh(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            serial: NEXT_VARIABLE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The name this variable prints as.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for Variable {}

impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

/// An argument of a goal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A constant symbol, compared by name.
    Constant(Arc<str>),
    /// A variable, compared by identity.
    Variable(Variable),
}

impl Term {
    /// Build a constant term.
    pub fn constant(name: &str) -> Self {
        Term::Constant(Arc::from(name))
    }

    /// Build a fresh variable term.
    pub fn variable(name: &str) -> Self {
        Term::Variable(Variable::fresh(name))
    }

    /// Whether this term is a constant.
    pub fn is_constant(&self) -> bool {
        matches!(self, Term::Constant(_))
    }

    /// The constant name, if this is a constant.
    pub fn as_constant(&self) -> Option<&str> {
        match self {
            Term::Constant(c) => Some(c),
            Term::Variable(_) => None,
        }
    }

    /// Whether `text` reads as a variable in the concrete syntax.
    pub fn looks_like_variable(text: &str) -> bool {
        text.chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase() || c == '_')
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Constant(c) => write!(f, "{c}"),
            Term::Variable(v) => write!(f, "{}", v.name),
        }
    }
}

/// A predicate applied to an ordered argument list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Goal {
    pub functor: Arc<str>,
    pub args: Vec<Term>,
}

impl Goal {
    pub fn new(functor: &str, args: Vec<Term>) -> Self {
        Self {
            functor: Arc::from(functor),
            args,
        }
    }

    /// Build a goal whose arguments are all constants.
    pub fn ground(functor: &str, args: &[&str]) -> Self {
        Self::new(functor, args.iter().map(|a| Term::constant(a)).collect())
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// The `functor/arity` label the interpreter jumps to.
    pub fn jump_to(&self) -> String {
        format!("{}/{}", self.functor, self.args.len())
    }

    /// Whether every argument is a constant.
    pub fn is_ground(&self) -> bool {
        self.args.iter().all(Term::is_constant)
    }

    fn rename(&self, renaming: &mut HashMap<Variable, Variable>) -> Goal {
        let args = self
            .args
            .iter()
            .map(|t| match t {
                Term::Constant(_) => t.clone(),
                Term::Variable(v) => Term::Variable(
                    renaming
                        .entry(v.clone())
                        .or_insert_with(|| Variable::fresh(v.name()))
                        .clone(),
                ),
            })
            .collect();
        Goal {
            functor: Arc::clone(&self.functor),
            args,
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.functor)?;
        if !self.args.is_empty() {
            write!(f, "(")?;
            for (i, a) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{a}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// A query: one head goal followed by zero or more body goals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub head: Goal,
    pub body: Vec<Goal>,
}

impl Query {
    pub fn new(head: Goal) -> Self {
        Self {
            head,
            body: Vec::new(),
        }
    }

    /// All goals in execution order.
    pub fn goals(&self) -> impl Iterator<Item = &Goal> {
        std::iter::once(&self.head).chain(self.body.iter())
    }

    /// Distinct variables in order of first occurrence.
    pub fn variables(&self) -> Vec<Variable> {
        let mut seen = Vec::new();
        for goal in self.goals() {
            for arg in &goal.args {
                if let Term::Variable(v) = arg {
                    if !seen.contains(v) {
                        seen.push(v.clone());
                    }
                }
            }
        }
        seen
    }

    /// A copy with every variable replaced by a fresh one.
    ///
    /// Shared variables stay shared; nothing aliases the original.
    pub fn variabilize(&self) -> Query {
        let mut renaming = HashMap::new();
        Query {
            head: self.head.rename(&mut renaming),
            body: self.body.iter().map(|g| g.rename(&mut renaming)).collect(),
        }
    }

    /// Substitute variables by the bindings produced by a proof.
    ///
    /// `bindings[i]` is the value of the `i`-th variable in first-occurrence
    /// order; `None` leaves the variable in place.
    pub fn substitute(&self, bindings: &[Option<Term>]) -> Query {
        let vars = self.variables();
        let lookup: HashMap<&Variable, &Term> = vars
            .iter()
            .zip(bindings.iter())
            .filter_map(|(v, b)| b.as_ref().map(|t| (v, t)))
            .collect();
        let apply = |g: &Goal| Goal {
            functor: Arc::clone(&g.functor),
            args: g
                .args
                .iter()
                .map(|t| match t {
                    Term::Variable(v) => lookup.get(v).map_or_else(|| t.clone(), |b| (*b).clone()),
                    Term::Constant(_) => t.clone(),
                })
                .collect(),
        };
        Query {
            head: apply(&self.head),
            body: self.body.iter().map(apply).collect(),
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.head)?;
        for g in &self.body {
            write!(f, ",{g}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Query {
    type Err = crate::error::ProPprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_query(s)
    }
}

/// How a feature's weight is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureWeight {
    /// Weight 1.0.
    Unit,
    /// A literal weight.
    Fixed(f64),
    /// The numeric value bound to a variable.
    Bound(Variable),
}

/// A feature template attached to a clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSpec {
    /// Name and arguments of the emitted feature.
    pub goal: Goal,
    pub weight: FeatureWeight,
    /// Goals enumerated to emit one feature per solution; empty for a plain feature.
    pub findall: Vec<Goal>,
}

/// A clause: `lhs :- rhs {features}.`
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub lhs: Goal,
    pub rhs: Vec<Goal>,
    pub features: Vec<FeatureSpec>,
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lhs)?;
        if !self.rhs.is_empty() {
            write!(f, " :- ")?;
            for (i, g) in self.rhs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{g}")?;
            }
        }
        if !self.features.is_empty() {
            write!(f, " {{")?;
            for (i, spec) in self.features.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", spec.goal)?;
                match &spec.weight {
                    FeatureWeight::Unit => {}
                    FeatureWeight::Fixed(w) => write!(f, " @ {w}")?,
                    FeatureWeight::Bound(v) => write!(f, " @ {}", v.name())?,
                }
                if !spec.findall.is_empty() {
                    write!(f, " :")?;
                    for (j, g) in spec.findall.iter().enumerate() {
                        write!(f, "{}{g}", if j == 0 { " " } else { ", " })?;
                    }
                }
            }
            write!(f, "}}")?;
        }
        write!(f, ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_variables_never_equal() {
        let a = Term::variable("X");
        let b = Term::variable("X");
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
        assert_eq!(Term::constant("bob"), Term::constant("bob"));
    }

    #[test]
    fn jump_to_label() {
        let g = Goal::ground("edge", &["a", "b"]);
        assert_eq!(g.jump_to(), "edge/2");
        assert!(g.is_ground());
        assert_eq!(g.to_string(), "edge(a,b)");
    }

    #[test]
    fn variabilize_keeps_sharing_but_breaks_aliasing() {
        let q: Query = "p(X,Y),q(Y)".parse().unwrap();
        let v = q.variabilize();
        let orig = q.variables();
        let fresh = v.variables();
        assert_eq!(fresh.len(), 2);
        assert!(fresh.iter().all(|f| !orig.contains(f)));
        assert_eq!(v.head.args[1], v.body[0].args[0]);
        assert_eq!(v.to_string(), "p(X,Y),q(Y)");
    }

    #[test]
    fn substitute_fills_bound_variables() {
        let q: Query = "predict(howard,Y)".parse().unwrap();
        let filled = q.substitute(&[Some(Term::constant("bird"))]);
        assert_eq!(filled.to_string(), "predict(howard,bird)");
        let partial = q.substitute(&[None]);
        assert_eq!(partial.to_string(), "predict(howard,Y)");
    }
}
