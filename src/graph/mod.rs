//! Proof graphs: the lazily expanded graph of interpreter states for one query.
//!
//! - [`StateProofGraph`] addresses nodes by [`State`] and records into a
//!   map-backed [`SimpleStateGraph`].
//! - [`CachingIdProofGraph`] additionally exposes dense integer node ids for
//!   the id-indexed provers and records into a [`LightweightStateGraph`].
//!
//! Both merge logically equivalent states through the interpreter's
//! canonical key, so they produce the same node and edge counts.

pub mod caching;
pub(crate) mod expansion;
pub mod inference;
pub mod state_graph;

use std::sync::Arc;

use crate::error::ProResult;
use crate::ground::InferenceExample;
use crate::logic::Query;
use crate::plugins::WamPlugin;
use crate::registry::FeatureTable;
use crate::wam::{FeatureMap, Outlink, State, WamProgram};

pub use caching::CachingIdProofGraph;
pub use inference::{GraphEdge, InferenceGraph, LightweightStateGraph, SimpleStateGraph};
pub use state_graph::StateProofGraph;

/// Which proof graph a prover expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofGraphKind {
    State,
    CachingId,
}

impl ProofGraphKind {
    /// Build an empty proof graph of this kind for `example`.
    pub fn build(
        self,
        example: InferenceExample,
        program: Arc<WamProgram>,
        plugins: Vec<Arc<dyn WamPlugin>>,
        features: Arc<FeatureTable>,
    ) -> ProResult<Box<dyn ProofGraph>> {
        Ok(match self {
            Self::State => Box::new(StateProofGraph::new(example, program, plugins, features)?),
            Self::CachingId => Box::new(CachingIdProofGraph::new(example, program, plugins, features)?),
        })
    }
}

impl std::fmt::Display for ProofGraphKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::State => "state",
            Self::CachingId => "caching-id",
        })
    }
}

/// An id-addressed outlink.
#[derive(Debug, Clone, PartialEq)]
pub struct IdOutlink {
    pub child: usize,
    pub features: FeatureMap,
}

/// The lazily expanded proof graph of one example.
pub trait ProofGraph: Send {
    fn kind(&self) -> ProofGraphKind;

    fn example(&self) -> &InferenceExample;

    fn start_state(&self) -> &State;

    /// Successors of `state`: interpreter children, then the restart edge.
    /// With `true_loop`, a completed state first offers its self-loop.
    fn outlinks(&mut self, state: &State, true_loop: bool) -> ProResult<Vec<Outlink>>;

    /// Number of outlinks `outlinks(state, true_loop)` would return.
    fn degree(&mut self, state: &State, true_loop: bool) -> ProResult<usize>;

    /// The example query with the answer bindings of `state` filled in.
    fn fill(&self, state: &State) -> Query;

    /// Everything recorded so far.
    fn graph(&self) -> &dyn InferenceGraph;

    /// Feature table the recorded labels refer to.
    fn features(&self) -> &FeatureTable;

    /// The id-addressed view, when this graph has one.
    fn as_caching_id(&mut self) -> Option<&mut CachingIdProofGraph> {
        None
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Small programs whose canonical proof graphs have known sizes.

    use super::*;
    use crate::logic::parse_rules;
    use crate::plugins::FactsPlugin;
    use crate::wam::compile_rules;

    pub(crate) const DIAMOND_RULES: &str = "p(X,Y) :- v(X,Y).\n\
        v(X,Y) :- q(X,Y).\n\
        q(X,Y) :- r(X,Z), s(Z,Y), t(Y).\n\
        t(d).";
    pub(crate) const DIAMOND_FACTS: &str = "r\ta\tb\nr\ta\tc\ns\tb\td\ns\tc\td\n";

    pub(crate) const TRAPEZOID_RULES: &str = "p(X,Y) :- q(X,Y), r(Y).\n\
        p(a,d).\n\
        r(d).";
    pub(crate) const TRAPEZOID_FACTS: &str = "q\ta\td\n";

    pub(crate) const RECURSION_RULES: &str = "p(X,Y) :- q(X,Y).\n\
        p(X,Y) :- r(X,Z), p(Z,Y).";
    pub(crate) const RECURSION_FACTS: &str = "q\tb\td\nr\ta\tb\n";

    pub(crate) const LOOP_RULES: &str = "p(X,Y) :- q(X,Y).\n\
        p(X,Y) :- s(X,Y).\n\
        q(X,Y) :- p(X,Y).";
    pub(crate) const LOOP_FACTS: &str = "s\ta\td\n";

    pub(crate) const EQUALITY_RULES: &str = "moral(X) :- good(X).\n\
        moral(X) :- good(Y), same(X,Y).\n\
        same(X,X).\n\
        same(X,Y) :- same(Y,X).";
    pub(crate) const EQUALITY_FACTS: &str = "good\tbob\n";

    pub(crate) fn build(
        kind: ProofGraphKind,
        rules: &str,
        facts: &str,
        example: &str,
    ) -> Box<dyn ProofGraph> {
        let program = compile_rules(&parse_rules(rules).unwrap()).unwrap();
        let plugin = FactsPlugin::parse("facts", facts).unwrap();
        let example = InferenceExample::parse_line(example, 1).unwrap();
        kind.build(
            example,
            Arc::new(program),
            vec![Arc::new(plugin)],
            Arc::new(FeatureTable::new()),
        )
        .unwrap()
    }

    /// Expand every reachable node; returns the completed states.
    pub(crate) fn explore(pg: &mut dyn ProofGraph) -> Vec<State> {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![pg.start_state().clone()];
        let mut completed = Vec::new();
        while let Some(s) = stack.pop() {
            if !seen.insert(s.clone()) {
                continue;
            }
            if s.is_completed() {
                completed.push(s.clone());
            }
            for link in pg.outlinks(&s, true).unwrap() {
                stack.push(link.child);
            }
        }
        completed
    }
}
