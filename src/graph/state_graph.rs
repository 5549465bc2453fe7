//! State-addressed proof graph for the map-based provers.

use std::sync::Arc;

use crate::error::ProResult;
use crate::ground::InferenceExample;
use crate::logic::Query;
use crate::plugins::WamPlugin;
use crate::registry::FeatureTable;
use crate::wam::{Outlink, State, WamProgram};

use super::expansion::ProofGraphCore;
use super::inference::{InferenceGraph, SimpleStateGraph};
use super::{ProofGraph, ProofGraphKind};

pub struct StateProofGraph {
    core: ProofGraphCore<SimpleStateGraph>,
}

impl StateProofGraph {
    pub fn new(
        example: InferenceExample,
        program: Arc<WamProgram>,
        plugins: Vec<Arc<dyn WamPlugin>>,
        features: Arc<FeatureTable>,
    ) -> ProResult<Self> {
        Ok(Self {
            core: ProofGraphCore::new(example, program, plugins, features, SimpleStateGraph::new())?,
        })
    }
}

impl std::fmt::Debug for StateProofGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProofGraph")
            .field("query", &self.core.example.query.to_string())
            .field("nodes", &self.core.graph.node_count())
            .finish()
    }
}

impl ProofGraph for StateProofGraph {
    fn kind(&self) -> ProofGraphKind {
        ProofGraphKind::State
    }

    fn example(&self) -> &InferenceExample {
        &self.core.example
    }

    fn start_state(&self) -> &State {
        &self.core.start
    }

    fn outlinks(&mut self, state: &State, true_loop: bool) -> ProResult<Vec<Outlink>> {
        self.core.outlinks(state, true_loop)
    }

    fn degree(&mut self, state: &State, true_loop: bool) -> ProResult<usize> {
        let id = self.core.id_for(state);
        Ok(self.core.expanded(id, true_loop)?.degree(true_loop))
    }

    fn fill(&self, state: &State) -> Query {
        self.core.fill(state)
    }

    fn graph(&self) -> &dyn InferenceGraph {
        &self.core.graph
    }

    fn features(&self) -> &FeatureTable {
        &self.core.features
    }
}
