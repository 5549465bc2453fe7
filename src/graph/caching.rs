//! Id-addressed proof graph with cached expansions.
//!
//! The id provers walk dense node ids instead of hashing states. An id's
//! outlinks are computed once; later calls clone the cached features.

use std::sync::Arc;

use crate::error::{ProResult, ProveError};
use crate::ground::InferenceExample;
use crate::logic::Query;
use crate::plugins::WamPlugin;
use crate::registry::FeatureTable;
use crate::wam::{Outlink, State, WamProgram};

use super::expansion::ProofGraphCore;
use super::inference::{InferenceGraph, LightweightStateGraph};
use super::{IdOutlink, ProofGraph, ProofGraphKind};

pub struct CachingIdProofGraph {
    core: ProofGraphCore<LightweightStateGraph>,
}

impl CachingIdProofGraph {
    pub fn new(
        example: InferenceExample,
        program: Arc<WamProgram>,
        plugins: Vec<Arc<dyn WamPlugin>>,
        features: Arc<FeatureTable>,
    ) -> ProResult<Self> {
        Ok(Self {
            core: ProofGraphCore::new(example, program, plugins, features, LightweightStateGraph::new())?,
        })
    }

    /// Id of the start state (always 1).
    pub fn start_id(&self) -> usize {
        self.core.start_id
    }

    /// Number of node ids handed out so far; valid ids are `1..=node_count`.
    pub fn node_count(&self) -> usize {
        self.core.graph.node_count()
    }

    pub fn state_of(&self, id: usize) -> ProResult<&State> {
        Ok(self.core.graph.state(id).ok_or(ProveError::UnknownState)?)
    }

    pub fn id_outlinks(&mut self, u: usize, true_loop: bool) -> ProResult<Vec<IdOutlink>> {
        Ok(self
            .core
            .expanded(u, true_loop)?
            .iter(true_loop)
            .map(|(child, link)| IdOutlink {
                child: *child,
                features: link.features.clone(),
            })
            .collect())
    }

    pub fn id_degree(&mut self, u: usize, true_loop: bool) -> ProResult<usize> {
        Ok(self.core.expanded(u, true_loop)?.degree(true_loop))
    }
}

impl std::fmt::Debug for CachingIdProofGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingIdProofGraph")
            .field("query", &self.core.example.query.to_string())
            .field("nodes", &self.core.graph.node_count())
            .finish()
    }
}

impl ProofGraph for CachingIdProofGraph {
    fn kind(&self) -> ProofGraphKind {
        ProofGraphKind::CachingId
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
        self.id_degree(id, true_loop)
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

    fn as_caching_id(&mut self) -> Option<&mut CachingIdProofGraph> {
        Some(self)
    }
}
