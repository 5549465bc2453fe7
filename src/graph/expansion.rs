//! Lazy, canonicalising expansion shared by both proof graphs.
//!
//! Every child the interpreter produces is mapped to the first state seen
//! with the same [`CanonicalKey`], so logically equivalent configurations
//! become one node. Each node is expanded at most once; the expansion is
//! recorded in the backing [`InferenceGraph`] with interned feature ids.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ProResult, ProveError};
use crate::ground::InferenceExample;
use crate::logic::Query;
use crate::plugins::WamPlugin;
use crate::registry::FeatureTable;
use crate::symbol::{RESTART, TRUE_LOOP, TRUE_LOOP_RESTART};
use crate::wam::{CanonicalKey, FeatureMap, Outlink, State, WamInterpreter, WamProgram};

use super::inference::{GraphEdge, InferenceGraph};

/// Cached expansion of one node.
#[derive(Debug)]
pub(crate) struct Expanded {
    /// Interpreter successors then the restart edge, as `(child id, link)`.
    pub(crate) base: Vec<(usize, Outlink)>,
    /// Self-loop offered when true loops are requested.
    pub(crate) looped: Option<(usize, Outlink)>,
    /// Which variant the inference graph currently holds.
    recorded: Option<bool>,
}

impl Expanded {
    pub(crate) fn iter(&self, true_loop: bool) -> impl Iterator<Item = &(usize, Outlink)> {
        self.looped
            .iter()
            .filter(move |_| true_loop)
            .chain(self.base.iter())
    }

    pub(crate) fn degree(&self, true_loop: bool) -> usize {
        self.base.len() + usize::from(true_loop && self.looped.is_some())
    }
}

/// State shared by the two proof graph flavours.
pub(crate) struct ProofGraphCore<G> {
    pub(crate) example: InferenceExample,
    interpreter: WamInterpreter,
    pub(crate) start: State,
    pub(crate) start_id: usize,
    canonical: HashMap<CanonicalKey, State>,
    pub(crate) graph: G,
    pub(crate) features: Arc<FeatureTable>,
    cache: HashMap<usize, Expanded>,
}

impl<G: InferenceGraph> ProofGraphCore<G> {
    pub(crate) fn new(
        example: InferenceExample,
        program: Arc<WamProgram>,
        plugins: Vec<Arc<dyn WamPlugin>>,
        features: Arc<FeatureTable>,
        mut graph: G,
    ) -> ProResult<Self> {
        let mut interpreter = WamInterpreter::new(program, plugins);
        let start = interpreter.start_query(&example.query)?;
        let start_id = graph.node_id(&start);
        let mut canonical = HashMap::new();
        canonical.insert(interpreter.canonical_key(&start), start.clone());
        Ok(Self {
            example,
            interpreter,
            start,
            start_id,
            canonical,
            graph,
            features,
            cache: HashMap::new(),
        })
    }

    fn representative(&mut self, state: State) -> State {
        let key = self.interpreter.canonical_key(&state);
        self.canonical.entry(key).or_insert(state).clone()
    }

    /// Node id of `state`, merging it into its canonical class if unseen.
    pub(crate) fn id_for(&mut self, state: &State) -> usize {
        if let Some(id) = self.graph.id_of(state) {
            return id;
        }
        let rep = self.representative(state.clone());
        self.graph.node_id(&rep)
    }

    fn expand(&mut self, id: usize, state: &State) -> ProResult<Expanded> {
        let mut base = Vec::new();
        if !state.is_completed() && !state.is_failed() {
            for link in self.interpreter.outlinks(state)? {
                let child = self.representative(link.child);
                let child_id = self.graph.node_id(&child);
                base.push((child_id, Outlink::new(child, link.features)));
            }
        }
        if !state.is_failed() {
            base.push((
                self.start_id,
                Outlink::new(self.start.clone(), reserved(RESTART)),
            ));
        }
        let looped = state.is_completed().then(|| {
            let name = if id == self.start_id {
                TRUE_LOOP_RESTART
            } else {
                TRUE_LOOP
            };
            (id, Outlink::new(state.clone(), reserved(name)))
        });
        tracing::trace!(node = id, degree = base.len(), "expanded proof state");
        Ok(Expanded {
            base,
            looped,
            recorded: None,
        })
    }

    /// The expansion of node `id`, computing and recording it on first use.
    pub(crate) fn expanded(&mut self, id: usize, true_loop: bool) -> ProResult<&Expanded> {
        if !self.cache.contains_key(&id) {
            let state = self.graph.state(id).cloned().ok_or(ProveError::UnknownState)?;
            let expanded = self.expand(id, &state)?;
            self.cache.insert(id, expanded);
        }
        let entry = self.cache.get_mut(&id).ok_or(ProveError::UnknownState)?;
        let stale = match entry.recorded {
            None => true,
            Some(with_loop) => true_loop && !with_loop && entry.looped.is_some(),
        };
        if stale {
            let mut edges = Vec::with_capacity(entry.degree(true_loop));
            for (dst, link) in entry.iter(true_loop) {
                let labels = link
                    .features
                    .iter()
                    .map(|(name, w)| Ok((self.features.insert(name)?, *w)))
                    .collect::<ProResult<Vec<_>>>()?;
                edges.push(GraphEdge { dst: *dst, labels });
            }
            entry.recorded = Some(true_loop);
            self.graph.set_outlinks(id, edges);
        }
        Ok(entry)
    }

    pub(crate) fn outlinks(&mut self, state: &State, true_loop: bool) -> ProResult<Vec<Outlink>> {
        let id = self.id_for(state);
        Ok(self
            .expanded(id, true_loop)?
            .iter(true_loop)
            .map(|(_, link)| link.clone())
            .collect())
    }

    pub(crate) fn fill(&self, state: &State) -> Query {
        self.interpreter.fill(&self.example.query, state)
    }
}

fn reserved(name: &str) -> FeatureMap {
    FeatureMap::from([(name.to_string(), 1.0)])
}
