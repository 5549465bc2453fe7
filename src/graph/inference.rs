//! Inference graphs: the id-numbered record of a proof graph's expansion.
//!
//! Node ids are 1-based and assigned in discovery order, so the start state
//! is always node 1. Edge labels are interned feature ids with their weights.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use crate::registry::FeatureTable;
use crate::symbol::FeatureId;
use crate::wam::State;

/// A recorded edge: destination node and its feature labels.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub dst: usize,
    pub labels: Vec<(FeatureId, f64)>,
}

/// Node/edge store behind a proof graph.
pub trait InferenceGraph: Send {
    /// The id of `state`, assigning the next free id to an unseen state.
    fn node_id(&mut self, state: &State) -> usize;

    /// The id of `state`, if it is already a node.
    fn id_of(&self, state: &State) -> Option<usize>;

    /// The state behind node `id`.
    fn state(&self, id: usize) -> Option<&State>;

    /// Replace the outgoing edges of `u`.
    fn set_outlinks(&mut self, u: usize, edges: Vec<GraphEdge>);

    /// Outgoing edges of `u`; empty for unexpanded nodes.
    fn outlinks(&self, u: usize) -> &[GraphEdge];

    fn node_count(&self) -> usize;

    fn edge_count(&self) -> usize;

    /// The grounded-line form of the graph:
    /// `nodes \t edges \t labelDependencies [\t names] \t src->dst:labels ...`.
    ///
    /// With `inline` set, feature ids are renumbered locally and their names
    /// listed in a colon-separated field; otherwise ids refer to the global
    /// `.features` index.
    fn serialize(&self, features: &FeatureTable, inline: bool) -> String {
        let mut local: HashMap<FeatureId, usize> = HashMap::new();
        let mut names = Vec::new();
        if inline {
            let used: BTreeSet<FeatureId> = (1..=self.node_count())
                .flat_map(|u| self.outlinks(u))
                .flat_map(|e| e.labels.iter().map(|(f, _)| *f))
                .collect();
            for (i, f) in used.into_iter().enumerate() {
                local.insert(f, i + 1);
                names.push(features.name(f).unwrap_or_default());
            }
        }

        let mut dependencies = 0;
        let mut edges = String::new();
        for u in 1..=self.node_count() {
            let out = self.outlinks(u);
            let distinct: BTreeSet<FeatureId> = out
                .iter()
                .flat_map(|e| e.labels.iter().map(|(f, _)| *f))
                .collect();
            dependencies += distinct.len() * out.len();
            for edge in out {
                let _ = write!(edges, "\t{u}->{}:", edge.dst);
                for (i, (f, w)) in edge.labels.iter().enumerate() {
                    if i > 0 {
                        edges.push(',');
                    }
                    let id = if inline {
                        local.get(f).copied().unwrap_or(0)
                    } else {
                        f.index()
                    };
                    let _ = write!(edges, "{id}");
                    if *w != 1.0 {
                        let _ = write!(edges, "@{w}");
                    }
                }
            }
        }

        let mut out = format!("{}\t{}\t{}", self.node_count(), self.edge_count(), dependencies);
        if inline {
            out.push('\t');
            out.push_str(&names.join(":"));
        }
        out.push_str(&edges);
        out
    }
}

// ---------------------------------------------------------------------------
// Dense storage
// ---------------------------------------------------------------------------

/// Vector-backed graph: node `id` lives at index `id - 1`.
#[derive(Debug, Default)]
pub struct LightweightStateGraph {
    nodes: Vec<State>,
    index: HashMap<State, usize>,
    edges: Vec<Vec<GraphEdge>>,
    edge_count: usize,
}

impl LightweightStateGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InferenceGraph for LightweightStateGraph {
    fn node_id(&mut self, state: &State) -> usize {
        if let Some(&id) = self.index.get(state) {
            return id;
        }
        self.nodes.push(state.clone());
        self.edges.push(Vec::new());
        let id = self.nodes.len();
        self.index.insert(state.clone(), id);
        id
    }

    fn id_of(&self, state: &State) -> Option<usize> {
        self.index.get(state).copied()
    }

    fn state(&self, id: usize) -> Option<&State> {
        id.checked_sub(1).and_then(|i| self.nodes.get(i))
    }

    fn set_outlinks(&mut self, u: usize, edges: Vec<GraphEdge>) {
        let Some(slot) = u.checked_sub(1).and_then(|i| self.edges.get_mut(i)) else {
            return;
        };
        self.edge_count = self.edge_count - slot.len() + edges.len();
        *slot = edges;
    }

    fn outlinks(&self, u: usize) -> &[GraphEdge] {
        u.checked_sub(1)
            .and_then(|i| self.edges.get(i))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn edge_count(&self) -> usize {
        self.edge_count
    }
}

// ---------------------------------------------------------------------------
// Map storage
// ---------------------------------------------------------------------------

/// Map-backed graph, for proof graphs that address nodes by state.
#[derive(Debug, Default)]
pub struct SimpleStateGraph {
    ids: HashMap<State, usize>,
    states: HashMap<usize, State>,
    edges: HashMap<usize, Vec<GraphEdge>>,
}

impl SimpleStateGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InferenceGraph for SimpleStateGraph {
    fn node_id(&mut self, state: &State) -> usize {
        let next = self.ids.len() + 1;
        let id = *self.ids.entry(state.clone()).or_insert(next);
        if id == next {
            self.states.insert(id, state.clone());
        }
        id
    }

    fn id_of(&self, state: &State) -> Option<usize> {
        self.ids.get(state).copied()
    }

    fn state(&self, id: usize) -> Option<&State> {
        self.states.get(&id)
    }

    fn set_outlinks(&mut self, u: usize, edges: Vec<GraphEdge>) {
        if self.states.contains_key(&u) {
            self.edges.insert(u, edges);
        }
    }

    fn outlinks(&self, u: usize) -> &[GraphEdge] {
        self.edges.get(&u).map(Vec::as_slice).unwrap_or(&[])
    }

    fn node_count(&self) -> usize {
        self.ids.len()
    }

    fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wam::MutableState;

    fn states(n: usize) -> Vec<State> {
        (0..n)
            .map(|i| {
                let mut s = MutableState::new();
                s.pc = i;
                s.freeze()
            })
            .collect()
    }

    fn fill(graph: &mut dyn InferenceGraph, table: &FeatureTable) {
        let s = states(3);
        let a = table.insert("id(restart)").unwrap();
        let b = table.insert("db(web)").unwrap();
        for st in &s {
            graph.node_id(st);
        }
        graph.set_outlinks(
            1,
            vec![
                GraphEdge { dst: 2, labels: vec![(b, 1.0)] },
                GraphEdge { dst: 3, labels: vec![(b, 0.5)] },
                GraphEdge { dst: 1, labels: vec![(a, 1.0)] },
            ],
        );
        graph.set_outlinks(2, vec![GraphEdge { dst: 1, labels: vec![(a, 1.0)] }]);
    }

    #[test]
    fn ids_are_dense_and_stable() {
        for graph in [
            &mut LightweightStateGraph::new() as &mut dyn InferenceGraph,
            &mut SimpleStateGraph::new(),
        ] {
            let s = states(2);
            assert_eq!(graph.node_id(&s[0]), 1);
            assert_eq!(graph.node_id(&s[1]), 2);
            assert_eq!(graph.node_id(&s[0]), 1);
            assert_eq!(graph.id_of(&s[1]), Some(2));
            assert_eq!(graph.state(2), Some(&s[1]));
            assert!(graph.state(0).is_none());
            assert_eq!(graph.node_count(), 2);
        }
    }

    #[test]
    fn plain_serialization_uses_global_ids() {
        let table = FeatureTable::new();
        let mut graph = LightweightStateGraph::new();
        fill(&mut graph, &table);
        assert_eq!(graph.edge_count(), 4);
        // node 1: 2 distinct features x 3 edges, node 2: 1 x 1
        assert_eq!(
            graph.serialize(&table, false),
            "3\t4\t7\t1->2:2\t1->3:2@0.5\t1->1:1\t2->1:1"
        );
    }

    #[test]
    fn inline_serialization_lists_names() {
        let table = FeatureTable::new();
        table.insert("unused").unwrap();
        let mut graph = SimpleStateGraph::new();
        fill(&mut graph, &table);
        assert_eq!(
            graph.serialize(&table, true),
            "3\t4\t7\tid(restart):db(web)\t1->2:2\t1->3:2@0.5\t1->1:1\t2->1:1"
        );
    }

    #[test]
    fn replacing_outlinks_keeps_edge_count() {
        let table = FeatureTable::new();
        let mut graph = LightweightStateGraph::new();
        fill(&mut graph, &table);
        graph.set_outlinks(1, Vec::new());
        assert_eq!(graph.edge_count(), 1);
    }
}
