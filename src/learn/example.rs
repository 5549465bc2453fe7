//! Training examples parsed from grounded lines.

use crate::error::{LearnError, ProResult};
use crate::learn::graph::LearningGraph;
use crate::registry::FeatureTable;

/// A grounded example ready for the learner: graph, seed and labelled nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct PosNegRWExample {
    pub query: String,
    pub graph: LearningGraph,
    /// Start distribution of the walk.
    pub query_vec: Vec<(usize, f64)>,
    pub pos: Vec<usize>,
    pub neg: Vec<usize>,
}

impl PosNegRWExample {
    /// Parse `query \t pos,ids \t neg,ids \t graph...`.
    pub fn parse(line: &str, index: Option<&FeatureTable>) -> ProResult<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        if fields.len() < 6 {
            return Err(LearnError::MalformedGrounded {
                reason: format!("expected at least 6 tab-separated fields, found {}", fields.len()),
            }
            .into());
        }
        let graph = LearningGraph::parse(&fields[3..], index)?;
        let pos = parse_ids(fields[1], graph.node_count())?;
        let neg = parse_ids(fields[2], graph.node_count())?;
        Ok(Self {
            query: fields[0].to_string(),
            graph,
            query_vec: vec![(1, 1.0)],
            pos,
            neg,
        })
    }

    /// Number of labelled nodes.
    pub fn length(&self) -> usize {
        self.pos.len() + self.neg.len()
    }
}

fn parse_ids(field: &str, nodes: usize) -> ProResult<Vec<usize>> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .ok()
                .filter(|id| (1..=nodes).contains(id))
                .ok_or_else(|| {
                    LearnError::MalformedGrounded {
                        reason: format!("label node \"{s}\" is not a node of the graph"),
                    }
                    .into()
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_and_graph() {
        let ex = PosNegRWExample::parse("p(a,X)\t2\t3\t3\t3\t2\tf:g\t1->2:1\t1->3:2\t2->1:1", None).unwrap();
        assert_eq!(ex.query, "p(a,X)");
        assert_eq!(ex.pos, [2]);
        assert_eq!(ex.neg, [3]);
        assert_eq!(ex.length(), 2);
        assert_eq!(ex.query_vec, [(1, 1.0)]);
        assert_eq!(ex.graph.edge_count(), 3);
    }

    #[test]
    fn empty_label_lists_are_allowed() {
        let ex = PosNegRWExample::parse("p(a,X)\t\t2\t2\t1\t1\tf\t1->2:1", None).unwrap();
        assert!(ex.pos.is_empty());
        assert_eq!(ex.neg, [2]);
    }

    #[test]
    fn out_of_range_labels_are_rejected() {
        assert!(PosNegRWExample::parse("p(a,X)\t9\t\t2\t1\t1\tf\t1->2:1", None).is_err());
        assert!(PosNegRWExample::parse("p(a,X)\t1", None).is_err());
    }
}
