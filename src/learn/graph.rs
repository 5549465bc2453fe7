//! Learning graphs: the compact, read-only form of a grounded proof graph.
//!
//! Parsed from the graph part of a grounded line. Edges are stored
//! compressed by source node and feature names are interned to local indices,
//! so the learner's inner loops work on dense arrays.

use std::collections::HashMap;
use std::ops::Range;

use crate::error::{LearnError, ProResult};
use crate::registry::FeatureTable;
use crate::symbol::FeatureId;

/// Sparse weighted digraph with feature-labelled edges. Nodes are `1..=n`.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningGraph {
    node_count: usize,
    /// Edges of node `u` are `offsets[u]..offsets[u + 1]`.
    offsets: Vec<usize>,
    dst: Vec<usize>,
    /// Labels of edge `e` are `label_offsets[e]..label_offsets[e + 1]`.
    label_offsets: Vec<usize>,
    label_feature: Vec<usize>,
    label_weight: Vec<f64>,
    features: Vec<String>,
    dependencies: usize,
}

fn malformed(reason: impl Into<String>) -> crate::error::ProPprError {
    LearnError::MalformedGrounded { reason: reason.into() }.into()
}

fn parse_count(field: Option<&&str>, what: &str) -> ProResult<usize> {
    let field = field.ok_or_else(|| malformed(format!("missing {what}")))?;
    field
        .trim()
        .parse()
        .map_err(|_| malformed(format!("{what} \"{field}\" is not a count")))
}

impl LearningGraph {
    /// Parse `nodes \t edges \t deps [\t names] \t u->v:labels ...`.
    ///
    /// Feature ids refer to the inline name list when present, otherwise to
    /// `index` (the `.features` file of the grounding run).
    pub fn parse(fields: &[&str], index: Option<&FeatureTable>) -> ProResult<Self> {
        let node_count = parse_count(fields.first(), "node count")?;
        let edge_count = parse_count(fields.get(1), "edge count")?;
        let dependencies = parse_count(fields.get(2), "label dependency count")?;

        let mut rest = fields.get(3..).unwrap_or(&[]);
        let inline: Option<Vec<&str>> = match rest.first() {
            Some(field) if !field.contains("->") => {
                rest = &rest[1..];
                Some(field.split(':').filter(|n| !n.is_empty()).collect())
            }
            _ => None,
        };
        let name_of = |fid: usize| -> ProResult<String> {
            match &inline {
                Some(names) => fid
                    .checked_sub(1)
                    .and_then(|i| names.get(i))
                    .map(|s| s.to_string())
                    .ok_or_else(|| malformed(format!("feature {fid} is not in the inline feature list"))),
                None => u32::try_from(fid)
                    .ok()
                    .and_then(FeatureId::new)
                    .and_then(|id| index.and_then(|t| t.name(id)))
                    .ok_or_else(|| malformed(format!("feature {fid} has no name; is the .features file missing?"))),
            }
        };

        let mut local: HashMap<String, usize> = HashMap::new();
        let mut features = Vec::new();
        let mut edges: Vec<(usize, usize, Vec<(usize, f64)>)> = Vec::with_capacity(edge_count);
        for field in rest.iter().filter(|f| !f.trim().is_empty()) {
            let (src, tail) = field
                .split_once("->")
                .ok_or_else(|| malformed(format!("edge \"{field}\" has no ->")))?;
            let (dst, labels) = tail
                .split_once(':')
                .ok_or_else(|| malformed(format!("edge \"{field}\" has no labels")))?;
            let src: usize = src.trim().parse().map_err(|_| malformed(format!("bad source in \"{field}\"")))?;
            let dst: usize = dst.trim().parse().map_err(|_| malformed(format!("bad target in \"{field}\"")))?;
            if !(1..=node_count).contains(&src) || !(1..=node_count).contains(&dst) {
                return Err(malformed(format!("edge \"{field}\" names a node outside 1..={node_count}")));
            }
            let mut parsed = Vec::new();
            for label in labels.split(',').filter(|l| !l.is_empty()) {
                let (fid, weight) = match label.split_once('@') {
                    Some((fid, w)) => (
                        fid,
                        w.parse::<f64>()
                            .map_err(|_| malformed(format!("bad label weight in \"{label}\"")))?,
                    ),
                    None => (label, 1.0),
                };
                let fid: usize = fid.parse().map_err(|_| malformed(format!("bad feature id \"{fid}\"")))?;
                let name = name_of(fid)?;
                let next = local.len();
                let f = *local.entry(name.clone()).or_insert_with(|| {
                    features.push(name);
                    next
                });
                parsed.push((f, weight));
            }
            edges.push((src, dst, parsed));
        }
        if edges.len() != edge_count {
            return Err(malformed(format!(
                "header declares {edge_count} edges but {} were listed",
                edges.len()
            )));
        }

        // Counting sort by source keeps each node's edges in file order.
        let mut offsets = vec![0; node_count + 2];
        for (src, _, _) in &edges {
            offsets[src + 1] += 1;
        }
        for u in 1..offsets.len() {
            offsets[u] += offsets[u - 1];
        }
        let mut order: Vec<usize> = (0..edges.len()).collect();
        order.sort_by_key(|&e| edges[e].0);

        let mut dst = Vec::with_capacity(edges.len());
        let mut label_offsets = Vec::with_capacity(edges.len() + 1);
        let mut label_feature = Vec::new();
        let mut label_weight = Vec::new();
        label_offsets.push(0);
        for e in order {
            let (_, v, labels) = &edges[e];
            dst.push(*v);
            for (f, w) in labels {
                label_feature.push(*f);
                label_weight.push(*w);
            }
            label_offsets.push(label_feature.len());
        }

        Ok(Self {
            node_count,
            offsets,
            dst,
            label_offsets,
            label_feature,
            label_weight,
            features,
            dependencies,
        })
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.dst.len()
    }

    /// Label dependency count from the header.
    pub fn dependencies(&self) -> usize {
        self.dependencies
    }

    /// Number of distinct features on this graph's edges.
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Feature names by local index.
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Edge indices leaving `u`.
    pub fn edges(&self, u: usize) -> Range<usize> {
        match (self.offsets.get(u), self.offsets.get(u + 1)) {
            (Some(&a), Some(&b)) if u >= 1 => a..b,
            _ => 0..0,
        }
    }

    pub fn degree(&self, u: usize) -> usize {
        self.edges(u).len()
    }

    pub fn dst(&self, e: usize) -> usize {
        self.dst[e]
    }

    /// `(local feature, weight)` labels of edge `e`.
    pub fn labels(&self, e: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.label_offsets[e]..self.label_offsets[e + 1];
        self.label_feature[range.clone()]
            .iter()
            .copied()
            .zip(self.label_weight[range].iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(s: &str) -> Vec<&str> {
        s.split('\t').collect()
    }

    #[test]
    fn inline_names_resolve_locally() {
        let g = LearningGraph::parse(
            &fields("3\t4\t7\tid(restart):db(web)\t1->2:2\t1->3:2@0.5\t1->1:1\t2->1:1"),
            None,
        )
        .unwrap();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 4);
        assert_eq!(g.dependencies(), 7);
        assert_eq!(g.feature_count(), 2);
        assert_eq!(g.degree(1), 3);
        assert_eq!(g.degree(2), 1);
        assert_eq!(g.degree(3), 0);
        let second: Vec<usize> = g.edges(1).map(|e| g.dst(e)).collect();
        assert_eq!(second, [2, 3, 1]);
        let half: Vec<(String, f64)> = g
            .labels(g.edges(1).nth(1).unwrap())
            .map(|(f, w)| (g.features()[f].clone(), w))
            .collect();
        assert_eq!(half, [("db(web)".to_string(), 0.5)]);
    }

    #[test]
    fn plain_ids_use_the_feature_index() {
        let table = FeatureTable::new();
        table.insert("id(restart)").unwrap();
        table.insert("db(web)").unwrap();
        let g = LearningGraph::parse(&fields("2\t2\t2\t1->2:2\t2->1:1"), Some(&table)).unwrap();
        assert_eq!(g.features(), ["db(web)".to_string(), "id(restart)".to_string()]);
        assert!(LearningGraph::parse(&fields("2\t2\t2\t1->2:2\t2->1:1"), None).is_err());
    }

    #[test]
    fn edges_are_grouped_by_source() {
        let g = LearningGraph::parse(&fields("3\t3\t3\ta:b\t2->3:1\t1->2:2\t2->1:1"), None).unwrap();
        let from_two: Vec<usize> = g.edges(2).map(|e| g.dst(e)).collect();
        assert_eq!(from_two, [3, 1]);
        assert_eq!(g.degree(1), 1);
    }

    #[test]
    fn malformed_graphs_are_rejected() {
        assert!(LearningGraph::parse(&fields("2\t3\t0\ta\t1->2:1"), None).is_err());
        assert!(LearningGraph::parse(&fields("2\t1\t0\ta\t1->5:1"), None).is_err());
        assert!(LearningGraph::parse(&fields("2\t1\t0\ta\t1->2:9"), None).is_err());
        assert!(LearningGraph::parse(&fields("x\t1\t0"), None).is_err());
    }
}
