//! Labelled edge lists loaded from `.graph` files.
//!
//! Each line is `label<TAB>src<TAB>dst[<TAB>weight]` and answers the binary
//! predicate `label/2`. Edges are indexed by source; a call with an unbound
//! source scans every edge of the label.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ProResult, ProgramError};
use crate::wam::FeatureMap;

use super::{FactMatch, WamPlugin, read_source, stem_of};

#[derive(Debug, Default)]
struct Edges {
    by_src: HashMap<Arc<str>, Vec<(Arc<str>, f64)>>,
    count: usize,
}

/// Edge lists from one or more `.graph` files.
#[derive(Debug, Default)]
pub struct GraphPlugin {
    name: String,
    feature: String,
    labels: HashMap<String, Edges>,
}

impl GraphPlugin {
    /// An empty graph whose edges are labelled `db(<name>)`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            feature: format!("db({name})"),
            labels: HashMap::new(),
        }
    }

    pub fn add_edge(&mut self, label: &str, src: &str, dst: &str, weight: f64) {
        let edges = self.labels.entry(format!("{label}/2")).or_default();
        edges
            .by_src
            .entry(Arc::from(src))
            .or_default()
            .push((Arc::from(dst), weight));
        edges.count += 1;
    }

    /// Add every edge in `text`; `name` labels errors.
    pub fn extend_from_str(&mut self, name: &str, text: &str) -> ProResult<()> {
        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |reason: String| ProgramError::MalformedFact {
                path: name.to_string(),
                line: i + 1,
                reason,
            };
            let fields: Vec<&str> = line.split('\t').collect();
            let weight = match fields.len() {
                3 => 1.0,
                4 => fields[3]
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| bad(format!("weight \"{}\" is not a number", fields[3])))?,
                n => return Err(bad(format!("expected 3 or 4 fields, found {n}")).into()),
            };
            self.add_edge(fields[0], fields[1], fields[2], weight);
        }
        Ok(())
    }

    /// Load and merge several `.graph` files.
    pub fn load(paths: &[PathBuf]) -> ProResult<Self> {
        let name = paths
            .first()
            .map(|p| stem_of(p))
            .unwrap_or_else(|| "graph".to_string());
        let mut plugin = Self::new(&name);
        for path in paths {
            plugin.extend_from_str(&path.display().to_string(), &read_source(path)?)?;
        }
        Ok(plugin)
    }

    /// Load a single `.graph` file.
    pub fn load_one(path: &Path) -> ProResult<Self> {
        Self::load(&[path.to_path_buf()])
    }

    /// Total edge count over all labels.
    pub fn edge_count(&self) -> usize {
        self.labels.values().map(|e| e.count).sum()
    }

    fn answer(&self, src: &Arc<str>, dst: &Arc<str>, weight: f64) -> FactMatch {
        FactMatch {
            values: vec![Arc::clone(src), Arc::clone(dst)],
            features: FeatureMap::from([(self.feature.clone(), weight)]),
        }
    }
}

impl WamPlugin for GraphPlugin {
    fn about(&self) -> String {
        format!("graph {} ({} edges)", self.name, self.edge_count())
    }

    fn claim(&self, jump_to: &str) -> bool {
        self.labels.contains_key(jump_to)
    }

    fn lookup(&self, jump_to: &str, args: &[Option<Arc<str>>]) -> Vec<FactMatch> {
        let (Some(edges), [src, dst]) = (self.labels.get(jump_to), args) else {
            return Vec::new();
        };
        let keep = |d: &Arc<str>| dst.as_ref().is_none_or(|want| want == d);
        match src {
            Some(s) => edges
                .by_src
                .get_key_value(s)
                .map(|(s, out)| {
                    out.iter()
                        .filter(|(d, _)| keep(d))
                        .map(|(d, w)| self.answer(s, d, *w))
                        .collect()
                })
                .unwrap_or_default(),
            None => {
                let mut sources: Vec<&Arc<str>> = edges.by_src.keys().collect();
                sources.sort();
                sources
                    .into_iter()
                    .flat_map(|s| {
                        edges.by_src[s]
                            .iter()
                            .filter(move |(d, _)| keep(d))
                            .map(move |(d, w)| self.answer(s, d, *w))
                    })
                    .collect()
            }
        }
    }
}
