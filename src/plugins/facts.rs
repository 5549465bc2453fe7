//! Fact tables loaded from `.cfacts` files.
//!
//! Each line is `functor<TAB>arg<TAB>arg...`. A functor written with a
//! trailing `#` carries one extra numeric column holding the fact weight;
//! the `#` is not part of the predicate name. Every answer is labelled with
//! the feature `db(<file stem>)`, weighted by the fact weight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ProResult, ProgramError};
use crate::wam::FeatureMap;

use super::{FactMatch, WamPlugin, read_source, row_matches, stem_of};

/// Rows of one predicate, indexed by every argument position.
#[derive(Debug, Default)]
struct Table {
    rows: Vec<(Vec<Arc<str>>, f64)>,
    by_arg: Vec<HashMap<Arc<str>, Vec<usize>>>,
}

impl Table {
    fn insert(&mut self, args: Vec<Arc<str>>, weight: f64) {
        let row = self.rows.len();
        if self.by_arg.len() < args.len() {
            self.by_arg.resize_with(args.len(), HashMap::new);
        }
        for (i, a) in args.iter().enumerate() {
            self.by_arg[i].entry(Arc::clone(a)).or_default().push(row);
        }
        self.rows.push((args, weight));
    }

    /// Candidate rows: the shortest index list among bound arguments, or all rows.
    fn candidates(&self, args: &[Option<Arc<str>>]) -> Vec<usize> {
        let mut best: Option<&[usize]> = None;
        for (i, arg) in args.iter().enumerate() {
            let Some(a) = arg else { continue };
            let hits = self
                .by_arg
                .get(i)
                .and_then(|idx| idx.get(a))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if best.is_none_or(|b| hits.len() < b.len()) {
                best = Some(hits);
            }
        }
        match best {
            Some(rows) => rows.to_vec(),
            None => (0..self.rows.len()).collect(),
        }
    }
}

/// Facts from one `.cfacts` file.
#[derive(Debug)]
pub struct FactsPlugin {
    name: String,
    feature: String,
    tables: HashMap<String, Table>,
    count: usize,
}

impl FactsPlugin {
    /// An empty table set labelled `db(<name>)`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            feature: format!("db({name})"),
            tables: HashMap::new(),
            count: 0,
        }
    }

    /// Add one fact.
    pub fn add_fact(&mut self, functor: &str, args: &[&str], weight: f64) {
        let jump_to = format!("{functor}/{}", args.len());
        let args = args.iter().map(|a| Arc::from(*a)).collect();
        self.tables.entry(jump_to).or_default().insert(args, weight);
        self.count += 1;
    }

    /// Parse `.cfacts` text; `name` labels errors and the feature.
    pub fn parse(name: &str, text: &str) -> ProResult<Self> {
        let mut plugin = Self::new(name);
        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let bad = |reason: &str| ProgramError::MalformedFact {
                path: name.to_string(),
                line: i + 1,
                reason: reason.to_string(),
            };
            let (functor, rest) = fields.split_first().ok_or_else(|| bad("empty line"))?;
            match functor.strip_suffix('#') {
                Some(functor) => {
                    let (w, args) = rest
                        .split_last()
                        .ok_or_else(|| bad("weighted fact without a weight column"))?;
                    let weight: f64 = w
                        .trim()
                        .parse()
                        .map_err(|_| bad(&format!("weight \"{w}\" is not a number")))?;
                    plugin.add_fact(functor, args, weight);
                }
                None => plugin.add_fact(functor, rest, 1.0),
            }
        }
        Ok(plugin)
    }

    /// Load one `.cfacts` file.
    pub fn load(path: &Path) -> ProResult<Self> {
        let text = read_source(path)?;
        let mut plugin = Self::parse(&stem_of(path), &text)?;
        tracing::debug!(path = %path.display(), facts = plugin.count, "read facts");
        plugin.name = path.display().to_string();
        Ok(plugin)
    }

    /// Number of facts loaded.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl WamPlugin for FactsPlugin {
    fn about(&self) -> String {
        format!("facts {} ({} facts)", self.name, self.count)
    }

    fn claim(&self, jump_to: &str) -> bool {
        self.tables.contains_key(jump_to)
    }

    fn lookup(&self, jump_to: &str, args: &[Option<Arc<str>>]) -> Vec<FactMatch> {
        let Some(table) = self.tables.get(jump_to) else {
            return Vec::new();
        };
        table
            .candidates(args)
            .into_iter()
            .filter_map(|r| {
                let (row, weight) = &table.rows[r];
                row_matches(row, args).then(|| FactMatch {
                    values: row.clone(),
                    features: FeatureMap::from([(self.feature.clone(), *weight)]),
                })
            })
            .collect()
    }
}

/// Several fact files answered as one.
#[derive(Debug, Default)]
pub struct SplitFactsPlugin {
    parts: Vec<FactsPlugin>,
}

impl SplitFactsPlugin {
    pub fn new(parts: Vec<FactsPlugin>) -> Self {
        Self { parts }
    }

    /// Load every path as its own fact table.
    pub fn load(paths: &[PathBuf]) -> ProResult<Self> {
        let parts = paths.iter().map(|p| FactsPlugin::load(p)).collect::<ProResult<_>>()?;
        Ok(Self { parts })
    }
}

impl WamPlugin for SplitFactsPlugin {
    fn about(&self) -> String {
        let facts: usize = self.parts.iter().map(FactsPlugin::len).sum();
        format!("{} fact files ({facts} facts)", self.parts.len())
    }

    fn claim(&self, jump_to: &str) -> bool {
        self.parts.iter().any(|p| p.claim(jump_to))
    }

    fn lookup(&self, jump_to: &str, args: &[Option<Arc<str>>]) -> Vec<FactMatch> {
        self.parts
            .iter()
            .filter(|p| p.claim(jump_to))
            .flat_map(|p| p.lookup(jump_to, args))
            .collect()
    }
}
