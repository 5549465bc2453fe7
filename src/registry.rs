//! Feature registry: bidirectional name ↔ id mapping.
//!
//! The [`FeatureTable`] provides O(1) lookups in both directions using two
//! `DashMap`s, so grounding workers can intern features concurrently and all
//! agree on one stable id per name.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use dashmap::DashMap;

use crate::error::{LearnError, ProResult};
use crate::symbol::{AtomicFeatureAllocator, FeatureId};

/// Concurrent feature symbol table shared by every example of one run.
pub struct FeatureTable {
    /// Forward map: feature name → id.
    name_to_id: DashMap<String, FeatureId>,
    /// Reverse map: id → feature name.
    id_to_name: DashMap<FeatureId, String>,
    allocator: AtomicFeatureAllocator,
}

impl FeatureTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            name_to_id: DashMap::new(),
            id_to_name: DashMap::new(),
            allocator: AtomicFeatureAllocator::new(),
        }
    }

    /// Insert `name` if unseen and return its id either way.
    ///
    /// The id is allocated while the forward entry is locked, so two threads
    /// racing on the same name always observe the same id.
    pub fn insert(&self, name: &str) -> ProResult<FeatureId> {
        if let Some(id) = self.name_to_id.get(name) {
            return Ok(*id.value());
        }
        let id = *self
            .name_to_id
            .entry(name.to_string())
            .or_try_insert_with(|| self.allocator.next_id())?
            .value();
        self.id_to_name.entry(id).or_insert_with(|| name.to_string());
        Ok(id)
    }

    /// Look up the id of a feature name.
    pub fn id(&self, name: &str) -> Option<FeatureId> {
        self.name_to_id.get(name).map(|r| *r.value())
    }

    /// Look up the name of a feature id.
    pub fn name(&self, id: FeatureId) -> Option<String> {
        self.id_to_name.get(&id).map(|r| r.value().clone())
    }

    /// Number of interned features.
    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    /// All names in id order.
    pub fn names(&self) -> Vec<String> {
        let top = self.allocator.peek_next();
        (1..top)
            .filter_map(FeatureId::new)
            .filter_map(|id| self.name(id))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the `.features` index: one name per line, line `n` is feature `n`.
    pub fn save(&self, path: &Path) -> ProResult<()> {
        let io_err = |source| LearnError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = std::fs::File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        for name in self.names() {
            writeln!(out, "{name}").map_err(io_err)?;
        }
        out.flush().map_err(io_err)?;
        Ok(())
    }

    /// Read a `.features` index written by [`FeatureTable::save`].
    pub fn load(path: &Path) -> ProResult<Self> {
        let io_err = |source| LearnError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = std::fs::File::open(path).map_err(io_err)?;
        let table = Self::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err)?;
            let name = line.trim();
            if name.is_empty() {
                continue;
            }
            table.insert(name)?;
        }
        Ok(table)
    }
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FeatureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureTable")
            .field("count", &self.len())
            .finish()
    }
}
