//! External predicates: fact tables, edge lists and builtin filters.
//!
//! A plugin answers calls the rule program does not define. The interpreter
//! asks every plugin whether it [`claims`](WamPlugin::claim) the pending
//! `functor/arity`, then [`looks up`](WamPlugin::lookup) the matching rows
//! given the call's bound arguments, and resolves the call once per row.
//!
//! Plugins are loaded by file extension through a [`PluginRegistry`].

pub mod builtin;
pub mod facts;
pub mod graph;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ProResult, ProgramError};
use crate::wam::FeatureMap;

pub use builtin::FilterPlugin;
pub use facts::{FactsPlugin, SplitFactsPlugin};
pub use graph::GraphPlugin;

/// One row returned by a plugin: the full argument tuple and the features
/// labelling the edge that resolves the call with it.
#[derive(Debug, Clone, PartialEq)]
pub struct FactMatch {
    pub values: Vec<Arc<str>>,
    pub features: FeatureMap,
}

/// An external predicate source.
pub trait WamPlugin: Send + Sync {
    /// Short description for logs.
    fn about(&self) -> String;

    /// Whether this plugin answers `jump_to` (`functor/arity`).
    fn claim(&self, jump_to: &str) -> bool;

    /// Rows of `jump_to` consistent with `args` (`None` is an unbound argument).
    fn lookup(&self, jump_to: &str, args: &[Option<Arc<str>>]) -> Vec<FactMatch>;
}

/// Whether a stored row agrees with every bound call argument.
pub(crate) fn row_matches(row: &[Arc<str>], args: &[Option<Arc<str>>]) -> bool {
    row.len() == args.len()
        && row
            .iter()
            .zip(args)
            .all(|(value, arg)| arg.as_ref().is_none_or(|a| a == value))
}

/// The file stem used to name a plugin's feature.
pub(crate) fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn read_source(path: &Path) -> ProResult<String> {
    std::fs::read_to_string(path).map_err(|source| {
        ProgramError::Io {
            path: path.display().to_string(),
            source,
        }
        .into()
    })
}

/// Builds one plugin from every file that shares an extension.
pub type PluginLoader = fn(&[PathBuf]) -> ProResult<Arc<dyn WamPlugin>>;

/// Registry of plugin loaders keyed by file extension.
pub struct PluginRegistry {
    loaders: HashMap<String, PluginLoader>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// A registry with the built-in loaders for `.cfacts` and `.graph`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("cfacts", |paths| Ok(Arc::new(SplitFactsPlugin::load(paths)?)));
        registry.register("graph", |paths| Ok(Arc::new(GraphPlugin::load(paths)?)));
        registry
    }

    /// Register a loader. An existing loader for the extension is replaced.
    pub fn register(&mut self, extension: &str, loader: PluginLoader) {
        self.loaders.insert(extension.to_string(), loader);
    }

    /// Whether files with this extension can be loaded.
    pub fn handles(&self, extension: &str) -> bool {
        self.loaders.contains_key(extension)
    }

    /// Load every file, one plugin per extension, in first-seen extension
    /// order. The builtin filters come last.
    pub fn load(&self, paths: &[PathBuf]) -> ProResult<Vec<Arc<dyn WamPlugin>>> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in paths {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !self.loaders.contains_key(&ext) {
                return Err(ProgramError::UnsupportedFile {
                    path: path.display().to_string(),
                }
                .into());
            }
            if !groups.contains_key(&ext) {
                order.push(ext.clone());
            }
            groups.entry(ext).or_default().push(path.clone());
        }

        let mut plugins: Vec<Arc<dyn WamPlugin>> = Vec::new();
        for ext in order {
            if let (Some(loader), Some(files)) = (self.loaders.get(&ext), groups.get(&ext)) {
                let plugin = loader(files)?;
                tracing::info!(plugin = %plugin.about(), files = files.len(), "loaded plugin");
                plugins.push(plugin);
            }
        }
        plugins.push(Arc::new(FilterPlugin::new()));
        Ok(plugins)
    }

    /// Number of registered loaders.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("extensions", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}
