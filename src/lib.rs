// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # proppr
//!
//! A probabilistic logic engine: Horn-clause programs compiled to a small
//! register machine, proved by approximate personalized PageRank over a
//! lazily expanded proof graph, with edge-feature weights learned by
//! supervised random walks.
//!
//! ## Architecture
//!
//! - **Logic** (`logic`): terms, goals, queries and the rule parser
//! - **Machine** (`wam`): bytecode, the rule compiler and the interpreter
//!   that expands one proof state into its weighted successors
//! - **Plugins** (`plugins`): facts, split facts, edge graphs and builtins
//! - **Proof graphs** (`graph`): on-demand, deduplicated state graphs
//! - **Provers** (`prove`): DFS, power iteration, local push and their
//!   iterative-deepening and priority-queue variants
//! - **Grounding** (`ground`): proof graphs plus labels to sparse text lines
//! - **Learning** (`learn`): SRW and push-based learners, losses,
//!   regularizers and the multi-threaded trainer
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use proppr::config::Config;
//! use proppr::engine::Engine;
//!
//! let mut config = Config::default();
//! config.programs = vec![PathBuf::from("textcat.ppr"), PathBuf::from("words.cfacts")];
//! let engine = Engine::new(config).unwrap();
//! engine.ground(Path::new("train.examples"), Path::new("train.grounded")).unwrap();
//! engine.train(Path::new("train.grounded")).unwrap();
//! engine.params().save(Path::new("trained.params")).unwrap();
//! ```

pub mod answer;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ground;
pub mod learn;
pub mod logic;
pub mod pipeline;
pub mod plugins;
pub mod prove;
pub mod registry;
pub mod squash;
pub mod status;
pub mod symbol;
pub mod wam;
