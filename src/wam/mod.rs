//! The register machine: instruction set, compiled programs, the rule
//! compiler, interpreter states and the interpreter itself.

pub mod compiler;
pub mod instruction;
pub mod interpreter;
pub mod program;
pub mod state;

use std::collections::BTreeMap;

pub use compiler::{Compiler, compile_query, compile_rules};
pub use instruction::Instruction;
pub use interpreter::{CanonicalKey, WamInterpreter};
pub use program::WamProgram;
pub use state::{CallStackFrame, Cell, ImmutableState, MutableState, State};

/// Feature name to weight, in name order.
pub type FeatureMap = BTreeMap<String, f64>;

/// A transition from a proof state to one successor.
#[derive(Debug, Clone)]
pub struct Outlink {
    pub child: State,
    pub features: FeatureMap,
}

impl Outlink {
    pub fn new(child: State, features: FeatureMap) -> Self {
        Self { child, features }
    }
}
