//! Rich diagnostic error types for the proppr engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so users know exactly what went wrong
//! and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the proppr engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ProPprError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Logic(#[from] LogicError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Interpreter(#[from] InterpreterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Prove(#[from] ProveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ground(#[from] GroundError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Learn(#[from] LearnError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),
}

// ---------------------------------------------------------------------------
// Logic (terms, goals, queries)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LogicError {
    #[error("cannot parse goal \"{text}\": {reason}")]
    #[diagnostic(
        code(proppr::logic::goal_syntax),
        help(
            "Goals are written `functor(arg,arg,...)` or a bare `functor`. \
             Arguments starting with an upper-case letter or `_` are variables; \
             everything else is a constant."
        )
    )]
    GoalSyntax { text: String, reason: String },

    #[error("empty query")]
    #[diagnostic(
        code(proppr::logic::empty_query),
        help("A query needs at least one goal, e.g. `predict(howard,Y)`.")
    )]
    EmptyQuery,
}

// ---------------------------------------------------------------------------
// Program (bytecode, compiler, plugin files)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ProgramError {
    #[error("malformed instruction on line {line}: {reason}")]
    #[diagnostic(
        code(proppr::program::malformed_instruction),
        help(
            "Each bytecode line is `OPCODE<TAB>operand<TAB>operand`. Opcodes are \
             case-sensitive and take a fixed number of operands."
        )
    )]
    MalformedInstruction { line: usize, reason: String },

    #[error("cannot compile clause {clause}: {reason}")]
    #[diagnostic(
        code(proppr::program::compile),
        help(
            "Check the rule syntax: `head :- goal, goal {{feature}}.` Feature arguments \
             and weights may only mention variables bound by the head."
        )
    )]
    Compile { clause: String, reason: String },

    #[error("malformed line {line} in {path}: {reason}")]
    #[diagnostic(
        code(proppr::program::malformed_fact),
        help(
            "Facts files hold `functor<TAB>arg<TAB>arg` lines; graph files hold \
             `label<TAB>src<TAB>dst[<TAB>weight]` lines."
        )
    )]
    MalformedFact {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("unsupported program file: {path}")]
    #[diagnostic(
        code(proppr::program::unsupported_file),
        help("Program files must end in .wam, .ppr, .cfacts or .graph.")
    )]
    UnsupportedFile { path: String },

    #[error("more than one rule program given ({first} and {second})")]
    #[diagnostic(
        code(proppr::program::multiple_programs),
        help("Combine the rules into one .ppr or .wam file.")
    )]
    MultiplePrograms { first: String, second: String },

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(proppr::program::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Interpreter errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InterpreterError {
    #[error("program counter {pc} is outside the program ({size} instructions)")]
    #[diagnostic(
        code(proppr::interp::bad_address),
        help("A callp or ffindall targets an address that does not exist. Recompile the program.")
    )]
    BadAddress { pc: usize, size: usize },

    #[error("register {register} is outside the current register window of size {window}")]
    #[diagnostic(
        code(proppr::interp::bad_register),
        help("The clause uses more registers than its `allocate` reserved.")
    )]
    BadRegister { register: i64, window: usize },

    #[error("heap reference {relative} is outside the heap of size {size}")]
    #[diagnostic(
        code(proppr::interp::bad_heap_ref),
        help("A head unification refers past the arguments pushed by the caller.")
    )]
    BadHeapRef { relative: i64, size: usize },

    #[error("feature argument in register {register} is unbound")]
    #[diagnostic(
        code(proppr::interp::unbound_feature),
        help(
            "Features may only mention variables that are bound when the feature is \
             computed. Bind the variable in the clause head."
        )
    )]
    UnboundFeatureVariable { register: i64 },

    #[error("weight \"{value}\" is not a number")]
    #[diagnostic(
        code(proppr::interp::bad_weight),
        help("fpushweight expects the next-to-top heap cell to hold a numeric constant.")
    )]
    BadWeight { value: String },

    #[error("{opcode} outside of a feature computation")]
    #[diagnostic(
        code(proppr::interp::no_feature),
        help("Feature instructions must follow an fpushstart.")
    )]
    NoFeatureInProgress { opcode: String },
}

// ---------------------------------------------------------------------------
// Prover errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ProveError {
    #[error("{prover} is already proving: one prover instance per thread only")]
    #[diagnostic(
        code(proppr::prove::reentrant),
        help("Call `copy()` to give each worker thread its own prover.")
    )]
    Reentrant { prover: String },

    #[error("{prover} needs a {expected} proof graph")]
    #[diagnostic(
        code(proppr::prove::wrong_graph),
        help("Build the proof graph with the prover's `make_proof_graph`.")
    )]
    WrongGraphKind { prover: String, expected: String },

    #[error("state is not a node of this proof graph")]
    #[diagnostic(
        code(proppr::prove::unknown_state),
        help("States must come from the same proof graph they are queried against.")
    )]
    UnknownState,
}

// ---------------------------------------------------------------------------
// Grounding errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GroundError {
    #[error("label query {label} has an unbound argument {argument}")]
    #[diagnostic(
        code(proppr::ground::unbound_label),
        help(
            "Positive and negative labels must be fully ground, e.g. `+predict(howard,bird)`. \
             Capitalised arguments are read as variables."
        )
    )]
    UnboundLabel { label: String, argument: String },

    #[error("malformed example line {line}: {reason}")]
    #[diagnostic(
        code(proppr::ground::malformed_example),
        help("Example lines are `query<TAB>+positive<TAB>-negative...`.")
    )]
    MalformedExample { line: usize, reason: String },

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(proppr::ground::io),
        help("Check that the output directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Learning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LearnError {
    #[error("malformed grounded example: {reason}")]
    #[diagnostic(
        code(proppr::learn::malformed_grounded),
        help(
            "Grounded lines are `query<TAB>pos,ids<TAB>neg,ids<TAB>nodes<TAB>edges<TAB>deps<TAB>src->dst:fid,...`. \
             Re-run grounding if the file was edited by hand."
        )
    )]
    MalformedGrounded { reason: String },

    #[error("parameter {feature} has non-finite weight {value} on line {line}")]
    #[diagnostic(
        code(proppr::learn::non_finite_param),
        help("Parameter files must not contain NaN or Infinity. Retrain or fix the offending line.")
    )]
    NonFiniteParam {
        feature: String,
        value: String,
        line: usize,
    },

    #[error("malformed parameter line {line}: {reason}")]
    #[diagnostic(
        code(proppr::learn::malformed_param),
        help("Parameter lines are `feature<TAB>weight`.")
    )]
    MalformedParam { line: usize, reason: String },

    #[error("total outlink weight is zero at node {node} but an edge still carries weight")]
    #[diagnostic(
        code(proppr::learn::degenerate_node),
        help("The squashing function produced an inconsistent edge weight. Try a different one.")
    )]
    DegenerateNode { node: usize },

    #[error("feature id space exhausted")]
    #[diagnostic(
        code(proppr::learn::features_exhausted),
        help("More than 2^32 - 1 distinct features were interned. Split the dataset.")
    )]
    FeatureSpaceExhausted,

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(code(proppr::learn::io), help("Check the path and permissions."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown {kind} \"{name}\"; expected one of: {expected}")]
    #[diagnostic(
        code(proppr::config::unknown_component),
        help("Pick one of the listed names.")
    )]
    UnknownComponent {
        kind: String,
        name: String,
        expected: String,
    },

    #[error("invalid option {option}: {reason}")]
    #[diagnostic(
        code(proppr::config::invalid_option),
        help("Options are written `name=value`, e.g. `--apr eps=1e-5:alpha=0.2`.")
    )]
    InvalidOption { option: String, reason: String },

    #[error("failed to read config {path}: {source}")]
    #[diagnostic(
        code(proppr::config::read),
        help("Check that the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(proppr::config::parse),
        help("The config file must be valid TOML with the documented sections.")
    )]
    Parse { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("failed to build worker pool: {message}")]
    #[diagnostic(
        code(proppr::pipeline::pool),
        help("Lower --threads or check the process thread limit.")
    )]
    Pool { message: String },

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(code(proppr::pipeline::io), help("Check the path and permissions."))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type ProResult<T> = std::result::Result<T, ProPprError>;
