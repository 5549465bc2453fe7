//! The register-machine instruction set.
//!
//! Register operands are negative offsets from the top of the current register
//! window (`-1` is the last register the clause allocated). Heap operands named
//! `rel` are negative offsets from the current heap size, so `-arity` is the
//! first argument the caller pushed.

use std::sync::Arc;

use crate::error::{ProResult, ProgramError};

/// One bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// No-op; free text is kept for listings only.
    Comment(String),
    /// Reserve `n` fresh registers.
    Allocate(usize),
    /// Call predicate `functor/arity`; execution parks until the caller picks a clause.
    Callp(Arc<str>),
    /// Return to the caller, or complete when the call stack is empty.
    Returnp,
    /// Push a constant cell.
    Pushconst(Arc<str>),
    /// Push an unbound variable cell and remember it in register `a`.
    Pushfreevar(i64),
    /// Push the value held by register `a`.
    Pushboundvar(i64),
    /// Unify heap cell `rel` with constant `c`.
    Unifyconst(Arc<str>, i64),
    /// Point register `a` at heap cell `rel`.
    Initfreevar(i64, i64),
    /// Unify register `a` with heap cell `rel`.
    Unifyboundvar(i64, i64),
    /// Clear the features reported so far.
    Fclear,
    /// Start building feature `functor` with `arity` arguments.
    Fpushstart(Arc<str>, usize),
    /// Add a constant argument to the feature being built.
    Fpushconst(Arc<str>),
    /// Add the value of register `a` to the feature being built.
    Fpushboundvar(i64),
    /// Take the feature weight from the next-to-top heap cell.
    Fpushweight,
    /// Commit the feature being built.
    Freport,
    /// Run the subroutine at `addr` for every solution and collect the features it reports.
    Ffindall(usize),
}

impl Instruction {
    /// The textual opcode.
    pub fn opcode(&self) -> &'static str {
        match self {
            Instruction::Comment(_) => "comment",
            Instruction::Allocate(_) => "allocate",
            Instruction::Callp(_) => "callp",
            Instruction::Returnp => "returnp",
            Instruction::Pushconst(_) => "pushconst",
            Instruction::Pushfreevar(_) => "pushfreevar",
            Instruction::Pushboundvar(_) => "pushboundvar",
            Instruction::Unifyconst(..) => "unifyconst",
            Instruction::Initfreevar(..) => "initfreevar",
            Instruction::Unifyboundvar(..) => "unifyboundvar",
            Instruction::Fclear => "fclear",
            Instruction::Fpushstart(..) => "fpushstart",
            Instruction::Fpushconst(_) => "fpushconst",
            Instruction::Fpushboundvar(_) => "fpushboundvar",
            Instruction::Fpushweight => "fpushweight",
            Instruction::Freport => "freport",
            Instruction::Ffindall(_) => "ffindall",
        }
    }

    /// Parse one `OPCODE\toperand...` line. `line` is only used in errors.
    pub fn parse(text: &str, line: usize) -> ProResult<Instruction> {
        let mut fields = text.split('\t');
        let opcode = fields.next().unwrap_or("").trim();
        let args: Vec<&str> = fields.collect();
        let bad = |reason: String| ProgramError::MalformedInstruction { line, reason };

        let arity = |n: usize| -> ProResult<()> {
            if args.len() < n {
                Err(bad(format!("{opcode} expects {n} operand(s), got {}", args.len())).into())
            } else {
                Ok(())
            }
        };
        let int = |i: usize| -> ProResult<i64> {
            args[i]
                .trim()
                .parse::<i64>()
                .map_err(|_| bad(format!("{opcode}: \"{}\" is not an integer", args[i])).into())
        };
        let count = |i: usize| -> ProResult<usize> {
            args[i]
                .trim()
                .parse::<usize>()
                .map_err(|_| bad(format!("{opcode}: \"{}\" is not a count", args[i])).into())
        };
        let text_arg = |i: usize| -> Arc<str> { Arc::from(args[i]) };

        let inst = match opcode {
            "comment" => Instruction::Comment(args.join("\t")),
            "allocate" => {
                arity(1)?;
                Instruction::Allocate(count(0)?)
            }
            "callp" => {
                arity(1)?;
                Instruction::Callp(text_arg(0))
            }
            "returnp" => Instruction::Returnp,
            "pushconst" => {
                arity(1)?;
                Instruction::Pushconst(text_arg(0))
            }
            "pushfreevar" => {
                arity(1)?;
                Instruction::Pushfreevar(int(0)?)
            }
            "pushboundvar" => {
                arity(1)?;
                Instruction::Pushboundvar(int(0)?)
            }
            "unifyconst" => {
                arity(2)?;
                Instruction::Unifyconst(text_arg(0), int(1)?)
            }
            "initfreevar" => {
                arity(2)?;
                Instruction::Initfreevar(int(0)?, int(1)?)
            }
            "unifyboundvar" => {
                arity(2)?;
                Instruction::Unifyboundvar(int(0)?, int(1)?)
            }
            "fclear" => Instruction::Fclear,
            "fpushstart" => {
                arity(2)?;
                Instruction::Fpushstart(text_arg(0), count(1)?)
            }
            "fpushconst" => {
                arity(1)?;
                Instruction::Fpushconst(text_arg(0))
            }
            "fpushboundvar" => {
                arity(1)?;
                Instruction::Fpushboundvar(int(0)?)
            }
            "fpushweight" => Instruction::Fpushweight,
            "freport" => Instruction::Freport,
            "ffindall" => {
                arity(1)?;
                Instruction::Ffindall(count(0)?)
            }
            other => return Err(bad(format!("unknown opcode \"{other}\"")).into()),
        };
        Ok(inst)
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode())?;
        match self {
            Instruction::Comment(text) if !text.is_empty() => write!(f, "\t{text}"),
            Instruction::Allocate(n) => write!(f, "\t{n}"),
            Instruction::Callp(p) | Instruction::Pushconst(p) | Instruction::Fpushconst(p) => {
                write!(f, "\t{p}")
            }
            Instruction::Pushfreevar(a)
            | Instruction::Pushboundvar(a)
            | Instruction::Fpushboundvar(a) => write!(f, "\t{a}"),
            Instruction::Unifyconst(c, rel) => write!(f, "\t{c}\t{rel}"),
            Instruction::Initfreevar(a, rel) | Instruction::Unifyboundvar(a, rel) => {
                write!(f, "\t{a}\t{rel}")
            }
            Instruction::Fpushstart(functor, arity) => write!(f, "\t{functor}\t{arity}"),
            Instruction::Ffindall(addr) => write!(f, "\t{addr}"),
            _ => Ok(()),
        }
    }
}
