//! Compiled programs: a flat instruction array plus predicate entry points.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use crate::error::{ProResult, ProgramError};

use super::instruction::Instruction;

/// A compiled rule program.
///
/// `labels` maps `functor/arity` to the entry address of every clause for
/// that predicate, in source order.
#[derive(Debug, Clone, Default)]
pub struct WamProgram {
    instructions: Vec<Instruction>,
    labels: HashMap<String, Vec<usize>>,
}

impl WamProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, addr: usize) -> Option<&Instruction> {
        self.instructions.get(addr)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Whether any clause is defined for `jump_to`.
    pub fn has_label(&self, jump_to: &str) -> bool {
        self.labels.contains_key(jump_to)
    }

    /// Clause entry addresses for `jump_to`, empty if undefined.
    pub fn addresses(&self, jump_to: &str) -> &[usize] {
        self.labels.get(jump_to).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append an instruction and return its address.
    pub fn push(&mut self, inst: Instruction) -> usize {
        self.instructions.push(inst);
        self.instructions.len() - 1
    }

    /// Register `addr` as the entry of one more clause of `jump_to`.
    pub fn insert_label(&mut self, jump_to: &str, addr: usize) {
        self.labels.entry(jump_to.to_string()).or_default().push(addr);
    }

    /// Replace the instruction at `addr` (used to back-patch forward jumps).
    pub fn patch(&mut self, addr: usize, inst: Instruction) {
        if let Some(slot) = self.instructions.get_mut(addr) {
            *slot = inst;
        }
    }

    /// Parse the `.wam` text format.
    pub fn parse(text: &str) -> ProResult<Self> {
        let mut program = Self::new();
        let mut pending_labels: Vec<String> = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }
            let trimmed = line.trim();
            if !trimmed.contains('\t') && trimmed.ends_with(':') && trimmed.len() > 1 {
                pending_labels.push(trimmed[..trimmed.len() - 1].to_string());
                continue;
            }
            let inst = Instruction::parse(line.trim_start_matches(' '), i + 1)?;
            let addr = program.push(inst);
            for label in pending_labels.drain(..) {
                program.insert_label(&label, addr);
            }
        }
        if let Some(label) = pending_labels.first() {
            return Err(ProgramError::MalformedInstruction {
                line: text.lines().count(),
                reason: format!("label {label}: has no instruction after it"),
            }
            .into());
        }
        Ok(program)
    }

    /// Load a `.wam` file.
    pub fn load(path: &Path) -> ProResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Render in the `.wam` text format.
    pub fn serialize(&self) -> String {
        let mut by_addr: HashMap<usize, Vec<&str>> = HashMap::new();
        for (label, addrs) in &self.labels {
            for &a in addrs {
                by_addr.entry(a).or_default().push(label);
            }
        }
        let mut out = String::new();
        for (addr, inst) in self.instructions.iter().enumerate() {
            if let Some(labels) = by_addr.get_mut(&addr) {
                labels.sort_unstable();
                for label in labels.iter() {
                    out.push_str(label);
                    out.push_str(":\n");
                }
            }
            out.push_str(&inst.to_string());
            out.push('\n');
        }
        out
    }

    /// Write a `.wam` file.
    pub fn save(&self, path: &Path) -> ProResult<()> {
        let io_err = |source| ProgramError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        file.write_all(self.serialize().as_bytes()).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "t/1:\n\
                       comment\tt(d).\n\
                       allocate\t0\n\
                       unifyconst\td\t-1\n\
                       fclear\n\
                       fpushstart\tid\t0\n\
                       freport\n\
                       returnp\n";

    #[test]
    fn parses_labels_and_instructions() {
        let p = WamProgram::parse(SRC).unwrap();
        assert_eq!(p.len(), 7);
        assert_eq!(p.addresses("t/1"), &[0]);
        assert!(p.has_label("t/1"));
        assert!(p.addresses("nope/2").is_empty());
        assert_eq!(p.get(2), Some(&Instruction::Unifyconst("d".into(), -1)));
    }

    #[test]
    fn serialize_round_trips() {
        let p = WamProgram::parse(SRC).unwrap();
        let again = WamProgram::parse(&p.serialize()).unwrap();
        assert_eq!(again.instructions(), p.instructions());
        assert_eq!(again.addresses("t/1"), p.addresses("t/1"));
    }

    #[test]
    fn dangling_label_is_an_error() {
        assert!(WamProgram::parse("returnp\np/1:\n").is_err());
    }
}
