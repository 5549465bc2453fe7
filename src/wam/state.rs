//! Interpreter configurations.
//!
//! A [`MutableState`] is owned by one interpreter while it executes; its heap
//! and registers are flat vectors addressed by index, so saving a state is a
//! plain copy. An [`ImmutableState`] is an exactly-sized, shareable snapshot
//! that serves as a proof-graph node. Its equality and hash cover the whole
//! configuration (heap, registers, call stack, pc, jump target, flags); the
//! hash is computed once when the snapshot is taken.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::error::{InterpreterError, ProResult};

/// One heap cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cell {
    /// A bound constant.
    Const(Arc<str>),
    /// A reference to another heap cell; a cell pointing at itself is unbound.
    Var(usize),
}

/// Saved caller context, pushed by `callp` and popped by `returnp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallStackFrame {
    /// Heap size when the call was made.
    pub heap_pointer: usize,
    /// Top of the caller's register window.
    pub register_pointer: usize,
    /// Address to resume at.
    pub program_counter: usize,
}

/// The configuration an interpreter is executing.
#[derive(Debug, Clone, Default)]
pub struct MutableState {
    pub heap: Vec<Cell>,
    /// Heap indices; `None` until the register is first assigned.
    pub registers: Vec<Option<usize>>,
    pub calls: Vec<CallStackFrame>,
    pub pc: usize,
    /// Set while parked at a call site, awaiting clause resolution.
    pub jump_to: Option<Arc<str>>,
    pub completed: bool,
    pub failed: bool,
}

impl MutableState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heap_size(&self) -> usize {
        self.heap.len()
    }

    pub fn register_size(&self) -> usize {
        self.registers.len()
    }

    /// Follow variable references until reaching a constant or an unbound cell.
    pub fn dereference(&self, mut idx: usize) -> usize {
        while let Some(Cell::Var(next)) = self.heap.get(idx) {
            if *next == idx {
                break;
            }
            idx = *next;
        }
        idx
    }

    /// Absolute heap index of a heap offset relative to the current top.
    pub fn heap_index(&self, relative: i64) -> ProResult<usize> {
        let size = self.heap.len();
        let idx = size as i64 + relative;
        if relative >= 0 || idx < 0 {
            return Err(InterpreterError::BadHeapRef { relative, size }.into());
        }
        Ok(idx as usize)
    }

    fn register_slot(&self, a: i64) -> ProResult<usize> {
        let window = self.registers.len();
        let idx = window as i64 + a;
        if a >= 0 || idx < 0 {
            return Err(InterpreterError::BadRegister {
                register: a,
                window,
            }
            .into());
        }
        Ok(idx as usize)
    }

    /// Heap index held by register `a` (relative to the register top).
    pub fn register(&self, a: i64) -> ProResult<Option<usize>> {
        let slot = self.register_slot(a)?;
        Ok(self.registers[slot])
    }

    pub fn set_register(&mut self, a: i64, heap_idx: usize) -> ProResult<()> {
        let slot = self.register_slot(a)?;
        self.registers[slot] = Some(heap_idx);
        Ok(())
    }

    /// Append a cell and return its index.
    pub fn append_heap(&mut self, cell: Cell) -> usize {
        self.heap.push(cell);
        self.heap.len() - 1
    }

    /// Append an unbound variable cell and return its index.
    pub fn append_free_var(&mut self) -> usize {
        let idx = self.heap.len();
        self.heap.push(Cell::Var(idx));
        idx
    }

    /// The constant at `idx` after dereferencing, if bound.
    pub fn constant_at(&self, idx: usize) -> Option<&Arc<str>> {
        match self.heap.get(self.dereference(idx)) {
            Some(Cell::Const(c)) => Some(c),
            _ => None,
        }
    }

    /// Take an exactly-sized snapshot.
    pub fn freeze(&self) -> ImmutableState {
        ImmutableState::from_parts(
            self.heap.clone().into_boxed_slice(),
            self.registers.clone().into_boxed_slice(),
            self.calls.clone().into_boxed_slice(),
            self.pc,
            self.jump_to.clone(),
            self.completed,
            self.failed,
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Frozen {
    heap: Box<[Cell]>,
    registers: Box<[Option<usize>]>,
    calls: Box<[CallStackFrame]>,
    pc: usize,
    jump_to: Option<Arc<str>>,
    completed: bool,
    failed: bool,
}

/// A shareable snapshot of an interpreter configuration.
///
/// Cloning is an `Arc` bump.
#[derive(Debug, Clone)]
pub struct ImmutableState {
    inner: Arc<Frozen>,
    hash: u64,
}

impl ImmutableState {
    fn from_parts(
        heap: Box<[Cell]>,
        registers: Box<[Option<usize>]>,
        calls: Box<[CallStackFrame]>,
        pc: usize,
        jump_to: Option<Arc<str>>,
        completed: bool,
        failed: bool,
    ) -> Self {
        let frozen = Frozen {
            heap,
            registers,
            calls,
            pc,
            jump_to,
            completed,
            failed,
        };
        let mut h = DefaultHasher::new();
        frozen.heap.hash(&mut h);
        frozen.registers.hash(&mut h);
        frozen.calls.hash(&mut h);
        frozen.pc.hash(&mut h);
        frozen.jump_to.hash(&mut h);
        frozen.completed.hash(&mut h);
        frozen.failed.hash(&mut h);
        Self {
            hash: h.finish(),
            inner: Arc::new(frozen),
        }
    }

    /// A mutable copy to resume execution from.
    pub fn thaw(&self) -> MutableState {
        MutableState {
            heap: self.inner.heap.to_vec(),
            registers: self.inner.registers.to_vec(),
            calls: self.inner.calls.to_vec(),
            pc: self.inner.pc,
            jump_to: self.inner.jump_to.clone(),
            completed: self.inner.completed,
            failed: self.inner.failed,
        }
    }

    pub fn heap(&self) -> &[Cell] {
        &self.inner.heap
    }

    pub fn registers(&self) -> &[Option<usize>] {
        &self.inner.registers
    }

    pub fn calls(&self) -> &[CallStackFrame] {
        &self.inner.calls
    }

    pub fn pc(&self) -> usize {
        self.inner.pc
    }

    pub fn jump_to(&self) -> Option<&str> {
        self.inner.jump_to.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed
    }

    pub fn heap_size(&self) -> usize {
        self.inner.heap.len()
    }

    /// Follow variable references until reaching a constant or an unbound cell.
    pub fn dereference(&self, mut idx: usize) -> usize {
        while let Some(Cell::Var(next)) = self.inner.heap.get(idx) {
            if *next == idx {
                break;
            }
            idx = *next;
        }
        idx
    }
}

impl PartialEq for ImmutableState {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && (Arc::ptr_eq(&self.inner, &other.inner) || self.inner == other.inner)
    }
}

impl Eq for ImmutableState {}

impl Hash for ImmutableState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl std::fmt::Display for ImmutableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "state(pc={}, jump={}, heap={}, regs={}, calls={}",
            self.pc(),
            self.jump_to().unwrap_or("-"),
            self.heap_size(),
            self.registers().len(),
            self.calls().len()
        )?;
        if self.is_completed() {
            write!(f, ", completed")?;
        }
        if self.is_failed() {
            write!(f, ", failed")?;
        }
        write!(f, ")")
    }
}

/// Proof-graph node.
pub type State = ImmutableState;
