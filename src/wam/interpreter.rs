//! Straight-line bytecode execution.
//!
//! The interpreter never branches on its own. It runs from an address until
//! the next call site, a failed unification, or completion, and leaves
//! clause choice to its caller ([`WamInterpreter::outlinks`], or the proof
//! graph on top of it). Trying several clauses from one configuration is a
//! matter of `restore_state` before each attempt.
//!
//! Query code lives in a private overlay addressed past the end of the shared
//! program, so a program behind an `Arc` is never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{InterpreterError, ProResult};
use crate::logic::{Query, Term};
use crate::plugins::WamPlugin;

use super::compiler::compile_query;
use super::instruction::Instruction;
use super::program::WamProgram;
use super::state::{CallStackFrame, Cell, MutableState, State};
use super::{FeatureMap, Outlink};

/// Default recursion bound for `ffindall` enumeration.
const DEFAULT_FINDALL_DEPTH: usize = 20;

/// Feature under construction between `fpushstart` and `freport`.
#[derive(Debug, Clone)]
struct FeatureBuilder {
    functor: Arc<str>,
    args: Vec<Arc<str>>,
    weight: f64,
}

impl FeatureBuilder {
    fn name(&self) -> String {
        if self.args.is_empty() {
            return self.functor.to_string();
        }
        let mut name = String::with_capacity(self.functor.len() + 2 + self.args.len() * 4);
        name.push_str(&self.functor);
        name.push('(');
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                name.push(',');
            }
            name.push_str(a);
        }
        name.push(')');
        name
    }
}

/// One successor found while expanding a call site.
struct Branch {
    child: State,
    /// Features labelling the edge.
    edge: FeatureMap,
    /// Features the machine itself reported on the way to `child`.
    reported: FeatureMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyToken {
    Completed,
    Failed,
    Bound(Arc<str>),
    Free(u32),
    Unset,
    Goal(Arc<str>),
    Opaque(usize),
}

/// Node identity of a state: answer bindings plus the pending goal list,
/// with variables renamed in first-occurrence order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey(Vec<KeyToken>);

/// Executes one program plus one query overlay.
pub struct WamInterpreter {
    program: Arc<WamProgram>,
    query_code: Arc<[Instruction]>,
    query_registers: usize,
    plugins: Vec<Arc<dyn WamPlugin>>,
    state: MutableState,
    features: FeatureMap,
    building: Vec<FeatureBuilder>,
    findall_depth: usize,
}

impl std::fmt::Debug for WamInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WamInterpreter")
            .field("program_len", &self.program.len())
            .field("query_len", &self.query_code.len())
            .field("plugins", &self.plugins.len())
            .field("pc", &self.state.pc)
            .finish()
    }
}

impl WamInterpreter {
    pub fn new(program: Arc<WamProgram>, plugins: Vec<Arc<dyn WamPlugin>>) -> Self {
        Self {
            program,
            query_code: Arc::from(Vec::new()),
            query_registers: 0,
            plugins,
            state: MutableState::new(),
            features: FeatureMap::new(),
            building: Vec::new(),
            findall_depth: DEFAULT_FINDALL_DEPTH,
        }
    }

    /// Bound the proof depth explored by `ffindall`.
    pub fn with_findall_depth(mut self, depth: usize) -> Self {
        self.findall_depth = depth;
        self
    }

    pub fn program(&self) -> &WamProgram {
        &self.program
    }

    pub fn plugins(&self) -> &[Arc<dyn WamPlugin>] {
        &self.plugins
    }

    /// The live machine state.
    pub fn state(&self) -> &MutableState {
        &self.state
    }

    /// Features reported since the last `fclear` or reset.
    pub fn reported_features(&self) -> &FeatureMap {
        &self.features
    }

    /// Install `query` as the overlay and run it up to its first call site.
    ///
    /// Returns the start state of the proof.
    pub fn start_query(&mut self, query: &Query) -> ProResult<State> {
        self.query_code = Arc::from(compile_query(query));
        self.query_registers = query.variables().len();
        self.state = MutableState::new();
        let base = self.program.len();
        self.execute_without_branching_from(base)?;
        Ok(self.save_state())
    }

    /// Number of query variables; they occupy absolute registers `0..n`.
    pub fn query_registers(&self) -> usize {
        self.query_registers
    }

    pub fn save_state(&self) -> State {
        self.state.freeze()
    }

    pub fn restore_state(&mut self, state: &State) {
        self.state = state.thaw();
        self.features.clear();
        self.building.clear();
    }

    /// Jump to `addr` with a fresh feature map and run to the next stop.
    pub fn execute_without_branching_from(&mut self, addr: usize) -> ProResult<FeatureMap> {
        self.state.pc = addr;
        self.state.jump_to = None;
        self.features.clear();
        self.building.clear();
        self.run()?;
        Ok(self.features.clone())
    }

    /// Continue from the current pc, keeping the features reported so far.
    pub fn execute_without_branching(&mut self) -> ProResult<FeatureMap> {
        self.run()?;
        Ok(self.features.clone())
    }

    fn fetch<'a>(program: &'a WamProgram, overlay: &'a [Instruction], pc: usize) -> ProResult<&'a Instruction> {
        let base = program.len();
        let inst = if pc < base {
            program.get(pc)
        } else {
            overlay.get(pc - base)
        };
        inst.ok_or_else(|| {
            InterpreterError::BadAddress {
                pc,
                size: base + overlay.len(),
            }
            .into()
        })
    }

    fn run(&mut self) -> ProResult<()> {
        let program = Arc::clone(&self.program);
        let overlay = Arc::clone(&self.query_code);
        while !self.state.completed && !self.state.failed && self.state.jump_to.is_none() {
            let inst = Self::fetch(&program, &overlay, self.state.pc)?;
            self.step(inst)?;
        }
        Ok(())
    }

    fn bound_register(&self, a: i64) -> ProResult<usize> {
        self.state.register(a)?.ok_or_else(|| {
            InterpreterError::BadRegister {
                register: a,
                window: self.state.register_size(),
            }
            .into()
        })
    }

    fn building(&mut self, opcode: &str) -> ProResult<&mut FeatureBuilder> {
        self.building.last_mut().ok_or_else(|| {
            InterpreterError::NoFeatureInProgress {
                opcode: opcode.to_string(),
            }
            .into()
        })
    }

    /// Bind the cell at `idx` to `value`; false on a clash.
    fn unify_constant(&mut self, idx: usize, value: &Arc<str>) -> bool {
        let d = self.state.dereference(idx);
        if let Cell::Const(c) = &self.state.heap[d] {
            return c == value;
        }
        self.state.heap[d] = Cell::Const(Arc::clone(value));
        true
    }

    fn step(&mut self, inst: &Instruction) -> ProResult<()> {
        match inst {
            Instruction::Comment(_) => {}
            Instruction::Allocate(n) => {
                let size = self.state.registers.len() + n;
                self.state.registers.resize(size, None);
            }
            Instruction::Callp(pred) => {
                let frame = CallStackFrame {
                    heap_pointer: self.state.heap.len(),
                    register_pointer: self.state.registers.len(),
                    program_counter: self.state.pc + 1,
                };
                self.state.calls.push(frame);
                self.state.jump_to = Some(Arc::clone(pred));
                return Ok(());
            }
            Instruction::Returnp => {
                match self.state.calls.pop() {
                    None => self.state.completed = true,
                    Some(frame) => {
                        self.state.registers.truncate(frame.register_pointer);
                        self.state.pc = frame.program_counter;
                    }
                }
                return Ok(());
            }
            Instruction::Pushconst(c) => {
                self.state.append_heap(Cell::Const(Arc::clone(c)));
            }
            Instruction::Pushfreevar(a) => {
                let idx = self.state.append_free_var();
                self.state.set_register(*a, idx)?;
            }
            Instruction::Pushboundvar(a) => {
                let d = self.state.dereference(self.bound_register(*a)?);
                let cell = match &self.state.heap[d] {
                    Cell::Const(c) => Cell::Const(Arc::clone(c)),
                    Cell::Var(_) => Cell::Var(d),
                };
                self.state.append_heap(cell);
            }
            Instruction::Unifyconst(c, rel) => {
                let idx = self.state.heap_index(*rel)?;
                if !self.unify_constant(idx, c) {
                    self.state.failed = true;
                    return Ok(());
                }
            }
            Instruction::Initfreevar(a, rel) => {
                let idx = self.state.heap_index(*rel)?;
                self.state.set_register(*a, idx)?;
            }
            Instruction::Unifyboundvar(a, rel) => {
                let r = self.state.dereference(self.bound_register(*a)?);
                let h = self.state.dereference(self.state.heap_index(*rel)?);
                match (self.state.heap[r].clone(), self.state.heap[h].clone()) {
                    (Cell::Const(x), Cell::Const(y)) => {
                        if x != y {
                            self.state.failed = true;
                            return Ok(());
                        }
                    }
                    (Cell::Const(x), Cell::Var(_)) => self.state.heap[h] = Cell::Const(x),
                    (Cell::Var(_), Cell::Const(y)) => self.state.heap[r] = Cell::Const(y),
                    (Cell::Var(_), Cell::Var(_)) => {
                        if r != h {
                            let (lo, hi) = (r.min(h), r.max(h));
                            self.state.heap[hi] = Cell::Var(lo);
                        }
                    }
                }
            }
            Instruction::Fclear => self.features.clear(),
            Instruction::Fpushstart(functor, arity) => self.building.push(FeatureBuilder {
                functor: Arc::clone(functor),
                args: Vec::with_capacity(*arity),
                weight: 1.0,
            }),
            Instruction::Fpushconst(c) => {
                let c = Arc::clone(c);
                self.building("fpushconst")?.args.push(c);
            }
            Instruction::Fpushboundvar(a) => {
                let idx = self.bound_register(*a)?;
                let value = self
                    .state
                    .constant_at(idx)
                    .cloned()
                    .ok_or(InterpreterError::UnboundFeatureVariable { register: *a })?;
                self.building("fpushboundvar")?.args.push(value);
            }
            Instruction::Fpushweight => {
                let size = self.state.heap.len();
                if size < 2 {
                    return Err(InterpreterError::BadHeapRef { relative: -2, size }.into());
                }
                let text = self
                    .state
                    .constant_at(size - 2)
                    .ok_or_else(|| InterpreterError::BadWeight {
                        value: "<unbound>".into(),
                    })?;
                let weight = text
                    .parse::<f64>()
                    .map_err(|_| InterpreterError::BadWeight { value: text.to_string() })?;
                self.building("fpushweight")?.weight = weight;
            }
            Instruction::Freport => {
                let done = self.building.pop().ok_or_else(|| InterpreterError::NoFeatureInProgress {
                    opcode: "freport".into(),
                })?;
                self.features.insert(done.name(), done.weight);
            }
            Instruction::Ffindall(addr) => self.findall(*addr)?,
        }
        self.state.pc += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Branching helpers
    // -----------------------------------------------------------------------

    /// Arguments of the call the current state is parked at, top `arity`
    /// heap cells, dereferenced.
    pub fn call_args(&self) -> Vec<Option<Arc<str>>> {
        let arity = self.state.jump_to.as_deref().map(arity_of).unwrap_or(0);
        let size = self.state.heap.len();
        if arity > size {
            return Vec::new();
        }
        (size - arity..size)
            .map(|i| self.state.constant_at(i).cloned())
            .collect()
    }

    /// Resolve the pending call with a fact: unify the call arguments with
    /// `values`, return to the caller and keep executing.
    ///
    /// Returns whether execution is still alive.
    pub fn bind_call_and_return(&mut self, values: &[Arc<str>]) -> ProResult<bool> {
        let size = self.state.heap.len();
        if values.len() > size {
            return Err(InterpreterError::BadHeapRef {
                relative: -(values.len() as i64),
                size,
            }
            .into());
        }
        let first = size - values.len();
        for (i, v) in values.iter().enumerate() {
            if !self.unify_constant(first + i, v) {
                self.state.failed = true;
                return Ok(false);
            }
        }
        self.state.jump_to = None;
        self.step(&Instruction::Returnp)?;
        self.run()?;
        Ok(!self.state.failed)
    }

    fn expand(&mut self, state: &State) -> ProResult<Vec<Branch>> {
        let mut out = Vec::new();
        if state.is_completed() || state.is_failed() {
            return Ok(out);
        }
        let Some(jump_to) = state.jump_to().map(str::to_string) else {
            return Ok(out);
        };

        let program = Arc::clone(&self.program);
        for &addr in program.addresses(&jump_to) {
            self.restore_state(state);
            let features = self.execute_without_branching_from(addr)?;
            if !self.state.failed && !features.is_empty() {
                out.push(Branch {
                    child: self.save_state(),
                    reported: features.clone(),
                    edge: features,
                });
            }
        }

        let plugins = self.plugins.clone();
        for plugin in plugins.iter().filter(|p| p.claim(&jump_to)) {
            self.restore_state(state);
            let args = self.call_args();
            for fact in plugin.lookup(&jump_to, &args) {
                self.restore_state(state);
                if self.bind_call_and_return(&fact.values)? {
                    out.push(Branch {
                        child: self.save_state(),
                        edge: fact.features,
                        reported: self.features.clone(),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Successors of a call-site state: program clauses first, in source
    /// order, then plugin facts. Completed or failed states have none.
    pub fn outlinks(&mut self, state: &State) -> ProResult<Vec<Outlink>> {
        Ok(self
            .expand(state)?
            .into_iter()
            .map(|b| Outlink::new(b.child, b.edge))
            .collect())
    }

    fn findall(&mut self, addr: usize) -> ProResult<()> {
        let saved_state = self.state.clone();
        let saved_features = std::mem::take(&mut self.features);
        let saved_building = std::mem::take(&mut self.building);

        let found = self.collect_findall(addr);

        self.state = saved_state;
        self.features = saved_features;
        self.building = saved_building;
        for (name, w) in found? {
            *self.features.entry(name).or_insert(0.0) += w;
        }
        Ok(())
    }

    fn collect_findall(&mut self, addr: usize) -> ProResult<FeatureMap> {
        self.state.calls.clear();
        let mut found = FeatureMap::new();
        let reported = self.execute_without_branching_from(addr)?;
        if self.state.completed {
            merge(&mut found, reported);
        } else if !self.state.failed {
            let start = self.save_state();
            self.findall_search(&start, 0, &mut found)?;
        }
        Ok(found)
    }

    fn findall_search(&mut self, state: &State, depth: usize, found: &mut FeatureMap) -> ProResult<()> {
        if depth >= self.findall_depth {
            return Ok(());
        }
        for branch in self.expand(state)? {
            if branch.child.is_completed() {
                merge(found, branch.reported);
            } else {
                self.findall_search(&branch.child, depth + 1, found)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Node identity and answers
    // -----------------------------------------------------------------------

    /// Canonical form of `state`.
    ///
    /// Two states share a key when they carry the same answer bindings and
    /// the same pending goals up to variable renaming.
    pub fn canonical_key(&self, state: &State) -> CanonicalKey {
        let mut tokens = Vec::new();
        let mut names: HashMap<usize, u32> = HashMap::new();
        let mut next = 0u32;
        let cell_token = |idx: usize, names: &mut HashMap<usize, u32>, next: &mut u32| {
            let d = state.dereference(idx);
            match state.heap().get(d) {
                Some(Cell::Const(c)) => KeyToken::Bound(Arc::clone(c)),
                _ => KeyToken::Free(*names.entry(d).or_insert_with(|| {
                    *next += 1;
                    *next - 1
                })),
            }
        };

        if state.is_completed() {
            tokens.push(KeyToken::Completed);
        }
        if state.is_failed() {
            tokens.push(KeyToken::Failed);
        }
        for r in 0..self.query_registers {
            match state.registers().get(r).copied().flatten() {
                Some(idx) => tokens.push(cell_token(idx, &mut names, &mut next)),
                None => tokens.push(KeyToken::Unset),
            }
        }

        if let Some(jump_to) = state.jump_to() {
            tokens.push(KeyToken::Goal(Arc::from(jump_to)));
            let arity = arity_of(jump_to);
            let size = state.heap_size();
            for i in size.saturating_sub(arity)..size {
                tokens.push(cell_token(i, &mut names, &mut next));
            }
        }

        for frame in state.calls().iter().rev() {
            let mut fresh: HashMap<i64, u32> = HashMap::new();
            let mut pc = frame.program_counter;
            loop {
                let Ok(inst) = Self::fetch(&self.program, &self.query_code, pc) else {
                    tokens.push(KeyToken::Opaque(pc));
                    break;
                };
                match inst {
                    Instruction::Comment(_) => {}
                    Instruction::Returnp => break,
                    Instruction::Pushconst(c) => tokens.push(KeyToken::Bound(Arc::clone(c))),
                    Instruction::Pushfreevar(a) => {
                        let id = next;
                        next += 1;
                        fresh.insert(*a, id);
                        tokens.push(KeyToken::Free(id));
                    }
                    Instruction::Pushboundvar(a) => {
                        if let Some(id) = fresh.get(a) {
                            tokens.push(KeyToken::Free(*id));
                        } else {
                            let slot = frame.register_pointer as i64 + a;
                            let held = usize::try_from(slot)
                                .ok()
                                .and_then(|s| state.registers().get(s).copied().flatten());
                            match held {
                                Some(idx) => tokens.push(cell_token(idx, &mut names, &mut next)),
                                None => tokens.push(KeyToken::Unset),
                            }
                        }
                    }
                    Instruction::Callp(p) => tokens.push(KeyToken::Goal(Arc::clone(p))),
                    _ => {
                        tokens.push(KeyToken::Opaque(pc));
                        break;
                    }
                }
                pc += 1;
            }
        }
        CanonicalKey(tokens)
    }

    /// Values of the query variables in `state`, in first-occurrence order.
    pub fn answer_bindings(&self, state: &State) -> Vec<Option<Term>> {
        (0..self.query_registers)
            .map(|r| {
                let idx = state.registers().get(r).copied().flatten()?;
                match state.heap().get(state.dereference(idx)) {
                    Some(Cell::Const(c)) => Some(Term::Constant(Arc::clone(c))),
                    _ => None,
                }
            })
            .collect()
    }

    /// `query` with its variables replaced by the bindings found in `state`.
    pub fn fill(&self, query: &Query, state: &State) -> Query {
        query.substitute(&self.answer_bindings(state))
    }
}

fn merge(into: &mut FeatureMap, from: FeatureMap) {
    for (name, w) in from {
        *into.entry(name).or_insert(0.0) += w;
    }
}

/// Arity encoded in a `functor/arity` label.
pub fn arity_of(jump_to: &str) -> usize {
    jump_to
        .rsplit_once('/')
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::parse_rules;
    use crate::wam::compile_rules;

    fn interp(src: &str) -> WamInterpreter {
        let program = compile_rules(&parse_rules(src).unwrap()).unwrap();
        WamInterpreter::new(Arc::new(program), Vec::new())
    }

    fn solutions(interp: &mut WamInterpreter, query: &str, depth: usize) -> Vec<String> {
        let q: Query = query.parse().unwrap();
        let start = interp.start_query(&q).unwrap();
        let mut out = Vec::new();
        let mut stack = vec![(start, 0)];
        while let Some((s, d)) = stack.pop() {
            if s.is_completed() {
                out.push(interp.fill(&q, &s).to_string());
                continue;
            }
            if d >= depth {
                continue;
            }
            for o in interp.outlinks(&s).unwrap() {
                stack.push((o.child, d + 1));
            }
        }
        out.sort();
        out
    }

    #[test]
    fn arity_from_label() {
        assert_eq!(arity_of("p/2"), 2);
        assert_eq!(arity_of("halt/0"), 0);
        assert_eq!(arity_of("a/b/3"), 3);
    }

    #[test]
    fn start_query_parks_at_first_call() {
        let mut i = interp("p(a,b).");
        let start = i.start_query(&"p(a,Y)".parse().unwrap()).unwrap();
        assert_eq!(start.jump_to(), Some("p/2"));
        assert!(!start.is_completed());
    }

    #[test]
    fn head_unification_selects_clauses() {
        let mut i = interp("p(a,b).\np(c,d).\np(a,e).");
        assert_eq!(solutions(&mut i, "p(a,Y)", 5), ["p(a,b)", "p(a,e)"]);
    }

    #[test]
    fn chains_through_bodies() {
        let src = "gp(X,Z) :- par(X,Y), par(Y,Z).\npar(ann,bob).\npar(bob,cy).\npar(bob,di).";
        let mut i = interp(src);
        assert_eq!(solutions(&mut i, "gp(ann,Z)", 5), ["gp(ann,cy)", "gp(ann,di)"]);
    }

    #[test]
    fn clause_features_label_edges() {
        let mut i = interp("p(X) :- q(X) {via(X), bias @ 0.5}.\nq(a).");
        let start = i.start_query(&"p(a)".parse().unwrap()).unwrap();
        let links = i.outlinks(&start).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].features.get("via(a)"), Some(&1.0));
        assert_eq!(links[0].features.get("bias"), Some(&0.5));
        let next = i.outlinks(&links[0].child).unwrap();
        assert_eq!(next[0].features.get("id(q,1,1)"), Some(&1.0));
        assert!(next[0].child.is_completed());
    }

    #[test]
    fn unbound_feature_argument_is_an_error() {
        let mut i = interp("p(X) {f(X)}.");
        let start = i.start_query(&"p(Y)".parse().unwrap()).unwrap();
        assert!(i.outlinks(&start).is_err());
    }

    #[test]
    fn findall_collects_one_feature_per_solution() {
        let src = "w(X) :- s(X) {word(W) : has(X,W)}.\n\
                   s(d1).\n\
                   has(d1,red).\n\
                   has(d1,blue).\n\
                   has(d2,green).";
        let mut i = interp(src);
        let start = i.start_query(&"w(d1)".parse().unwrap()).unwrap();
        let links = i.outlinks(&start).unwrap();
        assert_eq!(links.len(), 1);
        let names: Vec<&str> = links[0].features.keys().map(String::as_str).collect();
        assert_eq!(names, ["word(blue)", "word(red)"]);
    }

    #[test]
    fn canonical_key_ignores_variable_numbering() {
        let src = "p(X,Y) :- q(X,Y).\nq(X,Y) :- r(X,Y).\nr(a,b).";
        let mut i = interp(src);
        let start = i.start_query(&"p(a,Y)".parse().unwrap()).unwrap();
        let q_node = i.outlinks(&start).unwrap().remove(0).child;
        let r_node = i.outlinks(&q_node).unwrap().remove(0).child;
        assert_ne!(i.canonical_key(&start), i.canonical_key(&q_node));
        assert_ne!(i.canonical_key(&q_node), i.canonical_key(&r_node));
        assert_eq!(i.canonical_key(&start), i.canonical_key(&start.clone()));
    }

    #[test]
    fn tail_calls_collapse_to_the_same_key() {
        let mut i = interp("p(X,Y) :- q(X,Y).\nq(X,Y) :- p(X,Y).");
        let start = i.start_query(&"p(a,Y)".parse().unwrap()).unwrap();
        let q_node = i.outlinks(&start).unwrap().remove(0).child;
        let again = i.outlinks(&q_node).unwrap().remove(0).child;
        assert_ne!(start, again);
        assert_eq!(i.canonical_key(&start), i.canonical_key(&again));
    }
}
