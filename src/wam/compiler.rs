//! Rule compiler: clauses to bytecode.
//!
//! Clause layout:
//!
//! ```text
//! comment   <clause>            <- entry label functor/arity
//! allocate  n
//! unifyconst / initfreevar / unifyboundvar   (one per head argument)
//! fclear
//! fpushstart ... freport        (one block per plain feature)
//! ffindall  addr                (one per findall feature)
//! pushconst / pushfreevar / pushboundvar ... callp   (one block per body goal)
//! returnp
//! <findall subroutines>         (goals, fclear, feature, freport, returnp)
//! ```
//!
//! Registers are numbered by first occurrence: the `k`-th distinct variable of a
//! clause with `n` variables lives in register `k - n`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{ProResult, ProgramError};
use crate::logic::{FeatureSpec, FeatureWeight, Goal, Query, Rule, Term, Variable};

use super::instruction::Instruction;
use super::program::WamProgram;

/// Register assignment for one clause or query.
struct Registers {
    order: Vec<Variable>,
}

impl Registers {
    fn collect<'a>(goals: impl IntoIterator<Item = &'a Goal>, extra: impl IntoIterator<Item = &'a Variable>) -> Self {
        let mut order: Vec<Variable> = Vec::new();
        for goal in goals {
            for arg in &goal.args {
                if let Term::Variable(v) = arg {
                    if !order.contains(v) {
                        order.push(v.clone());
                    }
                }
            }
        }
        for v in extra {
            if !order.contains(v) {
                order.push(v.clone());
            }
        }
        Self { order }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn of(&self, v: &Variable) -> i64 {
        let k = self.order.iter().position(|o| o == v).unwrap_or(0);
        k as i64 - self.order.len() as i64
    }
}

/// Compiles clauses into a [`WamProgram`], numbering clauses per predicate.
#[derive(Debug, Default)]
pub struct Compiler {
    clause_counts: HashMap<String, usize>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one clause to `program`.
    pub fn compile_rule(&mut self, program: &mut WamProgram, rule: &Rule) -> ProResult<()> {
        let jump_to = rule.lhs.jump_to();
        let number = {
            let n = self.clause_counts.entry(jump_to.clone()).or_insert(0);
            *n += 1;
            *n
        };

        let weight_vars = rule.features.iter().filter_map(|f| match &f.weight {
            FeatureWeight::Bound(v) => Some(v),
            _ => None,
        });
        let goals = std::iter::once(&rule.lhs)
            .chain(rule.features.iter().map(|f| &f.goal))
            .chain(rule.features.iter().flat_map(|f| f.findall.iter()))
            .chain(rule.rhs.iter());
        let regs = Registers::collect(goals, weight_vars);

        let entry = program.push(Instruction::Comment(rule.to_string()));
        program.insert_label(&jump_to, entry);
        program.push(Instruction::Allocate(regs.len()));

        let mut seen: HashSet<Variable> = HashSet::new();
        let arity = rule.lhs.arity() as i64;
        for (i, arg) in rule.lhs.args.iter().enumerate() {
            let rel = i as i64 - arity;
            let inst = match arg {
                Term::Constant(c) => Instruction::Unifyconst(Arc::clone(c), rel),
                Term::Variable(v) if seen.insert(v.clone()) => Instruction::Initfreevar(regs.of(v), rel),
                Term::Variable(v) => Instruction::Unifyboundvar(regs.of(v), rel),
            };
            program.push(inst);
        }

        program.push(Instruction::Fclear);
        if rule.features.is_empty() {
            program.push(Instruction::Fpushstart(Arc::from("id"), 3));
            program.push(Instruction::Fpushconst(Arc::clone(&rule.lhs.functor)));
            program.push(Instruction::Fpushconst(Arc::from(rule.lhs.arity().to_string())));
            program.push(Instruction::Fpushconst(Arc::from(number.to_string())));
            program.push(Instruction::Freport);
        }

        let mut findalls = Vec::new();
        for spec in &rule.features {
            if spec.findall.is_empty() {
                emit_feature(program, rule, spec, &regs, &seen)?;
            } else {
                let at = program.push(Instruction::Ffindall(0));
                findalls.push((at, spec));
            }
        }

        let mut body_seen = seen.clone();
        emit_goals(program, &rule.rhs, &regs, &mut body_seen);
        program.push(Instruction::Returnp);

        for (at, spec) in findalls {
            let start = program.len();
            let mut local = seen.clone();
            emit_goals(program, &spec.findall, &regs, &mut local);
            program.push(Instruction::Fclear);
            emit_feature(program, rule, spec, &regs, &local)?;
            program.push(Instruction::Returnp);
            program.patch(at, Instruction::Ffindall(start));
        }
        Ok(())
    }
}

fn emit_goals(program: &mut WamProgram, goals: &[Goal], regs: &Registers, seen: &mut HashSet<Variable>) {
    for goal in goals {
        for arg in &goal.args {
            let inst = match arg {
                Term::Constant(c) => Instruction::Pushconst(Arc::clone(c)),
                Term::Variable(v) if seen.insert(v.clone()) => Instruction::Pushfreevar(regs.of(v)),
                Term::Variable(v) => Instruction::Pushboundvar(regs.of(v)),
            };
            program.push(inst);
        }
        program.push(Instruction::Callp(Arc::from(goal.jump_to())));
    }
}

fn emit_feature(
    program: &mut WamProgram,
    rule: &Rule,
    spec: &FeatureSpec,
    regs: &Registers,
    bound: &HashSet<Variable>,
) -> ProResult<()> {
    let unbound = |v: &Variable| ProgramError::Compile {
        clause: rule.to_string(),
        reason: format!("feature variable {} is not bound when the feature is computed", v.name()),
    };
    program.push(Instruction::Fpushstart(Arc::clone(&spec.goal.functor), spec.goal.arity()));
    for arg in &spec.goal.args {
        match arg {
            Term::Constant(c) => program.push(Instruction::Fpushconst(Arc::clone(c))),
            Term::Variable(v) if bound.contains(v) => program.push(Instruction::Fpushboundvar(regs.of(v))),
            Term::Variable(v) => return Err(unbound(v).into()),
        };
    }
    match &spec.weight {
        FeatureWeight::Unit => {}
        FeatureWeight::Fixed(w) => {
            program.push(Instruction::Pushconst(Arc::from(w.to_string())));
            program.push(Instruction::Pushconst(Arc::clone(&spec.goal.functor)));
            program.push(Instruction::Fpushweight);
        }
        FeatureWeight::Bound(v) if bound.contains(v) => {
            program.push(Instruction::Pushboundvar(regs.of(v)));
            program.push(Instruction::Pushconst(Arc::clone(&spec.goal.functor)));
            program.push(Instruction::Fpushweight);
        }
        FeatureWeight::Bound(v) => return Err(unbound(v).into()),
    }
    program.push(Instruction::Freport);
    Ok(())
}

/// Compile a rule file into a fresh program.
pub fn compile_rules(rules: &[Rule]) -> ProResult<WamProgram> {
    let mut program = WamProgram::new();
    let mut compiler = Compiler::new();
    for rule in rules {
        compiler.compile_rule(&mut program, rule)?;
    }
    Ok(program)
}

/// Compile a query into standalone code that calls each goal in turn.
///
/// The `k`-th query variable ends up in absolute register `k`.
pub fn compile_query(query: &Query) -> Vec<Instruction> {
    let mut scratch = WamProgram::new();
    let regs = Registers::collect(query.goals(), std::iter::empty());
    scratch.push(Instruction::Allocate(regs.len()));
    let goals: Vec<Goal> = query.goals().cloned().collect();
    emit_goals(&mut scratch, &goals, &regs, &mut HashSet::new());
    scratch.push(Instruction::Returnp);
    scratch.instructions().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::parse_rules;

    fn compile(src: &str) -> WamProgram {
        compile_rules(&parse_rules(src).unwrap()).unwrap()
    }

    #[test]
    fn fact_gets_default_id_feature() {
        let p = compile("t(d).");
        assert_eq!(p.addresses("t/1"), &[0]);
        let ops: Vec<String> = p.instructions()[1..].iter().map(|i| i.to_string()).collect();
        assert_eq!(
            ops,
            [
                "allocate\t0",
                "unifyconst\td\t-1",
                "fclear",
                "fpushstart\tid\t3",
                "fpushconst\tt",
                "fpushconst\t1",
                "fpushconst\t1",
                "freport",
                "returnp",
            ]
        );
    }

    #[test]
    fn repeated_head_variable_unifies() {
        let p = compile("same(X,X) {eq}.");
        let ops = p.instructions();
        assert_eq!(ops[1], Instruction::Allocate(1));
        assert_eq!(ops[2], Instruction::Initfreevar(-1, -2));
        assert_eq!(ops[3], Instruction::Unifyboundvar(-1, -1));
    }

    #[test]
    fn body_goals_push_and_call() {
        let p = compile("p(X,Y) :- q(X,Z), r(Z,Y) {via}.");
        let text = p.serialize();
        assert!(text.contains("pushboundvar\t-3\npushfreevar\t-1\ncallp\tq/2"));
        assert!(text.contains("pushboundvar\t-1\npushboundvar\t-2\ncallp\tr/2"));
    }

    #[test]
    fn clause_numbers_count_per_predicate() {
        let p = compile("q(a).\nr(a).\nq(b).");
        assert_eq!(p.addresses("q/1").len(), 2);
        let second = p.addresses("q/1")[1];
        assert_eq!(p.get(second + 7), Some(&Instruction::Fpushconst(Arc::from("2"))));
    }

    #[test]
    fn findall_subroutine_is_back_patched() {
        let p = compile("w(X) :- s(X) {word(W) : has(X,W)}.");
        let at = p
            .instructions()
            .iter()
            .position(|i| matches!(i, Instruction::Ffindall(_)))
            .unwrap();
        let &Instruction::Ffindall(target) = &p.instructions()[at] else {
            unreachable!()
        };
        assert!(target > at);
        assert_eq!(p.get(target + 2), Some(&Instruction::Callp(Arc::from("has/2"))));
        assert_eq!(p.get(target + 3), Some(&Instruction::Fclear));
    }

    #[test]
    fn weighted_feature_pushes_weight_then_marker() {
        let p = compile("p(X) {bias @ 0.5}.");
        let text = p.serialize();
        assert!(text.contains("fpushstart\tbias\t0\npushconst\t0.5\npushconst\tbias\nfpushweight\nfreport"));
    }

    #[test]
    fn unbound_feature_variable_is_rejected() {
        let rules = parse_rules("p(X) :- q(X,Y) {f(Y)}.").unwrap();
        assert!(compile_rules(&rules).is_err());
    }

    #[test]
    fn query_registers_follow_first_occurrence() {
        let q: Query = "p(X,Y),q(Y,a)".parse().unwrap();
        let code = compile_query(&q);
        assert_eq!(code[0], Instruction::Allocate(2));
        assert_eq!(code[1], Instruction::Pushfreevar(-2));
        assert_eq!(code[2], Instruction::Pushfreevar(-1));
        assert_eq!(code[4], Instruction::Pushboundvar(-1));
        assert_eq!(code.last(), Some(&Instruction::Returnp));
    }
}
