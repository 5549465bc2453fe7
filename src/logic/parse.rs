//! Concrete syntax for goals, queries and rule files.
//!
//! ```text
//! # comment
//! p(X,Y) :- q(X,Z), r(Z,Y) {via(Z)}.
//! t(d).
//! w(X,W) :- hasWord(X,W) {word(W) @ 0.5, f(F) : feature(X,F)}.
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{LogicError, ProResult, ProgramError};

use super::{FeatureSpec, FeatureWeight, Goal, Query, Rule, Term, Variable};

static GOAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([^\s(),{}:@]+)\s*(?:\((.*)\))?\s*$").expect("static goal regex")
});

/// Variable scope of one clause or query: same name, same variable.
#[derive(Default)]
struct Scope {
    vars: HashMap<String, Variable>,
}

impl Scope {
    fn term(&mut self, text: &str) -> Term {
        let text = text.trim();
        if text == "_" {
            return Term::Variable(Variable::fresh("_"));
        }
        if Term::looks_like_variable(text) {
            Term::Variable(
                self.vars
                    .entry(text.to_string())
                    .or_insert_with(|| Variable::fresh(text))
                    .clone(),
            )
        } else {
            Term::constant(text)
        }
    }

    fn goal(&mut self, text: &str) -> ProResult<Goal> {
        let caps = GOAL_RE.captures(text).ok_or_else(|| LogicError::GoalSyntax {
            text: text.trim().to_string(),
            reason: "expected functor(arg,...)".into(),
        })?;
        let functor = &caps[1];
        let args = match caps.get(2) {
            None => Vec::new(),
            Some(inner) => {
                let inner = inner.as_str();
                if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    let mut args = Vec::new();
                    for arg in inner.split(',') {
                        if arg.trim().is_empty() || arg.contains(['(', ')']) {
                            return Err(LogicError::GoalSyntax {
                                text: text.trim().to_string(),
                                reason: format!("bad argument \"{}\"", arg.trim()),
                            }
                            .into());
                        }
                        args.push(self.term(arg));
                    }
                    args
                }
            }
        };
        Ok(Goal::new(functor, args))
    }

    fn goals(&mut self, text: &str) -> ProResult<Vec<Goal>> {
        split_top_level(text, ',')
            .into_iter()
            .filter(|g| !g.trim().is_empty())
            .map(|g| self.goal(g))
            .collect()
    }
}

/// Split on `sep` where it is not nested inside parentheses or braces.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Parse a single goal such as `predict(howard,Y)`.
pub fn parse_goal(text: &str) -> ProResult<Goal> {
    Scope::default().goal(text)
}

/// Parse a query: comma-separated goals sharing one variable scope.
pub fn parse_query(text: &str) -> ProResult<Query> {
    let mut goals = Scope::default().goals(text)?.into_iter();
    let head = goals.next().ok_or(LogicError::EmptyQuery)?;
    Ok(Query {
        head,
        body: goals.collect(),
    })
}

/// Parse every clause of a rule file.
pub fn parse_rules(source: &str) -> ProResult<Vec<Rule>> {
    let cleaned: String = source
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            !t.starts_with('#') && !t.starts_with('%')
        })
        .collect::<Vec<_>>()
        .join("\n");
    clauses(&cleaned)
        .into_iter()
        .map(parse_clause)
        .collect()
}

/// Cut the source into clause texts, each ending at a top-level `.`
/// followed by whitespace or end of input.
fn clauses(source: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut chars = source.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            '.' if depth == 0 => {
                let ends = chars.peek().is_none_or(|(_, n)| n.is_whitespace());
                if ends {
                    let text = source[start..i].trim();
                    if !text.is_empty() {
                        out.push(text);
                    }
                    start = i + 1;
                }
            }
            _ => {}
        }
    }
    let tail = source[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn compile_err(clause: &str, reason: impl Into<String>) -> crate::error::ProPprError {
    ProgramError::Compile {
        clause: clause.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn parse_clause(text: &str) -> ProResult<Rule> {
    let mut scope = Scope::default();

    // Peel off trailing {feature} blocks.
    let mut logic = text;
    let mut blocks = Vec::new();
    if let Some(open) = top_level_find(text, '{') {
        logic = &text[..open];
        let mut rest = &text[open..];
        while let Some(stripped) = rest.trim_start().strip_prefix('{') {
            let close = stripped
                .find('}')
                .ok_or_else(|| compile_err(text, "unterminated feature block"))?;
            blocks.push(&stripped[..close]);
            rest = &stripped[close + 1..];
        }
        if !rest.trim().is_empty() {
            return Err(compile_err(text, "text after feature block"));
        }
    }

    let (head_text, body_text) = match logic.find(":-") {
        Some(pos) => (&logic[..pos], Some(&logic[pos + 2..])),
        None => (logic, None),
    };
    let lhs = scope.goal(head_text)?;
    let rhs = match body_text {
        Some(body) => scope.goals(body)?,
        None => Vec::new(),
    };

    let mut features = Vec::new();
    for block in blocks {
        if let Some(colon) = top_level_find(block, ':') {
            features.push(parse_feature(&mut scope, text, &block[..colon], &block[colon + 1..])?);
        } else {
            for item in split_top_level(block, ',') {
                if item.trim().is_empty() {
                    continue;
                }
                features.push(parse_feature(&mut scope, text, item, "")?);
            }
        }
    }
    Ok(Rule { lhs, rhs, features })
}

fn parse_feature(scope: &mut Scope, clause: &str, item: &str, findall: &str) -> ProResult<FeatureSpec> {
    let (goal_text, weight_text) = match item.find('@') {
        Some(at) => (&item[..at], Some(item[at + 1..].trim())),
        None => (item, None),
    };
    let goal = scope.goal(goal_text)?;
    let weight = match weight_text {
        None => FeatureWeight::Unit,
        Some(w) if Term::looks_like_variable(w) => match scope.term(w) {
            Term::Variable(v) => FeatureWeight::Bound(v),
            Term::Constant(_) => return Err(compile_err(clause, format!("bad weight {w}"))),
        },
        Some(w) => FeatureWeight::Fixed(
            w.parse::<f64>()
                .map_err(|_| compile_err(clause, format!("weight \"{w}\" is not a number")))?,
        ),
    };
    let findall = if findall.trim().is_empty() {
        Vec::new()
    } else {
        scope.goals(findall)?
    };
    Ok(FeatureSpec {
        goal,
        weight,
        findall,
    })
}

fn top_level_find(text: &str, needle: char) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c == needle && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}
