// src/precompiler/symbols.rs
//! Symbol keys for functors and per-unit predicate bookkeeping

use super::builtins::as_builtin_call;
use crate::parser::ast::{Clause, Functor, Term};
use ahash::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey(u32);

impl SymbolKey {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A body goal as seen by the top-level marking walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalMark {
    pub functor: Functor,
    pub key: SymbolKey,
    /// Directly in the clause body rather than inside a control construct
    pub top_level: bool,
}

/// Where the walk currently is
#[derive(Debug, Clone, Copy)]
struct Walk {
    top_level: bool,
}

#[derive(Debug, Default)]
struct UnitScope {
    name: String,
    /// Predicates in order of first definition
    defined: Vec<Functor>,
    seen: HashSet<Functor>,
    last: Option<Functor>,
    discontiguous: HashSet<Functor>,
    warned: HashSet<Functor>,
    interned: usize,
}

/// What a closed unit defined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub name: String,
    pub predicates: Vec<Functor>,
    pub symbols: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    keys: HashMap<Functor, SymbolKey>,
    functors: Vec<Functor>,
    unit: Option<UnitScope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, functor: &Functor) -> SymbolKey {
        if let Some(key) = self.keys.get(functor) {
            return *key;
        }
        let key = SymbolKey(self.functors.len() as u32);
        self.functors.push(functor.clone());
        self.keys.insert(functor.clone(), key);
        if let Some(unit) = &mut self.unit {
            unit.interned += 1;
        }
        key
    }

    pub fn lookup(&self, functor: &Functor) -> Option<SymbolKey> {
        self.keys.get(functor).copied()
    }

    pub fn functor(&self, key: SymbolKey) -> Option<&Functor> {
        self.functors.get(key.index())
    }

    pub fn len(&self) -> usize {
        self.functors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functors.is_empty()
    }

    pub fn open_unit(&mut self, name: &str) {
        self.unit = Some(UnitScope {
            name: name.to_string(),
            ..UnitScope::default()
        });
    }

    pub fn unit_name(&self) -> Option<&str> {
        self.unit.as_ref().map(|u| u.name.as_str())
    }

    pub fn declare_discontiguous(&mut self, functor: Functor) {
        if let Some(unit) = &mut self.unit {
            unit.discontiguous.insert(functor);
        }
    }

    /// Note a clause for `functor` in the open unit. Returns a warning when
    /// its clauses are split by another predicate without a
    /// `discontiguous` declaration.
    pub fn record_clause(&mut self, functor: &Functor) -> Option<String> {
        let unit = self.unit.as_mut()?;
        let contiguous = unit.last.as_ref() == Some(functor);
        unit.last = Some(functor.clone());
        if contiguous {
            return None;
        }
        if unit.seen.insert(functor.clone()) {
            unit.defined.push(functor.clone());
            return None;
        }
        if unit.discontiguous.contains(functor) || !unit.warned.insert(functor.clone()) {
            return None;
        }
        Some(format!(
            "clauses of {} are not together in {}",
            functor, unit.name
        ))
    }

    /// Flush the unit scope; interned keys stay valid
    pub fn close_unit(&mut self) -> Option<UnitSummary> {
        self.unit.take().map(|unit| UnitSummary {
            name: unit.name,
            predicates: unit.defined,
            symbols: unit.interned,
        })
    }

    /// Intern every functor of a clause and mark its body goals.
    pub fn mark(&mut self, clause: &Clause) -> (Option<SymbolKey>, Vec<GoalMark>) {
        let head_key = clause.head.as_ref().map(|head| {
            self.intern_structures(head);
            let functor = head.functor().unwrap_or_else(|| Functor::new("?", 0));
            self.intern(&functor)
        });

        let mut marks = Vec::new();
        for goal in &clause.body {
            self.walk_goal(goal, Walk { top_level: true }, &mut marks);
        }
        (head_key, marks)
    }

    fn walk_goal(&mut self, goal: &Term, at: Walk, marks: &mut Vec<GoalMark>) {
        let (builtin, goal) = match as_builtin_call(goal) {
            Some((b, inner)) => (Some(b), inner),
            None => (None, goal),
        };
        let Some(functor) = goal.functor() else {
            return;
        };
        let key = self.intern(&functor);
        marks.push(GoalMark {
            functor,
            key,
            top_level: at.top_level,
        });

        let positions = builtin.map(|b| b.goal_args()).unwrap_or(&[]);
        for (i, arg) in goal.args().into_iter().enumerate() {
            if positions.contains(&i) {
                self.walk_goal(arg, Walk { top_level: false }, marks);
            } else {
                self.intern_structures(arg);
            }
        }
    }

    fn intern_structures(&mut self, term: &Term) {
        match term {
            Term::Compound { .. } | Term::ListCell(..) => {
                if let Some(f) = term.functor() {
                    self.intern(&f);
                }
                for arg in term.args() {
                    self.intern_structures(arg);
                }
            }
            _ => {}
        }
    }
}
