// src/parser/operators.rs
//! Mutable operator table consulted by the term parser
//!
//! Prefix operators and infix/postfix operators live in disjoint
//! namespaces: a name may have at most one of each at a time. All access
//! goes through a single lock so `op/3` directives evaluated by one
//! compilation unit are serialized against lookups from another.

use super::ast::{Number, Term};
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const MAX_PRIORITY: u16 = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fixity {
    Prefix,
    Infix,
    Postfix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Assoc {
    Left,
    Right,
    None,
}

/// The seven standard operator type specifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    Xfx,
    Xfy,
    Yfx,
    Fy,
    Fx,
    Xf,
    Yf,
}

impl OpType {
    pub fn parse(spec: &str) -> Option<OpType> {
        Some(match spec {
            "xfx" => OpType::Xfx,
            "xfy" => OpType::Xfy,
            "yfx" => OpType::Yfx,
            "fy" => OpType::Fy,
            "fx" => OpType::Fx,
            "xf" => OpType::Xf,
            "yf" => OpType::Yf,
            _ => return None,
        })
    }

    pub fn from_parts(fixity: Fixity, assoc: Assoc) -> Option<OpType> {
        Some(match (fixity, assoc) {
            (Fixity::Infix, Assoc::None) => OpType::Xfx,
            (Fixity::Infix, Assoc::Right) => OpType::Xfy,
            (Fixity::Infix, Assoc::Left) => OpType::Yfx,
            (Fixity::Prefix, Assoc::Right) => OpType::Fy,
            (Fixity::Prefix, Assoc::None) => OpType::Fx,
            (Fixity::Postfix, Assoc::None) => OpType::Xf,
            (Fixity::Postfix, Assoc::Left) => OpType::Yf,
            _ => return None,
        })
    }

    pub fn fixity(self) -> Fixity {
        match self {
            OpType::Xfx | OpType::Xfy | OpType::Yfx => Fixity::Infix,
            OpType::Fy | OpType::Fx => Fixity::Prefix,
            OpType::Xf | OpType::Yf => Fixity::Postfix,
        }
    }

    pub fn assoc(self) -> Assoc {
        match self {
            OpType::Xfy | OpType::Fy => Assoc::Right,
            OpType::Yfx | OpType::Yf => Assoc::Left,
            OpType::Xfx | OpType::Fx | OpType::Xf => Assoc::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Xfx => "xfx",
            OpType::Xfy => "xfy",
            OpType::Yfx => "yfx",
            OpType::Fy => "fy",
            OpType::Fx => "fx",
            OpType::Xf => "xf",
            OpType::Yf => "yf",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    pub priority: u16,
    pub op_type: OpType,
}

impl Operator {
    pub fn fixity(&self) -> Fixity {
        self.op_type.fixity()
    }

    pub fn assoc(&self) -> Assoc {
        self.op_type.assoc()
    }

    /// Highest priority allowed for the left argument
    pub fn left_max(&self) -> u16 {
        match self.op_type {
            OpType::Yfx | OpType::Yf => self.priority,
            _ => self.priority.saturating_sub(1),
        }
    }

    /// Highest priority allowed for the right (or only prefix) argument
    pub fn right_max(&self) -> u16 {
        match self.op_type {
            OpType::Xfy | OpType::Fy => self.priority,
            _ => self.priority.saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OperatorError {
    #[error("operator priority {0} out of range 0..=1200")]
    PriorityOutOfRange(u16),

    #[error("unknown operator type specifier: {0}")]
    UnknownType(String),

    #[error("operator '{0}' cannot be modified")]
    Protected(String),

    #[error("malformed operator declaration: {0}")]
    Malformed(String),
}

#[derive(Default)]
struct TableInner {
    prefix: HashMap<String, Operator>,
    infix: HashMap<String, Operator>,
    /// priority -> number of operators registered at it
    priorities: BTreeMap<u16, usize>,
}

impl TableInner {
    fn namespace(&mut self, fixity: Fixity) -> &mut HashMap<String, Operator> {
        match fixity {
            Fixity::Prefix => &mut self.prefix,
            Fixity::Infix | Fixity::Postfix => &mut self.infix,
        }
    }

    fn insert(&mut self, op: Operator) -> Option<Operator> {
        let priority = op.priority;
        let previous = self.namespace(op.fixity()).insert(op.name.clone(), op);
        if let Some(prev) = &previous {
            self.forget_priority(prev.priority);
        }
        *self.priorities.entry(priority).or_insert(0) += 1;
        previous
    }

    fn remove(&mut self, fixity: Fixity, name: &str) -> Option<Operator> {
        let removed = self.namespace(fixity).remove(name);
        if let Some(op) = &removed {
            self.forget_priority(op.priority);
        }
        removed
    }

    fn forget_priority(&mut self, priority: u16) {
        if let Some(count) = self.priorities.get_mut(&priority) {
            *count -= 1;
            if *count == 0 {
                self.priorities.remove(&priority);
            }
        }
    }
}

/// Standard operator set the table is seeded with
pub const DEFAULT_OPERATORS: &[(u16, OpType, &str)] = &[
    (1200, OpType::Xfx, ":-"),
    (1200, OpType::Xfx, "-->"),
    (1200, OpType::Fx, ":-"),
    (1200, OpType::Fx, "?-"),
    (1150, OpType::Fx, "dynamic"),
    (1150, OpType::Fx, "discontiguous"),
    (1150, OpType::Fx, "initialization"),
    (1150, OpType::Fx, "multifile"),
    (1100, OpType::Xfy, ";"),
    (1100, OpType::Xfy, "|"),
    (1050, OpType::Xfy, "->"),
    (1050, OpType::Xfy, "*->"),
    (1000, OpType::Xfy, ","),
    (900, OpType::Fy, "\\+"),
    (700, OpType::Xfx, "="),
    (700, OpType::Xfx, "\\="),
    (700, OpType::Xfx, "=="),
    (700, OpType::Xfx, "\\=="),
    (700, OpType::Xfx, "@<"),
    (700, OpType::Xfx, "@>"),
    (700, OpType::Xfx, "@=<"),
    (700, OpType::Xfx, "@>="),
    (700, OpType::Xfx, "=.."),
    (700, OpType::Xfx, "is"),
    (700, OpType::Xfx, "=:="),
    (700, OpType::Xfx, "=\\="),
    (700, OpType::Xfx, "<"),
    (700, OpType::Xfx, ">"),
    (700, OpType::Xfx, "=<"),
    (700, OpType::Xfx, ">="),
    (600, OpType::Xfy, ":"),
    (500, OpType::Yfx, "+"),
    (500, OpType::Yfx, "-"),
    (500, OpType::Yfx, "/\\"),
    (500, OpType::Yfx, "\\/"),
    (500, OpType::Yfx, "xor"),
    (400, OpType::Yfx, "*"),
    (400, OpType::Yfx, "/"),
    (400, OpType::Yfx, "//"),
    (400, OpType::Yfx, "rem"),
    (400, OpType::Yfx, "mod"),
    (400, OpType::Yfx, "div"),
    (400, OpType::Yfx, "<<"),
    (400, OpType::Yfx, ">>"),
    (200, OpType::Xfx, "**"),
    (200, OpType::Xfy, "^"),
    (200, OpType::Fy, "-"),
    (200, OpType::Fy, "+"),
    (200, OpType::Fy, "\\"),
];

/// Operator registry, shareable across compilation units
pub struct OperatorTable {
    inner: Mutex<TableInner>,
}

impl Default for OperatorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperatorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorTable")
            .field("operators", &self.len())
            .finish()
    }
}

impl OperatorTable {
    /// A table seeded with the standard operators
    pub fn new() -> Self {
        let table = Self::empty();
        {
            let mut inner = table.lock();
            for (priority, op_type, name) in DEFAULT_OPERATORS {
                inner.insert(Operator {
                    name: name.to_string(),
                    priority: *priority,
                    op_type: *op_type,
                });
            }
        }
        table
    }

    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        // The table holds no invariants a panicking writer could break halfway
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an operator. Priority 0 removes it; the same name under the
    /// same fixity class is replaced.
    pub fn add(
        &self,
        priority: u16,
        fixity: Fixity,
        assoc: Assoc,
        name: &str,
    ) -> Result<Option<Operator>, OperatorError> {
        let op_type = OpType::from_parts(fixity, assoc).ok_or_else(|| {
            OperatorError::UnknownType(format!("{:?}/{:?}", fixity, assoc))
        })?;
        self.add_typed(priority, op_type, name)
    }

    /// `op/3` entry point taking a type specifier
    pub fn add_typed(
        &self,
        priority: u16,
        op_type: OpType,
        name: &str,
    ) -> Result<Option<Operator>, OperatorError> {
        if priority > MAX_PRIORITY {
            return Err(OperatorError::PriorityOutOfRange(priority));
        }
        if name == "," || (name == "|" && priority != 0 && (priority < 1001 || op_type.fixity() != Fixity::Infix)) {
            return Err(OperatorError::Protected(name.to_string()));
        }

        if priority == 0 {
            self.remove(op_type.fixity(), name);
            return Ok(None);
        }

        let op = Operator {
            name: name.to_string(),
            priority,
            op_type,
        };
        let mut inner = self.lock();
        if let Some(prev) = inner.insert(op.clone()) {
            if prev.op_type != op_type {
                tracing::debug!(name, from = %prev.op_type, to = %op_type, "operator type redefined");
            }
        }
        Ok(Some(op))
    }

    pub fn remove(&self, fixity: Fixity, name: &str) -> Option<Operator> {
        self.lock().remove(fixity, name)
    }

    pub fn lookup_prefix(&self, name: &str) -> Option<Operator> {
        self.lock().prefix.get(name).cloned()
    }

    pub fn lookup_infix_or_postfix(&self, name: &str) -> Option<Operator> {
        self.lock().infix.get(name).cloned()
    }

    pub fn is_operator(&self, name: &str) -> bool {
        let inner = self.lock();
        inner.prefix.contains_key(name) || inner.infix.contains_key(name)
    }

    /// The highest registered priority strictly below `priority`, or 0
    pub fn next_lower_priority(&self, priority: u16) -> u16 {
        self.lock()
            .priorities
            .range(..priority)
            .next_back()
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    /// Snapshot of every registered operator, sorted by priority then name
    pub fn operators(&self) -> Vec<Operator> {
        let inner = self.lock();
        let mut all: Vec<Operator> = inner
            .prefix
            .values()
            .chain(inner.infix.values())
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.op_type.as_str().cmp(b.op_type.as_str()))
        });
        all
    }

    /// Apply an `op(Priority, Type, Names)` declaration where `Names` is an
    /// atom or a list of atoms.
    pub fn define(&self, priority: &Term, op_type: &Term, names: &Term) -> Result<(), OperatorError> {
        let priority = match priority {
            Term::Number(Number::Integer(p)) => {
                u16::try_from(*p).map_err(|_| OperatorError::Malformed(format!("priority {}", p)))?
            }
            other => return Err(OperatorError::Malformed(format!("priority {}", other))),
        };
        let spec = match op_type {
            Term::Atom(a) => OpType::parse(a).ok_or_else(|| OperatorError::UnknownType(a.clone()))?,
            other => return Err(OperatorError::UnknownType(other.to_string())),
        };
        let names: Vec<&Term> = match names.list_items() {
            Some(items) if !names.is_nil() => items,
            _ => vec![names],
        };
        for name in names {
            match name {
                Term::Atom(a) => {
                    self.add_typed(priority, spec, a)?;
                }
                other => return Err(OperatorError::Malformed(format!("operator name {}", other))),
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.prefix.len() + inner.infix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let table = OperatorTable::new();
        let plus = table.lookup_infix_or_postfix("+").unwrap();
        assert_eq!((plus.priority, plus.op_type), (500, OpType::Yfx));
        let neg = table.lookup_prefix("-").unwrap();
        assert_eq!((neg.priority, neg.op_type), (200, OpType::Fy));
        assert!(table.lookup_prefix("*").is_none());
    }

    #[test]
    fn test_add_replaces_within_class() {
        let table = OperatorTable::new();
        table.add(700, Fixity::Infix, Assoc::None, "===>").unwrap();
        table.add(650, Fixity::Postfix, Assoc::None, "===>").unwrap();
        let op = table.lookup_infix_or_postfix("===>").unwrap();
        assert_eq!((op.priority, op.fixity()), (650, Fixity::Postfix));
    }

    #[test]
    fn test_prefix_and_infix_are_disjoint() {
        let table = OperatorTable::new();
        table.add_typed(0, OpType::Fy, "-").unwrap();
        assert!(table.lookup_prefix("-").is_none());
        assert!(table.lookup_infix_or_postfix("-").is_some());
    }

    #[test]
    fn test_zero_priority_removes() {
        let table = OperatorTable::new();
        table.add_typed(700, OpType::Xfx, "≺").unwrap();
        assert!(table.lookup_infix_or_postfix("≺").is_some());
        table.add_typed(0, OpType::Xfx, "≺").unwrap();
        assert!(table.lookup_infix_or_postfix("≺").is_none());
    }

    #[test]
    fn test_priority_range() {
        let table = OperatorTable::new();
        assert_eq!(
            table.add_typed(1201, OpType::Xfx, "bad"),
            Err(OperatorError::PriorityOutOfRange(1201))
        );
        assert!(table.add_typed(100, OpType::Xfx, ",").is_err());
    }

    #[test]
    fn test_next_lower_priority() {
        let table = OperatorTable::new();
        assert_eq!(table.next_lower_priority(1200), 1150);
        assert_eq!(table.next_lower_priority(700), 600);
        assert_eq!(table.next_lower_priority(200), 0);
        table.add_typed(0, OpType::Xfy, ":").unwrap();
        assert_eq!(table.next_lower_priority(700), 500);
    }

    #[test]
    fn test_concurrent_mutation_and_lookup() {
        let table = Arc::new(OperatorTable::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let name = format!("op{}", i);
                    for p in 1..=50u16 {
                        table.add_typed(p * 10, OpType::Xfx, &name).unwrap();
                        assert!(table.lookup_infix_or_postfix(&name).is_some());
                        assert!(table.lookup_infix_or_postfix("+").is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(table.lookup_infix_or_postfix("op3").unwrap().priority, 500);
    }

    #[test]
    fn test_define_from_terms() {
        let table = OperatorTable::new();
        let names = Term::list(vec![Term::atom("likes"), Term::atom("hates")]);
        table
            .define(&Term::int(700), &Term::atom("xfx"), &names)
            .unwrap();
        assert_eq!(table.lookup_infix_or_postfix("hates").unwrap().priority, 700);

        let err = table.define(&Term::int(700), &Term::atom("yfy"), &Term::atom("x"));
        assert_eq!(err, Err(OperatorError::UnknownType("yfy".to_string())));
        assert!(table
            .define(&Term::int(5000), &Term::atom("xfx"), &Term::atom("x"))
            .is_err());
    }
}
