// src/parser/ast.rs
//! Term and clause definitions produced by the reader

use serde::{Deserialize, Serialize};
use std::fmt;

/// 1-based source position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Integer(n) => *n as f64,
            Number::Float(f) => *f,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(n) => write!(f, "{}", n),
            Number::Float(x) if x.is_nan() => f.write_str("nan"),
            // Reads back as infinity: the literal overflows f64
            Number::Float(x) if x.is_infinite() => {
                f.write_str(if *x < 0.0 { "-1.0e309" } else { "1.0e309" })
            }
            Number::Float(x) if x.fract() == 0.0 && x.abs() < 1e15 => write!(f, "{:.1}", x),
            Number::Float(x) if x.fract() == 0.0 => f.write_str(&float_exponent_form(*x)),
            Number::Float(x) => write!(f, "{}", x),
        }
    }
}

/// `1e15` as `1.0e15`, so the text still reads as a float
fn float_exponent_form(x: f64) -> String {
    let text = format!("{:e}", x);
    match text.split_once('e') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => {
            format!("{}.0e{}", mantissa, exponent)
        }
        _ => text,
    }
}

/// Name and arity of a predicate or structure
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Functor {
    pub name: String,
    pub arity: usize,
}

impl Functor {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for Functor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", super::writer::quote_atom(&self.name), self.arity)
    }
}

/// A first-order term.
///
/// Lists are `ListCell` chains ending in the atom `[]`; a compound built
/// with functor `'.'` and two arguments is always normalized to a
/// `ListCell`, so `[1,2]` and `'.'(1,'.'(2,[]))` are the same term.
#[derive(Debug, Serialize, Deserialize)]
pub enum Term {
    Atom(String),
    Number(Number),
    /// Two variables are the same variable iff their ids match.
    Variable { name: String, id: usize },
    Compound { functor: String, args: Vec<Term> },
    ListCell(Box<Term>, Box<Term>),
}

// Lists can be far longer than the stack is deep, so the impls below walk
// list tails in a loop and only recurse into heads and arguments.

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        let (mut a, mut b) = (self, other);
        loop {
            match (a, b) {
                (Term::ListCell(h1, t1), Term::ListCell(h2, t2)) => {
                    if h1 != h2 {
                        return false;
                    }
                    a = t1;
                    b = t2;
                }
                (Term::Atom(x), Term::Atom(y)) => return x == y,
                (Term::Number(x), Term::Number(y)) => return x == y,
                (Term::Variable { id: x, .. }, Term::Variable { id: y, .. }) => return x == y,
                (
                    Term::Compound { functor: f, args: x },
                    Term::Compound { functor: g, args: y },
                ) => return f == g && x == y,
                _ => return false,
            }
        }
    }
}

impl Clone for Term {
    fn clone(&self) -> Self {
        match self {
            Term::Atom(a) => Term::Atom(a.clone()),
            Term::Number(n) => Term::Number(*n),
            Term::Variable { name, id } => Term::Variable {
                name: name.clone(),
                id: *id,
            },
            Term::Compound { functor, args } => Term::Compound {
                functor: functor.clone(),
                args: args.clone(),
            },
            Term::ListCell(..) => {
                let mut heads = Vec::new();
                let mut current = self;
                while let Term::ListCell(h, t) = current {
                    heads.push(h.as_ref().clone());
                    current = t;
                }
                Term::list_with_tail(heads, current.clone())
            }
        }
    }
}

impl Drop for Term {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_structures(&mut pending);
        while let Some(mut term) = pending.pop() {
            term.detach_structures(&mut pending);
        }
    }
}

pub const NIL: &str = "[]";

impl Term {
    pub fn atom(name: impl Into<String>) -> Self {
        Term::Atom(name.into())
    }

    pub fn int(n: i64) -> Self {
        Term::Number(Number::Integer(n))
    }

    pub fn float(x: f64) -> Self {
        Term::Number(Number::Float(x))
    }

    pub fn var(name: impl Into<String>, id: usize) -> Self {
        Term::Variable {
            name: name.into(),
            id,
        }
    }

    pub fn nil() -> Self {
        Term::Atom(NIL.to_string())
    }

    /// Build a compound term. A zero-argument compound collapses to an atom
    /// and `'.'/2` becomes a list cell.
    pub fn compound(functor: impl Into<String>, mut args: Vec<Term>) -> Self {
        let functor = functor.into();
        if args.is_empty() {
            return Term::Atom(functor);
        }
        if functor == "." && args.len() == 2 {
            let tail = args.pop().unwrap_or_else(Term::nil);
            let head = args.pop().unwrap_or_else(Term::nil);
            return Term::cons(head, tail);
        }
        Term::Compound { functor, args }
    }

    pub fn cons(head: Term, tail: Term) -> Self {
        Term::ListCell(Box::new(head), Box::new(tail))
    }

    pub fn list(items: Vec<Term>) -> Self {
        Self::list_with_tail(items, Term::nil())
    }

    pub fn list_with_tail(items: Vec<Term>, tail: Term) -> Self {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Term::cons(item, acc))
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable { .. })
    }

    pub fn is_atom(&self, name: &str) -> bool {
        matches!(self, Term::Atom(a) if a == name)
    }

    pub fn is_nil(&self) -> bool {
        self.is_atom(NIL)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Term::Atom(_) | Term::Compound { .. } | Term::ListCell(..))
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, Term::Atom(_) | Term::Number(_))
    }

    fn is_structure(&self) -> bool {
        matches!(self, Term::Compound { .. } | Term::ListCell(..))
    }

    /// Move nested structures out into `out`, leaving cheap placeholders,
    /// so that dropping `self` frees only one level
    fn detach_structures(&mut self, out: &mut Vec<Term>) {
        let hollow = || Term::Number(Number::Integer(0));
        match self {
            Term::Compound { args, .. } => {
                for arg in args.iter_mut().filter(|a| a.is_structure()) {
                    out.push(std::mem::replace(arg, hollow()));
                }
            }
            Term::ListCell(h, t) => {
                for part in [h, t] {
                    if part.is_structure() {
                        out.push(std::mem::replace(&mut **part, hollow()));
                    }
                }
            }
            _ => {}
        }
    }

    /// Take the arguments out of a structure; list cells give head and tail
    pub fn into_args(mut self) -> Vec<Term> {
        let args = match &mut self {
            Term::Compound { args, .. } => std::mem::take(args),
            Term::ListCell(h, t) => {
                let nil = || Term::Atom(String::new());
                vec![
                    std::mem::replace(&mut **h, nil()),
                    std::mem::replace(&mut **t, nil()),
                ]
            }
            _ => Vec::new(),
        };
        args
    }

    /// Principal functor name for callable terms
    pub fn name(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a),
            Term::Compound { functor, .. } => Some(functor),
            Term::ListCell(..) => Some("."),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Term::Compound { args, .. } => args.len(),
            Term::ListCell(..) => 2,
            _ => 0,
        }
    }

    pub fn functor(&self) -> Option<Functor> {
        self.name().map(|n| Functor::new(n, self.arity()))
    }

    /// True when this is a compound with the given name and arity
    pub fn is_functor(&self, name: &str, arity: usize) -> bool {
        match self {
            Term::Compound { functor, args } => functor == name && args.len() == arity,
            Term::ListCell(..) => name == "." && arity == 2,
            Term::Atom(a) => arity == 0 && a == name,
            _ => false,
        }
    }

    /// Arguments of a structure; list cells expose head and tail.
    pub fn args(&self) -> Vec<&Term> {
        match self {
            Term::Compound { args, .. } => args.iter().collect(),
            Term::ListCell(h, t) => vec![h.as_ref(), t.as_ref()],
            _ => Vec::new(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&Term> {
        match self {
            Term::Compound { args, .. } => args.get(index),
            Term::ListCell(h, _) if index == 0 => Some(h),
            Term::ListCell(_, t) if index == 1 => Some(t),
            _ => None,
        }
    }

    /// Ground terms contain no variables. Not cached.
    pub fn is_ground(&self) -> bool {
        let mut current = self;
        while let Term::ListCell(h, t) = current {
            if !h.is_ground() {
                return false;
            }
            current = t;
        }
        match current {
            Term::Variable { .. } => false,
            Term::Compound { args, .. } => args.iter().all(Term::is_ground),
            _ => true,
        }
    }

    /// Distinct variables in order of first occurrence (depth-first, left to right)
    pub fn variables(&self) -> Vec<&Term> {
        let mut seen = Vec::new();
        self.collect_variables(&mut seen);
        seen
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a Term>) {
        let mut current = self;
        while let Term::ListCell(h, t) = current {
            h.collect_variables(out);
            current = t;
        }
        match current {
            Term::Variable { .. } => {
                if !out.iter().any(|v| *v == current) {
                    out.push(current);
                }
            }
            Term::Compound { args, .. } => args.iter().for_each(|a| a.collect_variables(out)),
            _ => {}
        }
    }

    /// Highest variable id occurring in the term, if any
    pub fn max_var_id(&self) -> Option<usize> {
        let mut current = self;
        let mut max = None;
        while let Term::ListCell(h, t) = current {
            max = max.max(h.max_var_id());
            current = t;
        }
        let last = match current {
            Term::Variable { id, .. } => Some(*id),
            Term::Compound { args, .. } => args.iter().filter_map(Term::max_var_id).max(),
            _ => None,
        };
        max.max(last)
    }

    /// Rebuild the term with every variable passed through `f`
    pub fn map_variables(&self, f: &mut impl FnMut(&str, usize) -> Term) -> Term {
        match self {
            Term::Variable { name, id } => f(name, *id),
            Term::Compound { functor, args } => Term::Compound {
                functor: functor.clone(),
                args: args.iter().map(|a| a.map_variables(f)).collect(),
            },
            Term::ListCell(..) => {
                let mut heads = Vec::new();
                let mut current = self;
                while let Term::ListCell(h, t) = current {
                    heads.push(h.map_variables(f));
                    current = t;
                }
                let tail = current.map_variables(f);
                Term::list_with_tail(heads, tail)
            }
            other => other.clone(),
        }
    }

    /// Flatten a right-nested `','/2` chain into its conjuncts
    pub fn conjuncts(&self) -> Vec<&Term> {
        let mut out = Vec::new();
        let mut current = self;
        while let Term::Compound { functor, args } = current {
            if functor == "," && args.len() == 2 {
                out.push(&args[0]);
                current = &args[1];
            } else {
                break;
            }
        }
        out.push(current);
        out
    }

    /// Inverse of `conjuncts`; an empty list yields `true`
    pub fn from_conjuncts(mut goals: Vec<Term>) -> Term {
        let Some(mut acc) = goals.pop() else {
            return Term::atom("true");
        };
        while let Some(goal) = goals.pop() {
            acc = Term::compound(",", vec![goal, acc]);
        }
        acc
    }

    /// Proper list elements, or `None` for partial and improper lists
    pub fn list_items(&self) -> Option<Vec<&Term>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Term::ListCell(h, t) => {
                    items.push(h.as_ref());
                    current = t;
                }
                t if t.is_nil() => return Some(items),
                _ => return None,
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::writer::TermWriter::default().write(self))
    }
}

/// A term as read from source, with its position and variable names
#[derive(Debug, Clone, PartialEq)]
pub struct ReadTerm {
    pub term: Term,
    pub position: Position,
    /// `(Name, Variable)` pairs for named (non-`_`) variables, in order of appearance
    pub variable_names: Vec<(String, Term)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClauseKind {
    Fact,
    Rule,
    Directive,
    Query,
}

/// A program clause or a headless query/directive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub head: Option<Term>,
    pub body: Vec<Term>,
    pub kind: ClauseKind,
    pub position: Position,
}

impl Clause {
    /// Classify a read term by its principal functor
    pub fn from_term(term: Term, position: Position) -> Result<Clause, String> {
        let kind = if term.is_functor(":-", 2) {
            ClauseKind::Rule
        } else if term.is_functor(":-", 1) {
            ClauseKind::Directive
        } else if term.is_functor("?-", 1) {
            ClauseKind::Query
        } else {
            ClauseKind::Fact
        };
        let (head, body) = match kind {
            ClauseKind::Fact => (Some(term), None),
            ClauseKind::Rule => {
                let mut args = term.into_args();
                let body = args.pop();
                (args.pop(), body)
            }
            ClauseKind::Directive | ClauseKind::Query => (None, term.into_args().pop()),
        };

        if let Some(h) = &head {
            if !h.is_callable() {
                return Err(format!("clause head is not callable: {}", h));
            }
        }

        let body = match body {
            Some(b) => {
                if let Some(bad) = b.conjuncts().into_iter().find(|g| !is_goal(g)) {
                    return Err(format!("body goal is not callable: {}", bad));
                }
                b.conjuncts().into_iter().cloned().collect()
            }
            None => Vec::new(),
        };

        Ok(Clause {
            head,
            body,
            kind,
            position,
        })
    }

    pub fn fact(head: Term) -> Self {
        Clause {
            head: Some(head),
            body: Vec::new(),
            kind: ClauseKind::Fact,
            position: Position::default(),
        }
    }

    pub fn query(body: Vec<Term>) -> Self {
        Clause {
            head: None,
            body,
            kind: ClauseKind::Query,
            position: Position::default(),
        }
    }

    pub fn is_fact(&self) -> bool {
        self.head.is_some() && self.body.is_empty()
    }

    pub fn predicate(&self) -> Option<Functor> {
        self.head.as_ref().and_then(Term::functor)
    }

    /// Reassemble the clause as a single term
    pub fn to_term(&self) -> Term {
        let body = Term::from_conjuncts(self.body.clone());
        match (&self.head, self.kind) {
            (Some(h), _) if self.body.is_empty() => h.clone(),
            (Some(h), _) => Term::compound(":-", vec![h.clone(), body]),
            (None, ClauseKind::Query) => Term::compound("?-", vec![body]),
            (None, _) => Term::compound(":-", vec![body]),
        }
    }

    pub fn max_var_id(&self) -> Option<usize> {
        self.head
            .iter()
            .chain(self.body.iter())
            .filter_map(Term::max_var_id)
            .max()
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_term())
    }
}

fn is_goal(term: &Term) -> bool {
    term.is_callable() || term.is_variable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_compound_normalizes_to_list() {
        let a = Term::compound(".", vec![Term::int(1), Term::nil()]);
        assert_eq!(a, Term::list(vec![Term::int(1)]));
    }

    #[test]
    fn test_variable_identity() {
        assert_eq!(Term::var("X", 3), Term::var("Y", 3));
        assert_ne!(Term::var("X", 3), Term::var("X", 4));
    }

    #[test]
    fn test_conjunction_round_trip() {
        let goals = vec![Term::atom("a"), Term::atom("b"), Term::atom("c")];
        let conj = Term::from_conjuncts(goals.clone());
        let back: Vec<Term> = conj.conjuncts().into_iter().cloned().collect();
        assert_eq!(back, goals);
    }

    #[test]
    fn test_clause_classification() {
        let rule = Term::compound(":-", vec![Term::atom("p"), Term::atom("q")]);
        let clause = Clause::from_term(rule, Position::default()).unwrap();
        assert_eq!(clause.kind, ClauseKind::Rule);
        assert_eq!(clause.body, vec![Term::atom("q")]);

        let directive = Term::compound(":-", vec![Term::atom("q")]);
        let clause = Clause::from_term(directive, Position::default()).unwrap();
        assert_eq!(clause.kind, ClauseKind::Directive);
        assert!(clause.head.is_none());

        assert!(Clause::from_term(Term::int(3), Position::default()).is_err());
    }

    #[test]
    fn test_ground() {
        assert!(Term::compound("f", vec![Term::atom("a")]).is_ground());
        assert!(!Term::compound("f", vec![Term::var("X", 0)]).is_ground());
    }

    #[test]
    fn test_long_lists_are_walked_in_a_loop() {
        let tail = Term::var("T", 3);
        let list = Term::list_with_tail((0..200_000).map(Term::int).collect(), tail);
        let copy = list.clone();
        assert_eq!(list, copy);
        assert!(!copy.is_ground());
        assert_eq!(copy.max_var_id(), Some(3));
        let renamed = copy.map_variables(&mut |name, id| Term::var(name, id + 10));
        assert_ne!(renamed, list);
        drop(list);
        drop(copy);
        drop(renamed);

        let nested = (0..100_000).fold(Term::nil(), |acc, i| Term::compound("f", vec![Term::int(i), acc]));
        drop(nested);
    }
}
