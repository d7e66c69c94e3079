// src/precompiler/builtins.rs
//! Built-in predicate catalogue and built-in substitution
//!
//! Substitution wraps every body goal recognized as a built-in as
//! `'$builtin'(Id, Goal)` so later stages dispatch on the id instead of
//! looking the name up again.

use crate::parser::ast::{Clause, Functor, Term};
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

pub const BUILTIN_WRAPPER: &str = "$builtin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    // Control
    Conjunction,
    Disjunction,
    IfThen,
    SoftIfThen,
    Not,
    Call(u8),
    True,
    Fail,
    False,
    // Unification and comparison
    Unify,
    NotUnify,
    Identical,
    NotIdentical,
    TermLess,
    TermGreater,
    TermLessEq,
    TermGreaterEq,
    Compare,
    // Arithmetic
    Is,
    ArithEqual,
    ArithNotEqual,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    // Type checks
    Var,
    Nonvar,
    Atom,
    Number,
    Integer,
    Float,
    Atomic,
    Compound,
    Callable,
    IsList,
    // Term inspection
    Functor,
    Arg,
    Univ,
    CopyTerm,
    // All-solutions
    Findall,
    // Operators
    Op,
    CurrentOp,
    // Output
    Write,
    Writeln,
    Nl,
}

const CATALOGUE: &[(Builtin, &str, usize)] = &[
    (Builtin::Conjunction, ",", 2),
    (Builtin::Disjunction, ";", 2),
    (Builtin::IfThen, "->", 2),
    (Builtin::SoftIfThen, "*->", 2),
    (Builtin::Not, "\\+", 1),
    (Builtin::Call(1), "call", 1),
    (Builtin::Call(2), "call", 2),
    (Builtin::Call(3), "call", 3),
    (Builtin::Call(4), "call", 4),
    (Builtin::Call(5), "call", 5),
    (Builtin::Call(6), "call", 6),
    (Builtin::Call(7), "call", 7),
    (Builtin::Call(8), "call", 8),
    (Builtin::True, "true", 0),
    (Builtin::Fail, "fail", 0),
    (Builtin::False, "false", 0),
    (Builtin::Unify, "=", 2),
    (Builtin::NotUnify, "\\=", 2),
    (Builtin::Identical, "==", 2),
    (Builtin::NotIdentical, "\\==", 2),
    (Builtin::TermLess, "@<", 2),
    (Builtin::TermGreater, "@>", 2),
    (Builtin::TermLessEq, "@=<", 2),
    (Builtin::TermGreaterEq, "@>=", 2),
    (Builtin::Compare, "compare", 3),
    (Builtin::Is, "is", 2),
    (Builtin::ArithEqual, "=:=", 2),
    (Builtin::ArithNotEqual, "=\\=", 2),
    (Builtin::Less, "<", 2),
    (Builtin::Greater, ">", 2),
    (Builtin::LessEq, "=<", 2),
    (Builtin::GreaterEq, ">=", 2),
    (Builtin::Var, "var", 1),
    (Builtin::Nonvar, "nonvar", 1),
    (Builtin::Atom, "atom", 1),
    (Builtin::Number, "number", 1),
    (Builtin::Integer, "integer", 1),
    (Builtin::Float, "float", 1),
    (Builtin::Atomic, "atomic", 1),
    (Builtin::Compound, "compound", 1),
    (Builtin::Callable, "callable", 1),
    (Builtin::IsList, "is_list", 1),
    (Builtin::Functor, "functor", 3),
    (Builtin::Arg, "arg", 3),
    (Builtin::Univ, "=..", 2),
    (Builtin::CopyTerm, "copy_term", 2),
    (Builtin::Findall, "findall", 3),
    (Builtin::Op, "op", 3),
    (Builtin::CurrentOp, "current_op", 3),
    (Builtin::Write, "write", 1),
    (Builtin::Writeln, "writeln", 1),
    (Builtin::Nl, "nl", 0),
];

fn index() -> &'static HashMap<(&'static str, usize), usize> {
    static INDEX: OnceLock<HashMap<(&'static str, usize), usize>> = OnceLock::new();
    INDEX.get_or_init(|| {
        CATALOGUE
            .iter()
            .enumerate()
            .map(|(i, (_, name, arity))| ((*name, *arity), i))
            .collect()
    })
}

impl Builtin {
    pub fn lookup(name: &str, arity: usize) -> Option<Builtin> {
        index().get(&(name, arity)).map(|&i| CATALOGUE[i].0)
    }

    /// Built-in named by a callable goal
    pub fn for_goal(goal: &Term) -> Option<Builtin> {
        goal.name().and_then(|n| Builtin::lookup(n, goal.arity()))
    }

    pub fn id(self) -> usize {
        CATALOGUE
            .iter()
            .position(|(b, _, _)| *b == self)
            .unwrap_or(usize::MAX)
    }

    pub fn from_id(id: usize) -> Option<Builtin> {
        CATALOGUE.get(id).map(|(b, _, _)| *b)
    }

    fn entry(self) -> (&'static str, usize) {
        CATALOGUE
            .iter()
            .find(|(b, _, _)| *b == self)
            .map(|(_, n, a)| (*n, *a))
            .unwrap_or(("?", 0))
    }

    pub fn name(self) -> &'static str {
        self.entry().0
    }

    pub fn arity(self) -> usize {
        self.entry().1
    }

    pub fn functor(self) -> Functor {
        Functor::new(self.name(), self.arity())
    }

    /// Control constructs whose goal arguments share the clause's cut
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Builtin::Conjunction | Builtin::Disjunction | Builtin::IfThen | Builtin::SoftIfThen
        )
    }

    /// Built-ins that may run arbitrary user goals, and so end a chunk
    /// like an ordinary call does.
    pub fn calls_goals(self) -> bool {
        self.is_control() || matches!(self, Builtin::Not | Builtin::Call(_) | Builtin::Findall)
    }

    /// Argument positions holding goals that substitution descends into
    pub fn goal_args(self) -> &'static [usize] {
        match self {
            Builtin::Conjunction | Builtin::Disjunction | Builtin::IfThen | Builtin::SoftIfThen => {
                &[0, 1]
            }
            Builtin::Not => &[0],
            _ => &[],
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.functor())
    }
}

/// Argument positions of a goal that are themselves goals, for the
/// control constructs and meta-predicates goal expansion walks into.
pub fn meta_goal_positions(goal: &Term) -> &'static [usize] {
    match (goal.name(), goal.arity()) {
        (Some("," | ";" | "->" | "*->"), 2) => &[0, 1],
        (Some("\\+" | "call"), 1) => &[0],
        (Some("findall"), 3) => &[1],
        (Some("forall"), 2) => &[0, 1],
        _ => &[],
    }
}

/// Split a substituted goal into its built-in and the original goal
pub fn as_builtin_call(goal: &Term) -> Option<(Builtin, &Term)> {
    match goal {
        Term::Compound { functor, args } if functor == BUILTIN_WRAPPER && args.len() == 2 => {
            match &args[0] {
                Term::Number(crate::parser::ast::Number::Integer(id)) => {
                    let builtin = usize::try_from(*id).ok().and_then(Builtin::from_id)?;
                    Some((builtin, &args[1]))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn wrap(builtin: Builtin, goal: Term) -> Term {
    Term::compound(
        BUILTIN_WRAPPER,
        vec![Term::int(builtin.id() as i64), goal],
    )
}

/// Post-order substitution of one body goal. Variable goals become
/// `call/1`; `!` and user predicates pass through.
pub fn substitute_goal(goal: &Term) -> Term {
    if goal.is_variable() {
        return wrap(Builtin::Call(1), Term::compound("call", vec![goal.clone()]));
    }
    if as_builtin_call(goal).is_some() {
        return goal.clone();
    }
    let Some(builtin) = Builtin::for_goal(goal) else {
        return goal.clone();
    };

    let positions = builtin.goal_args();
    let goal = match goal {
        Term::Compound { functor, args } if !positions.is_empty() => Term::Compound {
            functor: functor.clone(),
            args: args
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    if positions.contains(&i) {
                        substitute_goal(a)
                    } else {
                        a.clone()
                    }
                })
                .collect(),
        },
        other => other.clone(),
    };
    wrap(builtin, goal)
}

/// Substitute built-ins throughout a clause body; the head is untouched
pub fn substitute(clause: &Clause) -> Clause {
    Clause {
        body: clause.body.iter().map(substitute_goal).collect(),
        ..clause.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_term, OperatorTable};
    use std::sync::Arc;

    fn clause(text: &str) -> Clause {
        let ops = Arc::new(OperatorTable::new());
        let read = parse_term(text, &ops).unwrap();
        Clause::from_term(read.term, read.position).unwrap()
    }

    #[test]
    fn test_ids_round_trip() {
        for (builtin, name, arity) in CATALOGUE {
            assert_eq!(Builtin::from_id(builtin.id()), Some(*builtin));
            assert_eq!(Builtin::lookup(name, *arity), Some(*builtin));
        }
        assert_eq!(Builtin::lookup("append", 3), None);
    }

    #[test]
    fn test_substitution_wraps_builtins_only() {
        let c = substitute(&clause("p(X) :- X > 1, q(X), !"));
        let (b, inner) = as_builtin_call(&c.body[0]).unwrap();
        assert_eq!(b, Builtin::Greater);
        assert!(inner.is_functor(">", 2));
        assert!(c.body[1].is_functor("q", 1));
        assert!(c.body[2].is_atom("!"));
        assert!(c.head.as_ref().unwrap().is_functor("p", 1));
    }

    #[test]
    fn test_post_order_inside_control() {
        let c = substitute(&clause("p :- (a -> X = 1 ; \\+ b)"));
        let (outer, disj) = as_builtin_call(&c.body[0]).unwrap();
        assert_eq!(outer, Builtin::Disjunction);
        let (ite, cond) = as_builtin_call(disj.arg(0).unwrap()).unwrap();
        assert_eq!(ite, Builtin::IfThen);
        assert!(cond.arg(0).unwrap().is_atom("a"));
        assert_eq!(as_builtin_call(cond.arg(1).unwrap()).unwrap().0, Builtin::Unify);
        assert_eq!(as_builtin_call(disj.arg(1).unwrap()).unwrap().0, Builtin::Not);
    }

    #[test]
    fn test_variable_goal_becomes_call() {
        let c = substitute(&clause("p(G) :- G"));
        let (b, inner) = as_builtin_call(&c.body[0]).unwrap();
        assert_eq!(b, Builtin::Call(1));
        assert!(inner.is_functor("call", 1));
        assert_eq!(substitute(&c), c);
    }
}
