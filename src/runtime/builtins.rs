// src/runtime/builtins.rs
//! Deterministic built-in predicates
//!
//! Control constructs, `call/N` and `findall/3` need the machine's
//! continuation and live in the engine; everything else is here.

use super::arith;
use super::bindings::Bindings;
use crate::parser::ast::{Number, Term};
use crate::parser::operators::OperatorTable;
use crate::parser::writer::TermWriter;
use crate::precompiler::builtins::Builtin;
use crate::ExecutionError;
use std::cmp::Ordering;

/// Result of a deterministic built-in
#[derive(Debug)]
pub enum Outcome {
    Succeed,
    Fail,
    /// Continue by solving this goal in the caller's place
    Solve(Term),
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        if ok {
            Outcome::Succeed
        } else {
            Outcome::Fail
        }
    }
}

pub fn type_error(expected: &str, culprit: &Term) -> ExecutionError {
    ExecutionError::Type {
        expected: expected.to_string(),
        culprit: culprit.to_string(),
    }
}

pub fn call(
    builtin: Builtin,
    args: &[Term],
    bindings: &mut Bindings,
    ops: &OperatorTable,
    out: &mut String,
) -> Result<Outcome, ExecutionError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_else(Term::nil);
    let outcome = match builtin {
        Builtin::True => Outcome::Succeed,
        Builtin::Fail | Builtin::False => Outcome::Fail,

        Builtin::Unify => bindings.unify(&arg(0), &arg(1)).into(),
        Builtin::NotUnify => {
            let mark = bindings.mark();
            let unified = bindings.unify(&arg(0), &arg(1));
            bindings.undo(mark);
            (!unified).into()
        }
        Builtin::Identical => (bindings.resolve(&arg(0)) == bindings.resolve(&arg(1))).into(),
        Builtin::NotIdentical => (bindings.resolve(&arg(0)) != bindings.resolve(&arg(1))).into(),
        Builtin::TermLess | Builtin::TermGreater | Builtin::TermLessEq | Builtin::TermGreaterEq => {
            let ordering = standard_order(&bindings.resolve(&arg(0)), &bindings.resolve(&arg(1)));
            let holds = match builtin {
                Builtin::TermLess => ordering == Ordering::Less,
                Builtin::TermGreater => ordering == Ordering::Greater,
                Builtin::TermLessEq => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            holds.into()
        }
        Builtin::Compare => {
            let ordering = standard_order(&bindings.resolve(&arg(1)), &bindings.resolve(&arg(2)));
            let symbol = match ordering {
                Ordering::Less => "<",
                Ordering::Equal => "=",
                Ordering::Greater => ">",
            };
            bindings.unify(&arg(0), &Term::atom(symbol)).into()
        }

        Builtin::Is => {
            let value = arith::evaluate(&bindings.resolve(&arg(1)))?;
            bindings.unify(&arg(0), &Term::Number(value)).into()
        }
        Builtin::ArithEqual
        | Builtin::ArithNotEqual
        | Builtin::Less
        | Builtin::Greater
        | Builtin::LessEq
        | Builtin::GreaterEq => {
            let ordering = arith::compare(&bindings.resolve(&arg(0)), &bindings.resolve(&arg(1)))?;
            arith::comparison_holds(builtin.name(), ordering).into()
        }

        Builtin::Var => bindings.walk(&arg(0)).is_variable().into(),
        Builtin::Nonvar => (!bindings.walk(&arg(0)).is_variable()).into(),
        Builtin::Atom => matches!(bindings.walk(&arg(0)), Term::Atom(_)).into(),
        Builtin::Number => matches!(bindings.walk(&arg(0)), Term::Number(_)).into(),
        Builtin::Integer => {
            matches!(bindings.walk(&arg(0)), Term::Number(Number::Integer(_))).into()
        }
        Builtin::Float => matches!(bindings.walk(&arg(0)), Term::Number(Number::Float(_))).into(),
        Builtin::Atomic => bindings.walk(&arg(0)).is_atomic().into(),
        Builtin::Compound => {
            matches!(bindings.walk(&arg(0)), Term::Compound { .. } | Term::ListCell(..)).into()
        }
        Builtin::Callable => bindings.walk(&arg(0)).is_callable().into(),
        Builtin::IsList => bindings.resolve(&arg(0)).list_items().is_some().into(),

        Builtin::Functor => functor(bindings, &arg(0), &arg(1), &arg(2))?,
        Builtin::Arg => arg_of(bindings, &arg(0), &arg(1), &arg(2))?,
        Builtin::Univ => univ(bindings, &arg(0), &arg(1))?,
        Builtin::CopyTerm => {
            let copy = bindings.copy(&arg(0));
            bindings.unify(&arg(1), &copy).into()
        }

        Builtin::Op => {
            ops.define(
                &bindings.resolve(&arg(0)),
                &bindings.resolve(&arg(1)),
                &bindings.resolve(&arg(2)),
            )
            .map_err(|e| ExecutionError::Domain(e.to_string()))?;
            Outcome::Succeed
        }
        Builtin::CurrentOp => current_op(ops, &arg(0), &arg(1), &arg(2)),

        Builtin::Write | Builtin::Writeln => {
            let text = TermWriter::with_operators(ops)
                .quoted(false)
                .write(&bindings.resolve(&arg(0)));
            out.push_str(&text);
            if builtin == Builtin::Writeln {
                out.push('\n');
            }
            Outcome::Succeed
        }
        Builtin::Nl => {
            out.push('\n');
            Outcome::Succeed
        }

        other => {
            return Err(ExecutionError::Domain(format!(
                "{} is not a deterministic built-in",
                other
            )))
        }
    };
    Ok(outcome)
}

/// Standard order of terms: variables, numbers, atoms, compounds
pub fn standard_order(a: &Term, b: &Term) -> Ordering {
    fn rank(t: &Term) -> u8 {
        match t {
            Term::Variable { .. } => 0,
            Term::Number(_) => 1,
            Term::Atom(_) => 3,
            Term::Compound { .. } | Term::ListCell(..) => 4,
        }
    }

    match (a, b) {
        (Term::Variable { id: x, .. }, Term::Variable { id: y, .. }) => x.cmp(y),
        (Term::Number(x), Term::Number(y)) => arith::compare_numbers(*x, *y)
            .unwrap_or(Ordering::Equal)
            .then_with(|| match (x, y) {
                (Number::Float(_), Number::Integer(_)) => Ordering::Less,
                (Number::Integer(_), Number::Float(_)) => Ordering::Greater,
                _ => Ordering::Equal,
            }),
        (Term::Atom(x), Term::Atom(y)) => x.cmp(y),
        _ if rank(a) == 4 && rank(b) == 4 => a
            .arity()
            .cmp(&b.arity())
            .then_with(|| a.name().cmp(&b.name()))
            .then_with(|| {
                a.args()
                    .into_iter()
                    .zip(b.args())
                    .map(|(x, y)| standard_order(x, y))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn functor(
    bindings: &mut Bindings,
    term: &Term,
    name: &Term,
    arity: &Term,
) -> Result<Outcome, ExecutionError> {
    let term = bindings.walk(term);
    if !term.is_variable() {
        let (n, a) = match &term {
            Term::Compound { .. } | Term::ListCell(..) => {
                (Term::atom(term.name().unwrap_or_default()), term.arity())
            }
            atomic => (atomic.clone(), 0),
        };
        let ok = bindings.unify(name, &n) && bindings.unify(arity, &Term::int(a as i64));
        return Ok(ok.into());
    }

    let name = bindings.walk(name);
    let arity = match bindings.walk(arity) {
        Term::Number(Number::Integer(a)) => {
            usize::try_from(a).map_err(|_| type_error("not_less_than_zero", &Term::int(a)))?
        }
        Term::Variable { .. } => return Err(ExecutionError::Instantiation),
        other => return Err(type_error("integer", &other)),
    };
    let built = match (&name, arity) {
        (Term::Variable { .. }, _) => return Err(ExecutionError::Instantiation),
        (atomic, 0) if atomic.is_atomic() => atomic.clone(),
        (Term::Atom(f), n) => {
            let args = (0..n).map(|_| bindings.fresh()).collect();
            Term::compound(f.clone(), args)
        }
        (other, _) => return Err(type_error("atom", other)),
    };
    Ok(bindings.unify(&term, &built).into())
}

fn arg_of(
    bindings: &mut Bindings,
    n: &Term,
    term: &Term,
    value: &Term,
) -> Result<Outcome, ExecutionError> {
    let term = bindings.walk(term);
    let args = match &term {
        Term::Compound { .. } | Term::ListCell(..) => term.args(),
        Term::Variable { .. } => return Err(ExecutionError::Instantiation),
        other => return Err(type_error("compound", other)),
    };
    match bindings.walk(n) {
        Term::Number(Number::Integer(i)) => {
            let found = usize::try_from(i)
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| args.get(i).copied());
            Ok(match found {
                Some(a) => bindings.unify(value, a).into(),
                None => Outcome::Fail,
            })
        }
        // Enumerate positions as a disjunction
        Term::Variable { .. } => {
            let alternatives = args
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    Term::compound(
                        ",",
                        vec![
                            Term::compound("=", vec![n.clone(), Term::int(i as i64 + 1)]),
                            Term::compound("=", vec![value.clone(), (*a).clone()]),
                        ],
                    )
                })
                .collect();
            Ok(disjunction(alternatives))
        }
        other => Err(type_error("integer", &other)),
    }
}

fn univ(bindings: &mut Bindings, term: &Term, list: &Term) -> Result<Outcome, ExecutionError> {
    let term = bindings.walk(term);
    if !term.is_variable() {
        let items = match &term {
            Term::Compound { .. } | Term::ListCell(..) => {
                let mut items = vec![Term::atom(term.name().unwrap_or_default())];
                items.extend(term.args().into_iter().cloned());
                items
            }
            atomic => vec![atomic.clone()],
        };
        return Ok(bindings.unify(list, &Term::list(items)).into());
    }

    let resolved = bindings.resolve(list);
    let items = resolved.list_items().ok_or(ExecutionError::Instantiation)?;
    let built = match items.split_first() {
        None => return Err(ExecutionError::Domain("non_empty_list".to_string())),
        Some((head, [])) if head.is_atomic() => (*head).clone(),
        Some((Term::Atom(f), args)) => {
            Term::compound(f.clone(), args.iter().map(|a| (*a).clone()).collect())
        }
        Some((Term::Variable { .. }, _)) => return Err(ExecutionError::Instantiation),
        Some((other, _)) => return Err(type_error("atom", other)),
    };
    Ok(bindings.unify(&term, &built).into())
}

fn current_op(ops: &OperatorTable, priority: &Term, op_type: &Term, name: &Term) -> Outcome {
    let alternatives = ops
        .operators()
        .into_iter()
        .map(|op| {
            Term::from_conjuncts(vec![
                Term::compound("=", vec![priority.clone(), Term::int(i64::from(op.priority))]),
                Term::compound("=", vec![op_type.clone(), Term::atom(op.op_type.as_str())]),
                Term::compound("=", vec![name.clone(), Term::atom(op.name)]),
            ])
        })
        .collect();
    disjunction(alternatives)
}

fn disjunction(mut alternatives: Vec<Term>) -> Outcome {
    let Some(mut goal) = alternatives.pop() else {
        return Outcome::Fail;
    };
    while let Some(alt) = alternatives.pop() {
        goal = Term::compound(";", vec![alt, goal]);
    }
    Outcome::Solve(goal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_term;
    use std::sync::Arc;

    fn term(text: &str) -> Term {
        let ops = Arc::new(OperatorTable::new());
        parse_term(text, &ops).unwrap().term
    }

    #[test]
    fn test_standard_order() {
        let sorted = ["_", "1.0", "1", "2", "a", "b", "f(a)", "g(a)", "f(a, b)"];
        let terms: Vec<Term> = sorted.iter().map(|t| term(t)).collect();
        for pair in terms.windows(2) {
            assert_eq!(standard_order(&pair[0], &pair[1]), Ordering::Less, "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_functor_and_univ() {
        let ops = OperatorTable::new();
        let mut b = Bindings::new();
        let base = b.reserve(3);
        let (n, a, l) = (Term::var("N", base), Term::var("A", base + 1), Term::var("L", base + 2));
        let mut out = String::new();

        let t = term("point(1, 2)");
        call(Builtin::Functor, &[t.clone(), n.clone(), a.clone()], &mut b, &ops, &mut out).unwrap();
        assert_eq!(b.resolve(&n), Term::atom("point"));
        assert_eq!(b.resolve(&a), Term::int(2));

        call(Builtin::Univ, &[t, l.clone()], &mut b, &ops, &mut out).unwrap();
        assert_eq!(b.resolve(&l).to_string(), "[point,1,2]");
    }

    #[test]
    fn test_is_and_write() {
        let ops = OperatorTable::new();
        let mut b = Bindings::new();
        let x = b.fresh();
        let mut out = String::new();
        call(Builtin::Is, &[x.clone(), term("2 * (3 + 4)")], &mut b, &ops, &mut out).unwrap();
        call(Builtin::Writeln, &[x], &mut b, &ops, &mut out).unwrap();
        assert_eq!(out, "14\n");
    }

    #[test]
    fn test_current_op_builds_alternatives() {
        let ops = OperatorTable::new();
        let mut b = Bindings::new();
        let p = b.fresh();
        let mut out = String::new();
        let outcome = call(
            Builtin::CurrentOp,
            &[p, Term::atom("xfx"), Term::atom(":-")],
            &mut b,
            &ops,
            &mut out,
        )
        .unwrap();
        assert!(matches!(outcome, Outcome::Solve(goal) if goal.is_functor(";", 2)));
    }
}
