// src/precompiler/dcg.rs
//! Grammar rule translation
//!
//! `Head --> Body` becomes an ordinary clause whose goals thread a pair of
//! list arguments `S0`/`S` through the body.

use crate::parser::ast::Term;

/// Fresh variables numbered above those of the rule being translated
struct Fresh {
    next: usize,
}

impl Fresh {
    fn var(&mut self) -> Term {
        let id = self.next;
        self.next += 1;
        Term::var(format!("_S{}", id), id)
    }
}

pub fn is_grammar_rule(term: &Term) -> bool {
    term.is_functor("-->", 2)
}

/// Translate a `-->/2` term into a clause term
pub fn translate(rule: &Term) -> Result<Term, String> {
    let (head, body) = match rule {
        Term::Compound { functor, args } if functor == "-->" && args.len() == 2 => {
            (&args[0], &args[1])
        }
        other => return Err(format!("not a grammar rule: {}", other)),
    };
    let mut fresh = Fresh {
        next: rule.max_var_id().map_or(0, |m| m + 1),
    };
    let s0 = fresh.var();
    let s = fresh.var();

    // Pushback: `H, PB --> B`
    let (nonterminal, pushback) = match head {
        Term::Compound { functor, args } if functor == "," && args.len() == 2 => {
            (&args[0], Some(&args[1]))
        }
        _ => (head, None),
    };

    let new_head = extend(nonterminal, s0.clone(), s.clone())
        .ok_or_else(|| format!("invalid grammar rule head: {}", nonterminal))?;

    let new_body = match pushback {
        None => body_goal(body, s0, s, &mut fresh)?,
        Some(list) => {
            if list.list_items().is_none() {
                return Err(format!("pushback must be a list: {}", list));
            }
            let mid = fresh.var();
            let parsed = body_goal(body, s0, mid.clone(), &mut fresh)?;
            let pushed = terminals(list, s, mid)?;
            conj(parsed, pushed)
        }
    };

    Ok(Term::compound(":-", vec![new_head, new_body]))
}

/// Append the two list arguments to a non-terminal
fn extend(nonterminal: &Term, s0: Term, s: Term) -> Option<Term> {
    match nonterminal {
        Term::Atom(name) => Some(Term::compound(name.clone(), vec![s0, s])),
        Term::Compound { functor, args } => {
            let mut args = args.clone();
            args.push(s0);
            args.push(s);
            Some(Term::compound(functor.clone(), args))
        }
        _ => None,
    }
}

fn body_goal(body: &Term, s0: Term, s: Term, fresh: &mut Fresh) -> Result<Term, String> {
    if body.is_variable() {
        return Ok(Term::compound("phrase", vec![body.clone(), s0, s]));
    }
    if body.is_nil() {
        return Ok(unify(s0, s));
    }
    if let Term::ListCell(..) = body {
        return terminals(body, s0, s);
    }

    let args = body.args();
    match (body.name(), args.as_slice()) {
        (Some(","), [a, b]) => {
            let mid = fresh.var();
            let left = body_goal(a, s0, mid.clone(), fresh)?;
            let right = body_goal(b, mid, s, fresh)?;
            Ok(conj(left, right))
        }
        (Some(";" | "|"), [a, b]) => {
            let left = body_goal(a, s0.clone(), s.clone(), fresh)?;
            let right = body_goal(b, s0, s, fresh)?;
            Ok(Term::compound(";", vec![left, right]))
        }
        (Some(op @ ("->" | "*->")), [c, t]) => {
            let mid = fresh.var();
            let cond = body_goal(c, s0, mid.clone(), fresh)?;
            let then = body_goal(t, mid, s, fresh)?;
            Ok(Term::compound(op, vec![cond, then]))
        }
        (Some("\\+"), [g]) => {
            let discard = fresh.var();
            let goal = body_goal(g, s0.clone(), discard, fresh)?;
            Ok(conj(Term::compound("\\+", vec![goal]), unify(s0, s)))
        }
        (Some("!"), []) => Ok(conj(Term::atom("!"), unify(s0, s))),
        (Some("{}"), [g]) => Ok(conj((*g).clone(), unify(s0, s))),
        (Some("call"), [_, ..]) => {
            let mut call_args: Vec<Term> = args.iter().map(|a| (*a).clone()).collect();
            call_args.push(s0);
            call_args.push(s);
            Ok(Term::compound("call", call_args))
        }
        _ => extend(body, s0, s).ok_or_else(|| format!("invalid grammar body: {}", body)),
    }
}

/// `S0 = [t1, ..., tn | S]` for a terminal list
fn terminals(list: &Term, s0: Term, s: Term) -> Result<Term, String> {
    let items = list
        .list_items()
        .ok_or_else(|| format!("terminals must form a proper list: {}", list))?;
    let items = items.into_iter().cloned().collect();
    Ok(unify(s0, Term::list_with_tail(items, s)))
}

fn unify(a: Term, b: Term) -> Term {
    Term::compound("=", vec![a, b])
}

fn conj(a: Term, b: Term) -> Term {
    Term::compound(",", vec![a, b])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_term, OperatorTable};
    use std::sync::Arc;

    fn translated(text: &str) -> String {
        let ops = Arc::new(OperatorTable::new());
        let rule = parse_term(text, &ops).unwrap().term;
        translate(&rule).unwrap().to_string()
    }

    #[test]
    fn test_terminals_and_nonterminals() {
        assert_eq!(
            translated("greeting --> [hello], name"),
            "greeting(_S0,_S1) :- _S0 = [hello|_S2],name(_S2,_S1)"
        );
        assert_eq!(translated("empty --> []"), "empty(_S0,_S1) :- _S0 = _S1");
    }

    #[test]
    fn test_arguments_and_braces() {
        assert_eq!(
            translated("digit(D) --> [D], {D >= 48}"),
            "digit(D,_S1,_S2) :- _S1 = [D|_S3],D >= 48,_S3 = _S2"
        );
    }

    #[test]
    fn test_alternatives_and_call() {
        assert_eq!(
            translated("ab --> ([a] | [b]), call(rest, x)"),
            "ab(_S0,_S1) :- (_S0 = [a|_S2] ; _S0 = [b|_S2]),call(rest,x,_S2,_S1)"
        );
    }

    #[test]
    fn test_pushback_and_variable_body() {
        assert_eq!(
            translated("look, [X] --> [X]"),
            "look(_S1,_S2) :- _S1 = [X|_S3],_S2 = [X|_S3]"
        );
        assert_eq!(translated("p --> G"), "p(_S1,_S2) :- phrase(G,_S1,_S2)");
    }

    #[test]
    fn test_invalid_rules() {
        let ops = Arc::new(OperatorTable::new());
        let rule = parse_term("p --> 42", &ops).unwrap().term;
        assert!(translate(&rule).is_err());
        let rule = parse_term("p, foo --> [a]", &ops).unwrap().term;
        assert!(translate(&rule).is_err());
    }
}
