// src/precompiler/expansion.rs
//! Term and goal expansion

use super::builtins::meta_goal_positions;
use crate::observer::CompilerObserver;
use crate::parser::ast::{Clause, Term};
use crate::CompilationError;
use ahash::{HashMap, HashSet};

/// Rust-side rewriting hook registered on a `CompilationContext`.
///
/// Hooks run in registration order, each seeing the previous hook's
/// output. Returning `None` leaves the input unchanged.
pub trait ExpansionHook: Send + Sync {
    fn name(&self) -> &str;

    fn expand_term(&self, _term: &Term) -> Option<Vec<Term>> {
        None
    }

    fn expand_goal(&self, _goal: &Term) -> Option<Term> {
        None
    }
}

/// Expand one top-level term into zero or more terms.
///
/// `{T}` is taken literally as `T` with no hook consulted.
pub fn expand_term(
    term: Term,
    hooks: &[Box<dyn ExpansionHook>],
    observer: &mut dyn CompilerObserver,
) -> Result<Vec<Term>, CompilationError> {
    if term.is_functor("{}", 1) {
        return Ok(term.into_args());
    }
    expand_with_hooks(term, hooks, observer)
}

fn expand_with_hooks(
    term: Term,
    hooks: &[Box<dyn ExpansionHook>],
    observer: &mut dyn CompilerObserver,
) -> Result<Vec<Term>, CompilationError> {
    let mut terms = vec![term];
    for hook in hooks {
        terms = terms
            .into_iter()
            .flat_map(|t| match hook.expand_term(&t) {
                Some(expanded) => {
                    tracing::trace!(hook = hook.name(), term = %t, "term expanded");
                    expanded
                }
                None => vec![t],
            })
            .collect();
    }

    let mut out = Vec::with_capacity(terms.len());
    for t in terms {
        match observer.expand_term(&t)? {
            Some(expanded) => out.extend(expanded),
            None => out.push(t),
        }
    }
    Ok(out)
}

/// Rewrites body goals until no hook changes them
pub struct GoalExpander<'a> {
    pub hooks: &'a [Box<dyn ExpansionHook>],
    pub max_depth: usize,
}

impl GoalExpander<'_> {
    /// Expand every body goal of a clause; the head is never touched
    pub fn expand_clause(
        &self,
        clause: Clause,
        observer: &mut dyn CompilerObserver,
    ) -> Result<Clause, CompilationError> {
        let mut next_id = clause.max_var_id().map_or(0, |m| m + 1);
        let mut body = Vec::with_capacity(clause.body.len());
        for goal in &clause.body {
            let expanded = self
                .expand(goal, observer)
                .map_err(|e| e.with_position(clause.position))?;
            let expanded = rename_introduced(goal, &expanded, &mut next_id);
            // An expansion may produce a conjunction; keep the body flat
            body.extend(expanded.conjuncts().into_iter().cloned());
        }
        Ok(Clause { body, ..clause })
    }

    pub fn expand(
        &self,
        goal: &Term,
        observer: &mut dyn CompilerObserver,
    ) -> Result<Term, CompilationError> {
        let mut current = goal.clone();
        let mut rounds = 0;
        loop {
            if current.is_variable() {
                return Ok(current);
            }
            let mut changed = false;
            for hook in self.hooks {
                if let Some(next) = hook.expand_goal(&current) {
                    if next != current {
                        tracing::trace!(hook = hook.name(), from = %current, to = %next, "goal expanded");
                        current = next;
                        changed = true;
                    }
                }
            }
            if let Some(next) = observer.expand_goal(&current)? {
                if next != current {
                    current = next;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            rounds += 1;
            if rounds > self.max_depth {
                return Err(CompilationError::SourceCode {
                    message: format!(
                        "goal expansion of {} did not settle after {} rounds",
                        goal, self.max_depth
                    ),
                    clause: goal.to_string(),
                    line: 0,
                    column: 0,
                });
            }
        }

        let positions = meta_goal_positions(&current);
        if positions.is_empty() {
            return Ok(current);
        }
        let Term::Compound { functor, args } = &current else {
            return Ok(current);
        };
        let mut expanded = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            if positions.contains(&i) {
                expanded.push(self.expand(arg, observer)?);
            } else {
                expanded.push(arg.clone());
            }
        }
        Ok(Term::Compound {
            functor: functor.clone(),
            args: expanded,
        })
    }
}

/// Give variables that an expansion introduced ids past the clause's own,
/// so they cannot collide with variables of other goals.
fn rename_introduced(original: &Term, expanded: &Term, next_id: &mut usize) -> Term {
    let known: HashSet<usize> = original
        .variables()
        .into_iter()
        .filter_map(|v| match v {
            Term::Variable { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    let mut fresh: HashMap<usize, Term> = HashMap::default();
    expanded.map_variables(&mut |name, id| {
        if known.contains(&id) {
            return Term::var(name, id);
        }
        fresh
            .entry(id)
            .or_insert_with(|| {
                let v = Term::var(name, *next_id);
                *next_id += 1;
                v
            })
            .clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::EventLog;
    use crate::parser::{parse_term, OperatorTable};
    use std::sync::Arc;

    struct Rename;

    impl ExpansionHook for Rename {
        fn name(&self) -> &str {
            "rename"
        }

        fn expand_term(&self, term: &Term) -> Option<Vec<Term>> {
            term.is_functor("twice", 1).then(|| {
                let arg = term.arg(0).cloned().unwrap_or_else(Term::nil);
                vec![
                    Term::compound("first", vec![arg.clone()]),
                    Term::compound("second", vec![arg]),
                ]
            })
        }

        fn expand_goal(&self, goal: &Term) -> Option<Term> {
            if goal.is_atom("old") {
                Some(Term::atom("new"))
            } else if goal.is_atom("loop") {
                Some(Term::atom("pool"))
            } else if goal.is_atom("pool") {
                Some(Term::atom("loop"))
            } else {
                None
            }
        }
    }

    fn term(text: &str) -> Term {
        let ops = Arc::new(OperatorTable::new());
        parse_term(text, &ops).unwrap().term
    }

    #[test]
    fn test_term_hooks_and_bypass() {
        let hooks: Vec<Box<dyn ExpansionHook>> = vec![Box::new(Rename)];
        let mut log = EventLog::new();

        let out = expand_term(term("twice(a)"), &hooks, &mut log).unwrap();
        assert_eq!(out, vec![term("first(a)"), term("second(a)")]);

        let out = expand_term(term("{twice(a)}"), &hooks, &mut log).unwrap();
        assert_eq!(out, vec![term("twice(a)")]);
    }

    #[test]
    fn test_goal_expansion_descends_into_control() {
        let hooks: Vec<Box<dyn ExpansionHook>> = vec![Box::new(Rename)];
        let expander = GoalExpander {
            hooks: &hooks,
            max_depth: 8,
        };
        let mut log = EventLog::new();
        let goal = expander
            .expand(&term("(a -> old ; \\+ old)"), &mut log)
            .unwrap();
        assert_eq!(goal, term("(a -> new ; \\+ new)"));
    }

    #[test]
    fn test_goal_expansion_is_bounded() {
        let hooks: Vec<Box<dyn ExpansionHook>> = vec![Box::new(Rename)];
        let expander = GoalExpander {
            hooks: &hooks,
            max_depth: 8,
        };
        let mut log = EventLog::new();
        let err = expander.expand(&term("loop"), &mut log).unwrap_err();
        assert!(err.to_string().contains("did not settle"));
    }
}
