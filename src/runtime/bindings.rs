// src/runtime/bindings.rs
//! Variable bindings with a trail for backtracking

use crate::parser::ast::Term;
use ahash::HashMap;

/// Binding store indexed by variable id.
///
/// Every binding is recorded on the trail; `undo` pops bindings back to
/// an earlier mark.
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    values: Vec<Option<Term>>,
    trail: Vec<usize>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` fresh variable ids and return the first
    pub fn reserve(&mut self, count: usize) -> usize {
        let base = self.values.len();
        self.values.resize(base + count, None);
        base
    }

    pub fn fresh(&mut self) -> Term {
        let id = self.reserve(1);
        Term::var(format!("_G{}", id), id)
    }

    /// Rename a term's variables by offsetting their ids by `base`
    pub fn rename(term: &Term, base: usize) -> Term {
        term.map_variables(&mut |_, id| {
            let id = base + id;
            Term::var(format!("_G{}", id), id)
        })
    }

    /// Copy of the resolved term with every unbound variable replaced by
    /// a fresh one
    pub fn copy(&mut self, term: &Term) -> Term {
        let resolved = self.resolve(term);
        let mut fresh: HashMap<usize, Term> = HashMap::default();
        resolved.map_variables(&mut |_, id| {
            fresh.entry(id).or_insert_with(|| self.fresh()).clone()
        })
    }

    pub fn mark(&self) -> usize {
        self.trail.len()
    }

    pub fn undo(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(id) = self.trail.pop() {
                if let Some(slot) = self.values.get_mut(id) {
                    *slot = None;
                }
            }
        }
    }

    fn bind(&mut self, id: usize, value: Term) {
        if id >= self.values.len() {
            self.values.resize(id + 1, None);
        }
        self.values[id] = Some(value);
        self.trail.push(id);
    }

    fn deref<'a>(&'a self, term: &'a Term) -> &'a Term {
        let mut current = term;
        while let Term::Variable { id, .. } = current {
            match self.values.get(*id) {
                Some(Some(value)) => current = value,
                _ => break,
            }
        }
        current
    }

    /// Follow variable bindings at the top of a term
    pub fn walk(&self, term: &Term) -> Term {
        self.deref(term).clone()
    }

    /// Apply every binding throughout a term
    pub fn resolve(&self, term: &Term) -> Term {
        let mut heads = Vec::new();
        let mut current = self.deref(term);
        while let Term::ListCell(h, t) = current {
            heads.push(self.resolve(h));
            current = self.deref(t);
        }
        let last = match current {
            Term::Compound { functor, args } => Term::Compound {
                functor: functor.clone(),
                args: args.iter().map(|a| self.resolve(a)).collect(),
            },
            other => other.clone(),
        };
        Term::list_with_tail(heads, last)
    }

    /// Unify without occurs check. Bindings made by a failed attempt stay
    /// on the trail; callers undo to their own mark.
    ///
    /// Pairs still to unify sit on an explicit stack, so a list's tail is
    /// handled after its head without growing the call stack.
    pub fn unify(&mut self, a: &Term, b: &Term) -> bool {
        let mut pending = vec![(a.clone(), b.clone())];
        while let Some((a, b)) = pending.pop() {
            let a = self.walk_owned(a);
            let b = self.walk_owned(b);
            match (&a, &b) {
                (Term::Variable { id: x, .. }, Term::Variable { id: y, .. }) if x == y => continue,
                (Term::Variable { id, .. }, _) => {
                    let id = *id;
                    self.bind(id, b);
                    continue;
                }
                (_, Term::Variable { id, .. }) => {
                    let id = *id;
                    self.bind(id, a);
                    continue;
                }
                (Term::Atom(x), Term::Atom(y)) if x == y => continue,
                (Term::Number(x), Term::Number(y)) if x == y => continue,
                (
                    Term::Compound { functor: f, args: xs },
                    Term::Compound { functor: g, args: ys },
                ) if f == g && xs.len() == ys.len() => {}
                (Term::ListCell(..), Term::ListCell(..)) => {}
                _ => return false,
            }
            let pairs = a.into_args().into_iter().zip(b.into_args());
            pending.extend(pairs.rev());
        }
        true
    }

    fn walk_owned(&self, term: Term) -> Term {
        if term.is_variable() {
            self.walk(&term)
        } else {
            term
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unify_and_undo() {
        let mut b = Bindings::new();
        let base = b.reserve(2);
        let x = Term::var("X", base);
        let y = Term::var("Y", base + 1);
        let mark = b.mark();

        let left = Term::compound("f", vec![x.clone(), Term::atom("b")]);
        let right = Term::compound("f", vec![Term::atom("a"), y.clone()]);
        assert!(b.unify(&left, &right));
        assert_eq!(b.resolve(&left), Term::compound("f", vec![Term::atom("a"), Term::atom("b")]));

        b.undo(mark);
        assert!(b.walk(&x).is_variable());
        assert!(!b.unify(&Term::atom("a"), &Term::int(1)));
    }

    #[test]
    fn test_variable_chains() {
        let mut b = Bindings::new();
        let x = b.fresh();
        let y = b.fresh();
        assert!(b.unify(&x, &y));
        assert!(b.unify(&y, &Term::list(vec![Term::int(1)])));
        assert_eq!(b.resolve(&x), Term::list(vec![Term::int(1)]));
    }

    #[test]
    fn test_long_lists_unify_and_resolve() {
        let mut b = Bindings::new();
        let tail = b.fresh();
        let open = Term::list_with_tail((0..200_000).map(Term::int).collect(), tail.clone());
        let closed = Term::list((0..200_001).map(Term::int).collect());
        assert!(b.unify(&open, &closed));
        assert_eq!(b.resolve(&tail), Term::list(vec![Term::int(200_000)]));
        assert_eq!(b.resolve(&open), closed);

        let mark = b.mark();
        let other = Term::list((0..200_001).map(|i| Term::int(i % 7)).collect());
        assert!(!b.unify(&closed, &other));
        b.undo(mark);
    }
}
