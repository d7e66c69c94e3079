// src/runtime/engine.rs
//! Resolution engine
//!
//! The engine owns the program domain built from compiled predicates and
//! answers the current query by depth-first resolution over the clauses
//! the instructions were compiled from. Continuations are shared linked
//! frames so that a choicepoint can hold on to the goals that were
//! pending when it was created.

use super::bindings::Bindings;
use super::builtins::{self, type_error, Outcome};
use crate::config::Unknown;
use crate::observer::{CompilerObserver, Declaration};
use crate::parser::ast::{Functor, Position, Term};
use crate::parser::operators::OperatorTable;
use crate::precompiler::builtins::{as_builtin_call, Builtin};
use crate::{
    CompilationError, CompiledClause, CompiledPredicate, CompiledQuery, ExecutionError,
};
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

/// One answer: the query's named variables and their values
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    bindings: Vec<(String, Term)>,
}

impl Solution {
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.bindings.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bindings.is_empty() {
            return f.write_str("true");
        }
        for (i, (name, value)) in self.bindings.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} = {}", name, value)?;
        }
        Ok(())
    }
}

/// Predicates known to the engine, in first-seen order
#[derive(Debug, Serialize, Deserialize)]
struct Domain {
    predicates: Vec<CompiledPredicate>,
    #[serde(skip)]
    index: HashMap<Functor, usize>,
}

impl Domain {
    fn new() -> Self {
        Self {
            predicates: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .predicates
            .iter()
            .enumerate()
            .map(|(i, p)| (p.functor.clone(), i))
            .collect();
    }

    fn get(&self, functor: &Functor) -> Option<&CompiledPredicate> {
        self.index.get(functor).map(|&i| &self.predicates[i])
    }
}

/// What the machine reads while running
struct Program<'a> {
    domain: &'a Domain,
    ops: &'a OperatorTable,
    unknown: Unknown,
}

pub struct Engine {
    domain: Domain,
    ops: Arc<OperatorTable>,
    unknown: Unknown,
    query: Option<CompiledQuery>,
    output: String,
}

impl Engine {
    pub fn new(ops: Arc<OperatorTable>, unknown: Unknown) -> Self {
        Self {
            domain: Domain::new(),
            ops,
            unknown,
            query: None,
            output: String::new(),
        }
    }

    pub fn set_unknown(&mut self, unknown: Unknown) {
        self.unknown = unknown;
    }

    /// Merge a predicate into the domain. Clauses already present are
    /// skipped; new ones are appended after the existing ones.
    /// Returns how many clauses were added.
    pub fn add_to_domain(&mut self, predicate: CompiledPredicate) -> usize {
        let functor = predicate.functor.clone();
        match self.domain.index.get(&functor) {
            Some(&i) => {
                let added = self.domain.predicates[i].merge(predicate);
                debug!(predicate = %functor, added, "merged into domain");
                added
            }
            None => {
                let added = predicate.clauses.len();
                self.domain.index.insert(functor.clone(), self.domain.predicates.len());
                self.domain.predicates.push(predicate);
                debug!(predicate = %functor, added, "added to domain");
                added
            }
        }
    }

    pub fn add_clause(&mut self, clause: CompiledClause) -> usize {
        self.add_to_domain(CompiledPredicate::from_clause(clause))
    }

    /// Make a predicate known so that calling it fails instead of raising
    /// an unknown procedure error
    pub fn declare_dynamic(&mut self, functor: Functor) {
        let mut predicate = CompiledPredicate::new(functor);
        predicate.dynamic = true;
        self.add_to_domain(predicate);
    }

    pub fn predicate(&self, functor: &Functor) -> Option<&CompiledPredicate> {
        self.domain.get(functor)
    }

    pub fn predicates(&self) -> impl Iterator<Item = &CompiledPredicate> {
        self.domain.predicates.iter()
    }

    /// Predicates referenced by some clause body but defined nowhere
    pub fn undefined_predicates(&self) -> Vec<Functor> {
        let mut missing: Vec<Functor> = self
            .domain
            .predicates
            .iter()
            .flat_map(|p| p.clauses.iter())
            .flat_map(|c| c.references.iter())
            .filter(|f| !self.domain.index.contains_key(*f))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn set_query(&mut self, query: CompiledQuery) {
        self.query = Some(query);
    }

    /// First solution of the current query, or `None` when it fails
    pub fn resolve(&mut self) -> Result<Option<Solution>, ExecutionError> {
        self.iter_solutions()?.next().transpose()
    }

    /// Lazily enumerate the solutions of the current query. Every call
    /// starts the query afresh.
    pub fn iter_solutions(&mut self) -> Result<Solutions<'_>, ExecutionError> {
        let query = self.query.as_ref().ok_or(ExecutionError::UnsetQuery)?;
        let goal = query.goal();
        let names = query
            .variable_names
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .cloned()
            .collect();
        let mut bindings = Bindings::new();
        bindings.reserve(frame_size(&goal).max(query.clause.max_var_id().map_or(0, |m| m + 1)));
        Ok(Solutions {
            machine: Machine::new(bindings, goal),
            engine: self,
            names,
            done: false,
        })
    }

    /// Solve `goal` once and return it with its bindings applied
    pub fn solve_once(&mut self, goal: &Term) -> Result<Option<Term>, ExecutionError> {
        let mut bindings = Bindings::new();
        bindings.reserve(frame_size(goal));
        let mut machine = Machine::new(bindings, goal.clone());
        let program = Program {
            domain: &self.domain,
            ops: &self.ops,
            unknown: self.unknown,
        };
        if machine.next_solution(&program, &mut self.output)? {
            Ok(Some(machine.bindings.resolve(goal)))
        } else {
            Ok(None)
        }
    }

    pub fn listing(&self) -> String {
        self.domain
            .predicates
            .iter()
            .filter(|p| !p.clauses.is_empty())
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Serialize the domain for loading into another engine
    pub fn to_bytecode(&self) -> Result<Vec<u8>, CompilationError> {
        bincode::serialize(&self.domain).map_err(|e| CompilationError::Serialization(e.to_string()))
    }

    pub fn from_bytecode(
        bytes: &[u8],
        ops: Arc<OperatorTable>,
        unknown: Unknown,
    ) -> Result<Self, CompilationError> {
        let mut domain: Domain = bincode::deserialize(bytes)
            .map_err(|e| CompilationError::Serialization(e.to_string()))?;
        domain.reindex();
        Ok(Self {
            domain,
            ..Self::new(ops, unknown)
        })
    }

    fn defines(&self, name: &str, arity: usize) -> bool {
        self.domain
            .get(&Functor::new(name, arity))
            .is_some_and(|p| !p.clauses.is_empty())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("predicates", &self.domain.predicates.len())
            .field("unknown", &self.unknown)
            .field("query", &self.query.as_ref().map(|q| q.goal().to_string()))
            .finish()
    }
}

impl CompilerObserver for Engine {
    fn on_compilation(&mut self, clause: CompiledClause) -> Result<(), CompilationError> {
        self.add_clause(clause);
        Ok(())
    }

    /// Directives run as soon as they are compiled
    fn on_query_compilation(&mut self, query: CompiledQuery) -> Result<(), CompilationError> {
        let goal = query.goal();
        match self.solve_once(&goal) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                warn!(position = %query.clause.position, goal = %goal, "directive failed");
                Ok(())
            }
            Err(err) => Err(CompilationError::source(
                err.to_string(),
                format!(":- {}", goal),
                query.clause.position,
            )),
        }
    }

    fn on_declaration(&mut self, declaration: &Declaration) {
        match declaration {
            Declaration::Dynamic { predicate } => self.declare_dynamic(predicate.clone()),
            Declaration::Multifile { predicate } => {
                self.add_to_domain(CompiledPredicate::new(predicate.clone()));
            }
            Declaration::Flag { name, value } if name == "unknown" => {
                if let Some(unknown) = Unknown::from_flag(value) {
                    self.unknown = unknown;
                }
            }
            _ => {}
        }
    }

    fn evaluate_condition(
        &mut self,
        goal: &Term,
        _ops: &OperatorTable,
    ) -> Result<bool, CompilationError> {
        self.solve_once(goal)
            .map(|solution| solution.is_some())
            .map_err(|err| CompilationError::source(err.to_string(), goal, Position::default()))
    }

    fn expand_term(&mut self, term: &Term) -> Result<Option<Vec<Term>>, CompilationError> {
        if !self.defines("term_expansion", 2) {
            return Ok(None);
        }
        let result = Term::var("Expanded", frame_size(term));
        let goal = Term::compound("term_expansion", vec![term.clone(), result]);
        let solved = self
            .solve_once(&goal)
            .map_err(|err| CompilationError::source(err.to_string(), term, Position::default()))?;
        let Some(expanded) = solved.and_then(|g| g.arg(1).cloned()) else {
            return Ok(None);
        };
        let terms = match expanded.list_items() {
            Some(items) => items.into_iter().map(renumber).collect(),
            None => vec![renumber(&expanded)],
        };
        Ok(Some(terms))
    }

    fn expand_goal(&mut self, goal: &Term) -> Result<Option<Term>, CompilationError> {
        if !self.defines("goal_expansion", 2) {
            return Ok(None);
        }
        let result = Term::var("Expanded", frame_size(goal));
        let query = Term::compound("goal_expansion", vec![goal.clone(), result]);
        let solved = self
            .solve_once(&query)
            .map_err(|err| CompilationError::source(err.to_string(), goal, Position::default()))?;
        Ok(solved.and_then(|g| g.arg(1).cloned()))
    }
}

fn frame_size(term: &Term) -> usize {
    term.max_var_id().map_or(0, |m| m + 1)
}

/// Number a term's variables from zero in order of appearance
fn renumber(term: &Term) -> Term {
    let mut seen: HashMap<usize, Term> = HashMap::new();
    term.map_variables(&mut |name, id| {
        let next = seen.len();
        seen.entry(id).or_insert_with(|| Term::var(name, next)).clone()
    })
}

/// Lazy solutions of the engine's current query
pub struct Solutions<'a> {
    engine: &'a mut Engine,
    machine: Machine,
    names: Vec<(String, Term)>,
    done: bool,
}

impl Iterator for Solutions<'_> {
    type Item = Result<Solution, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let program = Program {
            domain: &self.engine.domain,
            ops: &self.engine.ops,
            unknown: self.engine.unknown,
        };
        match self.machine.next_solution(&program, &mut self.engine.output) {
            Ok(true) => {
                // Variables the answer leaves unbound are not reported
                let bindings = self
                    .names
                    .iter()
                    .filter_map(|(name, var)| {
                        let value = self.machine.bindings.resolve(var);
                        (value != *var).then(|| (name.clone(), value))
                    })
                    .collect();
                Some(Ok(Solution { bindings }))
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

type Cont = Option<Rc<Frame>>;

struct Frame {
    goal: Goal,
    next: Cont,
}

// A deep recursion leaves a long chain of frames; unlink it in a loop
impl Drop for Frame {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(frame) = next {
            next = match Rc::try_unwrap(frame) {
                Ok(mut frame) => frame.next.take(),
                Err(_) => None,
            };
        }
    }
}

enum Goal {
    /// Solve a term; a cut inside it removes choicepoints above `barrier`
    Call { term: Term, barrier: usize },
    CutTo(usize),
    /// Disable the else branch of a soft-cut without removing the
    /// condition's own choicepoints
    SoftCut(usize),
}

struct Choice {
    trail: usize,
    cont: Cont,
    alternative: Alternative,
}

enum Alternative {
    Clauses {
        goal: Term,
        predicate: usize,
        next: usize,
    },
    Goal {
        term: Term,
        barrier: usize,
    },
    Spent,
}

struct Machine {
    bindings: Bindings,
    goals: Cont,
    choices: Vec<Choice>,
    started: bool,
}

impl Machine {
    fn new(bindings: Bindings, goal: Term) -> Self {
        let mut machine = Self {
            bindings,
            goals: None,
            choices: Vec::new(),
            started: false,
        };
        machine.push(Goal::Call {
            term: goal,
            barrier: 0,
        });
        machine
    }

    fn push(&mut self, goal: Goal) {
        let next = self.goals.take();
        self.goals = Some(Rc::new(Frame { goal, next }));
    }

    fn push_choice(&mut self, alternative: Alternative) {
        self.choices.push(Choice {
            trail: self.bindings.mark(),
            cont: self.goals.clone(),
            alternative,
        });
    }

    /// Run to the next solution. Returns false once every alternative
    /// has been exhausted.
    fn next_solution(&mut self, program: &Program, out: &mut String) -> Result<bool, ExecutionError> {
        if self.started && !self.backtrack(program)? {
            return Ok(false);
        }
        self.started = true;
        loop {
            let Some(frame) = self.goals.take() else {
                return Ok(true);
            };
            self.goals = frame.next.clone();
            let ok = match &frame.goal {
                Goal::CutTo(height) => {
                    self.choices.truncate(*height);
                    true
                }
                Goal::SoftCut(index) => {
                    if let Some(choice) = self.choices.get_mut(*index) {
                        choice.alternative = Alternative::Spent;
                    }
                    true
                }
                Goal::Call { term, barrier } => self.call(program, out, term, *barrier)?,
            };
            if !ok && !self.backtrack(program)? {
                return Ok(false);
            }
        }
    }

    fn backtrack(&mut self, program: &Program) -> Result<bool, ExecutionError> {
        while let Some(choice) = self.choices.pop() {
            self.bindings.undo(choice.trail);
            self.goals = choice.cont;
            match choice.alternative {
                Alternative::Spent => {}
                Alternative::Goal { term, barrier } => {
                    self.push(Goal::Call { term, barrier });
                    return Ok(true);
                }
                Alternative::Clauses {
                    goal,
                    predicate,
                    next,
                } => {
                    if self.try_clauses(program, goal, predicate, next) {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn call(
        &mut self,
        program: &Program,
        out: &mut String,
        term: &Term,
        barrier: usize,
    ) -> Result<bool, ExecutionError> {
        let goal = strip(self.bindings.walk(term));
        match &goal {
            Term::Variable { .. } => return Err(ExecutionError::Instantiation),
            Term::Number(_) => return Err(type_error("callable", &goal)),
            _ => {}
        }
        if goal.is_atom("!") {
            self.choices.truncate(barrier);
            return Ok(true);
        }
        match Builtin::for_goal(&goal) {
            Some(builtin) => self.call_builtin(program, out, builtin, &goal, barrier),
            None => self.call_user(program, goal),
        }
    }

    fn call_builtin(
        &mut self,
        program: &Program,
        out: &mut String,
        builtin: Builtin,
        goal: &Term,
        barrier: usize,
    ) -> Result<bool, ExecutionError> {
        let args: Vec<Term> = goal.args().into_iter().cloned().collect();
        match (builtin, args.as_slice()) {
            (Builtin::Conjunction, [left, right]) => {
                self.push(Goal::Call {
                    term: right.clone(),
                    barrier,
                });
                self.push(Goal::Call {
                    term: left.clone(),
                    barrier,
                });
            }
            (Builtin::Disjunction, [left, right]) => {
                let left = strip(self.bindings.walk(left));
                let branch = |t: &Term, i: usize| t.arg(i).cloned().unwrap_or_else(Term::nil);
                if left.is_functor("->", 2) {
                    self.if_then_else(branch(&left, 0), branch(&left, 1), Some(right.clone()), barrier);
                } else if left.is_functor("*->", 2) {
                    self.soft_if_then_else(branch(&left, 0), branch(&left, 1), right.clone(), barrier);
                } else {
                    self.push_choice(Alternative::Goal {
                        term: right.clone(),
                        barrier,
                    });
                    self.push(Goal::Call {
                        term: left,
                        barrier,
                    });
                }
            }
            (Builtin::IfThen, [cond, then]) => {
                self.if_then_else(cond.clone(), then.clone(), None, barrier);
            }
            (Builtin::SoftIfThen, [cond, then]) => {
                self.push(Goal::Call {
                    term: then.clone(),
                    barrier,
                });
                self.push(Goal::Call {
                    term: cond.clone(),
                    barrier: self.choices.len(),
                });
            }
            (Builtin::Not, [inner]) => {
                self.if_then_else(inner.clone(), Term::atom("fail"), Some(Term::atom("true")), barrier);
            }
            (Builtin::Call(_), [target, extra @ ..]) => {
                let goal = add_args(strip(self.bindings.walk(target)), extra)?;
                self.push(Goal::Call {
                    term: goal,
                    barrier: self.choices.len(),
                });
            }
            (Builtin::Findall, [template, inner, result]) => {
                let found = self.findall(program, out, template, inner)?;
                return Ok(self.bindings.unify(result, &Term::list(found)));
            }
            _ => {
                return match builtins::call(builtin, &args, &mut self.bindings, program.ops, out)? {
                    Outcome::Succeed => Ok(true),
                    Outcome::Fail => Ok(false),
                    Outcome::Solve(term) => {
                        self.push(Goal::Call { term, barrier });
                        Ok(true)
                    }
                };
            }
        }
        Ok(true)
    }

    fn if_then_else(&mut self, cond: Term, then: Term, otherwise: Option<Term>, barrier: usize) {
        let height = self.choices.len();
        if let Some(otherwise) = otherwise {
            self.push_choice(Alternative::Goal {
                term: otherwise,
                barrier,
            });
        }
        self.push(Goal::Call {
            term: then,
            barrier,
        });
        self.push(Goal::CutTo(height));
        self.push(Goal::Call {
            term: cond,
            barrier: self.choices.len(),
        });
    }

    fn soft_if_then_else(&mut self, cond: Term, then: Term, otherwise: Term, barrier: usize) {
        let index = self.choices.len();
        self.push_choice(Alternative::Goal {
            term: otherwise,
            barrier,
        });
        self.push(Goal::Call {
            term: then,
            barrier,
        });
        self.push(Goal::SoftCut(index));
        self.push(Goal::Call {
            term: cond,
            barrier: self.choices.len(),
        });
    }

    /// Collect copies of `template` for every solution of `goal` in a
    /// nested machine that shares this machine's bindings
    fn findall(
        &mut self,
        program: &Program,
        out: &mut String,
        template: &Term,
        goal: &Term,
    ) -> Result<Vec<Term>, ExecutionError> {
        let mark = self.bindings.mark();
        let bindings = std::mem::take(&mut self.bindings);
        let mut inner = Machine::new(bindings, Term::compound("call", vec![goal.clone()]));
        let mut found = Vec::new();
        let outcome = loop {
            match inner.next_solution(program, out) {
                Ok(true) => found.push(inner.bindings.resolve(template)),
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.bindings = inner.bindings;
        self.bindings.undo(mark);
        outcome?;
        Ok(found.iter().map(|t| self.bindings.copy(t)).collect())
    }

    fn call_user(&mut self, program: &Program, goal: Term) -> Result<bool, ExecutionError> {
        let functor = goal
            .functor()
            .ok_or_else(|| type_error("callable", &goal))?;
        if let Some(&predicate) = program.domain.index.get(&functor) {
            return Ok(self.try_clauses(program, goal, predicate, 0));
        }

        // A HiLog application with no clauses of its own calls its functor
        if functor.name == "apply" && functor.arity > 1 {
            let args: Vec<Term> = goal.args().into_iter().cloned().collect();
            let target = strip(self.bindings.walk(&args[0]));
            let goal = add_args(target, &args[1..])?;
            self.push(Goal::Call {
                term: goal,
                barrier: self.choices.len(),
            });
            return Ok(true);
        }

        match program.unknown {
            Unknown::Error => Err(ExecutionError::UnknownProcedure {
                name: functor.name,
                arity: functor.arity,
            }),
            Unknown::Fail => Ok(false),
        }
    }

    /// Try the clauses of `predicate` from index `start`, leaving a
    /// choicepoint when another clause could still match
    fn try_clauses(&mut self, program: &Program, goal: Term, predicate: usize, start: usize) -> bool {
        let clauses = &program.domain.predicates[predicate].clauses;
        let Some(current) = self.next_candidate(clauses, &goal, start) else {
            return false;
        };
        let barrier = self.choices.len();
        if let Some(next) = self.next_candidate(clauses, &goal, current + 1) {
            self.push_choice(Alternative::Clauses {
                goal: goal.clone(),
                predicate,
                next,
            });
        }

        let clause = &clauses[current].clause;
        let base = self
            .bindings
            .reserve(clause.max_var_id().map_or(0, |m| m + 1));
        if let Some(head) = &clause.head {
            if !self.bindings.unify(&Bindings::rename(head, base), &goal) {
                return false;
            }
        }
        for body_goal in clause.body.iter().rev() {
            self.push(Goal::Call {
                term: Bindings::rename(body_goal, base),
                barrier,
            });
        }
        true
    }

    /// First clause from `start` whose first head argument could match
    fn next_candidate(&self, clauses: &[CompiledClause], goal: &Term, start: usize) -> Option<usize> {
        let key = goal.arg(0).map(|a| self.bindings.walk(a));
        (start..clauses.len()).find(|&i| {
            let head_key = clauses[i].clause.head.as_ref().and_then(|h| h.arg(0));
            match (&key, head_key) {
                (Some(a), Some(b)) => may_unify(a, b),
                _ => true,
            }
        })
    }
}

fn may_unify(a: &Term, b: &Term) -> bool {
    match (a, b) {
        (Term::Variable { .. }, _) | (_, Term::Variable { .. }) => true,
        (Term::Number(x), Term::Number(y)) => x == y,
        (Term::Atom(x), Term::Atom(y)) => x == y,
        (Term::Atom(_) | Term::Number(_), _) | (_, Term::Atom(_) | Term::Number(_)) => false,
        _ => a.name() == b.name() && a.arity() == b.arity(),
    }
}

/// Drop the built-in marker left by substitution
fn strip(goal: Term) -> Term {
    match as_builtin_call(&goal) {
        Some((_, inner)) => inner.clone(),
        None => goal,
    }
}

/// `call/N`: extend a goal with extra arguments
fn add_args(goal: Term, extra: &[Term]) -> Result<Term, ExecutionError> {
    if extra.is_empty() {
        return match goal {
            Term::Variable { .. } => Err(ExecutionError::Instantiation),
            Term::Number(_) => Err(type_error("callable", &goal)),
            other => Ok(other),
        };
    }
    match &goal {
        Term::Variable { .. } => return Err(ExecutionError::Instantiation),
        Term::Number(_) => return Err(type_error("callable", &goal)),
        Term::Atom(_) | Term::Compound { .. } | Term::ListCell(..) => {}
    }
    let name = goal.name().unwrap_or_default().to_string();
    let mut args = goal.into_args();
    args.extend_from_slice(extra);
    Ok(Term::compound(name, args))
}
