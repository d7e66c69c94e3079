// src/precompiler/mod.rs
//! Pre-compilation: the rewriting stages between the reader and the
//! instruction compiler
//!
//! Every top-level term gets its own LIFO task list. A task may push
//! follow-on tasks, which run to completion before anything queued
//! earlier. Nothing on the task list outlives the term that created it.

pub mod builtins;
pub mod conditional;
pub mod dcg;
pub mod expansion;
pub mod symbols;

use crate::config::{CompilerConfig, DoubleQuotes, Unknown};
use crate::observer::{CompilerObserver, Declaration, Warning};
use crate::parser::ast::{Clause, ClauseKind, Functor, Position, ReadTerm, Term};
use crate::parser::operators::OperatorTable;
use crate::CompilationError;
use builtins::Builtin;
use conditional::{CondDirective, ConditionalStack};
use expansion::GoalExpander;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use symbols::{GoalMark, SymbolKey, SymbolTable, UnitSummary};

pub use expansion::ExpansionHook;

/// One item fed to the pipeline. A unit's terms are bracketed by
/// `BeginOfFile` and `EndOfFile`.
#[derive(Debug, Clone)]
pub enum Input {
    BeginOfFile(String),
    Term(ReadTerm),
    EndOfFile,
}

/// A clause ready for instruction compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecompiledClause {
    pub clause: Clause,
    /// Symbol key of the head functor; `None` for queries
    pub key: Option<SymbolKey>,
    pub marks: Vec<GoalMark>,
    pub variable_names: Vec<(String, Term)>,
}

impl PrecompiledClause {
    pub fn is_query(&self) -> bool {
        self.clause.head.is_none()
    }
}

/// What the pipeline hands on, in order. The receiver reports
/// `UnitClosed` to its observer once the outputs before it are dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Clause(PrecompiledClause),
    UnitClosed(UnitSummary),
}

/// Clause in flight between stages
#[derive(Debug)]
struct Pending {
    clause: Clause,
    variable_names: Vec<(String, Term)>,
}

#[derive(Debug)]
enum Task {
    Conditional(ReadTerm),
    TermExpansion(ReadTerm),
    Dcg(ReadTerm),
    Classify(ReadTerm),
    GoalExpansion(Pending),
    Builtins(Pending),
    Initialize(Pending),
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::Conditional(_) => "conditional",
            Task::TermExpansion(_) => "term_expansion",
            Task::Dcg(_) => "dcg",
            Task::Classify(_) => "classify",
            Task::GoalExpansion(_) => "goal_expansion",
            Task::Builtins(_) => "builtins",
            Task::Initialize(_) => "initialize",
        }
    }
}

/// Everything the pipeline needs, passed explicitly.
///
/// The operator table is shared with the parser reading the unit, so
/// `op/3` directives take effect on the very next term read.
pub struct CompilationContext {
    pub ops: Arc<OperatorTable>,
    pub config: CompilerConfig,
    pub symbols: SymbolTable,
    hooks: Vec<Box<dyn ExpansionHook>>,
    conditionals: ConditionalStack,
    initialization: Vec<Pending>,
}

impl CompilationContext {
    pub fn new(config: CompilerConfig) -> Self {
        Self::with_operators(Arc::new(OperatorTable::new()), config)
    }

    pub fn with_operators(ops: Arc<OperatorTable>, config: CompilerConfig) -> Self {
        Self {
            ops,
            config,
            symbols: SymbolTable::new(),
            hooks: Vec::new(),
            conditionals: ConditionalStack::new(),
            initialization: Vec::new(),
        }
    }

    pub fn add_hook(&mut self, hook: Box<dyn ExpansionHook>) {
        tracing::debug!(hook = hook.name(), "expansion hook registered");
        self.hooks.push(hook);
    }

    pub fn hooks(&self) -> &[Box<dyn ExpansionHook>] {
        &self.hooks
    }

    /// True while inside a false conditional-compilation branch
    pub fn is_skipping(&self) -> bool {
        self.conditionals.is_skipping()
    }

    /// Run one input through the pipeline
    pub fn precompile(
        &mut self,
        input: Input,
        observer: &mut dyn CompilerObserver,
    ) -> Result<Vec<Output>, CompilationError> {
        match input {
            Input::BeginOfFile(name) => {
                tracing::debug!(unit = %name, "unit opened");
                self.symbols.open_unit(&name);
                self.conditionals = ConditionalStack::new();
                self.initialization.clear();
                observer.on_unit_opened(&name);
                Ok(Vec::new())
            }
            Input::Term(read) => self.run(vec![Task::Conditional(read)], observer),
            Input::EndOfFile => self.end_unit(observer),
        }
    }

    /// Pre-compile a query read outside any unit
    pub fn precompile_query(
        &mut self,
        read: ReadTerm,
        observer: &mut dyn CompilerObserver,
    ) -> Result<PrecompiledClause, CompilationError> {
        let position = read.position;
        let clause = Clause::from_term(Term::compound("?-", vec![read.term]), position)
            .map_err(|m| CompilationError::source(m, "?-", position))?;
        let tasks = vec![Task::GoalExpansion(Pending {
            clause,
            variable_names: read.variable_names,
        })];
        self.run(tasks, observer)?
            .into_iter()
            .find_map(|out| match out {
                Output::Clause(c) => Some(c),
                Output::UnitClosed(_) => None,
            })
            .ok_or_else(|| CompilationError::Internal("query produced no clause".to_string()))
    }

    fn end_unit(
        &mut self,
        observer: &mut dyn CompilerObserver,
    ) -> Result<Vec<Output>, CompilationError> {
        let unbalanced = self.conditionals.finish();

        let goals: Vec<Task> = std::mem::take(&mut self.initialization)
            .into_iter()
            .rev()
            .map(Task::GoalExpansion)
            .collect();
        // The unit is closed even when its initialization goals fail
        let initialized = match &unbalanced {
            Ok(()) => self.run(goals, observer),
            Err(_) => Ok(Vec::new()),
        };
        let closed = self.symbols.close_unit();
        unbalanced?;
        let mut outputs = initialized?;

        if let Some(summary) = closed {
            tracing::debug!(
                unit = %summary.name,
                predicates = summary.predicates.len(),
                "unit closed"
            );
            outputs.push(Output::UnitClosed(summary));
        }
        Ok(outputs)
    }

    fn run(
        &mut self,
        mut tasks: Vec<Task>,
        observer: &mut dyn CompilerObserver,
    ) -> Result<Vec<Output>, CompilationError> {
        let mut outputs = Vec::new();
        while let Some(task) = tasks.pop() {
            tracing::trace!(task = task.name(), "pre-compiler task");
            match task {
                Task::Conditional(read) => self.conditional(read, &mut tasks, observer)?,
                Task::TermExpansion(read) => {
                    let position = read.position;
                    let expanded = expansion::expand_term(read.term, &self.hooks, observer)
                        .map_err(|e| e.with_position(position))?;
                    for term in expanded.into_iter().rev() {
                        tasks.push(Task::Dcg(ReadTerm {
                            term,
                            position,
                            variable_names: read.variable_names.clone(),
                        }));
                    }
                }
                Task::Dcg(read) => {
                    let term = if dcg::is_grammar_rule(&read.term) {
                        dcg::translate(&read.term)
                            .map_err(|m| CompilationError::source(m, &read.term, read.position))?
                    } else {
                        read.term
                    };
                    tasks.push(Task::Classify(ReadTerm { term, ..read }));
                }
                Task::Classify(read) => self.classify(read, &mut tasks, observer)?,
                Task::GoalExpansion(pending) => {
                    let expander = GoalExpander {
                        hooks: &self.hooks,
                        max_depth: self.config.max_expansion_depth,
                    };
                    let clause = expander.expand_clause(pending.clause, observer)?;
                    tasks.push(Task::Builtins(Pending { clause, ..pending }));
                }
                Task::Builtins(pending) => {
                    let clause = builtins::substitute(&pending.clause);
                    tasks.push(Task::Initialize(Pending { clause, ..pending }));
                }
                Task::Initialize(pending) => {
                    let (key, marks) = self.symbols.mark(&pending.clause);
                    outputs.push(Output::Clause(PrecompiledClause {
                        clause: pending.clause,
                        key,
                        marks,
                        variable_names: pending.variable_names,
                    }));
                }
            }
        }
        Ok(outputs)
    }

    fn conditional(
        &mut self,
        read: ReadTerm,
        tasks: &mut Vec<Task>,
        observer: &mut dyn CompilerObserver,
    ) -> Result<(), CompilationError> {
        let directive = match &read.term {
            Term::Compound { functor, args } if functor == ":-" && args.len() == 1 => {
                CondDirective::classify(&args[0])
            }
            _ => None,
        };
        if let Some((directive, condition)) = directive {
            let ops = Arc::clone(&self.ops);
            let mut evaluate = |goal: &Term| observer.evaluate_condition(goal, &ops);
            return self
                .conditionals
                .apply(directive, condition, read.position, &mut evaluate);
        }
        if self.conditionals.is_skipping() {
            tracing::trace!(position = %read.position, "skipped by conditional compilation");
            return Ok(());
        }
        tasks.push(Task::TermExpansion(read));
        Ok(())
    }

    fn classify(
        &mut self,
        read: ReadTerm,
        tasks: &mut Vec<Task>,
        observer: &mut dyn CompilerObserver,
    ) -> Result<(), CompilationError> {
        let position = read.position;
        let clause = Clause::from_term(read.term.clone(), position)
            .map_err(|m| CompilationError::source(m, &read.term, position))?;

        match (&clause.head, clause.kind) {
            (Some(head), _) => {
                if Builtin::for_goal(head).is_some() || head.is_atom("!") {
                    return Err(CompilationError::source(
                        format!(
                            "permission error: cannot modify static procedure {}",
                            head.functor().map(|f| f.to_string()).unwrap_or_default()
                        ),
                        &read.term,
                        position,
                    ));
                }
                if let Some(functor) = head.functor() {
                    if let Some(message) = self.symbols.record_clause(&functor) {
                        observer.on_warning(&Warning { message, position });
                    }
                }
            }
            (None, ClauseKind::Directive) => {
                let goal = Term::from_conjuncts(clause.body.clone());
                if self.directive(&goal, position, observer)? {
                    return Ok(());
                }
            }
            (None, _) => {}
        }
        tasks.push(Task::GoalExpansion(Pending {
            clause,
            variable_names: read.variable_names,
        }));
        Ok(())
    }

    /// Handle a directive the pipeline owns. Returns false for directives
    /// that should run as queries.
    fn directive(
        &mut self,
        goal: &Term,
        position: Position,
        observer: &mut dyn CompilerObserver,
    ) -> Result<bool, CompilationError> {
        let fail = |message: String| CompilationError::source(message, goal, position);
        let args = goal.args();
        match (goal.name(), args.as_slice()) {
            (Some("op"), [p, t, n]) => {
                self.ops.define(p, t, n).map_err(|e| fail(e.to_string()))?;
            }
            (Some("encoding"), [name]) => {
                let name = name.name().unwrap_or_default();
                let normalized: String = name
                    .chars()
                    .filter(|c| *c != '-' && *c != '_')
                    .collect::<String>()
                    .to_ascii_lowercase();
                if normalized != "utf8" {
                    return Err(fail(format!("unsupported encoding: {}", name)));
                }
            }
            (Some("dynamic"), [spec]) => {
                for predicate in predicate_indicators(spec).map_err(fail)? {
                    observer.on_declaration(&Declaration::Dynamic { predicate });
                }
            }
            (Some("discontiguous"), [spec]) => {
                for predicate in predicate_indicators(spec).map_err(fail)? {
                    self.symbols.declare_discontiguous(predicate.clone());
                    observer.on_declaration(&Declaration::Discontiguous { predicate });
                }
            }
            (Some("multifile"), [spec]) => {
                for predicate in predicate_indicators(spec).map_err(fail)? {
                    observer.on_declaration(&Declaration::Multifile { predicate });
                }
            }
            (Some("set_prolog_flag"), [flag, value]) => {
                self.set_flag(flag, value).map_err(fail)?;
                observer.on_declaration(&Declaration::Flag {
                    name: flag.to_string(),
                    value: value.to_string(),
                });
            }
            (Some("initialization"), [init]) => {
                let clause = Clause {
                    head: None,
                    body: vec![(*init).clone()],
                    kind: ClauseKind::Directive,
                    position,
                };
                self.initialization.push(Pending {
                    clause,
                    variable_names: Vec::new(),
                });
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn set_flag(&mut self, flag: &Term, value: &Term) -> Result<(), String> {
        let value_name = value.name().unwrap_or_default();
        match flag.name() {
            Some("double_quotes") => {
                self.config.double_quotes = DoubleQuotes::from_flag(value_name)
                    .ok_or_else(|| format!("invalid value for double_quotes: {}", value))?;
            }
            Some("unknown") => {
                self.config.unknown = Unknown::from_flag(value_name)
                    .ok_or_else(|| format!("invalid value for unknown: {}", value))?;
            }
            _ => return Err(format!("unknown flag: {}", flag)),
        }
        Ok(())
    }
}

/// `name/arity` and `name//arity` indicators, singly, as a conjunction,
/// or as a list
fn predicate_indicators(spec: &Term) -> Result<Vec<Functor>, String> {
    let items: Vec<&Term> = match spec.list_items() {
        Some(items) => items,
        None => spec.conjuncts(),
    };
    items
        .into_iter()
        .map(|item| {
            let args = item.args();
            let (extra, name, arity) = match (item.name(), args.as_slice()) {
                (Some("/"), [n, a]) => (0, n, a),
                (Some("//"), [n, a]) => (2, n, a),
                _ => return Err(format!("predicate indicator expected, found {}", item)),
            };
            match (name, arity) {
                (Term::Atom(name), Term::Number(crate::parser::ast::Number::Integer(a)))
                    if *a >= 0 =>
                {
                    Ok(Functor::new(name.clone(), *a as usize + extra))
                }
                _ => Err(format!("predicate indicator expected, found {}", item)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{CompilationEvent, EventLog};
    use crate::parser::parse_all;

    fn run_unit(ctx: &mut CompilationContext, source: &str, log: &mut EventLog) -> Vec<Output> {
        let mut outputs = ctx
            .precompile(Input::BeginOfFile("test.pl".to_string()), log)
            .unwrap();
        for read in parse_all(source, &ctx.ops).unwrap() {
            outputs.extend(ctx.precompile(Input::Term(read), log).unwrap());
        }
        outputs.extend(ctx.precompile(Input::EndOfFile, log).unwrap());
        outputs
    }

    fn clauses(outputs: &[Output]) -> Vec<String> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Clause(c) => Some(c.clause.to_string()),
                Output::UnitClosed(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_false_branch_is_dropped() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut log = EventLog::new();
        let out = run_unit(
            &mut ctx,
            ":- if(false). foo. :- else. bar. :- endif.",
            &mut log,
        );
        assert_eq!(clauses(&out), vec!["bar"]);
    }

    #[test]
    fn test_grammar_rule_becomes_clause() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut log = EventLog::new();
        let out = run_unit(&mut ctx, "greeting --> [hello].", &mut log);
        let Output::Clause(c) = &out[0] else {
            panic!("expected a clause");
        };
        assert_eq!(c.clause.predicate(), Some(Functor::new("greeting", 2)));
        assert!(c.key.is_some());
        assert_eq!(c.marks[0].functor, Functor::new("=", 2));
    }

    #[test]
    fn test_directives_are_handled_or_queried() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut log = EventLog::new();
        let out = run_unit(
            &mut ctx,
            ":- dynamic((counter/1, seen//0)).\n\
             :- set_prolog_flag(double_quotes, atom).\n\
             :- initialization(main).\n\
             :- write(hello).\n",
            &mut log,
        );
        assert_eq!(ctx.config.double_quotes, DoubleQuotes::Atom);
        let queries: Vec<&PrecompiledClause> = out
            .iter()
            .filter_map(|o| match o {
                Output::Clause(c) => Some(c),
                Output::UnitClosed(_) => None,
            })
            .collect();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.is_query()));
        let (builtin, _) = builtins::as_builtin_call(&queries[0].clause.body[0]).unwrap();
        assert_eq!(builtin, Builtin::Write);
        // initialization goals run once the unit has been read
        assert!(queries[1].clause.body[0].is_atom("main"));
        let declared: Vec<&Declaration> = log
            .events
            .iter()
            .filter_map(|e| match e {
                CompilationEvent::Declared { declaration } => Some(declaration),
                _ => None,
            })
            .collect();
        assert_eq!(
            declared[1],
            &Declaration::Dynamic {
                predicate: Functor::new("seen", 2)
            }
        );
        assert!(matches!(out.last(), Some(Output::UnitClosed(_))));
    }

    #[test]
    fn test_builtin_head_is_rejected() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut log = EventLog::new();
        ctx.precompile(Input::BeginOfFile("t".into()), &mut log).unwrap();
        let read = parse_all("append(X, Y) :- X = Y, !. atom(foo).", &ctx.ops).unwrap();
        assert!(ctx.precompile(Input::Term(read[0].clone()), &mut log).is_ok());
        let err = ctx
            .precompile(Input::Term(read[1].clone()), &mut log)
            .unwrap_err();
        assert!(err.to_string().contains("permission error"));
    }

    #[test]
    fn test_unterminated_if_is_fatal() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut log = EventLog::new();
        ctx.precompile(Input::BeginOfFile("t".into()), &mut log).unwrap();
        for read in parse_all(":- if(true). a.", &ctx.ops).unwrap() {
            ctx.precompile(Input::Term(read), &mut log).unwrap();
        }
        let err = ctx.precompile(Input::EndOfFile, &mut log).unwrap_err();
        assert!(err.is_fatal());
        assert!(ctx.symbols.unit_name().is_none());
    }

    #[test]
    fn test_encoding_and_unknown_flag() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut log = EventLog::new();
        let reads = parse_all(
            ":- encoding('UTF-8'). :- encoding(latin1). :- set_prolog_flag(colour, red).",
            &ctx.ops,
        )
        .unwrap();
        let results: Vec<bool> = reads
            .into_iter()
            .map(|r| ctx.precompile(Input::Term(r), &mut log).is_ok())
            .collect();
        assert_eq!(results, vec![true, false, false]);
    }
}
