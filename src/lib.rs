// src/lib.rs
//! # HiLog Compiler
//!
//! Reads Prolog/HiLog source under a mutable operator table, rewrites each
//! clause through the pre-compiler stages and lowers it to WAM-style
//! instructions. A small resolution engine receives the compiled output
//! and answers queries against it.
//!
//! ## Example
//!
//! ```rust
//! use hilog_compiler::Session;
//!
//! let mut session = Session::new();
//! session.consult_str("family.pl", r#"
//!     parent(tom, bob).
//!     parent(bob, ann).
//!     grandparent(X, Z) :- parent(X, Y), parent(Y, Z).
//! "#).unwrap();
//!
//! let answer = session.query("grandparent(tom, Who)").unwrap().unwrap();
//! assert_eq!(answer.get("Who").unwrap().to_string(), "ann");
//! ```

pub mod compiler;
pub mod config;
pub mod observer;
pub mod parser;
pub mod precompiler;
pub mod runtime;

use compiler::bytecode::write_listing;
use compiler::{Linker, UnitReport};
use parser::ast::{Clause, Functor, Position, Term};
use parser::{LexError, ParseError, Parser};
use precompiler::symbols::SymbolKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use compiler::bytecode::Instruction;
pub use config::CompilerConfig;
pub use observer::{CompilerObserver, EventLog};
pub use precompiler::{CompilationContext, ExpansionHook};
pub use runtime::{Engine, Solution};

/// Errors that can occur during compilation
#[derive(Error, Debug)]
pub enum CompilationError {
    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error("Error at {line}:{column}: {message}\n    in: {clause}")]
    SourceCode {
        message: String,
        clause: String,
        line: usize,
        column: usize,
    },

    #[error("Conditional compilation error at {line}:{column}: {message}")]
    Conditional {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Internal compiler error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<LexError> for CompilationError {
    fn from(err: LexError) -> Self {
        CompilationError::Syntax(err.into())
    }
}

impl CompilationError {
    /// Error tagged with the clause it belongs to
    pub fn source(message: impl Into<String>, clause: impl ToString, position: Position) -> Self {
        CompilationError::SourceCode {
            message: message.into(),
            clause: clause.to_string(),
            line: position.line,
            column: position.column,
        }
    }

    /// Fill in a position for errors raised before one was known
    pub fn with_position(self, position: Position) -> Self {
        match self {
            CompilationError::SourceCode {
                message,
                clause,
                line: 0,
                ..
            } => CompilationError::source(message, clause, position),
            other => other,
        }
    }

    /// Errors after which the rest of the unit cannot be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CompilationError::Conditional { .. }
                | CompilationError::Internal(_)
                | CompilationError::Io(_)
        )
    }
}

/// Errors raised while resolving a query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("No query has been set")]
    UnsetQuery,

    #[error("Unknown procedure: {name}/{arity}")]
    UnknownProcedure { name: String, arity: usize },

    #[error("Arguments are not sufficiently instantiated")]
    Instantiation,

    #[error("Type error: expected {expected}, found {culprit}")]
    Type { expected: String, culprit: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Domain error: {0}")]
    Domain(String),
}

/// Either kind of error, for operations that compile and then run
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// A program clause with its instructions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledClause {
    pub functor: Functor,
    pub key: SymbolKey,
    /// The pre-compiled clause the code was generated from
    pub clause: Clause,
    pub code: Vec<Instruction>,
    pub permanent_vars: usize,
    /// User predicates the body may call
    pub references: Vec<Functor>,
}

/// All clauses of one predicate, in the order they were added
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledPredicate {
    pub functor: Functor,
    pub clauses: Vec<CompiledClause>,
    pub dynamic: bool,
}

impl CompiledPredicate {
    pub fn new(functor: Functor) -> Self {
        Self {
            functor,
            clauses: Vec::new(),
            dynamic: false,
        }
    }

    pub fn from_clause(clause: CompiledClause) -> Self {
        Self {
            functor: clause.functor.clone(),
            clauses: vec![clause],
            dynamic: false,
        }
    }

    /// Append the clauses of `other` that are not already present.
    /// Returns how many were added.
    pub fn merge(&mut self, other: CompiledPredicate) -> usize {
        self.dynamic |= other.dynamic;
        let mut added = 0;
        for clause in other.clauses {
            if self.clauses.iter().any(|c| c.clause == clause.clause) {
                continue;
            }
            self.clauses.push(clause);
            added += 1;
        }
        added
    }

    /// Linked code for every clause
    pub fn code(&self) -> Vec<Instruction> {
        Linker::link(self.clauses.iter().map(|c| c.code.as_slice()))
    }
}

impl fmt::Display for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.functor)?;
        write_listing(f, &self.code())
    }
}

/// A compiled query or directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub clause: Clause,
    /// Named variables whose bindings make up an answer
    pub variable_names: Vec<(String, Term)>,
    pub code: Vec<Instruction>,
    pub permanent_vars: usize,
}

impl CompiledQuery {
    pub fn goal(&self) -> Term {
        Term::from_conjuncts(self.clause.body.clone())
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "?- {}", self.goal())?;
        write_listing(f, &self.code)
    }
}

/// A compilation context and an engine wired together
pub struct Session {
    ctx: CompilationContext,
    engine: Engine,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        let ctx = CompilationContext::new(config);
        let engine = Engine::new(Arc::clone(&ctx.ops), ctx.config.unknown);
        Self { ctx, engine }
    }

    pub fn context(&self) -> &CompilationContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut CompilationContext {
        &mut self.ctx
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Compile source text into the engine's domain
    pub fn consult_str(&mut self, name: &str, source: &str) -> Result<UnitReport, CompilationError> {
        let mut parser = Parser::for_text(source, Arc::clone(&self.ctx.ops));
        compiler::compile_unit(name, &mut parser, &mut self.ctx, &mut self.engine)
    }

    pub fn consult_file(&mut self, path: impl AsRef<Path>) -> Result<UnitReport, CompilationError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let mut parser = Parser::new(BufReader::new(file), Arc::clone(&self.ctx.ops));
        let name = path.display().to_string();
        compiler::compile_unit(&name, &mut parser, &mut self.ctx, &mut self.engine)
    }

    /// Consult the library source under the configured resource root
    pub fn load_builtins(&mut self) -> Result<UnitReport, CompilationError> {
        let path = self.ctx.config.builtins_path();
        self.consult_file(path)
    }

    fn prepare(&mut self, text: &str) -> Result<(), Error> {
        let read = parser::parse_term(text, &self.ctx.ops)?;
        let precompiled = self.ctx.precompile_query(read, &mut self.engine)?;
        let query = compiler::compile_query(&precompiled, &self.ctx.config)?;
        self.engine.set_query(query);
        Ok(())
    }

    /// First answer to a query, if any
    pub fn query(&mut self, text: &str) -> Result<Option<Solution>, Error> {
        self.prepare(text)?;
        Ok(self.engine.resolve()?)
    }

    /// Every answer to a query
    pub fn query_all(&mut self, text: &str) -> Result<Vec<Solution>, Error> {
        self.prepare(text)?;
        let solutions = self.engine.iter_solutions()?.collect::<Result<Vec<_>, _>>()?;
        Ok(solutions)
    }

    /// Instruction listing of every predicate in the domain
    pub fn listing(&self) -> String {
        self.engine.listing()
    }

    /// Output written by `write/1` and friends since the last call
    pub fn take_output(&mut self) -> String {
        self.engine.take_output()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consult_and_query() {
        let mut session = Session::new();
        let report = session
            .consult_str(
                "lists.pl",
                "app([], L, L).\n\
                 app([H|T], L, [H|R]) :- app(T, L, R).\n",
            )
            .unwrap();
        assert!(report.is_clean());

        let answers = session.query_all("app(X, Y, [1,2])").unwrap();
        let shown: Vec<String> = answers.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            shown,
            vec![
                "X = [], Y = [1,2]",
                "X = [1], Y = [2]",
                "X = [1,2], Y = []"
            ]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut session = Session::new();
        session.consult_str("a.pl", "p(1). p(2).").unwrap();
        session.consult_str("a.pl", "p(1). p(2).").unwrap();
        assert_eq!(session.query_all("p(X)").unwrap().len(), 2);
    }

    #[test]
    fn test_listing_links_clauses() {
        let mut session = Session::new();
        session.consult_str("a.pl", "p(1). p(2).").unwrap();
        let listing = session.listing();
        assert!(listing.contains("p/1:"));
        assert!(listing.contains("try_me_else L3"));
        assert!(listing.contains("trust_me"));
        assert!(listing.contains("get_constant 2, A1"));
    }

    #[test]
    fn test_error_positions() {
        let err = CompilationError::SourceCode {
            message: "bad".into(),
            clause: "p".into(),
            line: 0,
            column: 0,
        }
        .with_position(Position::new(4, 2));
        assert!(err.to_string().starts_with("Error at 4:2: bad"));
        assert!(!err.is_fatal());
        assert!(CompilationError::Internal("x".into()).is_fatal());
    }
}
