// src/parser/mod.rs
//! Reader for Prolog/HiLog source text
//!
//! Converts source text into terms under a mutable operator table

pub mod ast;
pub mod lexer;
pub mod operators;
pub mod parser;
pub mod writer;

use crate::CompilationError;
use std::sync::Arc;

pub use ast::{Clause, ClauseKind, Functor, Number, Position, ReadTerm, Term};
pub use lexer::{LexError, Lexer, Token, TokenKind};
pub use operators::{Assoc, Fixity, OpType, Operator, OperatorError, OperatorTable};
pub use parser::{ParseError, Parser};
pub use writer::TermWriter;

/// Parse a single term; the terminating `.` is optional
pub fn parse_term(source: &str, ops: &Arc<OperatorTable>) -> Result<ReadTerm, CompilationError> {
    let mut parser = Parser::for_text(source, Arc::clone(ops));
    let term = parser.read_single()?;
    Ok(term)
}

/// Parse every clause-terminated term in `source`
pub fn parse_all(source: &str, ops: &Arc<OperatorTable>) -> Result<Vec<ReadTerm>, CompilationError> {
    let mut parser = Parser::for_text(source, Arc::clone(ops));
    let mut terms = Vec::new();
    while let Some(term) = parser.read_term()? {
        terms.push(term);
    }
    Ok(terms)
}
