// src/parser/parser.rs
//! Operator-precedence term reader driven by the operator table

use super::ast::{Position, ReadTerm, Term};
use super::lexer::{LexError, Lexer, Token, TokenKind};
use super::operators::{Fixity, Operator, OperatorTable};
use crate::config::DoubleQuotes;
use std::io::{BufRead, Cursor};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    /// Offending token, if one was involved
    pub token: Option<String>,
}

impl ParseError {
    fn at(token: &Token, message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            line: token.position.line,
            column: token.position.column,
            token: Some(token.to_string()),
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            message: err.message,
            line: err.line,
            column: err.column,
            token: None,
        }
    }
}

const ARG_PRIORITY: u16 = 999;

pub struct Parser<R> {
    lexer: Lexer<R>,
    ops: Arc<OperatorTable>,
    double_quotes: DoubleQuotes,
    lookahead: Option<Token>,
    /// Named variables of the term being read
    var_map: Vec<(String, Term)>,
    next_var: usize,
}

impl Parser<Cursor<Vec<u8>>> {
    pub fn for_text(source: &str, ops: Arc<OperatorTable>) -> Self {
        Parser::new(Cursor::new(source.as_bytes().to_vec()), ops)
    }
}

impl<R: BufRead> Parser<R> {
    pub fn new(reader: R, ops: Arc<OperatorTable>) -> Self {
        Self {
            lexer: Lexer::new(reader),
            ops,
            double_quotes: DoubleQuotes::default(),
            lookahead: None,
            var_map: Vec::new(),
            next_var: 0,
        }
    }

    pub fn set_double_quotes(&mut self, mode: DoubleQuotes) {
        self.double_quotes = mode;
    }

    pub fn operators(&self) -> &Arc<OperatorTable> {
        &self.ops
    }

    pub fn position(&self) -> Position {
        match &self.lookahead {
            Some(t) => t.position,
            None => self.lexer.position(),
        }
    }

    /// Read the next clause-terminated term, or `None` at end of input
    pub fn read_term(&mut self) -> Result<Option<ReadTerm>, ParseError> {
        self.var_map.clear();
        self.next_var = 0;

        let first = self.peek(true)?.clone();
        if first.kind == TokenKind::EndOfInput {
            return Ok(None);
        }

        let term = self.parse(1200, &[TokenKind::End])?;
        self.advance()?;

        Ok(Some(ReadTerm {
            term,
            position: first.position,
            variable_names: std::mem::take(&mut self.var_map),
        }))
    }

    /// Read one term that may omit the final `.`
    pub fn read_single(&mut self) -> Result<ReadTerm, ParseError> {
        self.var_map.clear();
        self.next_var = 0;
        let position = self.peek(true)?.position;
        let term = self.parse(1200, &[TokenKind::End, TokenKind::EndOfInput])?;
        self.advance()?;
        Ok(ReadTerm {
            term,
            position,
            variable_names: std::mem::take(&mut self.var_map),
        })
    }

    /// Discard input through the next clause terminator after an error
    pub fn skip_clause(&mut self) -> Result<(), ParseError> {
        match self.lookahead.take() {
            Some(t) if matches!(t.kind, TokenKind::End | TokenKind::EndOfInput) => Ok(()),
            _ => Ok(self.lexer.skip_to_end()?),
        }
    }

    /// Parse a term of at most `max` priority that must be followed by
    /// one of `terminators` (left unconsumed).
    fn parse(&mut self, max: u16, terminators: &[TokenKind]) -> Result<Term, ParseError> {
        let (term, _) = self.parse_expr(max)?;
        let next = self.peek(false)?;
        if terminators.contains(&next.kind) {
            return Ok(term);
        }
        let next = next.clone();
        let message = match (next.kind, terminators.first()) {
            (TokenKind::End | TokenKind::EndOfInput, Some(TokenKind::CloseParen)) => {
                "missing closing ')'".to_string()
            }
            (TokenKind::End | TokenKind::EndOfInput, Some(TokenKind::CloseBracket))
            | (TokenKind::End | TokenKind::EndOfInput, Some(TokenKind::Comma)) => {
                "missing closing delimiter".to_string()
            }
            (TokenKind::End | TokenKind::EndOfInput, Some(TokenKind::CloseCurly)) => {
                "missing closing '}'".to_string()
            }
            (TokenKind::EndOfInput, _) => "premature end of input".to_string(),
            _ => format!("operator expected after expression, found {}", next),
        };
        Err(ParseError::at(&next, message))
    }

    fn parse_expr(&mut self, max: u16) -> Result<(Term, u16), ParseError> {
        let (left, priority) = self.parse_primary(max)?;
        self.parse_infix(left, priority, max)
    }

    fn parse_primary(&mut self, max: u16) -> Result<(Term, u16), ParseError> {
        let next = self.peek(true)?;
        match next.kind {
            TokenKind::EndOfInput => {
                return Err(ParseError::at(next, "premature end of input"));
            }
            TokenKind::End
            | TokenKind::CloseParen
            | TokenKind::CloseBracket
            | TokenKind::CloseCurly
            | TokenKind::Comma
            | TokenKind::Bar => {
                return Err(ParseError::at(next, format!("expression expected, found {}", next)));
            }
            _ => {}
        }
        let token = self.advance()?;

        let term = match token.kind {
            TokenKind::Integer => {
                let n = token
                    .text
                    .parse::<i64>()
                    .map_err(|_| ParseError::at(&token, "invalid integer"))?;
                Term::int(n)
            }
            TokenKind::Float => {
                let x = token
                    .text
                    .parse::<f64>()
                    .map_err(|_| ParseError::at(&token, "invalid float"))?;
                Term::float(x)
            }
            TokenKind::Variable => {
                let var = self.variable(&token.text);
                return Ok((self.hilog_application(var)?, 0));
            }
            TokenKind::Str => self.double_quoted(&token.text),
            TokenKind::BackQuoted => codes(&token.text),
            TokenKind::OpenParen | TokenKind::OpenCall => {
                let inner = self.parse(1200, &[TokenKind::CloseParen])?;
                self.advance()?;
                inner
            }
            TokenKind::OpenBracket => {
                if self.peek(true)?.kind == TokenKind::CloseBracket {
                    self.advance()?;
                    return self.parse_name("[]".to_string(), max);
                }
                self.parse_list()?
            }
            TokenKind::OpenCurly => {
                if self.peek(true)?.kind == TokenKind::CloseCurly {
                    self.advance()?;
                    return self.parse_name("{}".to_string(), max);
                }
                let inner = self.parse(1200, &[TokenKind::CloseCurly])?;
                self.advance()?;
                Term::compound("{}", vec![inner])
            }
            TokenKind::Atom => return self.parse_name(token.text, max),
            _ => {
                return Err(ParseError::at(
                    &token,
                    format!("expression expected, found {}", token),
                ));
            }
        };
        Ok((term, 0))
    }

    /// An atom in primary position: functional notation, prefix operator
    /// application, or a plain atom.
    fn parse_name(&mut self, name: String, max: u16) -> Result<(Term, u16), ParseError> {
        let prefix = self.ops.lookup_prefix(&name);
        let next = self.peek(prefix.is_some())?.clone();

        if next.kind == TokenKind::OpenCall {
            self.advance()?;
            let args = self.parse_arguments()?;
            let term = Term::compound(name, args);
            return Ok((self.hilog_application(term)?, 0));
        }

        let Some(op) = prefix else {
            return Ok((Term::Atom(name), 0));
        };

        if !self.can_start_operand(&next) {
            return Ok((Term::Atom(name), 0));
        }

        let (priority, arg_max) = if op.priority > max {
            (max, op.right_max().min(max))
        } else {
            (op.priority, op.right_max())
        };
        let (arg, _) = self.parse_expr(arg_max)?;
        Ok((Term::compound(name, vec![arg]), priority))
    }

    /// Whether the token after a prefix operator begins its operand
    fn can_start_operand(&self, token: &Token) -> bool {
        match token.kind {
            TokenKind::End
            | TokenKind::EndOfInput
            | TokenKind::CloseParen
            | TokenKind::CloseBracket
            | TokenKind::CloseCurly
            | TokenKind::Comma
            | TokenKind::Bar => false,
            TokenKind::Atom => {
                // `- = x`: an infix operator here means the prefix name is an operand
                let infix = self.ops.lookup_infix_or_postfix(&token.text);
                infix.is_none() || self.ops.lookup_prefix(&token.text).is_some()
            }
            _ => true,
        }
    }

    fn parse_infix(&mut self, mut left: Term, mut left_priority: u16, max: u16) -> Result<(Term, u16), ParseError> {
        loop {
            let token = self.peek(false)?.clone();
            let (name, functor) = match token.kind {
                TokenKind::Atom => (token.text.clone(), token.text.clone()),
                TokenKind::Comma => (",".to_string(), ",".to_string()),
                TokenKind::Bar => ("|".to_string(), ";".to_string()),
                _ => break,
            };

            let Some(op) = self.infix_operator(&name) else {
                break;
            };
            if op.priority > max || left_priority > op.left_max() {
                break;
            }

            self.advance()?;
            match op.fixity() {
                Fixity::Postfix => {
                    left = Term::compound(functor, vec![left]);
                }
                _ => {
                    let (right, _) = self.parse_expr(op.right_max())?;
                    left = Term::compound(functor, vec![left, right]);
                }
            }
            left_priority = op.priority;
        }
        Ok((left, left_priority))
    }

    fn infix_operator(&self, name: &str) -> Option<Operator> {
        if name == "," {
            return Some(Operator {
                name: ",".to_string(),
                priority: 1000,
                op_type: super::operators::OpType::Xfy,
            });
        }
        self.ops
            .lookup_infix_or_postfix(name)
            .filter(|op| op.fixity() != Fixity::Prefix)
    }

    /// Argument list after a functor's `(`; consumes the closing `)`
    fn parse_arguments(&mut self) -> Result<Vec<Term>, ParseError> {
        let mut args = Vec::new();
        loop {
            args.push(self.parse(ARG_PRIORITY, &[TokenKind::Comma, TokenKind::CloseParen])?);
            let sep = self.advance()?;
            if sep.kind == TokenKind::CloseParen {
                return Ok(args);
            }
        }
    }

    /// List elements after `[`; consumes the closing `]`
    fn parse_list(&mut self) -> Result<Term, ParseError> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse(
                ARG_PRIORITY,
                &[TokenKind::Comma, TokenKind::Bar, TokenKind::CloseBracket],
            )?);
            let sep = self.advance()?;
            match sep.kind {
                TokenKind::Comma => continue,
                TokenKind::Bar => {
                    let tail = self.parse(ARG_PRIORITY, &[TokenKind::CloseBracket])?;
                    self.advance()?;
                    return Ok(Term::list_with_tail(items, tail));
                }
                _ => return Ok(Term::list(items)),
            }
        }
    }

    /// HiLog application: a variable or compound directly followed by `(`
    fn hilog_application(&mut self, mut term: Term) -> Result<Term, ParseError> {
        while self.peek(false)?.kind == TokenKind::OpenCall {
            self.advance()?;
            let mut args = vec![term];
            args.extend(self.parse_arguments()?);
            term = Term::compound("apply", args);
        }
        Ok(term)
    }

    fn variable(&mut self, name: &str) -> Term {
        if name == "_" {
            return self.fresh_var("_");
        }
        if let Some((_, v)) = self.var_map.iter().find(|(n, _)| n == name) {
            return v.clone();
        }
        let v = self.fresh_var(name);
        self.var_map.push((name.to_string(), v.clone()));
        v
    }

    fn fresh_var(&mut self, name: &str) -> Term {
        let v = Term::var(name, self.next_var);
        self.next_var += 1;
        v
    }

    fn double_quoted(&self, text: &str) -> Term {
        match self.double_quotes {
            DoubleQuotes::Codes => codes(text),
            DoubleQuotes::Chars => Term::list(text.chars().map(|c| Term::atom(c.to_string())).collect()),
            DoubleQuotes::Atom => Term::atom(text),
        }
    }

    fn peek(&mut self, valued: bool) -> Result<&Token, ParseError> {
        let token = match self.lookahead.take() {
            Some(t) => t,
            None => self.lexer.next(valued)?,
        };
        Ok(self.lookahead.insert(token))
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        match self.lookahead.take() {
            Some(t) => Ok(t),
            None => Ok(self.lexer.next(false)?),
        }
    }
}

fn codes(text: &str) -> Term {
    Term::list(text.chars().map(|c| Term::int(c as i64)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(src: &str) -> Term {
        let mut parser = Parser::for_text(src, Arc::new(OperatorTable::new()));
        parser.read_single().unwrap().term
    }

    fn c(f: &str, args: Vec<Term>) -> Term {
        Term::compound(f, args)
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            read("1+2*3"),
            c("+", vec![Term::int(1), c("*", vec![Term::int(2), Term::int(3)])])
        );
        assert_eq!(
            read("2*3+1"),
            c("+", vec![c("*", vec![Term::int(2), Term::int(3)]), Term::int(1)])
        );
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(
            read("1-2-3"),
            c("-", vec![c("-", vec![Term::int(1), Term::int(2)]), Term::int(3)])
        );
    }

    #[test]
    fn test_right_associative_comma() {
        let t = read("a:-b,c,d");
        let body = c(",", vec![Term::atom("b"), c(",", vec![Term::atom("c"), Term::atom("d")])]);
        assert_eq!(t, c(":-", vec![Term::atom("a"), body]));
    }

    #[test]
    fn test_xfx_does_not_chain() {
        let mut parser = Parser::for_text("a = b = c", Arc::new(OperatorTable::new()));
        assert!(parser.read_single().is_err());
    }

    #[test]
    fn test_prefix_operators() {
        assert_eq!(read("- a"), c("-", vec![Term::atom("a")]));
        assert_eq!(read("-1"), Term::int(-1));
        assert_eq!(read("- 1"), c("-", vec![Term::int(1)]));
        assert_eq!(read("-(1)"), c("-", vec![Term::int(1)]));
        assert_eq!(read("\\+ \\+ a"), c("\\+", vec![c("\\+", vec![Term::atom("a")])]));
        assert_eq!(read("f(-)"), c("f", vec![Term::atom("-")]));
        assert_eq!(read("- = x"), c("=", vec![Term::atom("-"), Term::atom("x")]));
    }

    #[test]
    fn test_infix_minus_negative_literal() {
        assert_eq!(read("a - -1"), c("-", vec![Term::atom("a"), Term::int(-1)]));
        assert_eq!(read("a-1"), c("-", vec![Term::atom("a"), Term::int(1)]));
    }

    #[test]
    fn test_lists() {
        let expected = c(".", vec![Term::int(1), c(".", vec![Term::int(2), c(".", vec![Term::int(3), Term::nil()])])]);
        assert_eq!(read("[1,2,3]"), expected);
        assert_eq!(read("'.'(1,'.'(2,'.'(3,[])))"), expected);

        let t = read("[H|T]");
        match &t {
            Term::ListCell(h, tail) => {
                assert!(h.is_variable());
                assert!(tail.is_variable());
                assert_ne!(h, tail);
            }
            other => panic!("expected list cell, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_variables() {
        let t = read("f(X, Y, X, _, _)");
        let args = t.args();
        assert_eq!(args[0], args[2]);
        assert_ne!(args[0], args[1]);
        assert_ne!(args[3], args[4]);
    }

    #[test]
    fn test_curly_and_strings() {
        assert_eq!(read("{a,b}"), c("{}", vec![c(",", vec![Term::atom("a"), Term::atom("b")])]));
        assert_eq!(read("\"ab\""), Term::list(vec![Term::int(97), Term::int(98)]));
    }

    #[test]
    fn test_functor_requires_adjacent_paren() {
        assert_eq!(read("foo(a)"), c("foo", vec![Term::atom("a")]));
        let mut parser = Parser::for_text("foo (a)", Arc::new(OperatorTable::new()));
        let err = parser.read_single().unwrap_err();
        assert!(err.message.contains("operator expected"));
    }

    #[test]
    fn test_hilog_application() {
        let t = read("X(a)");
        assert_eq!(t.name(), Some("apply"));
        assert_eq!(t.arity(), 2);
        let t = read("f(a)(b)");
        assert_eq!(t, c("apply", vec![c("f", vec![Term::atom("a")]), Term::atom("b")]));
    }

    #[test]
    fn test_bar_as_disjunction() {
        assert_eq!(read("(a | b)"), c(";", vec![Term::atom("a"), Term::atom("b")]));
    }

    #[test]
    fn test_custom_operator_lifecycle() {
        let ops = Arc::new(OperatorTable::new());
        ops.add_typed(700, super::super::operators::OpType::Xfx, "≺").unwrap();
        let mut parser = Parser::for_text("a ≺ b", ops.clone());
        assert_eq!(
            parser.read_single().unwrap().term,
            c("≺", vec![Term::atom("a"), Term::atom("b")])
        );

        ops.remove(Fixity::Infix, "≺");
        let mut parser = Parser::for_text("a ≺ b", ops);
        assert!(parser.read_single().is_err());
    }

    #[test]
    fn test_read_terms_and_errors_report_position() {
        let ops = Arc::new(OperatorTable::new());
        let mut parser = Parser::for_text("a.\nb(.\nc.", ops);
        assert_eq!(parser.read_term().unwrap().unwrap().term, Term::atom("a"));
        let err = parser.read_term().unwrap_err();
        assert_eq!(err.line, 2);
        parser.skip_clause().unwrap();
        assert_eq!(parser.read_term().unwrap().unwrap().term, Term::atom("c"));
        assert!(parser.read_term().unwrap().is_none());
    }

    #[test]
    fn test_written_floats_read_back_as_floats() {
        assert_eq!(Term::float(1e15).to_string(), "1.0e15");
        assert_eq!(Term::float(-2.0e20).to_string(), "-2.0e20");
        for x in [
            1e15,
            1e20,
            -2.5e300,
            1.5e-7,
            3.0,
            -0.25,
            123456.789,
            f64::MAX,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ] {
            let text = Term::float(x).to_string();
            assert_eq!(read(&text), Term::float(x), "{} read back wrong", text);
        }
    }

    #[test]
    fn test_long_list_reads_and_writes() {
        let items: Vec<String> = (0..100_000).map(|i| i.to_string()).collect();
        let text = format!("[{}]", items.join(","));
        let term = read(&text);
        assert_eq!(term.list_items().map(|items| items.len()), Some(100_000));
        assert_eq!(term.to_string(), text);
    }
}
