// src/parser/lexer.rs
//! Lexical analyzer (tokenizer) for Prolog/HiLog source text

use super::ast::Position;
use std::fmt;
use std::io::{self, BufRead, Cursor};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Names and literals
    Atom,
    Variable,
    Integer,
    Float,
    /// Double-quoted text
    Str,
    /// Back-quoted text
    BackQuoted,

    // Delimiters
    /// `(` preceded by layout, or at the start of input
    OpenParen,
    /// `(` immediately following the previous token
    OpenCall,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenCurly,
    CloseCurly,
    Comma,
    Bar,

    /// The clause terminator `.` followed by layout
    End,
    EndOfInput,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Atom => "atom",
            TokenKind::Variable => "variable",
            TokenKind::Integer => "integer",
            TokenKind::Float => "float",
            TokenKind::Str => "string",
            TokenKind::BackQuoted => "back-quoted string",
            TokenKind::OpenParen | TokenKind::OpenCall => "'('",
            TokenKind::CloseParen => "')'",
            TokenKind::OpenBracket => "'['",
            TokenKind::CloseBracket => "']'",
            TokenKind::OpenCurly => "'{'",
            TokenKind::CloseCurly => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Bar => "'|'",
            TokenKind::End => "end of clause",
            TokenKind::EndOfInput => "end of input",
        };
        f.write_str(s)
    }
}

/// A classified token. Never mutated once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Decoded text. Numbers carry their canonical decimal spelling.
    pub text: String,
    pub quoted: bool,
    pub position: Position,
    /// Whether layout (whitespace or comments) preceded the token
    pub layout_before: bool,
}

impl Token {
    pub fn is_atom(&self, name: &str) -> bool {
        self.kind == TokenKind::Atom && self.text == name
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Atom | TokenKind::Variable | TokenKind::Integer | TokenKind::Float => {
                write!(f, "{} '{}'", self.kind, self.text)
            }
            TokenKind::Str => write!(f, "string \"{}\"", self.text),
            _ => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Lexer error at {line}:{column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

const READ_FAILED: &str = "read failed";

impl LexError {
    /// The underlying reader failed, so no later token can be trusted
    pub fn is_read_failure(&self) -> bool {
        self.message.starts_with(READ_FAILED)
    }
}

/// Characters that form symbol-char atoms by maximal munch
pub const SYMBOL_CHARS: &str = "+-*/\\^<>=~:.?@#&$";

/// ASCII symbol characters, plus non-alphanumeric Unicode symbols such as `≺`
pub fn is_symbol_char(c: char) -> bool {
    SYMBOL_CHARS.contains(c)
        || (!c.is_ascii() && !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control())
}

pub fn is_alnum(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

const MAX_PUSHBACK: usize = 2;

/// Blocking character source with position tracking and two characters
/// of pushback.
pub struct CharStream<R> {
    reader: R,
    line_buf: Vec<char>,
    index: usize,
    pushback: Vec<(char, Position)>,
    position: Position,
    exhausted: bool,
}

impl<R: BufRead> CharStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: Vec::new(),
            index: 0,
            pushback: Vec::with_capacity(MAX_PUSHBACK),
            position: Position::new(1, 1),
            exhausted: false,
        }
    }

    /// Position of the next character to be read
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn read(&mut self) -> io::Result<Option<(char, Position)>> {
        let (c, at) = if let Some(pair) = self.pushback.pop() {
            pair
        } else {
            if self.index >= self.line_buf.len() && !self.fill()? {
                return Ok(None);
            }
            let c = self.line_buf[self.index];
            self.index += 1;
            (c, self.position)
        };

        self.position = if c == '\n' {
            Position::new(at.line + 1, 1)
        } else {
            Position::new(at.line, at.column + 1)
        };
        Ok(Some((c, at)))
    }

    pub fn peek(&mut self) -> io::Result<Option<char>> {
        match self.read()? {
            Some((c, at)) => {
                self.unread(c, at);
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    /// Push a character back. At most two may be pending at once.
    pub fn unread(&mut self, c: char, at: Position) {
        debug_assert!(self.pushback.len() < MAX_PUSHBACK, "pushback overflow");
        self.pushback.push((c, at));
        self.position = at;
    }

    fn fill(&mut self) -> io::Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let mut line = String::new();
        let n = match self.reader.read_line(&mut line) {
            Ok(n) => n,
            // Undecodable bytes are consumed; any other failure ends the input
            Err(err) if err.kind() == io::ErrorKind::InvalidData => return Err(err),
            Err(err) => {
                self.exhausted = true;
                return Err(err);
            }
        };
        if n == 0 {
            self.exhausted = true;
            return Ok(false);
        }
        self.line_buf = line.chars().collect();
        self.index = 0;
        Ok(true)
    }
}

pub struct Lexer<R> {
    stream: CharStream<R>,
    last: Option<Token>,
}

impl Lexer<Cursor<Vec<u8>>> {
    /// Lexer over in-memory source text
    pub fn for_text(source: &str) -> Self {
        Lexer::new(Cursor::new(source.as_bytes().to_vec()))
    }
}

impl<R: BufRead> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            stream: CharStream::new(reader),
            last: None,
        }
    }

    /// The most recently produced token
    pub fn peek(&self) -> Option<&Token> {
        self.last.as_ref()
    }

    pub fn position(&self) -> Position {
        self.stream.position()
    }

    /// Produce the next token.
    ///
    /// With `valued` set the lexer is at a position where a term may begin,
    /// so `-` immediately followed by a digit reads as a negative number.
    pub fn next(&mut self, valued: bool) -> Result<Token, LexError> {
        let token = self.scan(valued)?;
        self.last = Some(token.clone());
        Ok(token)
    }

    /// Skip input up to and including the next clause terminator.
    /// Used by callers that resynchronize after an error.
    pub fn skip_to_end(&mut self) -> Result<(), LexError> {
        loop {
            match self.scan(false) {
                Ok(t) if matches!(t.kind, TokenKind::End | TokenKind::EndOfInput) => {
                    self.last = Some(t);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_read_failure() || e.message.starts_with("unterminated") => {
                    return Err(e)
                }
                Err(_) => {}
            }
        }
    }

    fn scan(&mut self, valued: bool) -> Result<Token, LexError> {
        let layout = self.skip_layout()?;
        let Some((c, at)) = self.read()? else {
            let at = self.stream.position();
            return Ok(self.token_at(TokenKind::EndOfInput, String::new(), at, layout));
        };

        let kind = match c {
            '(' if layout || self.last.is_none() => Some(TokenKind::OpenParen),
            '(' => Some(TokenKind::OpenCall),
            ')' => Some(TokenKind::CloseParen),
            '[' => Some(TokenKind::OpenBracket),
            ']' => Some(TokenKind::CloseBracket),
            '{' => Some(TokenKind::OpenCurly),
            '}' => Some(TokenKind::CloseCurly),
            ',' => Some(TokenKind::Comma),
            '|' => {
                // `||` is an ordinary atom
                if self.stream.peek().map_err(|e| self.io_error(e))? == Some('|') {
                    self.read()?;
                    return Ok(self.token_at(TokenKind::Atom, "||".into(), at, layout));
                }
                Some(TokenKind::Bar)
            }
            _ => None,
        };
        if let Some(kind) = kind {
            return Ok(self.token_at(kind, c.to_string(), at, layout));
        }

        match c {
            '!' | ';' => Ok(self.token_at(TokenKind::Atom, c.to_string(), at, layout)),
            '0'..='9' => self.read_number(c, at, false, layout),
            '_' | 'A'..='Z' => {
                let name = self.read_while(c, is_alnum)?;
                Ok(self.token_at(TokenKind::Variable, name, at, layout))
            }
            c if c.is_uppercase() => {
                let name = self.read_while(c, is_alnum)?;
                Ok(self.token_at(TokenKind::Variable, name, at, layout))
            }
            c if c.is_alphabetic() => {
                let name = self.read_while(c, is_alnum)?;
                Ok(self.token_at(TokenKind::Atom, name, at, layout))
            }
            '\'' => {
                let text = self.read_quoted('\'', at)?;
                let mut token = self.token_at(TokenKind::Atom, text, at, layout);
                token.quoted = true;
                Ok(token)
            }
            '"' => {
                let text = self.read_quoted('"', at)?;
                let mut token = self.token_at(TokenKind::Str, text, at, layout);
                token.quoted = true;
                Ok(token)
            }
            '`' => {
                let text = self.read_quoted('`', at)?;
                let mut token = self.token_at(TokenKind::BackQuoted, text, at, layout);
                token.quoted = true;
                Ok(token)
            }
            '.' => {
                match self.stream.peek().map_err(|e| self.io_error(e))? {
                    None => return Ok(self.token_at(TokenKind::End, ".".into(), at, layout)),
                    Some(n) if n.is_whitespace() || n == '%' => {
                        return Ok(self.token_at(TokenKind::End, ".".into(), at, layout));
                    }
                    _ => {}
                }
                let name = self.read_while(c, is_symbol_char)?;
                Ok(self.token_at(TokenKind::Atom, name, at, layout))
            }
            '-' if valued => {
                match self.stream.peek().map_err(|e| self.io_error(e))? {
                    Some(d) if d.is_ascii_digit() => {
                        let (d, _) = self.read()?.ok_or_else(|| self.error_at("premature end of input", at))?;
                        self.read_number(d, at, true, layout)
                    }
                    _ => {
                        let name = self.read_while(c, is_symbol_char)?;
                        Ok(self.token_at(TokenKind::Atom, name, at, layout))
                    }
                }
            }
            c if is_symbol_char(c) => {
                let name = self.read_while(c, is_symbol_char)?;
                Ok(self.token_at(TokenKind::Atom, name, at, layout))
            }
            c => Err(self.error_at(&format!("unexpected character '{}'", c.escape_debug()), at)),
        }
    }

    /// Skip whitespace and comments, reporting whether any were seen
    fn skip_layout(&mut self) -> Result<bool, LexError> {
        let mut seen = false;
        loop {
            let Some((c, at)) = self.read()? else {
                return Ok(seen);
            };
            if c.is_whitespace() {
                seen = true;
            } else if c == '%' {
                seen = true;
                while let Some((c, _)) = self.read()? {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c == '/' {
                match self.read()? {
                    Some(('*', _)) => {
                        seen = true;
                        self.skip_block_comment(at)?;
                    }
                    Some((n, n_at)) => {
                        self.stream.unread(n, n_at);
                        self.stream.unread(c, at);
                        return Ok(seen);
                    }
                    None => {
                        self.stream.unread(c, at);
                        return Ok(seen);
                    }
                }
            } else {
                self.stream.unread(c, at);
                return Ok(seen);
            }
        }
    }

    fn skip_block_comment(&mut self, start: Position) -> Result<(), LexError> {
        let mut star = false;
        loop {
            match self.read()? {
                None => return Err(self.error_at("unterminated block comment", start)),
                Some(('/', _)) if star => return Ok(()),
                Some((c, _)) => star = c == '*',
            }
        }
    }

    fn read_while(&mut self, first: char, pred: fn(char) -> bool) -> Result<String, LexError> {
        let mut text = String::from(first);
        while let Some((c, at)) = self.read()? {
            if pred(c) {
                text.push(c);
            } else {
                self.stream.unread(c, at);
                break;
            }
        }
        Ok(text)
    }

    fn read_number(
        &mut self,
        first: char,
        start: Position,
        negative: bool,
        layout: bool,
    ) -> Result<Token, LexError> {
        let sign = if negative { -1 } else { 1 };

        if first == '0' {
            match self.read()? {
                Some(('\'', q_at)) => {
                    // 0'c character code
                    match self.read()? {
                        Some(('\\', _)) => {
                            let code = self.read_escape(start)?;
                            let value = sign * code.map(|c| c as i64).unwrap_or(0);
                            return Ok(self.token_at(TokenKind::Integer, value.to_string(), start, layout));
                        }
                        Some(('\'', _)) => {
                            if let Some((n, n_at)) = self.read()? {
                                if n != '\'' {
                                    self.stream.unread(n, n_at);
                                }
                            }
                            let value = sign * '\'' as i64;
                            return Ok(self.token_at(TokenKind::Integer, value.to_string(), start, layout));
                        }
                        Some((c, _)) => {
                            let value = sign * c as i64;
                            return Ok(self.token_at(TokenKind::Integer, value.to_string(), start, layout));
                        }
                        None => {
                            self.stream.unread('\'', q_at);
                        }
                    }
                }
                Some((r @ ('x' | 'o' | 'b'), r_at)) => {
                    let radix = match r {
                        'x' => 16,
                        'o' => 8,
                        _ => 2,
                    };
                    match self.read()? {
                        Some((d, _)) if d.is_digit(radix) => {
                            let mut digits = String::from(d);
                            while let Some((c, at)) = self.read()? {
                                if c.is_digit(radix) {
                                    digits.push(c);
                                } else {
                                    self.stream.unread(c, at);
                                    break;
                                }
                            }
                            let value = i64::from_str_radix(&digits, radix)
                                .map_err(|_| self.error_at("integer literal out of range", start))?;
                            return Ok(self.token_at(
                                TokenKind::Integer,
                                (sign * value).to_string(),
                                start,
                                layout,
                            ));
                        }
                        Some((d, d_at)) => {
                            self.stream.unread(d, d_at);
                            self.stream.unread(r, r_at);
                        }
                        None => self.stream.unread(r, r_at),
                    }
                }
                Some((c, at)) => self.stream.unread(c, at),
                None => {}
            }
        }

        let mut text = self.read_while(first, |c| c.is_ascii_digit())?;
        let mut is_float = false;

        if let Some((dot, dot_at)) = self.read()? {
            if dot == '.' {
                match self.read()? {
                    Some((d, _)) if d.is_ascii_digit() => {
                        is_float = true;
                        text.push('.');
                        text.push(d);
                        while let Some((c, at)) = self.read()? {
                            if c.is_ascii_digit() {
                                text.push(c);
                            } else {
                                self.stream.unread(c, at);
                                break;
                            }
                        }
                        self.read_exponent(&mut text, start)?;
                    }
                    Some((d, d_at)) => {
                        self.stream.unread(d, d_at);
                        self.stream.unread(dot, dot_at);
                    }
                    None => self.stream.unread(dot, dot_at),
                }
            } else {
                self.stream.unread(dot, dot_at);
            }
        }

        if negative {
            text.insert(0, '-');
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error_at(&format!("invalid float: {}", text), start))?;
            Ok(self.token_at(TokenKind::Float, value.to_string(), start, layout))
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error_at(&format!("integer literal out of range: {}", text), start))?;
            Ok(self.token_at(TokenKind::Integer, value.to_string(), start, layout))
        }
    }

    fn read_exponent(&mut self, text: &mut String, start: Position) -> Result<(), LexError> {
        let Some((e, e_at)) = self.read()? else {
            return Ok(());
        };
        if e != 'e' && e != 'E' {
            self.stream.unread(e, e_at);
            return Ok(());
        }
        text.push('e');
        let mut first = self.read()?;
        if let Some((s @ ('+' | '-'), _)) = first {
            text.push(s);
            first = self.read()?;
        }
        match first {
            Some((d, _)) if d.is_ascii_digit() => {
                text.push(d);
                while let Some((c, at)) = self.read()? {
                    if c.is_ascii_digit() {
                        text.push(c);
                    } else {
                        self.stream.unread(c, at);
                        break;
                    }
                }
                Ok(())
            }
            _ => Err(self.error_at("malformed float exponent", start)),
        }
    }

    fn read_quoted(&mut self, quote: char, start: Position) -> Result<String, LexError> {
        let mut text = String::new();
        loop {
            match self.read()? {
                None => return Err(self.error_at("unterminated quoted text", start)),
                Some((c, _)) if c == quote => {
                    // A doubled quote stands for itself
                    match self.read()? {
                        Some((n, _)) if n == quote => text.push(quote),
                        Some((n, n_at)) => {
                            self.stream.unread(n, n_at);
                            return Ok(text);
                        }
                        None => return Ok(text),
                    }
                }
                Some(('\\', _)) => {
                    if let Some(c) = self.read_escape(start)? {
                        text.push(c);
                    }
                }
                Some((c, _)) => text.push(c),
            }
        }
    }

    /// Decode the escape sequence after a backslash. A continuation
    /// (backslash-newline) yields `None`.
    fn read_escape(&mut self, start: Position) -> Result<Option<char>, LexError> {
        let Some((c, _)) = self.read()? else {
            return Err(self.error_at("unterminated quoted text", start));
        };
        let decoded = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            'e' => '\x1b',
            's' => ' ',
            '0'..='7' => return self.read_numeric_escape(c, 8, start).map(Some),
            'x' => return self.read_numeric_escape('0', 16, start).map(Some),
            '\n' => return Ok(None),
            '\\' | '\'' | '"' | '`' => c,
            other => {
                return Err(self.error_at(&format!("undefined escape sequence '\\{}'", other), start))
            }
        };
        Ok(Some(decoded))
    }

    fn read_numeric_escape(&mut self, first: char, radix: u32, start: Position) -> Result<char, LexError> {
        let mut digits = String::from(first);
        loop {
            match self.read()? {
                Some(('\\', _)) => break,
                Some((d, _)) if d.is_digit(radix) => digits.push(d),
                _ => return Err(self.error_at("malformed numeric escape", start)),
            }
        }
        u32::from_str_radix(&digits, radix)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error_at("invalid character code in escape", start))
    }

    fn read(&mut self) -> Result<Option<(char, Position)>, LexError> {
        self.stream.read().map_err(|e| self.io_error(e))
    }

    fn token_at(&self, kind: TokenKind, text: String, at: Position, layout: bool) -> Token {
        Token {
            kind,
            text,
            quoted: false,
            position: at,
            layout_before: layout,
        }
    }

    fn io_error(&self, err: io::Error) -> LexError {
        let message = if err.kind() == io::ErrorKind::InvalidData {
            "malformed character sequence".to_string()
        } else {
            format!("{}: {}", READ_FAILED, err)
        };
        self.error_at(&message, self.stream.position())
    }

    fn error_at(&self, message: &str, at: Position) -> LexError {
        LexError {
            message: message.to_string(),
            line: at.line,
            column: at.column,
        }
    }
}
