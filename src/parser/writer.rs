// src/parser/writer.rs
//! Operator-aware term serialization

use super::ast::{Number, Term};
use super::lexer::{is_alnum, is_symbol_char};
use super::operators::{Fixity, OpType, Operator, OperatorTable, DEFAULT_OPERATORS};

/// Serializes terms so that reading the output back with the same
/// operator table yields an equal term.
#[derive(Clone, Copy)]
pub struct TermWriter<'a> {
    ops: Option<&'a OperatorTable>,
    quoted: bool,
    ignore_ops: bool,
}

impl Default for TermWriter<'_> {
    fn default() -> Self {
        Self {
            ops: None,
            quoted: true,
            ignore_ops: false,
        }
    }
}

impl<'a> TermWriter<'a> {
    pub fn with_operators(ops: &'a OperatorTable) -> Self {
        Self {
            ops: Some(ops),
            ..Self::default()
        }
    }

    pub fn quoted(mut self, quoted: bool) -> Self {
        self.quoted = quoted;
        self
    }

    pub fn ignore_ops(mut self, ignore: bool) -> Self {
        self.ignore_ops = ignore;
        self
    }

    pub fn write(&self, term: &Term) -> String {
        let mut out = String::new();
        self.write_term(term, 1200, &mut out);
        out
    }

    fn write_term(&self, term: &Term, max: u16, out: &mut String) {
        match term {
            Term::Variable { name, id } => {
                if name.is_empty() || name == "_" {
                    out.push_str(&format!("_G{}", id));
                } else {
                    out.push_str(name);
                }
            }
            Term::Number(n) => self.write_number(n, out),
            Term::Atom(a) => {
                let needs_parens = max < 999 && self.is_operator(a);
                if needs_parens {
                    out.push('(');
                }
                self.write_atom(a, out);
                if needs_parens {
                    out.push(')');
                }
            }
            Term::ListCell(..) => self.write_list(term, out),
            Term::Compound { functor, args } => {
                if functor == "{}" && args.len() == 1 && !self.ignore_ops {
                    out.push('{');
                    self.write_term(&args[0], 1200, out);
                    out.push('}');
                    return;
                }
                if !self.ignore_ops && self.write_operator(functor, args, max, out) {
                    return;
                }
                self.write_atom(functor, out);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_term(arg, 999, out);
                }
                out.push(')');
            }
        }
    }

    fn write_operator(&self, functor: &str, args: &[Term], max: u16, out: &mut String) -> bool {
        let op = match args.len() {
            2 => self
                .infix_op(functor)
                .filter(|op| op.fixity() == Fixity::Infix),
            1 => self
                .prefix_op(functor)
                .or_else(|| self.infix_op(functor).filter(|op| op.fixity() == Fixity::Postfix)),
            _ => None,
        };
        let Some(op) = op else {
            return false;
        };
        let open = op.priority > max;
        if open {
            out.push('(');
        }
        match op.fixity() {
            Fixity::Infix => {
                self.write_term(&args[0], op.left_max(), out);
                if functor == "," {
                    out.push(',');
                } else {
                    out.push(' ');
                    self.write_atom(functor, out);
                    out.push(' ');
                }
                self.write_term(&args[1], op.right_max(), out);
            }
            Fixity::Prefix => {
                self.write_atom(functor, out);
                out.push(' ');
                self.write_term(&args[0], op.right_max(), out);
            }
            Fixity::Postfix => {
                self.write_term(&args[0], op.left_max(), out);
                out.push(' ');
                self.write_atom(functor, out);
            }
        }
        if open {
            out.push(')');
        }
        true
    }

    fn write_list(&self, term: &Term, out: &mut String) {
        out.push('[');
        let mut current = term;
        let mut first = true;
        loop {
            match current {
                Term::ListCell(head, tail) => {
                    if !first {
                        out.push(',');
                    }
                    first = false;
                    self.write_term(head, 999, out);
                    current = tail;
                }
                t if t.is_nil() => break,
                t => {
                    out.push('|');
                    self.write_term(t, 999, out);
                    break;
                }
            }
        }
        out.push(']');
    }

    fn write_number(&self, n: &Number, out: &mut String) {
        out.push_str(&n.to_string());
    }

    fn write_atom(&self, name: &str, out: &mut String) {
        if self.quoted {
            out.push_str(&quote_atom(name));
        } else {
            out.push_str(name);
        }
    }

    fn is_operator(&self, name: &str) -> bool {
        self.prefix_op(name).is_some() || self.infix_op(name).is_some()
    }

    fn prefix_op(&self, name: &str) -> Option<Operator> {
        match self.ops {
            Some(table) => table.lookup_prefix(name),
            None => default_op(name, |t| t.fixity() == Fixity::Prefix),
        }
    }

    fn infix_op(&self, name: &str) -> Option<Operator> {
        match self.ops {
            Some(table) => table.lookup_infix_or_postfix(name),
            None => default_op(name, |t| t.fixity() != Fixity::Prefix),
        }
    }
}

fn default_op(name: &str, accept: impl Fn(OpType) -> bool) -> Option<Operator> {
    DEFAULT_OPERATORS
        .iter()
        .find(|(_, t, n)| *n == name && accept(*t))
        .map(|(p, t, n)| Operator {
            name: n.to_string(),
            priority: *p,
            op_type: *t,
        })
}

/// Quote an atom when it cannot be read back bare
pub fn quote_atom(name: &str) -> String {
    if atom_needs_no_quotes(name) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len() + 2);
    out.push('\'');
    for c in name.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn atom_needs_no_quotes(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if matches!(name, "[]" | "{}" | "!" | ";") {
        return true;
    }
    if first.is_lowercase() {
        return chars.all(is_alnum);
    }
    // A lone `.` would read as the clause terminator
    name != "." && name.chars().all(is_symbol_char)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(f: &str, args: Vec<Term>) -> Term {
        Term::compound(f, args)
    }

    #[test]
    fn test_operators_and_parens() {
        let t = c("*", vec![c("+", vec![Term::int(1), Term::int(2)]), Term::int(3)]);
        assert_eq!(t.to_string(), "(1 + 2) * 3");
        let t = c("-", vec![c("-", vec![Term::int(1), Term::int(2)]), Term::int(3)]);
        assert_eq!(t.to_string(), "1 - 2 - 3");
        let t = c("-", vec![Term::int(1), c("-", vec![Term::int(2), Term::int(3)])]);
        assert_eq!(t.to_string(), "1 - (2 - 3)");
    }

    #[test]
    fn test_lists() {
        let t = Term::list_with_tail(vec![Term::atom("a"), Term::atom("b")], Term::var("T", 0));
        assert_eq!(t.to_string(), "[a,b|T]");
        assert_eq!(Term::nil().to_string(), "[]");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_atom("hello"), "hello");
        assert_eq!(quote_atom("Hello"), "'Hello'");
        assert_eq!(quote_atom("it's"), "'it\\'s'");
        assert_eq!(quote_atom("=.."), "=..");
        assert_eq!(quote_atom(""), "''");
    }

    #[test]
    fn test_comma_argument_is_parenthesized() {
        let t = c("f", vec![c(",", vec![Term::atom("a"), Term::atom("b")])]);
        assert_eq!(t.to_string(), "f((a,b))");
    }

    #[test]
    fn test_curly_and_prefix() {
        let t = c("{}", vec![Term::atom("x")]);
        assert_eq!(t.to_string(), "{x}");
        let t = c("-", vec![Term::int(1)]);
        assert_eq!(t.to_string(), "- 1");
    }
}
