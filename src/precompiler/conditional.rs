// src/precompiler/conditional.rs
//! Conditional compilation with `if/1`, `elif/1`, `else/0` and `endif/0`

use crate::parser::ast::{Position, Term};
use crate::parser::operators::{OpType, OperatorTable};
use crate::runtime::arith;
use crate::CompilationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondDirective {
    If,
    Elif,
    Else,
    Endif,
}

impl CondDirective {
    /// Recognize a conditional directive body, returning its condition goal
    pub fn classify(goal: &Term) -> Option<(CondDirective, Option<&Term>)> {
        match goal {
            Term::Compound { functor, args } if args.len() == 1 => match functor.as_str() {
                "if" => Some((CondDirective::If, args.first())),
                "elif" => Some((CondDirective::Elif, args.first())),
                _ => None,
            },
            Term::Atom(a) if a == "else" => Some((CondDirective::Else, None)),
            Term::Atom(a) if a == "endif" => Some((CondDirective::Endif, None)),
            _ => None,
        }
    }

    /// Directives that may follow the one that opened the current branch
    pub fn terminators(self) -> &'static [CondDirective] {
        match self {
            CondDirective::If | CondDirective::Elif => {
                &[CondDirective::Elif, CondDirective::Else, CondDirective::Endif]
            }
            CondDirective::Else => &[CondDirective::Endif],
            CondDirective::Endif => &[CondDirective::If],
        }
    }

    fn name(self) -> &'static str {
        match self {
            CondDirective::If => "if",
            CondDirective::Elif => "elif",
            CondDirective::Else => "else",
            CondDirective::Endif => "endif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    /// Clauses in this branch are compiled
    Taking,
    /// No branch taken yet; a later `elif`/`else` may be
    Seeking,
    /// A branch was taken already, or the enclosing branch is skipped
    Done,
}

#[derive(Debug)]
struct Frame {
    opened_by: CondDirective,
    branch: Branch,
    position: Position,
}

#[derive(Debug, Default)]
pub struct ConditionalStack {
    frames: Vec<Frame>,
}

impl ConditionalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while clauses must be dropped
    pub fn is_skipping(&self) -> bool {
        self.frames.iter().any(|f| f.branch != Branch::Taking)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Apply a conditional directive. `evaluate` is only called for
    /// conditions whose outcome can select a branch.
    pub fn apply(
        &mut self,
        directive: CondDirective,
        condition: Option<&Term>,
        position: Position,
        evaluate: &mut dyn FnMut(&Term) -> Result<bool, CompilationError>,
    ) -> Result<(), CompilationError> {
        if directive == CondDirective::If {
            let branch = if self.is_skipping() {
                Branch::Done
            } else {
                Self::decide(condition, position, evaluate)?
            };
            self.frames.push(Frame {
                opened_by: directive,
                branch,
                position,
            });
            return Ok(());
        }

        let Some(top) = self.frames.last_mut() else {
            return Err(mismatch(
                format!("{} without matching if", directive.name()),
                position,
            ));
        };
        if !top.opened_by.terminators().contains(&directive) {
            return Err(mismatch(
                format!("{} after {}", directive.name(), top.opened_by.name()),
                position,
            ));
        }

        match directive {
            CondDirective::Endif => {
                self.frames.pop();
            }
            CondDirective::Elif => {
                top.branch = match top.branch {
                    Branch::Seeking => Self::decide(condition, position, evaluate)?,
                    _ => Branch::Done,
                };
                top.opened_by = directive;
            }
            CondDirective::Else => {
                top.branch = match top.branch {
                    Branch::Seeking => Branch::Taking,
                    _ => Branch::Done,
                };
                top.opened_by = directive;
            }
            CondDirective::If => {}
        }
        Ok(())
    }

    /// Check that every branch was closed at end of unit
    pub fn finish(&mut self) -> Result<(), CompilationError> {
        match self.frames.pop() {
            None => Ok(()),
            Some(frame) => {
                self.frames.clear();
                Err(mismatch(
                    format!("unterminated {} at end of file", frame.opened_by.name()),
                    frame.position,
                ))
            }
        }
    }

    fn decide(
        condition: Option<&Term>,
        position: Position,
        evaluate: &mut dyn FnMut(&Term) -> Result<bool, CompilationError>,
    ) -> Result<Branch, CompilationError> {
        let condition = condition.ok_or_else(|| mismatch("missing condition", position))?;
        Ok(if evaluate(condition)? {
            Branch::Taking
        } else {
            Branch::Seeking
        })
    }
}

fn mismatch(message: impl Into<String>, position: Position) -> CompilationError {
    CompilationError::Conditional {
        message: message.into(),
        line: position.line,
        column: position.column,
    }
}

/// Evaluate a condition without running any user code.
///
/// Understands `true`, `false`, `fail`, `\+`, `,`, `;`, `current_op/3`,
/// `==`, `\==` and arithmetic comparison of ground expressions.
pub fn evaluate_static(goal: &Term, ops: &OperatorTable) -> Result<bool, CompilationError> {
    let args = goal.args();
    match (goal.name(), args.as_slice()) {
        (Some("true"), []) => Ok(true),
        (Some("false" | "fail"), []) => Ok(false),
        (Some("\\+"), [g]) => Ok(!evaluate_static(g, ops)?),
        (Some(","), [a, b]) => Ok(evaluate_static(a, ops)? && evaluate_static(b, ops)?),
        (Some(";"), [a, b]) => Ok(evaluate_static(a, ops)? || evaluate_static(b, ops)?),
        (Some("=="), [a, b]) => Ok(a == b),
        (Some("\\=="), [a, b]) => Ok(a != b),
        (Some("current_op"), [p, t, n]) => Ok(current_op(ops, p, t, n)),
        (Some(cmp @ ("=:=" | "=\\=" | "<" | ">" | "=<" | ">=")), [a, b]) => {
            let ordering = arith::compare(a, b).map_err(|e| CompilationError::SourceCode {
                message: format!("cannot evaluate condition: {}", e),
                clause: goal.to_string(),
                line: 0,
                column: 0,
            })?;
            Ok(arith::comparison_holds(cmp, ordering))
        }
        _ => Err(CompilationError::SourceCode {
            message: "condition cannot be evaluated at compile time".to_string(),
            clause: goal.to_string(),
            line: 0,
            column: 0,
        }),
    }
}

fn current_op(ops: &OperatorTable, priority: &Term, op_type: &Term, name: &Term) -> bool {
    ops.operators().iter().any(|op| {
        let matches_priority = match priority {
            Term::Variable { .. } => true,
            other => *other == Term::int(i64::from(op.priority)),
        };
        let matches_type = match op_type {
            Term::Variable { .. } => true,
            Term::Atom(a) => OpType::parse(a) == Some(op.op_type),
            _ => false,
        };
        let matches_name = match name {
            Term::Variable { .. } => true,
            Term::Atom(a) => *a == op.name,
            _ => false,
        };
        matches_priority && matches_type && matches_name
    })
}
