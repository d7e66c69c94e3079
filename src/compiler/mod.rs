// src/compiler/mod.rs
//! Instruction compilation and the per-unit compile driver

pub mod bytecode;
pub mod compiler;

use crate::config::CompilerConfig;
use crate::observer::CompilerObserver;
use crate::parser::Parser;
use crate::precompiler::symbols::UnitSummary;
use crate::precompiler::{CompilationContext, Input, Output, PrecompiledClause};
use crate::{CompilationError, CompiledClause, CompiledQuery};
use std::io::BufRead;

pub use compiler::{Compiler, Linker};

/// Compile a program clause
pub fn compile_clause(
    clause: &PrecompiledClause,
    config: &CompilerConfig,
) -> Result<CompiledClause, CompilationError> {
    Compiler::compile_clause(clause, config)
}

/// Compile a query or directive
pub fn compile_query(
    query: &PrecompiledClause,
    config: &CompilerConfig,
) -> Result<CompiledQuery, CompilationError> {
    Compiler::compile_query(query, config)
}

/// Outcome of compiling one source unit
#[derive(Debug, Default)]
pub struct UnitReport {
    pub name: String,
    pub clauses: usize,
    pub queries: usize,
    /// Recoverable errors; the clauses they belong to were skipped
    pub errors: Vec<CompilationError>,
    pub summary: Option<UnitSummary>,
}

impl UnitReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read, pre-compile and compile a whole unit, handing every result to
/// `observer`.
///
/// Syntax errors and clause-level errors are recorded and reading resumes
/// at the next clause. Fatal errors end the unit.
pub fn compile_unit<R: BufRead>(
    name: &str,
    parser: &mut Parser<R>,
    ctx: &mut CompilationContext,
    observer: &mut dyn CompilerObserver,
) -> Result<UnitReport, CompilationError> {
    let mut report = UnitReport {
        name: name.to_string(),
        ..UnitReport::default()
    };
    let opened = ctx.precompile(Input::BeginOfFile(name.to_string()), observer)?;
    dispatch(opened, ctx, observer, &mut report)?;

    loop {
        parser.set_double_quotes(ctx.config.double_quotes);
        let read = match parser.read_term() {
            Ok(Some(read)) => read,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(unit = name, %err, "syntax error");
                report.errors.push(err.into());
                if let Err(err) = parser.skip_clause() {
                    report.errors.push(err.into());
                    break;
                }
                continue;
            }
        };
        if read.term.is_atom("end_of_file") {
            break;
        }

        match ctx.precompile(Input::Term(read), observer) {
            Ok(outputs) => dispatch(outputs, ctx, observer, &mut report)?,
            Err(err) => record(name, err, &mut report)?,
        }
    }

    match ctx.precompile(Input::EndOfFile, observer) {
        Ok(closed) => dispatch(closed, ctx, observer, &mut report)?,
        Err(err) => record(name, err, &mut report)?,
    }
    Ok(report)
}

/// Keep a clause-level error in the report; fatal ones are handed back
fn record(unit: &str, err: CompilationError, report: &mut UnitReport) -> Result<(), CompilationError> {
    if err.is_fatal() {
        return Err(err);
    }
    tracing::warn!(unit, %err, "clause skipped");
    report.errors.push(err);
    Ok(())
}

/// Compile and hand over each output. A failing clause or directive does
/// not stop the ones after it.
fn dispatch(
    outputs: Vec<Output>,
    ctx: &CompilationContext,
    observer: &mut dyn CompilerObserver,
    report: &mut UnitReport,
) -> Result<(), CompilationError> {
    for output in outputs {
        let result = match output {
            Output::Clause(clause) if clause.is_query() => {
                compile_query(&clause, &ctx.config).and_then(|query| {
                    report.queries += 1;
                    observer.on_query_compilation(query)
                })
            }
            Output::Clause(clause) => compile_clause(&clause, &ctx.config).and_then(|compiled| {
                report.clauses += 1;
                observer.on_compilation(compiled)
            }),
            Output::UnitClosed(summary) => {
                observer.on_unit_closed(&summary);
                report.summary = Some(summary);
                Ok(())
            }
        };
        if let Err(err) = result {
            record(&report.name.clone(), err, report)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{CompilationEvent, EventLog};
    use crate::parser::Functor;
    use std::sync::Arc;

    fn compile(source: &str) -> (UnitReport, EventLog) {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut parser = Parser::for_text(source, Arc::clone(&ctx.ops));
        let mut log = EventLog::new();
        let report = compile_unit("test.pl", &mut parser, &mut ctx, &mut log).unwrap();
        (report, log)
    }

    #[test]
    fn test_unit_is_bracketed_by_events() {
        let (report, log) = compile("a. b :- a.");
        assert!(report.is_clean());
        assert_eq!(report.clauses, 2);
        assert!(matches!(log.events.first(), Some(CompilationEvent::UnitOpened { .. })));
        match log.events.last() {
            Some(CompilationEvent::UnitClosed { summary }) => {
                assert_eq!(
                    summary.predicates,
                    vec![Functor::new("a", 0), Functor::new("b", 0)]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_operator_directive_affects_later_clauses() {
        let (report, log) = compile(":- op(700, xfx, ===>). rule(a ===> b).");
        assert!(report.is_clean());
        let head = log.clauses[0].clause.head.as_ref().unwrap();
        assert!(head.arg(0).unwrap().is_functor("===>", 2));
    }

    #[test]
    fn test_errors_do_not_stop_the_unit() {
        let (report, log) = compile("a. b :- . c. atom(x). d.");
        assert_eq!(report.errors.len(), 2);
        let names: Vec<String> = log
            .clauses
            .iter()
            .map(|c| c.functor.to_string())
            .collect();
        assert_eq!(names, vec!["a/0", "c/0", "d/0"]);
    }

    #[test]
    fn test_reading_stops_at_end_of_file_atom() {
        let (report, _) = compile("a. end_of_file. b.");
        assert_eq!(report.clauses, 1);
    }

    #[test]
    fn test_unbalanced_conditional_is_fatal() {
        let mut ctx = CompilationContext::new(CompilerConfig::default());
        let mut parser = Parser::for_text("a. :- endif. b.", Arc::clone(&ctx.ops));
        let mut log = EventLog::new();
        let err = compile_unit("bad.pl", &mut parser, &mut ctx, &mut log).unwrap_err();
        assert!(matches!(err, CompilationError::Conditional { .. }));
        assert_eq!(log.clauses.len(), 1);
    }
}
