// src/observer/mod.rs
//! The seam through which compiled output leaves the pipeline
//!
//! The pipeline never keeps what it compiles. Program clauses go to
//! `on_compilation`, queries and directives to `on_query_compilation`;
//! the embedding application decides what to do with them.

use crate::parser::ast::{Functor, Position, Term};
use crate::parser::operators::OperatorTable;
use crate::precompiler::conditional::evaluate_static;
use crate::precompiler::symbols::UnitSummary;
use crate::{CompilationError, CompiledClause, CompiledQuery};
use serde::{Deserialize, Serialize};

/// Declarations made by directives the pipeline handles itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Declaration {
    Dynamic { predicate: Functor },
    Discontiguous { predicate: Functor },
    /// Clauses may come from several units
    Multifile { predicate: Functor },
    Flag { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub position: Position,
}

/// Everything an observer can be told, in one serializable type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompilationEvent {
    UnitOpened {
        name: String,
    },
    UnitClosed {
        summary: UnitSummary,
    },
    ClauseCompiled {
        predicate: Functor,
        instructions: usize,
        position: Position,
    },
    QueryCompiled {
        goal: String,
        instructions: usize,
    },
    Declared {
        declaration: Declaration,
    },
    Warned {
        warning: Warning,
    },
}

pub trait CompilerObserver {
    fn on_compilation(&mut self, clause: CompiledClause) -> Result<(), CompilationError>;

    fn on_query_compilation(&mut self, query: CompiledQuery) -> Result<(), CompilationError>;

    fn on_unit_opened(&mut self, _name: &str) {}

    fn on_unit_closed(&mut self, _summary: &UnitSummary) {}

    fn on_declaration(&mut self, _declaration: &Declaration) {}

    fn on_warning(&mut self, warning: &Warning) {
        tracing::warn!(position = %warning.position, "{}", warning.message);
    }

    /// Decide an `if/1` or `elif/1` condition
    fn evaluate_condition(
        &mut self,
        goal: &Term,
        ops: &OperatorTable,
    ) -> Result<bool, CompilationError> {
        evaluate_static(goal, ops)
    }

    /// Contribute a term expansion; `None` leaves the term unchanged
    fn expand_term(&mut self, _term: &Term) -> Result<Option<Vec<Term>>, CompilationError> {
        Ok(None)
    }

    /// Contribute a goal expansion; `None` leaves the goal unchanged
    fn expand_goal(&mut self, _goal: &Term) -> Result<Option<Term>, CompilationError> {
        Ok(None)
    }
}

/// Observer that records what it is told
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<CompilationEvent>,
    pub clauses: Vec<CompiledClause>,
    pub queries: Vec<CompiledQuery>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> Result<String, CompilationError> {
        serde_json::to_string_pretty(&self.events)
            .map_err(|e| CompilationError::Serialization(e.to_string()))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.events.iter().filter_map(|e| match e {
            CompilationEvent::Warned { warning } => Some(warning),
            _ => None,
        })
    }
}

impl CompilerObserver for EventLog {
    fn on_compilation(&mut self, clause: CompiledClause) -> Result<(), CompilationError> {
        self.events.push(CompilationEvent::ClauseCompiled {
            predicate: clause.functor.clone(),
            instructions: clause.code.len(),
            position: clause.clause.position,
        });
        self.clauses.push(clause);
        Ok(())
    }

    fn on_query_compilation(&mut self, query: CompiledQuery) -> Result<(), CompilationError> {
        self.events.push(CompilationEvent::QueryCompiled {
            goal: query.goal().to_string(),
            instructions: query.code.len(),
        });
        self.queries.push(query);
        Ok(())
    }

    fn on_unit_opened(&mut self, name: &str) {
        self.events.push(CompilationEvent::UnitOpened {
            name: name.to_string(),
        });
    }

    fn on_unit_closed(&mut self, summary: &UnitSummary) {
        self.events.push(CompilationEvent::UnitClosed {
            summary: summary.clone(),
        });
    }

    fn on_declaration(&mut self, declaration: &Declaration) {
        self.events.push(CompilationEvent::Declared {
            declaration: declaration.clone(),
        });
    }

    fn on_warning(&mut self, warning: &Warning) {
        self.events.push(CompilationEvent::Warned {
            warning: warning.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = CompilationEvent::Declared {
            declaration: Declaration::Dynamic {
                predicate: Functor::new("counter", 1),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "declared");
        assert_eq!(json["declaration"]["type"], "dynamic");
        assert_eq!(json["declaration"]["predicate"]["arity"], 1);

        let back: CompilationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_log_collects_warnings() {
        let mut log = EventLog::new();
        log.on_unit_opened("a.pl");
        log.on_warning(&Warning {
            message: "clauses not together".to_string(),
            position: Position::new(3, 1),
        });
        assert_eq!(log.events.len(), 2);
        assert_eq!(log.warnings().count(), 1);
        assert!(log.to_json().unwrap().contains("unit_opened"));
    }
}
