// tests/integration_tests.rs
//! Integration tests for the HiLog compiler

use hilog_compiler::compiler::bytecode::Instruction;
use hilog_compiler::observer::{CompilationEvent, Declaration};
use hilog_compiler::parser::{parse_all, parse_term, Fixity, OperatorTable, Term, TermWriter};
use hilog_compiler::{CompilerConfig, Engine, Error, EventLog, ExecutionError, Session};
use proptest::prelude::*;
use std::sync::Arc;

fn consult(source: &str) -> Session {
    let mut session = Session::new();
    let report = session.consult_str("test.pl", source).expect("Failed to compile");
    assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);
    session
}

#[test]
fn test_append_end_to_end() {
    let mut session = consult(
        r#"
        append([], L, L).
        append([H|T], L, [H|R]) :- append(T, L, R).
        "#,
    );

    let answers = session.query_all("append([1], [2,3], X)").unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].get("X").unwrap().to_string(), "[1,2,3]");

    let splits = session.query_all("append(X, Y, [a,b])").unwrap();
    assert_eq!(splits.len(), 3);
}

#[test]
fn test_conditional_compilation() {
    let mut session = consult(
        r#"
        :- if(false).
        foo.
        :- else.
        bar.
        :- endif.
        "#,
    );

    assert!(session.query("bar").unwrap().is_some());
    match session.query("foo") {
        Err(Error::Execution(ExecutionError::UnknownProcedure { name, arity })) => {
            assert_eq!(name, "foo");
            assert_eq!(arity, 0);
        }
        other => panic!("Expected unknown procedure, got {:?}", other),
    }
}

#[test]
fn test_nested_conditionals_with_elif() {
    let mut session = consult(
        r#"
        :- if(1 > 2).
        pick(one).
        :- elif(2 > 1).
            :- if(true).
            pick(two).
            :- endif.
        :- else.
        pick(three).
        :- endif.
        "#,
    );

    let answers = session.query_all("pick(X)").unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].to_string(), "X = two");
}

#[test]
fn test_operator_add_and_remove() {
    let ops = Arc::new(OperatorTable::new());
    ops.add(700, Fixity::Infix, hilog_compiler::parser::Assoc::None, "≺")
        .unwrap();

    let read = parse_term("a ≺ b", &ops).unwrap();
    assert!(read.term.is_functor("≺", 2));

    ops.remove(Fixity::Infix, "≺");
    assert!(parse_term("a ≺ b", &ops).is_err());
    assert!(parse_term("≺(a, b)", &ops).unwrap().term.is_functor("≺", 2));
}

#[test]
fn test_operator_directive_in_source() {
    let mut session = consult(
        r#"
        :- op(700, xfx, ≺).
        before(a ≺ b).
        "#,
    );
    let answer = session.query("before(X ≺ Y)").unwrap().unwrap();
    assert_eq!(answer.to_string(), "X = a, Y = b");
}

#[test]
fn test_precedence_and_associativity() {
    let ops = Arc::new(OperatorTable::new());

    let sum = parse_term("1 + 2 * 3", &ops).unwrap().term;
    assert!(sum.is_functor("+", 2));
    assert_eq!(sum.arg(0), Some(&Term::int(1)));
    assert!(sum.arg(1).unwrap().is_functor("*", 2));

    let diff = parse_term("a - b - c", &ops).unwrap().term;
    assert!(diff.arg(0).unwrap().is_functor("-", 2));
    assert_eq!(diff.arg(1), Some(&Term::atom("c")));

    let power = parse_term("a ^ b ^ c", &ops).unwrap().term;
    assert_eq!(power.arg(0), Some(&Term::atom("a")));
    assert!(power.arg(1).unwrap().is_functor("^", 2));

    assert!(parse_term("a = b = c", &ops).is_err());
}

#[test]
fn test_list_parsing() {
    let ops = Arc::new(OperatorTable::new());

    let list = parse_term("[1, 2, 3]", &ops).unwrap().term;
    assert_eq!(list, Term::list(vec![Term::int(1), Term::int(2), Term::int(3)]));

    let partial = parse_term("[H|T]", &ops).unwrap();
    match &partial.term {
        Term::ListCell(head, tail) => {
            assert!(head.is_variable());
            assert!(tail.is_variable());
        }
        other => panic!("Expected list cell, got {}", other),
    }
    assert_eq!(partial.variable_names.len(), 2);

    assert!(parse_term("[]", &ops).unwrap().term.is_nil());
    assert_eq!(
        parse_term("'.'(a, [])", &ops).unwrap().term,
        Term::list(vec![Term::atom("a")])
    );
}

#[test]
fn test_variable_classification() {
    let mut log = EventLog::new();
    let mut ctx = hilog_compiler::CompilationContext::new(CompilerConfig::default());
    let mut parser = hilog_compiler::parser::Parser::for_text(
        "p(X, Y) :- q(X), r(Y).\nchain(X) :- q(X).\n",
        Arc::clone(&ctx.ops),
    );
    let report =
        hilog_compiler::compiler::compile_unit("vars.pl", &mut parser, &mut ctx, &mut log).unwrap();
    assert!(report.is_clean());

    // Y lives across the call to q/1; X does not
    let p = &log.clauses[0];
    assert_eq!(p.permanent_vars, 1);
    assert!(p.code.contains(&Instruction::Allocate(1)));

    // A single-goal body needs no frame
    let chain = &log.clauses[1];
    assert_eq!(chain.permanent_vars, 0);
    assert!(!chain.code.iter().any(|i| matches!(i, Instruction::Allocate(_))));
    assert!(matches!(chain.code.last(), Some(Instruction::Execute(_))));
}

#[test]
fn test_unset_query() {
    let mut engine = Engine::new(Arc::new(OperatorTable::new()), Default::default());
    assert_eq!(engine.resolve().unwrap_err(), ExecutionError::UnsetQuery);
}

#[test]
fn test_load_builtins() {
    let mut session = Session::new();
    let report = session.load_builtins().unwrap();
    assert!(report.is_clean(), "{:?}", report.errors);

    let answer = session.query("length([a,b,c], N)").unwrap().unwrap();
    assert_eq!(answer.to_string(), "N = 3");

    let answer = session.query("reverse([1,2,3], R)").unwrap().unwrap();
    assert_eq!(answer.to_string(), "R = [3,2,1]");

    let answers = session.query_all("between(1, 3, X)").unwrap();
    assert_eq!(answers.len(), 3);

    let answer = session.query("nth1(2, [a,b,c], E)").unwrap().unwrap();
    assert_eq!(answer.to_string(), "E = b");
}

#[test]
fn test_grammar_rules() {
    let mut session = Session::new();
    session.load_builtins().unwrap();
    let report = session
        .consult_str(
            "greeting.pl",
            r#"
            greeting --> [hello], name.
            name --> [world].
            name --> [prolog].
            "#,
        )
        .unwrap();
    assert!(report.is_clean());

    assert!(session.query("phrase(greeting, [hello, prolog])").unwrap().is_some());
    assert!(session.query("phrase(greeting, [hello, there])").unwrap().is_none());
}

#[test]
fn test_declarations_reach_observer() {
    let mut log = EventLog::new();
    let mut ctx = hilog_compiler::CompilationContext::new(CompilerConfig::default());
    let mut parser = hilog_compiler::parser::Parser::for_text(
        ":- dynamic(counter/1).\n:- discontiguous(item/1).\n:- multifile(hook/2).\nitem(a).\nother.\nitem(b).\n",
        Arc::clone(&ctx.ops),
    );
    hilog_compiler::compiler::compile_unit("decl.pl", &mut parser, &mut ctx, &mut log).unwrap();

    let declared: Vec<&Declaration> = log
        .events
        .iter()
        .filter_map(|e| match e {
            CompilationEvent::Declared { declaration } => Some(declaration),
            _ => None,
        })
        .collect();
    assert_eq!(declared.len(), 3);
    assert!(matches!(
        declared[2],
        Declaration::Multifile { predicate } if predicate.to_string() == "hook/2"
    ));
    assert_eq!(log.warnings().count(), 0);
    let json = log.to_json().unwrap();
    assert!(json.contains("\"discontiguous\""));
    assert!(json.contains("\"multifile\""));
}

#[test]
fn test_syntax_error_recovery() {
    let mut session = Session::new();
    let report = session
        .consult_str("broken.pl", "good(1).\nbad(( .\ngood(2).\n")
        .unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].to_string().contains("2:"));
    assert_eq!(session.query_all("good(X)").unwrap().len(), 2);
}

#[test]
fn test_failing_initialization_keeps_the_unit() {
    let mut session = Session::new();
    let report = session
        .consult_str("i.pl", "a.\n:- initialization(nope).\nb.\n")
        .unwrap();
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].to_string().contains("nope/0"));
    assert_eq!(report.clauses, 2);
    let summary = report.summary.expect("unit closed");
    assert_eq!(summary.predicates.len(), 2);
    assert!(session.query("a").unwrap().is_some());
    assert!(session.query("b").unwrap().is_some());
}

#[test]
fn test_domain_persistence() {
    let session = consult("edge(a, b).\nedge(b, c).\npath(X, Y) :- edge(X, Y).\npath(X, Y) :- edge(X, Z), path(Z, Y).\n");
    let bytes = session.engine().to_bytecode().unwrap();
    let restored = Engine::from_bytecode(&bytes, Arc::new(OperatorTable::new()), Default::default()).unwrap();
    assert_eq!(restored.listing(), session.listing());
}

fn number_strategy() -> impl Strategy<Value = Term> {
    prop_oneof![
        (-10_000i64..10_000).prop_map(Term::int),
        (-1.0e6f64..1.0e6).prop_map(Term::float),
        prop::sample::select(vec![1.0e15, 1.0e20, -2.5e300, 1.5e-7, -0.5]).prop_map(Term::float),
    ]
}

fn atom_strategy() -> impl Strategy<Value = Term> {
    prop_oneof![
        "[a-z][a-z0-9_]{0,6}"
            .prop_filter("operator names read differently", |a| !OperatorTable::new().is_operator(a))
            .prop_map(Term::atom),
        // Quoted and symbolic names, including operators standing as atoms
        prop::sample::select(vec!["A", "hello world", "it's", "-", "+", "*", "=", "\\+", "<", "->"])
            .prop_map(Term::atom),
        number_strategy(),
    ]
}

fn term_strategy() -> impl Strategy<Value = Term> {
    atom_strategy().prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            ("[fgh]", prop::collection::vec(inner.clone(), 1..4))
                .prop_map(|(f, args)| Term::compound(f, args)),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Term::list),
            (prop::sample::select(vec!["+", "-", "*", "=", ","]), inner.clone(), inner.clone())
                .prop_map(|(op, a, b)| Term::compound(op, vec![a, b])),
            (prop::sample::select(vec!["-", "\\+"]), inner.clone())
                .prop_map(|(op, a)| Term::compound(op, vec![a])),
            inner.prop_map(|a| Term::compound("{}", vec![a])),
        ]
    })
}

proptest! {
    #[test]
    fn prop_written_terms_read_back(term in term_strategy()) {
        let ops = Arc::new(OperatorTable::new());
        let text = TermWriter::with_operators(&ops).quoted(true).write(&term);
        let read = parse_term(&text, &ops).unwrap();
        prop_assert_eq!(read.term, term);
    }

    #[test]
    fn prop_facts_compile_and_answer(values in prop::collection::vec(0i64..1000, 1..20)) {
        let source: String = values.iter().map(|v| format!("value({}).\n", v)).collect();
        let mut session = Session::new();
        session.consult_str("values.pl", &source).unwrap();
        // Equal facts on different lines are different clauses
        let answers = session.query_all("value(X)").unwrap();
        prop_assert_eq!(answers.len(), values.len());
        prop_assert_eq!(parse_all(&source, &Arc::new(OperatorTable::new())).unwrap().len(), values.len());
    }
}
