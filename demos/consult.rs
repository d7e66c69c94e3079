// demos/consult.rs
//! Consult a Prolog/HiLog file, print its instruction listing and answer
//! queries given on the command line.
//!
//! Usage: cargo run --example consult -- family.pl "ancestor(tom, X)"

use hilog_compiler::Session;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: consult <file.pl> [query...]");
        return ExitCode::FAILURE;
    };

    let mut session = Session::new();
    if let Err(err) = session.load_builtins() {
        eprintln!("could not load library: {}", err);
        return ExitCode::FAILURE;
    }

    println!("=== Consulting {} ===\n", path);
    let report = match session.consult_file(&path) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    for err in &report.errors {
        eprintln!("{}", err);
    }
    println!(
        "✓ {} clauses, {} directives, {} errors\n",
        report.clauses,
        report.queries,
        report.errors.len()
    );
    print!("{}", session.take_output());

    if let Some(summary) = &report.summary {
        for predicate in &summary.predicates {
            if let Some(compiled) = session.engine().predicate(predicate) {
                println!("{}", compiled);
            }
        }
    }

    for query in args {
        println!("?- {}.", query);
        match session.query_all(&query) {
            Ok(answers) if answers.is_empty() => println!("false.\n"),
            Ok(answers) => {
                for answer in answers {
                    println!("{} ;", answer);
                }
                println!();
            }
            Err(err) => println!("error: {}\n", err),
        }
        print!("{}", session.take_output());
    }
    ExitCode::SUCCESS
}
