// src/runtime/arith.rs
//! Arithmetic evaluation for `is/2` and the numeric comparisons

use crate::parser::ast::{Number, Term};
use crate::ExecutionError;
use std::cmp::Ordering;

/// Evaluate a fully dereferenced arithmetic expression
pub fn evaluate(expr: &Term) -> Result<Number, ExecutionError> {
    match expr {
        Term::Number(n) => Ok(*n),
        Term::Variable { .. } => Err(ExecutionError::Instantiation),
        Term::Atom(name) => constant(name),
        Term::Compound { functor, args } if args.len() == 1 => {
            let x = evaluate(&args[0])?;
            unary(functor, x)
        }
        Term::Compound { functor, args } if args.len() == 2 => {
            let x = evaluate(&args[0])?;
            let y = evaluate(&args[1])?;
            binary(functor, x, y)
        }
        // "[X]" evaluates X
        Term::ListCell(head, tail) if tail.is_nil() => evaluate(head),
        other => Err(not_evaluable(other)),
    }
}

/// Numeric ordering of two expressions
pub fn compare(a: &Term, b: &Term) -> Result<Ordering, ExecutionError> {
    let x = evaluate(a)?;
    let y = evaluate(b)?;
    compare_numbers(x, y)
}

pub fn compare_numbers(x: Number, y: Number) -> Result<Ordering, ExecutionError> {
    match (x, y) {
        (Number::Integer(a), Number::Integer(b)) => Ok(a.cmp(&b)),
        (a, b) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or_else(|| ExecutionError::Evaluation("undefined".to_string())),
    }
}

/// Whether `ordering` satisfies the comparison operator `op`
pub fn comparison_holds(op: &str, ordering: Ordering) -> bool {
    match op {
        "=:=" => ordering == Ordering::Equal,
        "=\\=" => ordering != Ordering::Equal,
        "<" => ordering == Ordering::Less,
        ">" => ordering == Ordering::Greater,
        "=<" => ordering != Ordering::Greater,
        ">=" => ordering != Ordering::Less,
        _ => false,
    }
}

fn constant(name: &str) -> Result<Number, ExecutionError> {
    match name {
        "pi" => Ok(Number::Float(std::f64::consts::PI)),
        "e" => Ok(Number::Float(std::f64::consts::E)),
        "inf" | "infinite" => Ok(Number::Float(f64::INFINITY)),
        "nan" => Ok(Number::Float(f64::NAN)),
        "epsilon" => Ok(Number::Float(f64::EPSILON)),
        "max_tagged_integer" => Ok(Number::Integer(i64::MAX)),
        "min_tagged_integer" => Ok(Number::Integer(i64::MIN)),
        _ => Err(ExecutionError::Type {
            expected: "evaluable".to_string(),
            culprit: format!("{}/0", name),
        }),
    }
}

fn unary(op: &str, x: Number) -> Result<Number, ExecutionError> {
    use Number::{Float, Integer};
    let result = match (op, x) {
        ("-", Integer(a)) => Integer(a.checked_neg().ok_or_else(overflow)?),
        ("-", Float(a)) => Float(-a),
        ("+", n) => n,
        ("abs", Integer(a)) => Integer(a.checked_abs().ok_or_else(overflow)?),
        ("abs", Float(a)) => Float(a.abs()),
        ("sign", Integer(a)) => Integer(a.signum()),
        ("sign", Float(a)) => Float(if a == 0.0 { 0.0 } else { a.signum() }),
        ("\\", Integer(a)) => Integer(!a),
        ("float", n) => Float(n.as_f64()),
        ("integer", Integer(a)) => Integer(a),
        ("integer", Float(a)) => Integer(to_integer(a.round())?),
        ("float_integer_part", n) => Float(n.as_f64().trunc()),
        ("float_fractional_part", n) => Float(n.as_f64().fract()),
        ("truncate", n) => Integer(to_integer(n.as_f64().trunc())?),
        ("round", n) => Integer(to_integer(n.as_f64().round())?),
        ("ceiling", n) => Integer(to_integer(n.as_f64().ceil())?),
        ("floor", n) => Integer(to_integer(n.as_f64().floor())?),
        ("sqrt", n) => {
            let v = n.as_f64();
            if v < 0.0 {
                return Err(ExecutionError::Evaluation("undefined".to_string()));
            }
            Float(v.sqrt())
        }
        ("sin", n) => Float(n.as_f64().sin()),
        ("cos", n) => Float(n.as_f64().cos()),
        ("tan", n) => Float(n.as_f64().tan()),
        ("asin", n) => Float(n.as_f64().asin()),
        ("acos", n) => Float(n.as_f64().acos()),
        ("atan", n) => Float(n.as_f64().atan()),
        ("exp", n) => Float(n.as_f64().exp()),
        ("log", n) => {
            let v = n.as_f64();
            if v <= 0.0 {
                return Err(ExecutionError::Evaluation("undefined".to_string()));
            }
            Float(v.ln())
        }
        ("msb", Integer(a)) if a > 0 => Integer(63 - i64::from(a.leading_zeros())),
        (_, Float(_)) if matches!(op, "\\" | "msb") => {
            return Err(ExecutionError::Type {
                expected: "integer".to_string(),
                culprit: x.to_string(),
            })
        }
        _ => return Err(not_evaluable_name(op, 1)),
    };
    Ok(result)
}

fn binary(op: &str, x: Number, y: Number) -> Result<Number, ExecutionError> {
    use Number::{Float, Integer};
    let result = match (op, x, y) {
        ("+", Integer(a), Integer(b)) => Integer(a.checked_add(b).ok_or_else(overflow)?),
        ("-", Integer(a), Integer(b)) => Integer(a.checked_sub(b).ok_or_else(overflow)?),
        ("*", Integer(a), Integer(b)) => Integer(a.checked_mul(b).ok_or_else(overflow)?),
        ("+", a, b) => Float(a.as_f64() + b.as_f64()),
        ("-", a, b) => Float(a.as_f64() - b.as_f64()),
        ("*", a, b) => Float(a.as_f64() * b.as_f64()),
        ("/", Integer(_), Integer(0)) => return Err(zero_divisor()),
        ("/", Integer(a), Integer(b)) if a.checked_rem(b) == Some(0) => {
            Integer(a.checked_div(b).ok_or_else(overflow)?)
        }
        ("/", a, b) => {
            if b.as_f64() == 0.0 {
                return Err(zero_divisor());
            }
            Float(a.as_f64() / b.as_f64())
        }
        ("//" | "mod" | "rem" | "div", Integer(_), Integer(0)) => return Err(zero_divisor()),
        ("//", Integer(a), Integer(b)) => Integer(a.checked_div(b).ok_or_else(overflow)?),
        ("rem", Integer(a), Integer(b)) => Integer(a.checked_rem(b).ok_or_else(overflow)?),
        ("mod", Integer(a), Integer(b)) => {
            let m = a.checked_rem(b).ok_or_else(overflow)?;
            Integer(if m != 0 && (m < 0) != (b < 0) { m + b } else { m })
        }
        ("div", Integer(a), Integer(b)) => {
            let q = a.checked_div(b).ok_or_else(overflow)?;
            Integer(if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q })
        }
        ("min", a, b) => {
            if compare_numbers(a, b)? == Ordering::Greater {
                b
            } else {
                a
            }
        }
        ("max", a, b) => {
            if compare_numbers(a, b)? == Ordering::Less {
                b
            } else {
                a
            }
        }
        ("**", a, b) => Float(a.as_f64().powf(b.as_f64())),
        ("^", Integer(a), Integer(b)) => {
            if b < 0 {
                if a == 1 || a == -1 {
                    Integer(if b % 2 == 0 { 1 } else { a })
                } else {
                    return Err(ExecutionError::Type {
                        expected: "float".to_string(),
                        culprit: a.to_string(),
                    });
                }
            } else {
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                Integer(a.checked_pow(exp).ok_or_else(overflow)?)
            }
        }
        ("^", a, b) => Float(a.as_f64().powf(b.as_f64())),
        ("atan2" | "atan", a, b) => Float(a.as_f64().atan2(b.as_f64())),
        (">>", Integer(a), Integer(b)) => Integer(a >> b.clamp(0, 63)),
        ("<<", Integer(a), Integer(b)) => {
            let shift = u32::try_from(b).map_err(|_| overflow())?;
            Integer(a.checked_shl(shift).ok_or_else(overflow)?)
        }
        ("/\\", Integer(a), Integer(b)) => Integer(a & b),
        ("\\/", Integer(a), Integer(b)) => Integer(a | b),
        ("xor", Integer(a), Integer(b)) => Integer(a ^ b),
        ("//" | "mod" | "rem" | "div" | ">>" | "<<" | "/\\" | "\\/" | "xor", a, b) => {
            let culprit = if matches!(a, Float(_)) { a } else { b };
            return Err(ExecutionError::Type {
                expected: "integer".to_string(),
                culprit: culprit.to_string(),
            });
        }
        _ => return Err(not_evaluable_name(op, 2)),
    };
    Ok(result)
}

fn to_integer(x: f64) -> Result<i64, ExecutionError> {
    if x.is_finite() && x >= i64::MIN as f64 && x <= i64::MAX as f64 {
        Ok(x as i64)
    } else {
        Err(overflow())
    }
}

fn overflow() -> ExecutionError {
    ExecutionError::Evaluation("int_overflow".to_string())
}

fn zero_divisor() -> ExecutionError {
    ExecutionError::Evaluation("zero_divisor".to_string())
}

fn not_evaluable(term: &Term) -> ExecutionError {
    ExecutionError::Type {
        expected: "evaluable".to_string(),
        culprit: match term.functor() {
            Some(f) => f.to_string(),
            None => term.to_string(),
        },
    }
}

fn not_evaluable_name(name: &str, arity: usize) -> ExecutionError {
    ExecutionError::Type {
        expected: "evaluable".to_string(),
        culprit: format!("{}/{}", name, arity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_term, OperatorTable};
    use std::sync::Arc;

    fn eval(text: &str) -> Result<Number, ExecutionError> {
        let ops = Arc::new(OperatorTable::new());
        evaluate(&parse_term(text, &ops).unwrap().term)
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Number::Integer(7));
        assert_eq!(eval("7 // 2").unwrap(), Number::Integer(3));
        assert_eq!(eval("-7 mod 2").unwrap(), Number::Integer(1));
        assert_eq!(eval("-7 rem 2").unwrap(), Number::Integer(-1));
        assert_eq!(eval("2 ^ 10").unwrap(), Number::Integer(1024));
        assert_eq!(eval("6 / 2").unwrap(), Number::Integer(3));
    }

    #[test]
    fn test_mixed_and_float() {
        assert_eq!(eval("7 / 2").unwrap(), Number::Float(3.5));
        assert_eq!(eval("1 + 0.5").unwrap(), Number::Float(1.5));
        assert_eq!(eval("truncate(3.7)").unwrap(), Number::Integer(3));
        assert_eq!(eval("max(1, 2.0)").unwrap(), Number::Float(2.0));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            eval("1 / 0").unwrap_err(),
            ExecutionError::Evaluation("zero_divisor".to_string())
        );
        assert_eq!(eval("X + 1").unwrap_err(), ExecutionError::Instantiation);
        assert!(matches!(eval("foo + 1"), Err(ExecutionError::Type { .. })));
        assert!(matches!(
            eval("9223372036854775807 + 1"),
            Err(ExecutionError::Evaluation(_))
        ));
    }

    #[test]
    fn test_comparison() {
        let ops = Arc::new(OperatorTable::new());
        let a = parse_term("1 + 1", &ops).unwrap().term;
        let b = parse_term("2.0", &ops).unwrap().term;
        let ordering = compare(&a, &b).unwrap();
        assert!(comparison_holds("=:=", ordering));
        assert!(comparison_holds(">=", ordering));
        assert!(!comparison_holds("<", ordering));
    }
}
