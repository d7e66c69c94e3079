// src/compiler/bytecode.rs
//! WAM-style instructions produced by the instruction compiler

use crate::parser::ast::{Functor, Number, Term};
use crate::parser::writer::quote_atom;
use crate::precompiler::builtins::Builtin;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A variable's home: an argument/temporary register or a slot in the
/// environment frame. Both are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reg {
    X(usize),
    Y(usize),
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::X(n) => write!(f, "X{}", n),
            Reg::Y(n) => write!(f, "Y{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Atom(String),
    Integer(i64),
    Float(f64),
}

impl Constant {
    /// Atomic terms other than `[]`, which has its own instructions
    pub fn from_term(term: &Term) -> Option<Constant> {
        match term {
            Term::Atom(a) if !term.is_nil() => Some(Constant::Atom(a.clone())),
            Term::Number(Number::Integer(n)) => Some(Constant::Integer(*n)),
            Term::Number(Number::Float(x)) => Some(Constant::Float(*x)),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Atom(a) => f.write_str(&quote_atom(a)),
            Constant::Integer(n) => write!(f, "{}", n),
            Constant::Float(x) => write!(f, "{}", Number::Float(*x)),
        }
    }
}

/// Instructions executed by the abstract machine. Argument register
/// operands are plain register numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    // Head unification
    GetVariable(Reg, usize),
    GetValue(Reg, usize),
    GetConstant(Constant, usize),
    GetNil(usize),
    GetList(usize),
    GetStructure(Functor, usize),

    // Structure arguments in read/write mode
    UnifyVariable(Reg),
    UnifyValue(Reg),
    UnifyConstant(Constant),
    UnifyNil,
    UnifyVoid(usize),

    // Body argument set-up
    PutVariable(Reg, usize),
    PutValue(Reg, usize),
    /// Permanent variable that may still live in the frame being discarded
    PutUnsafeValue(usize, usize),
    PutConstant(Constant, usize),
    PutNil(usize),
    PutList(usize),
    PutStructure(Functor, usize),

    // Structure construction
    SetVariable(Reg),
    SetValue(Reg),
    SetConstant(Constant),
    SetNil,
    SetVoid(usize),

    // Control
    Allocate(usize),
    Deallocate,
    /// Call with the number of permanent variables still live afterwards
    Call(Functor, usize),
    Execute(Functor),
    CallBuiltin(Builtin, usize),
    Proceed,

    // Clause alternatives; operands are instruction indices
    TryMeElse(usize),
    RetryMeElse(usize),
    TrustMe,

    // Cut
    NeckCut,
    GetLevel(usize),
    Cut(usize),
}

impl Instruction {
    /// Returns true for instructions that transfer control to a predicate
    pub fn is_call(&self) -> bool {
        matches!(self, Instruction::Call(..) | Instruction::Execute(_))
    }

    pub fn is_choice(&self) -> bool {
        matches!(
            self,
            Instruction::TryMeElse(_) | Instruction::RetryMeElse(_) | Instruction::TrustMe
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            GetVariable(r, a) => write!(f, "get_variable {}, A{}", r, a),
            GetValue(r, a) => write!(f, "get_value {}, A{}", r, a),
            GetConstant(c, a) => write!(f, "get_constant {}, A{}", c, a),
            GetNil(a) => write!(f, "get_nil A{}", a),
            GetList(a) => write!(f, "get_list A{}", a),
            GetStructure(s, a) => write!(f, "get_structure {}, A{}", s, a),
            UnifyVariable(r) => write!(f, "unify_variable {}", r),
            UnifyValue(r) => write!(f, "unify_value {}", r),
            UnifyConstant(c) => write!(f, "unify_constant {}", c),
            UnifyNil => write!(f, "unify_nil"),
            UnifyVoid(n) => write!(f, "unify_void {}", n),
            PutVariable(r, a) => write!(f, "put_variable {}, A{}", r, a),
            PutValue(r, a) => write!(f, "put_value {}, A{}", r, a),
            PutUnsafeValue(y, a) => write!(f, "put_unsafe_value Y{}, A{}", y, a),
            PutConstant(c, a) => write!(f, "put_constant {}, A{}", c, a),
            PutNil(a) => write!(f, "put_nil A{}", a),
            PutList(a) => write!(f, "put_list A{}", a),
            PutStructure(s, a) => write!(f, "put_structure {}, A{}", s, a),
            SetVariable(r) => write!(f, "set_variable {}", r),
            SetValue(r) => write!(f, "set_value {}", r),
            SetConstant(c) => write!(f, "set_constant {}", c),
            SetNil => write!(f, "set_nil"),
            SetVoid(n) => write!(f, "set_void {}", n),
            Allocate(n) => write!(f, "allocate {}", n),
            Deallocate => write!(f, "deallocate"),
            Call(p, n) => write!(f, "call {}, {}", p, n),
            Execute(p) => write!(f, "execute {}", p),
            CallBuiltin(b, n) => write!(f, "call_builtin {}, {}", b, n),
            Proceed => write!(f, "proceed"),
            TryMeElse(l) => write!(f, "try_me_else L{}", l),
            RetryMeElse(l) => write!(f, "retry_me_else L{}", l),
            TrustMe => write!(f, "trust_me"),
            NeckCut => write!(f, "neck_cut"),
            GetLevel(y) => write!(f, "get_level Y{}", y),
            Cut(y) => write!(f, "cut Y{}", y),
        }
    }
}

/// Write a listing, one instruction per line, marking jump targets
pub fn write_listing(f: &mut fmt::Formatter<'_>, code: &[Instruction]) -> fmt::Result {
    let targets: Vec<usize> = code
        .iter()
        .filter_map(|i| match i {
            Instruction::TryMeElse(l) | Instruction::RetryMeElse(l) => Some(*l),
            _ => None,
        })
        .collect();
    for (index, instruction) in code.iter().enumerate() {
        if targets.contains(&index) {
            writeln!(f, "L{}:", index)?;
        }
        writeln!(f, "    {}", instruction)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_serialization() {
        let code = vec![
            Instruction::GetStructure(Functor::new("f", 2), 1),
            Instruction::UnifyConstant(Constant::Float(2.5)),
            Instruction::CallBuiltin(Builtin::Is, 0),
            Instruction::Execute(Functor::new("q", 0)),
        ];
        let bytes = bincode::serialize(&code).unwrap();
        let decoded: Vec<Instruction> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(code, decoded);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(
            Instruction::GetVariable(Reg::Y(1), 2).to_string(),
            "get_variable Y1, A2"
        );
        assert_eq!(
            Instruction::PutConstant(Constant::Atom("hello world".into()), 1).to_string(),
            "put_constant 'hello world', A1"
        );
        assert_eq!(
            Instruction::Call(Functor::new("q", 1), 3).to_string(),
            "call q/1, 3"
        );
        assert_eq!(
            Instruction::CallBuiltin(Builtin::Is, 0).to_string(),
            "call_builtin is/2, 0"
        );
    }
}
