// src/runtime/mod.rs
//! Resolution engine that answers queries against compiled predicates

pub mod arith;
pub mod bindings;
pub mod builtins;
pub mod engine;

pub use engine::{Engine, Solution, Solutions};
