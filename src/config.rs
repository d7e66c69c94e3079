// src/config.rs
//! Compiler and engine configuration

use crate::CompilationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How `"..."` literals are read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoubleQuotes {
    #[default]
    Codes,
    Chars,
    Atom,
}

impl DoubleQuotes {
    pub fn from_flag(value: &str) -> Option<Self> {
        match value {
            "codes" => Some(DoubleQuotes::Codes),
            "chars" => Some(DoubleQuotes::Chars),
            "atom" => Some(DoubleQuotes::Atom),
            _ => None,
        }
    }
}

/// What the engine does when a goal has no definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unknown {
    #[default]
    Error,
    Fail,
}

impl Unknown {
    pub fn from_flag(value: &str) -> Option<Self> {
        match value {
            "error" => Some(Unknown::Error),
            "fail" => Some(Unknown::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub double_quotes: DoubleQuotes,

    /// Compile single-goal bodies without an environment frame
    pub chain_rule: bool,

    pub unknown: Unknown,

    /// Bound on repeated goal expansion of one goal
    pub max_expansion_depth: usize,

    pub resource_root: PathBuf,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            double_quotes: DoubleQuotes::default(),
            chain_rule: true,
            unknown: Unknown::default(),
            max_expansion_depth: 64,
            resource_root: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/resources")),
        }
    }
}

impl CompilerConfig {
    pub fn from_json(json: &str) -> Result<Self, CompilationError> {
        serde_json::from_str(json).map_err(|e| CompilationError::Serialization(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CompilationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Library source consulted by `load_builtins`
    pub fn builtins_path(&self) -> PathBuf {
        self.resource_root.join("lib").join("builtins.pl")
    }
}
