// This module defines error types for the path instrumentation compiler using the thiserror
// crate. CompileError covers everything that aborts a compilation unit: parse failures of the
// textual front end, structural violations (references to unknown or not yet counted
// subroutines and dispatch tables, rewritten or missing path counts, malformed bodies) and
// arithmetic overflow of the mixed-radix numbering. ConfigError covers the allocation table
// consumed by the lowering backend and is always raised at load time, before any traversal.
// Lookup misses during lowering are not errors; they are reported through the lowering
// summary instead.

//! Error types for the instrumentation passes.
//!
//! Using thiserror for more idiomatic error handling.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for counting, injection and lowering.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("call to unresolved subroutine `{name}`")]
    UnresolvedSubroutine {
        name: String,
    },

    #[error("subroutine `{name}` is referenced before its path count is known")]
    UncountedSubroutine {
        name: String,
    },

    #[error("apply of unresolved dispatch table `{name}`")]
    UnresolvedDispatch {
        name: String,
    },

    #[error("dispatch table `{name}` is applied before its path count is known")]
    UncountedDispatch {
        name: String,
    },

    #[error("dispatch table `{dispatch}` lists unknown action `{action}`")]
    UnresolvedAction {
        dispatch: String,
        action: String,
    },

    #[error("node {node} has no path count")]
    Uncounted {
        node: u32,
    },

    #[error("path count of node {node} is already set")]
    NumPathsRewritten {
        node: u32,
    },

    #[error("registry entry `{name}` already holds {existing} paths, refusing {requested}")]
    RegistryConflict {
        name: String,
        existing: u64,
        requested: u64,
    },

    #[error("path count overflow while numbering {context}")]
    PathCountOverflow {
        context: String,
    },

    #[error("{construct}: {reason}")]
    Structural {
        construct: String,
        reason: String,
    },

    #[error("unit index {index} out of range")]
    UnknownUnit {
        index: usize,
    },

    #[error("unit `{unit}` has more than {limit} paths to enumerate")]
    TooManyPaths {
        unit: String,
        limit: usize,
    },

    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CompileError {
    pub(crate) fn structural(construct: impl Into<String>, reason: impl Into<String>) -> Self {
        CompileError::Structural {
            construct: construct.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(context: impl Into<String>) -> Self {
        CompileError::PathCountOverflow {
            context: context.into(),
        }
    }
}

/// Malformed allocation table, detected when it is loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read allocation table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed allocation table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bank of {size} counters exceeds the supported {max}")]
    BankTooLarge {
        size: u8,
        max: usize,
    },

    #[error("dispatch `{dispatch}` has no action entries")]
    EmptyDispatch {
        dispatch: String,
    },

    #[error("`{dispatch}.{alias}` uses counter {register}, bank has {bank_size}")]
    RegisterOutOfRange {
        dispatch: String,
        alias: String,
        register: u8,
        bank_size: u8,
    },

    #[error("`{dispatch}.{alias}` has a zero increment")]
    ZeroIncrement {
        dispatch: String,
        alias: String,
    },

    #[error("`{dispatch}.{alias}` increment {increment} exceeds the bound {max}")]
    IncrementTooLarge {
        dispatch: String,
        alias: String,
        increment: u64,
        max: u64,
    },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
