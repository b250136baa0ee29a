// This module serves as the hub for the infrastructure shared by all instrumentation passes:
// error types, the options that parameterize a run, the per-unit compilation session (name
// arena, registry and statistics), the registry that threads path counts and call-site
// multiplicities from counting to injection, and the physical counter bank validated and
// consumed by the register lowering backend.

//! Core infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based name interning using `bumpalo`
//! - One fresh session per compilation unit
//! - Statistics reported by the driver
//!
//! ## Registry (`registry`)
//! - Write-once path counts per subroutine and dispatch table
//! - Call sites and multiplicity folding
//!
//! ## Counter Bank (`counter_bank`)
//! - Bitset tracking of claimed and written physical counters
//! - Increment bounds checked when the allocation table is loaded

pub mod counter_bank;
pub mod error;
pub mod options;
pub mod registry;
pub mod session;

pub use session::{
    CompilationSession,
    SessionStats,
};

pub use registry::{
    CallSite,
    Registry,
    RegistryEntry,
    SiteOrigin,
    SiteRecord,
    SymbolKind,
};

pub use counter_bank::{
    Assignment,
    CounterBank,
    CounterError,
    CounterId,
    CounterSet,
};

pub use error::{
    CompileError,
    CompileResult,
    ConfigError,
};

pub use options::InstrumentOptions;
