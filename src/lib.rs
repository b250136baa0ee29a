//! pathprof - Ball-Larus path profiling for structured control units.
//!
//! Every execution path through a unit's apply body gets a distinct small
//! integer. Counting assigns each statement its number of paths, injection
//! prepends accumulator updates so the accumulator ends every run holding the
//! id of the path it took, in `0..paths`. A second backend distributes
//! per-action contributions over a bank of physical counters instead.
//!
//! # Primary Usage
//!
//! ```ignore
//! use pathprof::{InstrumentOptions, Pipeline, Program};
//!
//! let mut program = Program::parse(&source)?;
//! let pipeline = Pipeline::new(InstrumentOptions::default());
//! let reports = pipeline.instrument(&mut program)?;
//! pipeline.verify(&program, &reports)?;
//! println!("{}", program);
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (session, registry, counter bank, errors)
//! - [`ir`] - Arena tree, parser, printer, path enumeration
//! - [`passes`] - Counting, injection, register lowering
//! - [`pipeline`] - Per-unit driver

pub mod core;
pub mod ir;
pub mod passes;
pub mod pipeline;

pub use crate::core::{
    CompilationSession, CompileError, CompileResult, ConfigError, InstrumentOptions, SessionStats,
};
pub use crate::ir::Program;
pub use crate::passes::{
    AllocationTable, OffsetInjector, PathCounter, RegisterAllocatorLowering,
};
pub use crate::pipeline::{LoweringReport, Pipeline, UnitReport};
