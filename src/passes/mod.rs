// This module groups the instrumentation passes. PathCounter and OffsetInjector form the path
// encoding pipeline and must share one CompilationSession per unit, counting strictly before
// injecting. RegisterAllocatorLowering is an independent backend driven by an AllocationTable
// loaded and validated up front.

//! Instrumentation passes.
//!
//! - [`PathCounter`] - bottom-up path counts and call-site place values
//! - [`OffsetInjector`] - accumulator updates numbering every path
//! - [`RegisterAllocatorLowering`] - physical counter updates per allocation table

pub mod allocation;
pub mod lowering;
pub mod offset_injector;
pub mod path_counter;

pub use allocation::{AllocationEntry, AllocationTable, DispatchAllocation};
pub use lowering::{LookupMiss, LoweredCounter, LoweringSummary, RegisterAllocatorLowering};
pub use offset_injector::{InjectionSummary, OffsetInjector};
pub use path_counter::PathCounter;
