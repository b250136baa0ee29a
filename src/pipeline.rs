// The pipeline drives whole programs through the passes. Every unit is compiled in its own
// CompilationSession backed by a fresh bumpalo arena, so the registry never carries path
// counts or multiplicities from one unit into the next. Path encoding runs PathCounter then
// OffsetInjector on the same session; lowering validates the allocation table once, then runs
// RegisterAllocatorLowering per unit against one shared counter bank.

//! Program-level driver.

use crate::core::error::CompileResult;
use crate::core::options::InstrumentOptions;
use crate::core::session::{CompilationSession, SessionStats};
use crate::ir::{enumerate, verify_bijection, Program};
use crate::passes::{
    AllocationTable, InjectionSummary, LoweringSummary, OffsetInjector, PathCounter,
    RegisterAllocatorLowering,
};
use bumpalo::Bump;

/// Result of path encoding one unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit: String,
    pub injection: InjectionSummary,
    pub stats: SessionStats,
}

/// Result of lowering one unit.
#[derive(Debug, Clone)]
pub struct LoweringReport {
    pub unit: String,
    pub lowering: LoweringSummary,
    pub stats: SessionStats,
}

pub struct Pipeline {
    options: InstrumentOptions,
}

impl Pipeline {
    pub fn new(options: InstrumentOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &InstrumentOptions {
        &self.options
    }

    /// Count and instrument every unit of `program`.
    pub fn instrument(&self, program: &mut Program) -> CompileResult<Vec<UnitReport>> {
        (0..program.units.len())
            .map(|index| self.instrument_unit(program, index))
            .collect()
    }

    pub fn instrument_unit(&self, program: &mut Program, unit_index: usize) -> CompileResult<UnitReport> {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        PathCounter::new(&session, &self.options).run(program, unit_index)?;
        let injection = OffsetInjector::new(&session, &self.options).run(program, unit_index)?;

        Ok(UnitReport {
            unit: program.unit(unit_index)?.name.clone(),
            injection,
            stats: session.stats(),
        })
    }

    /// Enumerate the paths of every instrumented unit and check the numbering.
    pub fn verify(&self, program: &Program, reports: &[UnitReport]) -> CompileResult<()> {
        for (index, report) in reports.iter().enumerate() {
            let traces = enumerate(program, index, &self.options)?;
            verify_bijection(&report.unit, &traces, report.injection.root_paths)?;
            log::debug!("unit `{}`: {} path ids verified", report.unit, traces.len());
        }
        Ok(())
    }

    /// Validate `table` and lower every unit of `program` with it.
    pub fn lower(&self, program: &mut Program, table: &AllocationTable) -> CompileResult<Vec<LoweringReport>> {
        let mut bank = table.validate(&self.options)?;
        let mut reports = Vec::with_capacity(program.units.len());

        for unit_index in 0..program.units.len() {
            let arena = Bump::new();
            let session = CompilationSession::new(&arena);
            let lowering = RegisterAllocatorLowering::new(&session, table, &self.options)
                .run(program, unit_index, &mut bank)?;
            reports.push(LoweringReport {
                unit: program.unit(unit_index)?.name.clone(),
                lowering,
                stats: session.stats(),
            });
        }

        Ok(reports)
    }
}
