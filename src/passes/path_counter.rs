// PathCounter assigns every node of a unit its number of distinct execution paths, bottom-up,
// and publishes the counts of subroutines and dispatch tables in the session registry. The
// visitation order matters: subroutines are counted in declaration order before any table or
// the apply body, so a call only ever consumes a final count, and block members are visited
// last-to-first, so when a call or apply site is reached every statement sequenced after it
// already has its count and the site's mixed-radix place value can be recorded on the spot.

//! Bottom-up path counting.

use crate::core::error::{CompileError, CompileResult};
use crate::core::options::InstrumentOptions;
use crate::core::registry::{CallSite, SiteOrigin, SymbolKind};
use crate::core::session::CompilationSession;
use crate::ir::{NodeId, NodeKind, Program, Unit};

pub struct PathCounter<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    options: &'s InstrumentOptions,
}

impl<'s, 'arena> PathCounter<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>, options: &'s InstrumentOptions) -> Self {
        Self { session, options }
    }

    /// Count unit `unit_index` and return the path count of its apply body.
    pub fn run(&self, program: &mut Program, unit_index: usize) -> CompileResult<u64> {
        let unit = program.unit(unit_index)?.clone();
        self.session.set_current_unit(&unit.name);

        for subroutine in &unit.subroutines {
            let paths = self.count(program, &unit, subroutine.body, Some(subroutine.name.as_str()))?;
            self.session
                .register_paths(SymbolKind::Subroutine, &subroutine.name, paths)?;
            log::trace!("action `{}`: {} paths", subroutine.name, paths);
        }

        for table in &unit.tables {
            let mut total = 0u64;
            let mut members = Vec::with_capacity(table.actions.len());
            for action in &table.actions {
                if unit.subroutine(&action.name).is_none() {
                    return Err(CompileError::UnresolvedAction {
                        dispatch: table.name.clone(),
                        action: action.name.clone(),
                    });
                }
                let paths = self
                    .session
                    .num_paths(SymbolKind::Subroutine, &action.name)
                    .ok_or_else(|| CompileError::UncountedSubroutine {
                        name: action.name.clone(),
                    })?;
                members.push((action.name.as_str(), total));
                total = total
                    .checked_add(paths)
                    .ok_or_else(|| CompileError::overflow(format!("table `{}`", table.name)))?;
            }

            self.session.register_paths(SymbolKind::Dispatch, &table.name, total)?;
            for (action, offset) in members {
                self.session.record_member(&table.name, action, offset)?;
            }
            log::trace!("table `{}`: {} paths", table.name, total);
        }

        let root_paths = self.count(program, &unit, unit.body, None)?;
        self.session.record_root_paths(root_paths);
        log::debug!("unit `{}`: {} paths", unit.name, root_paths);
        Ok(root_paths)
    }

    fn count(
        &self,
        program: &mut Program,
        unit: &Unit,
        id: NodeId,
        scope: Option<&str>,
    ) -> CompileResult<u64> {
        let kind = program.kind(id).clone();

        let paths = match &kind {
            NodeKind::Leaf { .. } | NodeKind::Accumulate { .. } => 1,

            NodeKind::Block { stmts } => {
                // Later members first: call sites need their right-hand siblings.
                for stmt in stmts.iter().rev() {
                    self.count(program, unit, *stmt, scope)?;
                }
                let mut product = 1u64;
                for stmt in stmts {
                    product = product
                        .checked_mul(program.expect_num_paths(*stmt)?)
                        .ok_or_else(|| CompileError::overflow(format!("block {}", id)))?;
                }
                product
            }

            NodeKind::If { taken, not_taken, .. } => {
                let taken_paths = self.count(program, unit, *taken, scope)?;
                let not_taken_paths = match not_taken {
                    Some(not_taken) => self.count(program, unit, *not_taken, scope)?,
                    None => 1,
                };
                taken_paths
                    .checked_add(not_taken_paths)
                    .ok_or_else(|| CompileError::overflow(format!("if {}", id)))?
            }

            NodeKind::Switch { selector, cases } => {
                let mut total = 0u64;
                let mut has_absent = false;
                for case in cases {
                    let case_paths = match case.body {
                        Some(body) => self.count(program, unit, body, scope)?,
                        None => {
                            has_absent = true;
                            0
                        }
                    };
                    total = total
                        .checked_add(case_paths)
                        .ok_or_else(|| CompileError::overflow(format!("switch {}", id)))?;
                }
                if has_absent && self.options.strict_absent_cases {
                    total = total
                        .checked_add(1)
                        .ok_or_else(|| CompileError::overflow(format!("switch {}", id)))?;
                }
                if total == 0 {
                    log::warn!(
                        "switch ({}) in `{}` has no path through any case",
                        selector,
                        unit.name
                    );
                }
                total
            }

            NodeKind::Call { target, .. } => {
                if unit.subroutine(target).is_none() {
                    return Err(CompileError::UnresolvedSubroutine { name: target.clone() });
                }
                let paths = self
                    .session
                    .num_paths(SymbolKind::Subroutine, target)
                    .ok_or_else(|| CompileError::UncountedSubroutine { name: target.clone() })?;
                let place = program.place_value(id)?;
                self.session.record_call_site(
                    SymbolKind::Subroutine,
                    target,
                    CallSite::direct(place, scope.map(str::to_string)),
                )?;
                paths
            }

            NodeKind::Apply { table } => {
                if unit.table(table).is_none() {
                    return Err(CompileError::UnresolvedDispatch { name: table.clone() });
                }
                let entry = self
                    .session
                    .entry(SymbolKind::Dispatch, table)
                    .ok_or_else(|| CompileError::UncountedDispatch { name: table.clone() })?;
                let place = program.place_value(id)?;
                let scope = scope.map(str::to_string);

                self.session.record_call_site(
                    SymbolKind::Dispatch,
                    table,
                    CallSite::direct(place, scope.clone()),
                )?;
                for (action, offset) in entry.members() {
                    self.session.record_call_site(
                        SymbolKind::Subroutine,
                        action,
                        CallSite {
                            place,
                            offset: *offset,
                            scope: scope.clone(),
                            origin: SiteOrigin::Dispatch(table.clone()),
                        },
                    )?;
                }
                entry.num_paths()
            }
        };

        program.set_num_paths(id, paths)?;
        self.session.record_node_counted(kind.is_branch_point());
        log::trace!("{} {}: {} paths", kind.name(), id, paths);
        Ok(paths)
    }
}
