//! Exhaustive path enumeration.
//!
//! Walks every execution path of a unit's apply body, entering called
//! subroutines and every action of an applied dispatch table, and sums the
//! synthetic updates met on the way. Used to check that the injected
//! accumulator numbers paths compactly.

use super::*;
use crate::core::options::InstrumentOptions;
use std::collections::BTreeMap;

/// Updates observed along one execution path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTrace {
    /// Final value of the path accumulator.
    pub accumulator: u64,
    /// Final values of the physical counters written on the path.
    pub counters: BTreeMap<CounterId, u64>,
    /// Calls and dispatch selections, outermost first.
    pub route: Vec<String>,
}

impl PathTrace {
    fn labeled(label: String) -> Self {
        Self {
            route: vec![label],
            ..Self::default()
        }
    }

    fn concat(&self, next: &PathTrace) -> CompileResult<PathTrace> {
        let overflow = || CompileError::overflow("enumerated path value");
        let mut joined = self.clone();
        joined.accumulator = joined
            .accumulator
            .checked_add(next.accumulator)
            .ok_or_else(overflow)?;
        for (counter, amount) in &next.counters {
            let slot = joined.counters.entry(*counter).or_insert(0);
            *slot = slot.checked_add(*amount).ok_or_else(overflow)?;
        }
        joined.route.extend(next.route.iter().cloned());
        Ok(joined)
    }
}

/// Enumerate every path of unit `unit_index`.
///
/// Absent switch cases yield one shared empty path in strict mode and none
/// otherwise, matching how they are counted.
pub fn enumerate(
    program: &Program,
    unit_index: usize,
    options: &InstrumentOptions,
) -> CompileResult<Vec<PathTrace>> {
    let unit = program.unit(unit_index)?;
    let mut enumerator = Enumerator {
        program,
        unit,
        strict_absent_cases: options.strict_absent_cases,
        limit: options.max_enumerated_paths,
        call_stack: Vec::new(),
    };
    enumerator.walk(unit.body)
}

/// Check that the accumulator values are exactly `0..num_paths`.
pub fn verify_bijection(unit: &str, traces: &[PathTrace], num_paths: u64) -> CompileResult<()> {
    let construct = format!("unit `{}`", unit);
    if traces.len() as u64 != num_paths {
        return Err(CompileError::structural(
            construct,
            format!("{} paths enumerated, {} counted", traces.len(), num_paths),
        ));
    }

    let mut values: Vec<u64> = traces.iter().map(|t| t.accumulator).collect();
    values.sort_unstable();
    for (expected, value) in values.iter().enumerate() {
        if *value != expected as u64 {
            return Err(CompileError::structural(
                construct,
                format!("path value {} missing, found {}", expected, value),
            ));
        }
    }
    Ok(())
}

struct Enumerator<'p> {
    program: &'p Program,
    unit: &'p Unit,
    strict_absent_cases: bool,
    limit: usize,
    call_stack: Vec<&'p str>,
}

impl<'p> Enumerator<'p> {
    fn check_limit(&self, count: usize) -> CompileResult<()> {
        if count > self.limit {
            return Err(CompileError::TooManyPaths {
                unit: self.unit.name.clone(),
                limit: self.limit,
            });
        }
        Ok(())
    }

    fn product(&self, prefixes: Vec<PathTrace>, suffixes: &[PathTrace]) -> CompileResult<Vec<PathTrace>> {
        self.check_limit(prefixes.len().saturating_mul(suffixes.len()))?;
        let mut joined = Vec::with_capacity(prefixes.len() * suffixes.len());
        for prefix in &prefixes {
            for suffix in suffixes {
                joined.push(prefix.concat(suffix)?);
            }
        }
        Ok(joined)
    }

    fn walk(&mut self, id: NodeId) -> CompileResult<Vec<PathTrace>> {
        let program = self.program;
        match program.kind(id) {
            NodeKind::Leaf { .. } => Ok(vec![PathTrace::default()]),
            NodeKind::Accumulate { counter, amount } => {
                let mut trace = PathTrace::default();
                match counter {
                    Counter::Path => trace.accumulator = *amount,
                    Counter::Physical(register) => {
                        trace.counters.insert(*register, *amount);
                    }
                }
                Ok(vec![trace])
            }
            NodeKind::Block { stmts } => {
                let mut paths = vec![PathTrace::default()];
                for stmt in stmts {
                    let next = self.walk(*stmt)?;
                    paths = self.product(paths, &next)?;
                }
                Ok(paths)
            }
            NodeKind::If { taken, not_taken, .. } => {
                let mut paths = self.walk(*taken)?;
                match not_taken {
                    Some(not_taken) => paths.extend(self.walk(*not_taken)?),
                    None => paths.push(PathTrace::default()),
                }
                self.check_limit(paths.len())?;
                Ok(paths)
            }
            NodeKind::Switch { cases, .. } => {
                let mut paths = Vec::new();
                let mut absent_seen = false;
                for case in cases {
                    match case.body {
                        Some(body) => paths.extend(self.walk(body)?),
                        None if self.strict_absent_cases && !absent_seen => {
                            absent_seen = true;
                            paths.push(PathTrace::default());
                        }
                        None => {}
                    }
                    self.check_limit(paths.len())?;
                }
                Ok(paths)
            }
            NodeKind::Call { target, .. } => {
                let body = self.enter(target)?;
                let paths = self.walk(body);
                self.call_stack.pop();
                self.product(vec![PathTrace::labeled(target.clone())], &paths?)
            }
            NodeKind::Apply { table } => {
                let unit = self.unit;
                let dispatch = unit
                    .table(table)
                    .ok_or_else(|| CompileError::UnresolvedDispatch { name: table.clone() })?;
                let mut paths = Vec::new();
                for action in &dispatch.actions {
                    let body = self.enter(&action.name)?;
                    let action_paths = self.walk(body);
                    self.call_stack.pop();
                    let label = PathTrace::labeled(format!("{}.{}", table, action.name));
                    paths.extend(self.product(vec![label], &action_paths?)?);
                    self.check_limit(paths.len())?;
                }
                Ok(paths)
            }
        }
    }

    fn enter(&mut self, name: &str) -> CompileResult<NodeId> {
        let unit = self.unit;
        let subroutine = unit
            .subroutine(name)
            .ok_or_else(|| CompileError::UnresolvedSubroutine { name: name.to_string() })?;
        if self.call_stack.contains(&subroutine.name.as_str()) {
            return Err(CompileError::structural(
                format!("subroutine `{}`", name),
                "recursive call",
            ));
        }
        self.call_stack.push(subroutine.name.as_str());
        Ok(subroutine.body)
    }
}
