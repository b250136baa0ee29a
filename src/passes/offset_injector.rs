// OffsetInjector turns the counts written by PathCounter into accumulator updates. Each branch
// point receives one prepended `accumulator += scale * offset` per outgoing choice, where scale
// is the mixed-radix place value of the branch point inside its body times the base scale of
// that body. The apply body has base 1. A subroutine body is numbered with an anchor taken over
// its distinct call sites: the smallest site scale (place value times the caller's own anchor
// scale) and the smallest member offset. With a single site this is exactly that site's
// numbering. With several, every execution of the body adds no more than the true numbering
// of the site it runs at would, so ids stay inside `0..root_paths`; they collide only where
// sites differ. The multiplicity folded into the registry entry is that of the unbounded
// disjoint numbering and is reported with the aliasing warning. The pass only ever prepends;
// no parsed statement is moved or removed.

//! Accumulator injection.

use crate::core::error::{CompileError, CompileResult};
use crate::core::options::InstrumentOptions;
use crate::core::registry::SymbolKind;
use crate::core::session::CompilationSession;
use crate::ir::{Counter, NodeId, NodeKind, Program};
use hashbrown::HashMap;

/// What one injection run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionSummary {
    /// Accumulator updates prepended.
    pub injections: usize,
    /// Path count of the apply body; accumulator values cover `0..root_paths`.
    pub root_paths: u64,
    /// Subroutines entered from several distinct call sites. Their single body
    /// is numbered for the site with the smallest scale and offset; ids stay
    /// inside `0..root_paths` but paths through other sites may share them.
    pub aliased: Vec<String>,
    /// Subroutines with no call site, left uninstrumented.
    pub unreached: Vec<String>,
}

/// Scale and entry offset a subroutine body is numbered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Anchor {
    scale: u64,
    offset: u64,
}

pub struct OffsetInjector<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    options: &'s InstrumentOptions,
}

impl<'s, 'arena> OffsetInjector<'s, 'arena> {
    pub fn new(session: &'s CompilationSession<'arena>, options: &'s InstrumentOptions) -> Self {
        Self { session, options }
    }

    /// Instrument a unit previously counted with the same session.
    pub fn run(&self, program: &mut Program, unit_index: usize) -> CompileResult<InjectionSummary> {
        let unit = program.unit(unit_index)?.clone();
        let mut summary = InjectionSummary {
            root_paths: program.expect_num_paths(unit.body)?,
            ..InjectionSummary::default()
        };
        let mut anchors = HashMap::new();

        for subroutine in &unit.subroutines {
            let entry = self
                .session
                .entry(SymbolKind::Subroutine, &subroutine.name)
                .ok_or_else(|| CompileError::UncountedSubroutine {
                    name: subroutine.name.clone(),
                })?;

            let Some(anchor) = self.anchor(&subroutine.name, &mut anchors)? else {
                log::debug!("action `{}` is never reached, left uninstrumented", subroutine.name);
                summary.unreached.push(subroutine.name.clone());
                continue;
            };
            if entry.is_aliased() {
                log::warn!(
                    "action `{}` is entered from {} distinct sites (multiplicity {}); path ids through it are exact only at scale {}",
                    subroutine.name,
                    entry.sites().len(),
                    entry.multiplicity(),
                    anchor.scale
                );
                summary.aliased.push(subroutine.name.clone());
            }

            summary.injections += self.inject_body(program, subroutine.body, anchor.scale)?;

            if anchor.offset > 0 {
                let amount = anchor.scale.checked_mul(anchor.offset).ok_or_else(|| {
                    CompileError::overflow(format!("entry of `{}`", subroutine.name))
                })?;
                self.inject(program, subroutine.body, amount)?;
                summary.injections += 1;
            }
        }

        summary.injections += self.inject_body(program, unit.body, 1)?;

        log::debug!(
            "unit `{}`: {} injections over {} paths",
            unit.name,
            summary.injections,
            summary.root_paths
        );
        Ok(summary)
    }

    /// Numbering of the body of `name`, `None` when no call site is reachable.
    fn anchor(
        &self,
        name: &str,
        anchors: &mut HashMap<String, Option<Anchor>>,
    ) -> CompileResult<Option<Anchor>> {
        if let Some(anchor) = anchors.get(name) {
            return Ok(*anchor);
        }

        let entry = self
            .session
            .entry(SymbolKind::Subroutine, name)
            .ok_or_else(|| CompileError::UncountedSubroutine { name: name.to_string() })?;

        let mut anchor: Option<Anchor> = None;
        for site in entry.sites() {
            let outer = match &site.scope {
                None => 1,
                Some(caller) => match self.anchor(caller, anchors)? {
                    Some(caller_anchor) => caller_anchor.scale,
                    None => continue,
                },
            };
            let scale = site
                .place
                .checked_mul(outer)
                .ok_or_else(|| CompileError::overflow(format!("scale of `{}`", name)))?;
            anchor = Some(match anchor {
                None => Anchor {
                    scale,
                    offset: site.offset,
                },
                Some(known) => Anchor {
                    scale: known.scale.min(scale),
                    offset: known.offset.min(site.offset),
                },
            });
        }

        anchors.insert(name.to_string(), anchor);
        Ok(anchor)
    }

    /// Instrument every branch point under `root`; returns the number of updates.
    fn inject_body(&self, program: &mut Program, root: NodeId, base: u64) -> CompileResult<usize> {
        let mut injections = 0;

        for id in program.subtree(root) {
            let kind = program.kind(id).clone();
            if !kind.is_branch_point() {
                continue;
            }

            let scale = program
                .place_value(id)?
                .checked_mul(base)
                .ok_or_else(|| CompileError::overflow(format!("scale of {}", id)))?;

            match kind {
                NodeKind::If { taken, not_taken, .. } => {
                    let skip = match not_taken {
                        Some(not_taken) => program.expect_num_paths(not_taken)?,
                        None => 1,
                    };
                    let amount = scale
                        .checked_mul(skip)
                        .ok_or_else(|| CompileError::overflow(format!("if {}", id)))?;
                    self.inject(program, taken, amount)?;
                    injections += 1;
                }
                NodeKind::Switch { cases, .. } => {
                    let has_absent = cases.iter().any(|case| case.body.is_none());
                    // Absent cases share the lowest id in strict mode.
                    let mut offset = u64::from(self.options.strict_absent_cases && has_absent);
                    for body in cases.iter().filter_map(|case| case.body) {
                        let amount = scale
                            .checked_mul(offset)
                            .ok_or_else(|| CompileError::overflow(format!("switch {}", id)))?;
                        self.inject(program, body, amount)?;
                        injections += 1;
                        offset = offset
                            .checked_add(program.expect_num_paths(body)?)
                            .ok_or_else(|| CompileError::overflow(format!("switch {}", id)))?;
                    }
                }
                _ => {}
            }
        }

        Ok(injections)
    }

    fn inject(&self, program: &mut Program, target: NodeId, amount: u64) -> CompileResult<()> {
        let stmt = program.prepend(
            target,
            NodeKind::Accumulate {
                counter: Counter::Path,
                amount,
            },
        )?;
        self.session.record_injection();
        log::trace!("{} += {} before {} ({})", self.options.accumulator, amount, target, stmt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{enumerate, verify_bijection};
    use crate::passes::PathCounter;
    use bumpalo::Bump;

    fn instrument(source: &str, options: &InstrumentOptions) -> (Program, InjectionSummary) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut program = Program::parse(source).unwrap_or_else(|e| panic!("parse: {}", e));
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        PathCounter::new(&session, options).run(&mut program, 0).unwrap();
        let summary = OffsetInjector::new(&session, options).run(&mut program, 0).unwrap();
        (program, summary)
    }

    fn values(program: &Program, options: &InstrumentOptions) -> Vec<u64> {
        let mut values: Vec<u64> = enumerate(program, 0, options)
            .unwrap()
            .iter()
            .map(|t| t.accumulator)
            .collect();
        values.sort_unstable();
        values
    }

    #[test]
    fn test_single_conditional() {
        let options = InstrumentOptions::default();
        let (program, summary) = instrument("control c { apply { if (a) { x; } } }", &options);

        assert_eq!(summary.root_paths, 2);
        assert_eq!(summary.injections, 1);
        assert!(program.print().contains("if (a) {\n            meta.BL = meta.BL + 1;\n            x;"));
        assert_eq!(values(&program, &options), vec![0, 1]);
    }

    #[test]
    fn test_conditional_followed_by_statement() {
        let options = InstrumentOptions::default();
        let (program, summary) = instrument("control c { apply { if (a) { x; } y; } }", &options);

        assert_eq!(summary.root_paths, 2);
        assert_eq!(program.num_paths(program.units[0].body), Some(2));
        assert_eq!(values(&program, &options), vec![0, 1]);
    }

    #[test]
    fn test_switch_offsets() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    apply {
        switch (s) {
            a: { if (x) { y; } }
            b: { y; }
            c:
            d: { if (x) { y; } else { if (z) { y; } } }
        }
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        let printed = program.print();

        assert_eq!(summary.root_paths, 6);
        assert!(printed.contains("a: {\n                meta.BL = meta.BL + 0;"));
        assert!(printed.contains("b: {\n                meta.BL = meta.BL + 2;"));
        assert!(printed.contains("c:\n"));
        assert!(printed.contains("d: {\n                meta.BL = meta.BL + 3;"));
        assert_eq!(values(&program, &options), (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_strict_absent_cases_take_lowest_id() {
        let options = InstrumentOptions {
            strict_absent_cases: true,
            ..Default::default()
        };
        let (program, summary) =
            instrument("control c { apply { switch (s) { a: { x; } b: c: { if (p) { y; } } } } }", &options);

        assert_eq!(summary.root_paths, 4);
        assert_eq!(values(&program, &options), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sequenced_branches_use_place_values() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    apply {
        if (a) { x; } else { if (b) { y; } }
        switch (s) { k: { z; } l: { if (c) { z; } } }
        if (d) { w; }
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        assert_eq!(summary.root_paths, 3 * 3 * 2);
        assert_eq!(values(&program, &options), (0..18).collect::<Vec<_>>());
    }

    #[test]
    fn test_action_reached_from_two_tables() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    action s() { if (a) { x; } }
    action p() { y; }
    action q() { y; }
    action r() { y; }
    action u() { y; }
    table d1 { s; p; q; }
    table d2 { s; p; q; r; u; }
    apply {
        if (sel) { d1.apply(); } else { d2.apply(); }
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        assert_eq!(summary.root_paths, 10);
        assert!(summary.aliased.is_empty());

        let traces = enumerate(&program, 0, &options).unwrap();
        verify_bijection("c", &traces, 10).unwrap();

        let mut via_d1: Vec<u64> = traces
            .iter()
            .filter(|t| t.route == vec!["d1.s".to_string()])
            .map(|t| t.accumulator)
            .collect();
        via_d1.sort_unstable();
        assert_eq!(via_d1, vec![6, 7]);

        let mut via_d2: Vec<u64> = traces
            .iter()
            .filter(|t| t.route == vec!["d2.s".to_string()])
            .map(|t| t.accumulator)
            .collect();
        via_d2.sort_unstable();
        assert_eq!(via_d2, vec![0, 1]);
    }

    #[test]
    fn test_nested_call_scales_through_caller() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    action inner() { if (a) { x; } }
    action outer() { if (b) { y; } inner(); }
    apply {
        outer();
        if (c) { z; }
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        assert_eq!(summary.root_paths, 8);
        assert!(summary.aliased.is_empty());
        assert_eq!(values(&program, &options), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_shared_body_is_reported_aliased() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    action s() { if (a) { x; } }
    apply {
        s();
        if (b) { y; }
        s();
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        assert_eq!(summary.root_paths, 8);
        assert_eq!(summary.aliased, vec!["s".to_string()]);
        assert!(program
            .print()
            .contains("action s() {\n        if (a) {\n            meta.BL = meta.BL + 1;"));
        assert!(values(&program, &options).iter().all(|v| *v < 8));
    }

    #[test]
    fn test_body_called_three_times_stays_in_range() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    action s() { if (a) { x; } }
    apply {
        s();
        if (b) { y; }
        s();
        if (d) { z; }
        s();
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        assert_eq!(summary.root_paths, 32);
        assert_eq!(summary.aliased, vec!["s".to_string()]);

        // The last call has place value 1, so the body adds 1 when taken.
        let printed = program.print();
        assert!(printed.contains("if (a) {\n            meta.BL = meta.BL + 1;"));
        assert!(printed.contains("if (d) {\n            meta.BL = meta.BL + 2;"));
        assert!(printed.contains("if (b) {\n            meta.BL = meta.BL + 8;"));

        let values = values(&program, &options);
        assert_eq!(values.len(), 32);
        assert!(values.iter().all(|v| *v < 32));
        assert_eq!(values.last(), Some(&13));
    }

    #[test]
    fn test_exclusive_sites_keep_smallest_scale_exact() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    action s() { if (a) { x; } }
    apply {
        if (c) { s(); } else { s(); if (e) { z; } }
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        assert_eq!(summary.root_paths, 6);
        assert_eq!(summary.aliased, vec!["s".to_string()]);

        let traces = enumerate(&program, 0, &options).unwrap();
        assert!(traces.iter().all(|t| t.accumulator < 6));

        // The taken branch calls `s` at place value 1 and keeps its own ids.
        let mut taken: Vec<u64> = traces
            .iter()
            .filter(|t| t.accumulator >= 4)
            .map(|t| t.accumulator)
            .collect();
        taken.sort_unstable();
        assert_eq!(taken, vec![4, 5]);
        assert!(verify_bijection("c", &traces, 6).is_err());
    }

    #[test]
    fn test_aliased_member_uses_smallest_offset() {
        let options = InstrumentOptions::default();
        let source = r#"
control c {
    action p() { y; }
    action s() { if (a) { x; } }
    table d1 { s; }
    table d2 { p; s; }
    apply {
        if (sel) { d1.apply(); } else { d2.apply(); }
    }
}
"#;
        let (program, summary) = instrument(source, &options);
        assert_eq!(summary.root_paths, 5);
        assert_eq!(summary.aliased, vec!["s".to_string()]);
        assert!(!program.print().contains("action s() {\n        meta.BL"));
        assert!(values(&program, &options).iter().all(|v| *v < 5));
    }

    #[test]
    fn test_unreached_action_is_untouched() {
        let options = InstrumentOptions::default();
        let (program, summary) = instrument(
            "control c { action idle() { if (a) { x; } } apply { if (b) { y; } } }",
            &options,
        );
        assert_eq!(summary.unreached, vec!["idle".to_string()]);
        assert_eq!(summary.injections, 1);
        assert!(program.print().contains("action idle() {\n        if (a) {\n            x;"));
    }

    #[test]
    fn test_branch_free_program_needs_no_updates() {
        let options = InstrumentOptions::default();
        let (program, summary) = instrument("control c { action a() { x; } apply { a(); y; } }", &options);
        assert_eq!(summary.root_paths, 1);
        assert_eq!(summary.injections, 0);
        assert!(!program.print().contains("meta.BL"));
    }
}
