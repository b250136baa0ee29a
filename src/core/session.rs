// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession is the per-unit hub that owns the name arena, the Registry shared by
// PathCounter and OffsetInjector, and the statistics reported by the driver. Names of
// subroutines and dispatch tables are interned into the arena once, so registry keys share
// the session lifetime instead of being cloned per lookup. A session is created fresh for
// every compilation unit and dropped afterwards; reusing one across units would leak path
// counts and multiplicities between unrelated programs. SessionStats tracks counted nodes,
// branch points, injected statements, call sites, folded multiplicities, lowered counters
// and lookup misses.

//! Arena-based compilation session management.
//!
//! All per-unit state lives here and shares the session lifetime. Passes take
//! `&CompilationSession` and mutate through interior cells, the way the rest
//! of the pipeline threads one session by reference.

use super::registry::{CallSite, Registry, RegistryEntry, SiteRecord, SymbolKind};
use super::error::CompileResult;
use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session for one unit.
pub struct CompilationSession<'arena> {
    /// Arena allocator for interned names.
    arena: &'arena Bump,

    /// Path counts and multiplicities of subroutines and dispatch tables.
    registry: RefCell<Registry<'arena>>,

    /// Session statistics.
    stats: RefCell<SessionStats>,

    /// String interning for registry keys.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Unit being compiled.
    current_unit: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new session with an empty registry.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            registry: RefCell::new(Registry::new()),
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_unit: RefCell::new(None),
        }
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned: &'arena str = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    pub fn set_current_unit(&self, name: &str) {
        *self.current_unit.borrow_mut() = Some(name.to_string());
    }

    pub fn current_unit(&self) -> Option<String> {
        self.current_unit.borrow().clone()
    }

    /// Write the path count of a subroutine or dispatch table.
    pub fn register_paths(&self, kind: SymbolKind, name: &str, num_paths: u64) -> CompileResult<()> {
        let key = self.intern_str(name);
        self.registry.borrow_mut().register(kind, key, num_paths)
    }

    pub fn num_paths(&self, kind: SymbolKind, name: &str) -> Option<u64> {
        self.registry.borrow().num_paths(kind, name)
    }

    pub fn entry(&self, kind: SymbolKind, name: &str) -> Option<RegistryEntry> {
        self.registry.borrow().entry(kind, name).cloned()
    }

    pub fn record_member(&self, dispatch: &str, action: &str, offset: u64) -> CompileResult<()> {
        self.registry.borrow_mut().record_member(dispatch, action, offset)
    }

    /// Record a call site and account for it in the statistics.
    pub fn record_call_site(&self, kind: SymbolKind, name: &str, site: CallSite) -> CompileResult<SiteRecord> {
        let record = self.registry.borrow_mut().record_call_site(kind, name, site)?;
        let mut stats = self.stats.borrow_mut();
        stats.call_sites += 1;
        if let SiteRecord::Folded { multiplicity } = record {
            stats.folded_multiplicities += 1;
            log::warn!(
                "`{}` reached from a further distinct call site, multiplicity now {}",
                name,
                multiplicity
            );
        }
        Ok(record)
    }

    /// Record that a node received its path count.
    pub fn record_node_counted(&self, is_branch_point: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.nodes_counted += 1;
        if is_branch_point {
            stats.branch_points += 1;
        }
    }

    /// Record an injected accumulator update.
    pub fn record_injection(&self) {
        self.stats.borrow_mut().injections += 1;
    }

    /// Record a physical counter update prepended by the lowering backend.
    pub fn record_counter_lowered(&self) {
        self.stats.borrow_mut().counters_lowered += 1;
    }

    /// Record a subroutine left untouched by the lowering backend.
    pub fn record_lookup_miss(&self) {
        self.stats.borrow_mut().lookup_misses += 1;
    }

    /// Record the path count of the unit's apply body.
    pub fn record_root_paths(&self, num_paths: u64) {
        self.stats.borrow_mut().root_paths = num_paths;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.borrow().clone();
        stats.unit_name = self.current_unit().unwrap_or_default();
        stats.registry_entries = self.registry.borrow().len();
        stats
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Name of the unit compiled in this session.
    pub unit_name: String,

    /// Nodes that received a path count.
    pub nodes_counted: usize,

    /// Conditionals and switches among them.
    pub branch_points: usize,

    /// Subroutines and dispatch tables in the registry.
    pub registry_entries: usize,

    /// Call sites recorded (direct calls and dispatch members).
    pub call_sites: usize,

    /// Call sites that folded a multiplicity.
    pub folded_multiplicities: usize,

    /// Accumulator updates injected.
    pub injections: usize,

    /// Physical counter updates prepended.
    pub counters_lowered: usize,

    /// Subroutines without an allocation entry.
    pub lookup_misses: usize,

    /// Path count of the apply body.
    pub root_paths: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Unit {}:", self.unit_name)?;
        writeln!(f, "  Paths: {}", self.root_paths)?;
        writeln!(f, "  Nodes counted: {}", self.nodes_counted)?;
        writeln!(f, "  Branch points: {}", self.branch_points)?;
        writeln!(f, "  Registry entries: {}", self.registry_entries)?;
        writeln!(f, "  Call sites: {}", self.call_sites)?;
        writeln!(f, "  Folded multiplicities: {}", self.folded_multiplicities)?;
        writeln!(f, "  Injections: {}", self.injections)?;

        if self.counters_lowered > 0 || self.lookup_misses > 0 {
            writeln!(f, "  Counters lowered: {}", self.counters_lowered)?;
            writeln!(f, "  Lookup misses: {}", self.lookup_misses)?;
        }

        Ok(())
    }
}
