//! Path counts and call-site multiplicities shared between counting and injection.
//!
//! The registry is created empty for every compilation unit, written while the
//! unit is counted and read (plus multiplicity-accumulated) while it is
//! instrumented. A name's path count is immutable once written.

use super::error::{CompileError, CompileResult};
use hashbrown::HashMap;

/// Namespace of a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Subroutine,
    Dispatch,
}

/// How a call site reaches its subroutine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteOrigin {
    /// A direct `name(...)` statement.
    Direct,
    /// Selected by applying the named dispatch table.
    Dispatch(String),
}

/// One place from which a subroutine or dispatch table is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Mixed-radix place value of the site inside its scope.
    pub place: u64,
    /// Offset of the callee among its siblings (member offset inside a table).
    pub offset: u64,
    /// Enclosing subroutine, `None` for the unit's apply body.
    pub scope: Option<String>,
    pub origin: SiteOrigin,
}

impl CallSite {
    pub fn direct(place: u64, scope: Option<String>) -> Self {
        Self {
            place,
            offset: 0,
            scope,
            origin: SiteOrigin::Direct,
        }
    }

    /// Two sites number the callee identically when place, offset and scope agree.
    pub fn same_numbering(&self, other: &CallSite) -> bool {
        self.place == other.place && self.offset == other.offset && self.scope == other.scope
    }
}

/// What recording a call site did to the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteRecord {
    /// First site of the entry.
    Primary,
    /// Numbers the callee like an already known site.
    Repeated,
    /// A further distinct site; the multiplicity was folded.
    Folded { multiplicity: u64 },
}

/// Registry state of one subroutine or dispatch table.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    num_paths: u64,
    multiplicity: u64,
    sites: Vec<CallSite>,
    /// Dispatch tables only: member actions with their running offsets.
    members: Vec<(String, u64)>,
}

impl RegistryEntry {
    fn new(num_paths: u64) -> Self {
        Self {
            num_paths,
            multiplicity: 1,
            sites: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn num_paths(&self) -> u64 {
        self.num_paths
    }

    pub fn multiplicity(&self) -> u64 {
        self.multiplicity
    }

    /// Distinct call sites in discovery order.
    pub fn sites(&self) -> &[CallSite] {
        &self.sites
    }

    /// More than one distinct site shares this body.
    pub fn is_aliased(&self) -> bool {
        self.sites.len() > 1
    }

    pub fn members(&self) -> &[(String, u64)] {
        &self.members
    }

    /// Offset of `action` inside this dispatch table.
    pub fn member_offset(&self, action: &str) -> Option<u64> {
        self.members
            .iter()
            .find(|(name, _)| name == action)
            .map(|(_, offset)| *offset)
    }
}

/// Mapping from subroutine and dispatch names to their counting state.
#[derive(Debug, Default)]
pub struct Registry<'a> {
    subroutines: HashMap<&'a str, RegistryEntry>,
    dispatches: HashMap<&'a str, RegistryEntry>,
}

impl<'a> Registry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: SymbolKind) -> &HashMap<&'a str, RegistryEntry> {
        match kind {
            SymbolKind::Subroutine => &self.subroutines,
            SymbolKind::Dispatch => &self.dispatches,
        }
    }

    fn map_mut(&mut self, kind: SymbolKind) -> &mut HashMap<&'a str, RegistryEntry> {
        match kind {
            SymbolKind::Subroutine => &mut self.subroutines,
            SymbolKind::Dispatch => &mut self.dispatches,
        }
    }

    /// Write the path count of `name`. Writing the same value again is accepted.
    pub fn register(&mut self, kind: SymbolKind, name: &'a str, num_paths: u64) -> CompileResult<()> {
        let map = self.map_mut(kind);
        if let Some(existing) = map.get(name) {
            if existing.num_paths != num_paths {
                return Err(CompileError::RegistryConflict {
                    name: name.to_string(),
                    existing: existing.num_paths,
                    requested: num_paths,
                });
            }
            return Ok(());
        }
        map.insert(name, RegistryEntry::new(num_paths));
        Ok(())
    }

    pub fn entry(&self, kind: SymbolKind, name: &str) -> Option<&RegistryEntry> {
        self.map(kind).get(name)
    }

    pub fn num_paths(&self, kind: SymbolKind, name: &str) -> Option<u64> {
        self.entry(kind, name).map(RegistryEntry::num_paths)
    }

    /// Record a member action of a dispatch table with its running offset.
    pub fn record_member(&mut self, dispatch: &str, action: &str, offset: u64) -> CompileResult<()> {
        let entry = self
            .dispatches
            .get_mut(dispatch)
            .ok_or_else(|| CompileError::UncountedDispatch { name: dispatch.to_string() })?;
        entry.members.push((action.to_string(), offset));
        Ok(())
    }

    /// Record a call site of `name`.
    ///
    /// The multiplicity stays 1 for the first site and for sites numbering the
    /// callee like a known one; every further distinct site multiplies it by
    /// its place value.
    pub fn record_call_site(
        &mut self,
        kind: SymbolKind,
        name: &str,
        site: CallSite,
    ) -> CompileResult<SiteRecord> {
        let entry = self.map_mut(kind).get_mut(name).ok_or_else(|| match kind {
            SymbolKind::Subroutine => CompileError::UncountedSubroutine { name: name.to_string() },
            SymbolKind::Dispatch => CompileError::UncountedDispatch { name: name.to_string() },
        })?;

        if entry.sites.is_empty() {
            entry.sites.push(site);
            return Ok(SiteRecord::Primary);
        }
        if entry.sites.iter().any(|known| known.same_numbering(&site)) {
            return Ok(SiteRecord::Repeated);
        }

        entry.multiplicity = entry
            .multiplicity
            .checked_mul(site.place)
            .ok_or_else(|| CompileError::overflow(format!("multiplicity of `{}`", name)))?;
        entry.sites.push(site);
        Ok(SiteRecord::Folded {
            multiplicity: entry.multiplicity,
        })
    }

    pub fn len(&self) -> usize {
        self.subroutines.len() + self.dispatches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_paths_is_write_once() {
        let mut registry = Registry::new();
        registry.register(SymbolKind::Subroutine, "fwd", 3).unwrap();
        registry.register(SymbolKind::Subroutine, "fwd", 3).unwrap();

        let err = registry.register(SymbolKind::Subroutine, "fwd", 4).unwrap_err();
        assert!(matches!(err, CompileError::RegistryConflict { existing: 3, requested: 4, .. }));
        assert_eq!(registry.num_paths(SymbolKind::Subroutine, "fwd"), Some(3));
    }

    #[test]
    fn test_namespaces_are_separate() {
        let mut registry = Registry::new();
        registry.register(SymbolKind::Subroutine, "route", 2).unwrap();
        registry.register(SymbolKind::Dispatch, "route", 5).unwrap();

        assert_eq!(registry.num_paths(SymbolKind::Subroutine, "route"), Some(2));
        assert_eq!(registry.num_paths(SymbolKind::Dispatch, "route"), Some(5));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_single_site_keeps_unit_multiplicity() {
        let mut registry = Registry::new();
        registry.register(SymbolKind::Subroutine, "s", 2).unwrap();

        let record = registry
            .record_call_site(SymbolKind::Subroutine, "s", CallSite::direct(6, None))
            .unwrap();
        assert_eq!(record, SiteRecord::Primary);

        let entry = registry.entry(SymbolKind::Subroutine, "s").unwrap();
        assert_eq!(entry.multiplicity(), 1);
        assert!(!entry.is_aliased());
    }

    #[test]
    fn test_repeated_site_does_not_fold() {
        let mut registry = Registry::new();
        registry.register(SymbolKind::Subroutine, "s", 2).unwrap();
        registry
            .record_call_site(SymbolKind::Subroutine, "s", CallSite::direct(3, None))
            .unwrap();
        let record = registry
            .record_call_site(SymbolKind::Subroutine, "s", CallSite::direct(3, None))
            .unwrap();

        assert_eq!(record, SiteRecord::Repeated);
        assert_eq!(registry.entry(SymbolKind::Subroutine, "s").unwrap().sites().len(), 1);
    }

    #[test]
    fn test_distinct_sites_fold_multiplicatively() {
        let mut registry = Registry::new();
        registry.register(SymbolKind::Subroutine, "s", 2).unwrap();
        registry
            .record_call_site(SymbolKind::Subroutine, "s", CallSite::direct(1, None))
            .unwrap();
        let second = registry
            .record_call_site(SymbolKind::Subroutine, "s", CallSite::direct(4, None))
            .unwrap();
        let third = registry
            .record_call_site(SymbolKind::Subroutine, "s", CallSite::direct(3, None))
            .unwrap();

        assert_eq!(second, SiteRecord::Folded { multiplicity: 4 });
        assert_eq!(third, SiteRecord::Folded { multiplicity: 12 });
        let entry = registry.entry(SymbolKind::Subroutine, "s").unwrap();
        assert!(entry.is_aliased());
        assert_eq!(entry.sites()[0].place, 1);
    }

    #[test]
    fn test_site_on_unknown_name_is_uncounted() {
        let mut registry = Registry::new();
        let err = registry
            .record_call_site(SymbolKind::Subroutine, "ghost", CallSite::direct(1, None))
            .unwrap_err();
        assert!(matches!(err, CompileError::UncountedSubroutine { .. }));
    }

    #[test]
    fn test_dispatch_members() {
        let mut registry = Registry::new();
        registry.register(SymbolKind::Dispatch, "t", 6).unwrap();
        registry.record_member("t", "a", 0).unwrap();
        registry.record_member("t", "b", 2).unwrap();

        let entry = registry.entry(SymbolKind::Dispatch, "t").unwrap();
        assert_eq!(entry.member_offset("b"), Some(2));
        assert_eq!(entry.member_offset("c"), None);
    }
}
