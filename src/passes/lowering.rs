// RegisterAllocatorLowering is the alternative backend that spreads path contributions over a
// small bank of physical counters instead of one accumulator. An external allocation table says,
// per dispatch table and branch alias, which counter to bump and by how much. The pass first
// indexes which tables list each action, then walks the unit's actions and prepends one counter
// update to every body whose alias resolves. Aliases are tried in a fixed order with a
// normalized fallback; an action that still does not resolve is left alone and reported as a
// lookup miss. Lowering is additive, so a unit is marked once lowered and never lowered again.

//! Physical counter lowering.

use crate::core::counter_bank::{CounterBank, CounterId};
use crate::core::error::CompileResult;
use crate::core::options::InstrumentOptions;
use crate::core::session::CompilationSession;
use crate::ir::{normalize_alias, Counter, NodeKind, Program, Subroutine, Unit};
use crate::passes::allocation::AllocationTable;
use hashbrown::HashMap;

/// Action left untouched because no allocation entry matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupMiss {
    pub action: String,
    /// Dispatch keys the action is listed in; empty when no table lists it.
    pub dispatches: Vec<String>,
    /// Aliases tried, in order.
    pub candidates: Vec<String>,
}

/// One prepended counter update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredCounter {
    pub action: String,
    pub dispatch: String,
    pub alias: String,
    pub counter: CounterId,
    pub increment: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoweringSummary {
    pub lowered: Vec<LoweredCounter>,
    pub misses: Vec<LookupMiss>,
    /// The unit had been lowered before; nothing was changed.
    pub already_lowered: bool,
    /// (written, claimed, total) counters after this unit.
    pub counter_usage: (u32, u32, u32),
    /// Claimed counters this unit never writes.
    pub idle_counters: Vec<CounterId>,
}

/// Table that lists an action, with the alias the table gives it.
#[derive(Debug, Clone)]
struct Owner {
    dispatch: String,
    entry_alias: Option<String>,
}

pub struct RegisterAllocatorLowering<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    table: &'s AllocationTable,
    options: &'s InstrumentOptions,
}

impl<'s, 'arena> RegisterAllocatorLowering<'s, 'arena> {
    pub fn new(
        session: &'s CompilationSession<'arena>,
        table: &'s AllocationTable,
        options: &'s InstrumentOptions,
    ) -> Self {
        Self {
            session,
            table,
            options,
        }
    }

    /// Lower unit `unit_index`, claiming writes in `bank`.
    ///
    /// `bank` comes from [`AllocationTable::validate`] on the same table.
    pub fn run(
        &self,
        program: &mut Program,
        unit_index: usize,
        bank: &mut CounterBank,
    ) -> CompileResult<LoweringSummary> {
        let unit = program.unit(unit_index)?.clone();
        self.session.set_current_unit(&unit.name);

        if unit.lowered {
            log::warn!("unit `{}` is already lowered, skipping", unit.name);
            return Ok(LoweringSummary {
                already_lowered: true,
                counter_usage: bank.usage(),
                idle_counters: bank.idle(),
                ..LoweringSummary::default()
            });
        }

        bank.reset_written();
        let owners = Self::owner_index(&unit);
        let mut summary = LoweringSummary::default();

        for subroutine in &unit.subroutines {
            let listed = owners.get(subroutine.name.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            match self.resolve(subroutine, listed) {
                Ok(lowered) => {
                    program.prepend(
                        subroutine.body,
                        NodeKind::Accumulate {
                            counter: Counter::Physical(lowered.counter),
                            amount: lowered.increment,
                        },
                    )?;
                    bank.mark_written(lowered.counter);
                    self.session.record_counter_lowered();
                    log::debug!(
                        "action `{}`: {} += {} ({}.{})",
                        lowered.action,
                        self.options.register_name(lowered.counter),
                        lowered.increment,
                        lowered.dispatch,
                        lowered.alias
                    );
                    summary.lowered.push(lowered);
                }
                Err(miss) => {
                    log::info!(
                        "no counter allocated for action `{}` (tried {})",
                        miss.action,
                        miss.candidates.join(", ")
                    );
                    self.session.record_lookup_miss();
                    summary.misses.push(miss);
                }
            }
        }

        program.unit_mut(unit_index)?.lowered = true;
        summary.counter_usage = bank.usage();
        summary.idle_counters = bank.idle();
        Ok(summary)
    }

    /// Action name to the tables listing it, in declaration order.
    ///
    /// All owners are kept and tried in order, so the first listing table wins,
    /// not the last one indexed.
    fn owner_index(unit: &Unit) -> HashMap<&str, Vec<Owner>> {
        let mut owners: HashMap<&str, Vec<Owner>> = HashMap::new();
        for table in &unit.tables {
            let dispatch = table.key();
            for action in &table.actions {
                owners.entry(action.name.as_str()).or_default().push(Owner {
                    dispatch: dispatch.clone(),
                    entry_alias: action.alias.as_ref().map(|a| a.local().to_string()),
                });
            }
        }
        owners
    }

    /// Aliases for `subroutine` listed by `owner`, most specific first.
    fn candidates(subroutine: &Subroutine, owner: &Owner) -> Vec<String> {
        let literal = [
            subroutine.alias.as_ref().map(|a| a.local()),
            owner.entry_alias.as_deref(),
            Some(subroutine.name.as_str()),
        ];

        let mut candidates: Vec<String> = Vec::new();
        for name in literal.into_iter().flatten() {
            for candidate in std::iter::once(name).chain(normalize_alias(name)) {
                if !candidates.iter().any(|c| c == candidate) {
                    candidates.push(candidate.to_string());
                }
            }
        }
        candidates
    }

    fn resolve(&self, subroutine: &Subroutine, owners: &[Owner]) -> Result<LoweredCounter, LookupMiss> {
        let mut tried: Vec<String> = Vec::new();

        for owner in owners {
            for candidate in Self::candidates(subroutine, owner) {
                if let Some(entry) = self.table.lookup(&owner.dispatch, &candidate) {
                    return Ok(LoweredCounter {
                        action: subroutine.name.clone(),
                        dispatch: owner.dispatch.clone(),
                        alias: candidate,
                        counter: entry.variable,
                        increment: entry.increment,
                    });
                }
                let qualified = format!("{}.{}", owner.dispatch, candidate);
                if !tried.contains(&qualified) {
                    tried.push(qualified);
                }
            }
        }

        Err(LookupMiss {
            action: subroutine.name.clone(),
            dispatches: owners.iter().map(|o| o.dispatch.clone()).collect(),
            candidates: tried,
        })
    }
}
