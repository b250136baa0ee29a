//! Counter allocation table consumed by the register lowering backend.
//!
//! The table maps a dispatch key to the counter assignment of each branch
//! alias reachable through it:
//!
//! ```json
//! { "ingress.route": { "actions": { "fwd": { "variable": 0, "increment": 1 } } } }
//! ```
//!
//! Every entry is checked against the counter bank when the table is loaded,
//! so a malformed table never reaches a traversal.

use crate::core::counter_bank::{CounterBank, CounterError, CounterId, MAX_COUNTERS};
use crate::core::error::ConfigError;
use crate::core::options::InstrumentOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Counter update owed by one branch alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct AllocationEntry {
    #[serde(alias = "register")]
    pub variable: CounterId,
    pub increment: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispatchAllocation {
    #[serde(default)]
    pub actions: BTreeMap<String, AllocationEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AllocationTable {
    dispatches: BTreeMap<String, DispatchAllocation>,
}

impl AllocationTable {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_json(&content)?;
        log::debug!(
            "loaded allocation table {} with {} dispatches",
            path.display(),
            table.dispatches.len()
        );
        Ok(table)
    }

    /// Check every entry and claim its counter in a fresh bank.
    pub fn validate(&self, options: &InstrumentOptions) -> Result<CounterBank, ConfigError> {
        let mut bank = CounterBank::new(options.counter_bank_size, options.max_increment)
            .map_err(|_| ConfigError::BankTooLarge {
                size: options.counter_bank_size,
                max: MAX_COUNTERS,
            })?;

        for (dispatch, allocation) in &self.dispatches {
            if allocation.actions.is_empty() {
                return Err(ConfigError::EmptyDispatch {
                    dispatch: dispatch.clone(),
                });
            }
            for (alias, entry) in &allocation.actions {
                bank.claim(entry.variable, dispatch, alias, entry.increment)
                    .map_err(|err| claim_error(err, dispatch, alias))?;
            }
        }

        for counter in 0..bank.size() {
            let total = bank.worst_case_total(counter);
            if total > options.max_increment {
                log::warn!(
                    "counter {} may accumulate {} per pass, above the bound {}",
                    counter,
                    total,
                    options.max_increment
                );
            }
        }

        Ok(bank)
    }

    pub fn lookup(&self, dispatch: &str, alias: &str) -> Option<&AllocationEntry> {
        self.dispatches.get(dispatch)?.actions.get(alias)
    }

    pub fn len(&self) -> usize {
        self.dispatches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty()
    }
}

fn claim_error(err: CounterError, dispatch: &str, alias: &str) -> ConfigError {
    let dispatch = dispatch.to_string();
    let alias = alias.to_string();
    match err {
        CounterError::OutOfRange { counter, bank_size } => ConfigError::RegisterOutOfRange {
            dispatch,
            alias,
            register: counter,
            bank_size,
        },
        CounterError::ZeroIncrement => ConfigError::ZeroIncrement { dispatch, alias },
        CounterError::IncrementTooLarge { increment, max } => ConfigError::IncrementTooLarge {
            dispatch,
            alias,
            increment,
            max,
        },
        CounterError::BankTooLarge { size } => ConfigError::BankTooLarge {
            size,
            max: MAX_COUNTERS,
        },
    }
}
