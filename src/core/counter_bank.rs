//! Physical counter bank used by the register lowering backend.
//!
//! The target exposes a small fixed bank of counters. The allocation table
//! claims counters for `(dispatch, alias)` pairs; the lowering pass marks the
//! counters it actually writes. A bitset tracks both states per counter.

use std::fmt;

/// Maximum number of counters a bank can hold.
pub const MAX_COUNTERS: usize = 64;

/// Index of a physical counter.
pub type CounterId = u8;

/// Bit set for tracking counter sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSet {
    bits: u64,
}

impl CounterSet {
    /// Create empty counter set.
    pub fn new() -> Self {
        Self { bits: 0 }
    }

    pub fn contains(&self, counter: CounterId) -> bool {
        (counter as usize) < MAX_COUNTERS && self.bits & (1u64 << counter) != 0
    }

    pub fn set(&mut self, counter: CounterId) {
        if (counter as usize) < MAX_COUNTERS {
            self.bits |= 1u64 << counter;
        }
    }

    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }

    /// Counters in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CounterId> + '_ {
        (0..MAX_COUNTERS as u8).filter(move |c| self.contains(*c))
    }
}

/// One `(dispatch, alias)` pair claiming a counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub dispatch: String,
    pub alias: String,
    pub increment: u64,
}

/// Error types for counter claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// Counter index beyond the bank.
    OutOfRange { counter: CounterId, bank_size: u8 },
    /// Increment of zero.
    ZeroIncrement,
    /// Increment above the configured bound.
    IncrementTooLarge { increment: u64, max: u64 },
    /// Bank larger than the bitset can track.
    BankTooLarge { size: u8 },
}

impl fmt::Display for CounterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterError::OutOfRange { counter, bank_size } => {
                write!(f, "counter {} outside bank of {}", counter, bank_size)
            }
            CounterError::ZeroIncrement => write!(f, "zero increment"),
            CounterError::IncrementTooLarge { increment, max } => {
                write!(f, "increment {} exceeds {}", increment, max)
            }
            CounterError::BankTooLarge { size } => {
                write!(f, "bank of {} counters exceeds {}", size, MAX_COUNTERS)
            }
        }
    }
}

impl std::error::Error for CounterError {}

/// CounterBank tracks which counters are claimed and written.
pub struct CounterBank {
    size: u8,
    max_increment: u64,
    /// Counters claimed by the allocation table.
    claimed: CounterSet,
    /// Counters with at least one emitted update.
    written: CounterSet,
    /// Claims per counter.
    assignments: Vec<Vec<Assignment>>,
}

impl CounterBank {
    /// Create a bank of `size` counters, at most [`MAX_COUNTERS`].
    pub fn new(size: u8, max_increment: u64) -> Result<Self, CounterError> {
        if size as usize > MAX_COUNTERS {
            return Err(CounterError::BankTooLarge { size });
        }
        Ok(Self {
            size,
            max_increment,
            claimed: CounterSet::new(),
            written: CounterSet::new(),
            assignments: vec![Vec::new(); size as usize],
        })
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    /// Claim `counter` for a `(dispatch, alias)` pair.
    pub fn claim(
        &mut self,
        counter: CounterId,
        dispatch: &str,
        alias: &str,
        increment: u64,
    ) -> Result<(), CounterError> {
        if counter >= self.size {
            return Err(CounterError::OutOfRange {
                counter,
                bank_size: self.size,
            });
        }
        if increment == 0 {
            return Err(CounterError::ZeroIncrement);
        }
        if increment > self.max_increment {
            return Err(CounterError::IncrementTooLarge {
                increment,
                max: self.max_increment,
            });
        }

        self.claimed.set(counter);
        self.assignments[counter as usize].push(Assignment {
            dispatch: dispatch.to_string(),
            alias: alias.to_string(),
            increment,
        });
        Ok(())
    }

    /// Mark a counter as written by an emitted update.
    pub fn mark_written(&mut self, counter: CounterId) {
        if self.claimed.contains(counter) {
            self.written.set(counter);
        }
    }

    /// Claimed counters that no emitted update writes.
    pub fn idle(&self) -> Vec<CounterId> {
        self.claimed
            .iter()
            .filter(|counter| !self.written.contains(*counter))
            .collect()
    }

    pub fn assignments(&self, counter: CounterId) -> &[Assignment] {
        self.assignments
            .get(counter as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Largest value one pass through every dispatch can add to `counter`.
    ///
    /// A dispatch selects one action per application, so each dispatch adds at
    /// most its largest increment on this counter.
    pub fn worst_case_total(&self, counter: CounterId) -> u64 {
        let mut per_dispatch: Vec<(&str, u64)> = Vec::new();
        for assignment in self.assignments(counter) {
            match per_dispatch.iter_mut().find(|(d, _)| *d == assignment.dispatch) {
                Some((_, max)) => *max = (*max).max(assignment.increment),
                None => per_dispatch.push((assignment.dispatch.as_str(), assignment.increment)),
            }
        }
        per_dispatch
            .iter()
            .fold(0u64, |total, (_, max)| total.saturating_add(*max))
    }

    /// (written, claimed, total) counters.
    pub fn usage(&self) -> (u32, u32, u32) {
        (self.written.count(), self.claimed.count(), self.size as u32)
    }

    /// Forget written marks before lowering another unit.
    pub fn reset_written(&mut self) {
        self.written = CounterSet::new();
    }
}
