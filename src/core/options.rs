//! Knobs shared by every pass and by the printer.

/// Options for one instrumentation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Name of the path accumulator written by injected statements.
    pub accumulator: String,
    /// Prefix of physical counter names; the counter index is appended.
    pub register_prefix: String,
    /// Count all absent-body switch cases as one shared path.
    pub strict_absent_cases: bool,
    /// Number of physical counters available to the lowering backend.
    pub counter_bank_size: u8,
    /// Largest increment an allocation entry may carry.
    pub max_increment: u64,
    /// Upper bound on paths walked by [`crate::ir::paths::enumerate`].
    pub max_enumerated_paths: usize,
}

impl InstrumentOptions {
    /// Render the name of a physical counter.
    pub fn register_name(&self, register: u8) -> String {
        format!("{}{}", self.register_prefix, register)
    }
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            accumulator: "meta.BL".to_string(),
            register_prefix: "standard_metadata.var_".to_string(),
            strict_absent_cases: false,
            counter_bank_size: 8,
            max_increment: u32::MAX as u64,
            max_enumerated_paths: 1 << 16,
        }
    }
}
