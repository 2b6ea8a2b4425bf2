use crate::common::InstanceId;

/// Evaluator configuration. Only limits and policies live here; the store
/// and executor enforce them.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvalConfig {
    /// Number of allocations between two opportunistic cycle scans. Zero
    /// disables automatic scanning, `Evaluator::collect_cycles` still works.
    pub cycle_scan_threshold: usize,

    /// Share one Integer per value in `SMALL_INT_RANGE`. Only observable
    /// through identity comparison.
    pub intern_small_ints: bool,

    /// Nesting bound for equality, ordering, rendering and deep copies.
    pub max_compare_depth: usize,

    /// Printed in front of every log line written by the loggers that
    /// `Evaluator::with_file_logger` and `Evaluator::with_vec_logger` create.
    pub instance_id: InstanceId,
}

pub const SMALL_INT_RANGE: std::ops::RangeInclusive<i64> = -5..=256;

/// Upper bound on the length of a Text (in bytes) or List produced by
/// repetition or `range()`.
pub const MAX_SEQUENCE_LEN: usize = 1 << 24;

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            cycle_scan_threshold: 700,
            intern_small_ints: false,
            max_compare_depth: 1000,
            instance_id: 0,
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
