use super::defaults::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PESSIMISTIC_FALLBACK};

/// Retry behaviour of the optimistic reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTuning {
    /// Total attempts per call, including a pessimistic final attempt
    pub max_attempts: usize,
    /// Plan and commit the last attempt under the write lock
    pub pessimistic_fallback: bool,
}

impl Default for ReconcileTuning {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            pessimistic_fallback: DEFAULT_PESSIMISTIC_FALLBACK,
        }
    }
}

impl ReconcileTuning {
    /// Pure optimistic retries; callers may see `ReconcileError::Conflict`.
    pub fn optimistic_only(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            pessimistic_fallback: false,
        }
    }

    /// Every call takes the write lock up front.
    pub fn serialized() -> Self {
        Self {
            max_attempts: 1,
            pessimistic_fallback: true,
        }
    }

    /// Whether `attempt` (1-based) should run under the exclusive lock.
    pub fn is_pessimistic(&self, attempt: usize) -> bool {
        self.pessimistic_fallback && attempt >= self.max_attempts.max(1)
    }
}
