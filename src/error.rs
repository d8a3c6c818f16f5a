//! Error types for reconciliation.

use thiserror::Error;

/// Failure of a single `identify` call.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Neither an email nor a phone number was supplied.
    #[error("either email or phoneNumber is required")]
    Validation,

    /// Concurrent writers kept invalidating the read set.
    #[error("reconciliation conflicted {attempts} times; giving up")]
    Conflict { attempts: usize },

    /// The contact store failed.
    #[error("contact store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Whether the caller, rather than the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ReconcileError::Validation)
    }
}
