//! Error Taxonomy
//!
//! Propagation violations and missing-transaction conditions fail fast at
//! the unit-of-work boundary. Driver failures pass through verbatim.
//! Capability fallbacks are deliberately *not* errors; see the `isolation`
//! module.

use thiserror::Error;

use crate::driver::DriverFailure;
use crate::options::Propagation;

/// Result type alias for unit-of-work operations
pub type TxResult<T> = Result<T, TxError>;

/// Errors raised by the propagation engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TxError {
    /// The declared propagation rule conflicts with the current
    /// transaction state. Fatal to the call; never retried.
    #[error("propagation {propagation} violated: {reason}")]
    PropagationViolation {
        propagation: Propagation,
        reason: &'static str,
    },

    /// Commit or rollback was invoked with no active transaction. Signals
    /// a caller bug: double finalize, or finalize without begin.
    #[error("no active transaction to {operation}")]
    NoActiveTransaction { operation: &'static str },

    /// The backend rejected a lifecycle operation. Propagated unchanged.
    #[error(transparent)]
    Driver(#[from] DriverFailure),
}

impl TxError {
    pub(crate) fn violation(propagation: Propagation, reason: &'static str) -> Self {
        TxError::PropagationViolation {
            propagation,
            reason,
        }
    }
}
