//! Driver Adapter Contract
//!
//! The four-operation seam between the propagation engine and a concrete
//! database backend. All native-transaction lifecycle operations funnel
//! through this trait; no other component touches the database client.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::isolation::NegotiatedOptions;

/// Opaque token for a backend-native transaction.
///
/// The native object stays owned by the driver adapter that created it;
/// the unit of work and application code only ever hold this token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    pub fn from_raw(raw: u64) -> Self {
        TransactionHandle(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Mints process-unique transaction handles for driver adapters.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandleAllocator;

impl HandleAllocator {
    pub fn new() -> Self {
        HandleAllocator
    }

    pub fn allocate(&self) -> TransactionHandle {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransactionHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle operation a driver was asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOp {
    Create,
    Commit,
    Rollback,
    /// Query surface exposed by adapters on top of an active handle
    Execute,
}

impl fmt::Display for TransactionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionOp::Create => "create",
            TransactionOp::Commit => "commit",
            TransactionOp::Rollback => "rollback",
            TransactionOp::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// A backend rejected a transaction lifecycle operation.
///
/// Propagated verbatim to the caller; the engine never retries or masks it,
/// and after a failed commit the handle's true state is backend-defined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{backend} driver failed to {operation} transaction: {message}")]
pub struct DriverFailure {
    pub backend: String,
    pub operation: TransactionOp,
    pub message: String,
}

impl DriverFailure {
    pub fn new(
        backend: impl Into<String>,
        operation: TransactionOp,
        message: impl Into<String>,
    ) -> Self {
        Self {
            backend: backend.into(),
            operation,
            message: message.into(),
        }
    }
}

/// Backend integration surface required by the propagation engine.
///
/// Implementations own their native transaction objects outright and hand
/// out [`TransactionHandle`] tokens. Each adapter also contributes a
/// capability entry keyed by `backend_id` so isolation negotiation can run
/// before `create_transaction` is called.
#[async_trait]
pub trait DriverAdapter: Send + Sync {
    /// Identity used to index the capability table
    fn backend_id(&self) -> &str;

    /// Open a native transaction configured with the negotiated options
    async fn create_transaction(
        &self,
        options: &NegotiatedOptions,
    ) -> Result<TransactionHandle, DriverFailure>;

    /// Commit and release the native transaction behind `handle`
    async fn commit_transaction(&self, handle: TransactionHandle) -> Result<(), DriverFailure>;

    /// Roll back and release the native transaction behind `handle`
    async fn rollback_transaction(&self, handle: TransactionHandle) -> Result<(), DriverFailure>;
}
