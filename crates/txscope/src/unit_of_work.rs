//! Unit of Work
//!
//! The per-call-chain transaction context and its propagation state
//! machine. Holds a stack of owned transaction handles: the top of the
//! stack is the chain's current transaction, and a REQUIRES_NEW frame
//! pushes a second, independently finalized handle above the enclosing
//! one. The frame whose `begin` pushed a handle is its sole owner and the
//! only frame permitted to commit or roll it back.
//!
//! One `UnitOfWork` serves exactly one logical call chain. Nesting within
//! the chain is cooperative and sequential; the internal mutex exists for
//! interior mutability, not cross-chain coordination. Concurrent chains
//! each get their own `UnitOfWork` from the scope binder.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::capability::CapabilityTable;
use crate::driver::{DriverAdapter, TransactionHandle};
use crate::error::{TxError, TxResult};
use crate::isolation::NegotiatedOptions;
use crate::options::{Propagation, TransactionOptions};

/// What `begin` decided for the calling frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// A new transaction was created; the calling frame owns it and must
    /// finalize it exactly once
    Owned(TransactionHandle),
    /// An enclosing transaction was joined; the calling frame must not
    /// finalize it
    Joined(TransactionHandle),
    /// The propagation rule permits running without a transaction
    Nontransactional,
}

impl BeginOutcome {
    pub fn handle(&self) -> Option<TransactionHandle> {
        match self {
            BeginOutcome::Owned(handle) | BeginOutcome::Joined(handle) => Some(*handle),
            BeginOutcome::Nontransactional => None,
        }
    }

    pub fn owns_transaction(&self) -> bool {
        matches!(self, BeginOutcome::Owned(_))
    }
}

/// Per-call-chain unit of work coordinating transaction lifecycles
/// through a driver adapter.
pub struct UnitOfWork {
    adapter: Arc<dyn DriverAdapter>,
    capabilities: Arc<CapabilityTable>,
    defaults: TransactionOptions,
    stack: Mutex<Vec<TransactionHandle>>,
}

impl UnitOfWork {
    pub fn new(adapter: Arc<dyn DriverAdapter>, capabilities: Arc<CapabilityTable>) -> Self {
        Self::with_defaults(adapter, capabilities, TransactionOptions::default())
    }

    /// Build a unit of work whose callers inherit `defaults` field-by-field.
    pub fn with_defaults(
        adapter: Arc<dyn DriverAdapter>,
        capabilities: Arc<CapabilityTable>,
        defaults: TransactionOptions,
    ) -> Self {
        Self {
            adapter,
            capabilities,
            defaults,
            stack: Mutex::new(Vec::new()),
        }
    }

    pub fn backend_id(&self) -> &str {
        self.adapter.backend_id()
    }

    /// The chain's current transaction handle, if any.
    pub fn get_transaction(&self) -> Option<TransactionHandle> {
        self.stack.lock().last().copied()
    }

    pub fn is_transaction_active(&self) -> bool {
        !self.stack.lock().is_empty()
    }

    /// Nesting depth of owned transactions; 0 means no owner.
    pub fn owner_depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Apply the propagation decision table and, where it calls for one,
    /// create a new transaction through the driver adapter.
    pub async fn begin(&self, options: &TransactionOptions) -> TxResult<BeginOutcome> {
        let merged = options.merged_over(&self.defaults);
        let propagation = merged.effective_propagation();

        match (self.get_transaction(), propagation) {
            // Active: REQUIRES_NEW stacks a second, independent transaction.
            (Some(_), Propagation::RequiresNew) => {
                let handle = self.create_transaction(&merged).await?;
                Ok(BeginOutcome::Owned(handle))
            }
            (Some(_), Propagation::NotSupported) | (Some(_), Propagation::Never) => {
                Err(TxError::violation(propagation, "a transaction is already active"))
            }
            // Active: everything else joins the enclosing transaction.
            (Some(current), Propagation::Required)
            | (Some(current), Propagation::Supports)
            | (Some(current), Propagation::Mandatory) => {
                debug!("joining active transaction {} ({})", current, propagation);
                Ok(BeginOutcome::Joined(current))
            }
            (None, Propagation::Mandatory) => {
                Err(TxError::violation(propagation, "no existing transaction found"))
            }
            (None, Propagation::NotSupported) | (None, Propagation::Never) => {
                debug!("proceeding without a transaction ({})", propagation);
                Ok(BeginOutcome::Nontransactional)
            }
            // Idle: the remaining rules all start a fresh transaction.
            (None, Propagation::Required)
            | (None, Propagation::RequiresNew)
            | (None, Propagation::Supports) => {
                let handle = self.create_transaction(&merged).await?;
                Ok(BeginOutcome::Owned(handle))
            }
        }
    }

    /// Commit the chain's current transaction.
    ///
    /// The frame is cleared only after the driver reports success: a failed
    /// driver commit leaves the handle active so the caller can decide
    /// whether to roll back; the engine never does that on its own.
    pub async fn commit(&self) -> TxResult<()> {
        let handle = self.get_transaction().ok_or(TxError::NoActiveTransaction {
            operation: "commit",
        })?;
        self.adapter.commit_transaction(handle).await?;
        self.clear(handle);
        debug!("committed transaction {}", handle);
        Ok(())
    }

    /// Roll back the chain's current transaction.
    pub async fn rollback(&self) -> TxResult<()> {
        let handle = self.get_transaction().ok_or(TxError::NoActiveTransaction {
            operation: "rollback",
        })?;
        self.adapter.rollback_transaction(handle).await?;
        self.clear(handle);
        debug!("rolled back transaction {}", handle);
        Ok(())
    }

    /// Run `work` under the declared propagation rule with owner-only
    /// finalization.
    ///
    /// The work receives the current handle, or `None` when propagation
    /// permits running without a transaction. On success the transaction is
    /// committed only if this frame created it; on error it is rolled back
    /// only if this frame created it and it is still active, and the
    /// original error reaches the caller unmodified. Non-owning frames
    /// neither commit nor roll back; the owner decides the outcome of the
    /// shared transaction.
    ///
    /// Generic over the caller's error type so application errors pass
    /// through untouched; engine errors convert via `From<TxError>`.
    pub async fn execute_in_transaction<R, E, F, Fut>(
        &self,
        options: &TransactionOptions,
        work: F,
    ) -> Result<R, E>
    where
        E: From<TxError>,
        F: FnOnce(Option<TransactionHandle>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let outcome = self.begin(options).await.map_err(E::from)?;
        let owned = outcome.owns_transaction();
        let handle = outcome.handle();

        match work(handle).await {
            Ok(value) => {
                if owned {
                    self.commit().await.map_err(E::from)?;
                }
                Ok(value)
            }
            Err(work_error) => {
                // Owner-only rollback, and only while our handle is still
                // the chain's current transaction.
                if owned && self.get_transaction() == handle {
                    if let Err(rollback_error) = self.rollback().await {
                        error!(
                            "rollback after failed unit of work also failed: {}",
                            rollback_error
                        );
                    }
                }
                Err(work_error)
            }
        }
    }

    async fn create_transaction(
        &self,
        options: &TransactionOptions,
    ) -> TxResult<TransactionHandle> {
        let negotiated =
            NegotiatedOptions::negotiate(&self.capabilities, self.adapter.backend_id(), options);
        let handle = self.adapter.create_transaction(&negotiated).await?;
        let depth = {
            let mut stack = self.stack.lock();
            stack.push(handle);
            stack.len()
        };
        debug!(
            "began transaction {} on {} at depth {}",
            handle,
            self.adapter.backend_id(),
            depth
        );
        Ok(handle)
    }

    fn clear(&self, handle: TransactionHandle) {
        let mut stack = self.stack.lock();
        if stack.last() == Some(&handle) {
            stack.pop();
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        let stack = self.stack.get_mut();
        if !stack.is_empty() {
            // Natives are still released by the adapter's own drop path.
            warn!(
                "unit of work for {} dropped with {} unfinalized transaction(s)",
                self.adapter.backend_id(),
                stack.len()
            );
        }
    }
}
