//! Mock Driver Adapter
//!
//! In-memory [`DriverAdapter`] for exercising propagation logic without a
//! database. Records a journal of lifecycle calls with the negotiated
//! options seen, tracks each handle's final state, and can be told to fail
//! the next occurrence of a given operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::driver::{
    DriverAdapter, DriverFailure, HandleAllocator, TransactionHandle, TransactionOp,
};
use crate::isolation::NegotiatedOptions;

/// One recorded lifecycle call.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub operation: TransactionOp,
    pub handle: TransactionHandle,
    /// Negotiated options, present for `Create` entries
    pub options: Option<NegotiatedOptions>,
}

/// Final state of a mock transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Default)]
struct MockState {
    journal: Vec<JournalEntry>,
    handles: HashMap<TransactionHandle, HandleState>,
    fail_next: Option<TransactionOp>,
}

/// Scriptable in-memory backend.
pub struct MockAdapter {
    backend: String,
    allocator: HandleAllocator,
    state: Mutex<MockState>,
}

impl MockAdapter {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            allocator: HandleAllocator::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Fail the next occurrence of `operation` with an injected failure.
    pub fn fail_next(&self, operation: TransactionOp) {
        self.state.lock().fail_next = Some(operation);
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.clone()
    }

    /// Number of journal entries for `operation`.
    pub fn count_of(&self, operation: TransactionOp) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|entry| entry.operation == operation)
            .count()
    }

    pub fn handle_state(&self, handle: TransactionHandle) -> Option<HandleState> {
        self.state.lock().handles.get(&handle).copied()
    }

    pub fn active_handles(&self) -> Vec<TransactionHandle> {
        self.state
            .lock()
            .handles
            .iter()
            .filter(|(_, state)| **state == HandleState::Active)
            .map(|(handle, _)| *handle)
            .collect()
    }

    fn injected_failure(&self, operation: TransactionOp) -> Option<DriverFailure> {
        let mut state = self.state.lock();
        if state.fail_next == Some(operation) {
            state.fail_next = None;
            Some(DriverFailure::new(
                self.backend.clone(),
                operation,
                "injected failure",
            ))
        } else {
            None
        }
    }

    fn finalize(
        &self,
        handle: TransactionHandle,
        operation: TransactionOp,
        next: HandleState,
    ) -> Result<(), DriverFailure> {
        if let Some(failure) = self.injected_failure(operation) {
            return Err(failure);
        }
        let mut state = self.state.lock();
        match state.handles.get(&handle) {
            Some(HandleState::Active) => {}
            Some(_) => {
                return Err(DriverFailure::new(
                    self.backend.clone(),
                    operation,
                    format!("transaction {} already finalized", handle),
                ))
            }
            None => {
                return Err(DriverFailure::new(
                    self.backend.clone(),
                    operation,
                    format!("unknown transaction handle {}", handle),
                ))
            }
        }
        state.handles.insert(handle, next);
        state.journal.push(JournalEntry {
            operation,
            handle,
            options: None,
        });
        Ok(())
    }
}

#[async_trait]
impl DriverAdapter for MockAdapter {
    fn backend_id(&self) -> &str {
        &self.backend
    }

    async fn create_transaction(
        &self,
        options: &NegotiatedOptions,
    ) -> Result<TransactionHandle, DriverFailure> {
        if let Some(failure) = self.injected_failure(TransactionOp::Create) {
            return Err(failure);
        }
        let handle = self.allocator.allocate();
        let mut state = self.state.lock();
        state.handles.insert(handle, HandleState::Active);
        state.journal.push(JournalEntry {
            operation: TransactionOp::Create,
            handle,
            options: Some(options.clone()),
        });
        Ok(handle)
    }

    async fn commit_transaction(&self, handle: TransactionHandle) -> Result<(), DriverFailure> {
        self.finalize(handle, TransactionOp::Commit, HandleState::Committed)
    }

    async fn rollback_transaction(&self, handle: TransactionHandle) -> Result<(), DriverFailure> {
        self.finalize(handle, TransactionOp::Rollback, HandleState::RolledBack)
    }
}
