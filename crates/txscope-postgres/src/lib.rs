//! PostgreSQL Driver Adapter
//!
//! Implements the txscope driver adapter contract over a `sqlx` connection
//! pool. Negotiated isolation, read-only mode, and timeout are applied as
//! database-side statements at transaction creation; the native `sqlx`
//! transactions stay owned here, keyed by handle, and application code
//! reaches them through the query surface on this adapter.

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use txscope::driver::{
    DriverAdapter, DriverFailure, HandleAllocator, TransactionHandle, TransactionOp,
};
use txscope::capability::BackendCapabilities;
use txscope::isolation::NegotiatedOptions;
use txscope::options::IsolationLevel;

/// Capability-table key for this adapter.
pub const BACKEND_ID: &str = "postgres";

const SET_READ_ONLY: &str = "SET TRANSACTION READ ONLY";

fn isolation_statement(level: &IsolationLevel) -> String {
    format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql())
}

// SET LOCAL scopes the timeout to the transaction, so no reset is needed
// on the pooled connection afterward.
fn timeout_statement(timeout: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", timeout.as_millis())
}

/// Driver adapter for PostgreSQL.
///
/// Pooling stays in `sqlx`; this type only manages native transaction
/// lifecycles and hands out opaque handles.
pub struct PostgresAdapter {
    pool: PgPool,
    allocator: HandleAllocator,
    active: Mutex<HashMap<u64, Transaction<'static, Postgres>>>,
}

impl PostgresAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            allocator: HandleAllocator::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Capability entry for this backend, for registration in custom
    /// capability tables. Matches the builtin `postgres` entry.
    pub fn capabilities() -> BackendCapabilities {
        BackendCapabilities::with_isolations([
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ])
        .read_only(true)
        .timeout(true)
    }

    /// Number of transactions currently held by this adapter.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Run a statement on the transaction behind `handle` and return the
    /// affected-row count.
    pub async fn execute(
        &self,
        handle: TransactionHandle,
        sql: &str,
    ) -> Result<u64, DriverFailure> {
        let mut tx = self.checkout(handle, TransactionOp::Execute)?;
        let result = sqlx::query(sql).execute(&mut *tx).await;
        self.active.lock().insert(handle.as_raw(), tx);
        let done = result.map_err(|e| self.failure(TransactionOp::Execute, e))?;
        Ok(done.rows_affected())
    }

    /// Fetch all rows for a query on the transaction behind `handle`.
    pub async fn fetch_all(
        &self,
        handle: TransactionHandle,
        sql: &str,
    ) -> Result<Vec<PgRow>, DriverFailure> {
        let mut tx = self.checkout(handle, TransactionOp::Execute)?;
        let result = sqlx::query(sql).fetch_all(&mut *tx).await;
        self.active.lock().insert(handle.as_raw(), tx);
        result.map_err(|e| self.failure(TransactionOp::Execute, e))
    }

    /// Fetch at most one row for a query on the transaction behind `handle`.
    pub async fn fetch_optional(
        &self,
        handle: TransactionHandle,
        sql: &str,
    ) -> Result<Option<PgRow>, DriverFailure> {
        let mut tx = self.checkout(handle, TransactionOp::Execute)?;
        let result = sqlx::query(sql).fetch_optional(&mut *tx).await;
        self.active.lock().insert(handle.as_raw(), tx);
        result.map_err(|e| self.failure(TransactionOp::Execute, e))
    }

    fn checkout(
        &self,
        handle: TransactionHandle,
        operation: TransactionOp,
    ) -> Result<Transaction<'static, Postgres>, DriverFailure> {
        self.active.lock().remove(&handle.as_raw()).ok_or_else(|| {
            DriverFailure::new(
                BACKEND_ID,
                operation,
                format!("unknown or already finalized transaction handle {}", handle),
            )
        })
    }

    fn failure(&self, operation: TransactionOp, error: impl fmt::Display) -> DriverFailure {
        DriverFailure::new(BACKEND_ID, operation, error.to_string())
    }
}

#[async_trait]
impl DriverAdapter for PostgresAdapter {
    fn backend_id(&self) -> &str {
        BACKEND_ID
    }

    async fn create_transaction(
        &self,
        options: &NegotiatedOptions,
    ) -> Result<TransactionHandle, DriverFailure> {
        // An early failure drops the native transaction, which sqlx rolls
        // back on its own.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.failure(TransactionOp::Create, e))?;

        if let Some(level) = &options.isolation {
            sqlx::query(&isolation_statement(level))
                .execute(&mut *tx)
                .await
                .map_err(|e| self.failure(TransactionOp::Create, e))?;
        }

        if options.read_only {
            sqlx::query(SET_READ_ONLY)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.failure(TransactionOp::Create, e))?;
        }

        if let Some(timeout) = options.timeout {
            sqlx::query(&timeout_statement(timeout))
                .execute(&mut *tx)
                .await
                .map_err(|e| self.failure(TransactionOp::Create, e))?;
        }

        let handle = self.allocator.allocate();
        self.active.lock().insert(handle.as_raw(), tx);
        debug!("created postgres transaction {}", handle);
        Ok(handle)
    }

    async fn commit_transaction(&self, handle: TransactionHandle) -> Result<(), DriverFailure> {
        let tx = self.checkout(handle, TransactionOp::Commit)?;
        // A failed commit consumes the native transaction; its true state
        // is backend-defined and a later rollback of the same handle will
        // report it as unknown.
        tx.commit()
            .await
            .map_err(|e| self.failure(TransactionOp::Commit, e))?;
        debug!("committed postgres transaction {}", handle);
        Ok(())
    }

    async fn rollback_transaction(&self, handle: TransactionHandle) -> Result<(), DriverFailure> {
        let tx = self.checkout(handle, TransactionOp::Rollback)?;
        tx.rollback()
            .await
            .map_err(|e| self.failure(TransactionOp::Rollback, e))?;
        debug!("rolled back postgres transaction {}", handle);
        Ok(())
    }
}
