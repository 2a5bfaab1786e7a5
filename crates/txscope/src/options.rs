//! Transaction Options
//!
//! Propagation rules, isolation levels, and the caller-facing options value
//! that is merged field-by-field over scope defaults before a transaction
//! decision is made.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Propagation rule governing how a call interacts with an already-active
/// transaction in the same call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Use the existing transaction if present, create a new one if not
    Required,
    /// Always create a new, independently finalized transaction
    RequiresNew,
    /// Use the existing transaction if present, proceed without one if not
    Supports,
    /// Execute without a transaction; fail if one is already active
    NotSupported,
    /// Fail if executed within an active transaction
    Never,
    /// A transaction must already exist; fail if none does
    Mandatory,
}

impl Propagation {
    /// Canonical spelling used in configuration and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::Supports => "SUPPORTS",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
            Propagation::Mandatory => "MANDATORY",
        }
    }
}

impl Default for Propagation {
    fn default() -> Self {
        Propagation::Required
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Isolation level requested for a transaction.
///
/// The four ANSI levels and SNAPSHOT are first-class; anything else a
/// backend understands travels as `Custom`, so per-backend capability
/// tables stay an open set rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    /// MSSQL row-versioning isolation
    Snapshot,
    /// Backend-specific level, stored as its uppercase SQL token
    Custom(String),
}

impl IsolationLevel {
    /// SQL token for `SET TRANSACTION ISOLATION LEVEL ...`
    pub fn as_sql(&self) -> &str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Custom(token) => token,
        }
    }

    /// Parse a SQL token back into a level. Unknown tokens become `Custom`
    /// with the normalized (uppercase) spelling, so `from_sql(as_sql(x)) == x`
    /// holds for every level.
    pub fn from_sql(token: &str) -> IsolationLevel {
        let normalized = token.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "READ UNCOMMITTED" => IsolationLevel::ReadUncommitted,
            "READ COMMITTED" => IsolationLevel::ReadCommitted,
            "REPEATABLE READ" => IsolationLevel::RepeatableRead,
            "SERIALIZABLE" => IsolationLevel::Serializable,
            "SNAPSHOT" => IsolationLevel::Snapshot,
            _ => IsolationLevel::Custom(normalized),
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl Serialize for IsolationLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

impl<'de> Deserialize<'de> for IsolationLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Ok(IsolationLevel::from_sql(&token))
    }
}

/// Caller-supplied transaction options.
///
/// Every field is optional; unset fields inherit from the scope defaults
/// via [`TransactionOptions::merged_over`]. The merged value is immutable
/// for the lifetime of the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransactionOptions {
    pub propagation: Option<Propagation>,
    pub isolation: Option<IsolationLevel>,
    /// Database-side transaction timeout in milliseconds, applied at
    /// creation time where the backend supports it
    pub timeout_ms: Option<u64>,
    pub read_only: Option<bool>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = Some(propagation);
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Merge these options over scope defaults. Explicitly set fields win,
    /// field by field.
    pub fn merged_over(&self, defaults: &TransactionOptions) -> TransactionOptions {
        TransactionOptions {
            propagation: self.propagation.or(defaults.propagation),
            isolation: self.isolation.clone().or_else(|| defaults.isolation.clone()),
            timeout_ms: self.timeout_ms.or(defaults.timeout_ms),
            read_only: self.read_only.or(defaults.read_only),
        }
    }

    /// Propagation rule with the engine default applied
    pub fn effective_propagation(&self) -> Propagation {
        self.propagation.unwrap_or_default()
    }

    /// Whether read-only mode was requested
    pub fn wants_read_only(&self) -> bool {
        self.read_only.unwrap_or(false)
    }
}
