//! Isolation Capability Table
//!
//! Static per-backend mapping of which isolation levels, read-only mode,
//! and timeout mechanism a backend supports. Loaded at startup and never
//! mutated afterward, so it is safe for unsynchronized concurrent reads.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

use crate::options::IsolationLevel;

/// What a single backend supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub supported_isolations: HashSet<IsolationLevel>,
    pub supports_read_only: bool,
    pub supports_timeout: bool,
}

impl BackendCapabilities {
    /// Backend with no negotiable features; every request falls back.
    pub fn none() -> Self {
        Self {
            supported_isolations: HashSet::new(),
            supports_read_only: false,
            supports_timeout: false,
        }
    }

    pub fn with_isolations<I>(isolations: I) -> Self
    where
        I: IntoIterator<Item = IsolationLevel>,
    {
        Self {
            supported_isolations: isolations.into_iter().collect(),
            supports_read_only: false,
            supports_timeout: false,
        }
    }

    pub fn read_only(mut self, supported: bool) -> Self {
        self.supports_read_only = supported;
        self
    }

    pub fn timeout(mut self, supported: bool) -> Self {
        self.supports_timeout = supported;
        self
    }

    pub fn supports_isolation(&self, level: &IsolationLevel) -> bool {
        self.supported_isolations.contains(level)
    }
}

/// Mapping from backend identity to its capabilities.
///
/// Custom backends register themselves before the table is shared; after
/// that the table is read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityTable {
    entries: HashMap<String, BackendCapabilities>,
}

static BUILTIN: Lazy<CapabilityTable> = Lazy::new(|| {
    use IsolationLevel::*;

    let mut table = CapabilityTable::new();
    table.register(
        "postgres",
        BackendCapabilities::with_isolations([ReadCommitted, RepeatableRead, Serializable])
            .read_only(true)
            .timeout(true),
    );
    table.register(
        "mysql",
        BackendCapabilities::with_isolations([
            ReadUncommitted,
            ReadCommitted,
            RepeatableRead,
            Serializable,
        ])
        .read_only(true)
        .timeout(true),
    );
    table.register(
        "mariadb",
        BackendCapabilities::with_isolations([
            ReadUncommitted,
            ReadCommitted,
            RepeatableRead,
            Serializable,
        ])
        .read_only(true)
        .timeout(true),
    );
    table.register(
        "cockroachdb",
        BackendCapabilities::with_isolations([Serializable]),
    );
    table.register(
        "mssql",
        BackendCapabilities::with_isolations([
            ReadUncommitted,
            ReadCommitted,
            RepeatableRead,
            Serializable,
            Snapshot,
        ])
        .timeout(true),
    );
    table.register(
        "oracle",
        BackendCapabilities::with_isolations([ReadCommitted, Serializable]),
    );
    // SQLite transactions are always serializable; nothing is negotiable.
    table.register("sqlite", BackendCapabilities::none());
    table
});

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table covering the known relational backends.
    pub fn builtin() -> &'static CapabilityTable {
        &BUILTIN
    }

    pub fn register(&mut self, backend: impl Into<String>, capabilities: BackendCapabilities) {
        self.entries.insert(backend.into(), capabilities);
    }

    pub fn get(&self, backend: &str) -> Option<&BackendCapabilities> {
        self.entries.get(backend)
    }

    pub fn contains(&self, backend: &str) -> bool {
        self.entries.contains_key(backend)
    }

    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
