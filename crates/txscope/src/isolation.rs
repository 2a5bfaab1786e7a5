//! Isolation Negotiation
//!
//! Pure negotiation of requested isolation, read-only mode, and timeout
//! against a backend's capability entry. An unsupported request is never an
//! error: the transaction proceeds at the backend default and the downgrade
//! is surfaced as a [`CapabilityFallback`] value plus a warning event.

use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::capability::CapabilityTable;
use crate::options::{IsolationLevel, TransactionOptions};

/// Result of negotiating a single isolation level against a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationSupport {
    /// Backend-native SQL token for the requested level
    Native(String),
    /// Level not supported; the backend default applies
    Unsupported,
}

/// Negotiate one isolation level against one backend.
///
/// Unknown backends negotiate as unsupported across the board.
pub fn negotiate(
    table: &CapabilityTable,
    backend: &str,
    requested: &IsolationLevel,
) -> IsolationSupport {
    match table.get(backend) {
        Some(capabilities) if capabilities.supports_isolation(requested) => {
            IsolationSupport::Native(requested.as_sql().to_string())
        }
        _ => IsolationSupport::Unsupported,
    }
}

/// A requested feature the backend could not honor. Non-fatal by design;
/// the transaction still runs, downgraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityFallback {
    Isolation {
        backend: String,
        requested: IsolationLevel,
    },
    ReadOnly {
        backend: String,
    },
    Timeout {
        backend: String,
    },
}

impl fmt::Display for CapabilityFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityFallback::Isolation { backend, requested } => write!(
                f,
                "isolation level {} is not supported by {}; using the backend default",
                requested, backend
            ),
            CapabilityFallback::ReadOnly { backend } => write!(
                f,
                "read-only transactions are not supported by {}; ignoring read_only",
                backend
            ),
            CapabilityFallback::Timeout { backend } => write!(
                f,
                "transaction timeouts are not supported by {}; ignoring timeout_ms",
                backend
            ),
        }
    }
}

/// Options after capability negotiation, ready for a driver adapter.
///
/// Only features the backend actually supports survive; everything dropped
/// is recorded in `fallbacks`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NegotiatedOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    pub timeout: Option<Duration>,
    pub fallbacks: Vec<CapabilityFallback>,
}

impl NegotiatedOptions {
    /// Fold the merged caller options against the backend's capabilities.
    pub fn negotiate(
        table: &CapabilityTable,
        backend: &str,
        options: &TransactionOptions,
    ) -> NegotiatedOptions {
        let mut negotiated = NegotiatedOptions::default();
        let capabilities = table.get(backend);

        if let Some(requested) = &options.isolation {
            match negotiate(table, backend, requested) {
                IsolationSupport::Native(_) => negotiated.isolation = Some(requested.clone()),
                IsolationSupport::Unsupported => {
                    negotiated.fall_back(CapabilityFallback::Isolation {
                        backend: backend.to_string(),
                        requested: requested.clone(),
                    });
                }
            }
        }

        if options.wants_read_only() {
            if capabilities.map_or(false, |c| c.supports_read_only) {
                negotiated.read_only = true;
            } else {
                negotiated.fall_back(CapabilityFallback::ReadOnly {
                    backend: backend.to_string(),
                });
            }
        }

        if let Some(timeout_ms) = options.timeout_ms {
            if capabilities.map_or(false, |c| c.supports_timeout) {
                negotiated.timeout = Some(Duration::from_millis(timeout_ms));
            } else {
                negotiated.fall_back(CapabilityFallback::Timeout {
                    backend: backend.to_string(),
                });
            }
        }

        negotiated
    }

    pub fn had_fallback(&self) -> bool {
        !self.fallbacks.is_empty()
    }

    fn fall_back(&mut self, fallback: CapabilityFallback) {
        warn!("{}", fallback);
        self.fallbacks.push(fallback);
    }
}
