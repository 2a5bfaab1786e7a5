//! Scope Binding
//!
//! Creates one unit of work per inbound call chain and associates operation
//! identifiers with transaction options through an explicit registry built
//! at startup. Configuration stands in for method-level annotations; the
//! engine only ever sees the resolved options.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::capability::CapabilityTable;
use crate::driver::{DriverAdapter, TransactionHandle};
use crate::error::TxError;
use crate::options::TransactionOptions;
use crate::unit_of_work::UnitOfWork;

/// Registry mapping operation identifiers to transaction options.
///
/// An absent entry means "no transaction management" for that operation.
/// Deserializes directly from a configuration map of operation id to
/// options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionPolicies {
    policies: HashMap<String, TransactionOptions>,
}

impl TransactionPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> TransactionPoliciesBuilder {
        TransactionPoliciesBuilder::default()
    }

    pub fn options_for(&self, operation: &str) -> Option<&TransactionOptions> {
        self.policies.get(operation)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Startup-time builder for [`TransactionPolicies`].
#[derive(Debug, Default)]
pub struct TransactionPoliciesBuilder {
    policies: HashMap<String, TransactionOptions>,
}

impl TransactionPoliciesBuilder {
    /// Declare `operation` transactional with the given options.
    pub fn operation(mut self, operation: impl Into<String>, options: TransactionOptions) -> Self {
        self.policies.insert(operation.into(), options);
        self
    }

    pub fn build(self) -> TransactionPolicies {
        TransactionPolicies {
            policies: self.policies,
        }
    }
}

/// Creates units of work per call chain and runs operations under their
/// registered policies.
///
/// The binder guarantees each chain its own context; the engine relies on
/// that for scope isolation and performs no cross-chain synchronization.
pub struct ScopeBinder {
    adapter: Arc<dyn DriverAdapter>,
    capabilities: Arc<CapabilityTable>,
    defaults: TransactionOptions,
    policies: Arc<TransactionPolicies>,
}

impl ScopeBinder {
    pub fn new(
        adapter: Arc<dyn DriverAdapter>,
        capabilities: Arc<CapabilityTable>,
        policies: TransactionPolicies,
    ) -> Self {
        Self::with_defaults(adapter, capabilities, policies, TransactionOptions::default())
    }

    /// Binder whose chains inherit `defaults` under every policy.
    pub fn with_defaults(
        adapter: Arc<dyn DriverAdapter>,
        capabilities: Arc<CapabilityTable>,
        policies: TransactionPolicies,
        defaults: TransactionOptions,
    ) -> Self {
        Self {
            adapter,
            capabilities,
            defaults,
            policies: Arc::new(policies),
        }
    }

    pub fn policies(&self) -> &TransactionPolicies {
        &self.policies
    }

    /// Create the unit of work for a new inbound call chain. Exactly one
    /// per chain; dropped when the chain ends, whatever the outcome.
    pub fn begin_chain(&self) -> UnitOfWork {
        UnitOfWork::with_defaults(
            self.adapter.clone(),
            self.capabilities.clone(),
            self.defaults.clone(),
        )
    }

    /// Run `work` for `operation` on the chain's unit of work.
    ///
    /// With a registered policy the work runs inside
    /// [`UnitOfWork::execute_in_transaction`]; without one it is invoked
    /// directly, still seeing the chain's current handle so data access
    /// composes with an enclosing transaction.
    pub async fn run<R, E, F, Fut>(
        &self,
        unit_of_work: &UnitOfWork,
        operation: &str,
        work: F,
    ) -> Result<R, E>
    where
        E: From<TxError>,
        F: FnOnce(Option<TransactionHandle>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        match self.policies.options_for(operation) {
            Some(options) => {
                debug!("running {} under its transaction policy", operation);
                unit_of_work.execute_in_transaction(options, work).await
            }
            None => work(unit_of_work.get_transaction()).await,
        }
    }
}
