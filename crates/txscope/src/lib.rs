//! # txscope: Transaction Propagation Engine
//!
//! Declarative transaction boundaries for call-chain code: a unit of work
//! per inbound request or job applies REQUIRED / REQUIRES_NEW / SUPPORTS /
//! NOT_SUPPORTED / NEVER / MANDATORY propagation over any backend that
//! implements the four-operation driver adapter contract, with per-backend
//! isolation negotiation and non-fatal capability fallback.
//!
//! Concrete backends live in sibling crates (`txscope-postgres`); the
//! in-memory [`mock::MockAdapter`] ships here for tests.

pub mod capability;
pub mod driver;
pub mod error;
pub mod isolation;
pub mod mock;
pub mod options;
pub mod scope;
pub mod unit_of_work;

#[cfg(test)]
mod propagation_tests;

// Re-export the full working surface at the crate root
pub use capability::*;
pub use driver::*;
pub use error::*;
pub use isolation::*;
pub use options::*;
pub use scope::*;
pub use unit_of_work::*;
