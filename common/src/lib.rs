//! BakriPay Common Types
//!
//! Shared types for the BakriPay ledger: identifiers, monetary helpers,
//! lifecycle states, error kinds and request-layer validation.

pub mod identifiers;
pub mod monetary;
pub mod status;
pub mod error;
pub mod validation;
pub mod requests;

pub use identifiers::*;
pub use status::*;
pub use error::*;
pub use validation::ValidationError;
pub use requests::{LedgerCommand, TransactionRequest};
