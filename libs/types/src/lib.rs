//! Types library for the procurement ledger
//!
//! This library provides the core type definitions shared by the tender state
//! machine and its persistence layer.
//!
//! # Modules
//! - `ids`: Identifiers (TenderId, Address)
//! - `amount`: Integer monetary amounts with decimal display-unit conversion
//! - `hash`: Fixed-size fingerprints and commitment nonces
//! - `time`: Timestamps and the external clock abstraction
//! - `errors`: Parse error taxonomy

// Public modules
pub mod ids;
pub mod amount;
pub mod hash;
pub mod time;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::amount::*;
    pub use crate::hash::*;
    pub use crate::time::*;
    pub use crate::errors::*;
}
