//! Error types for parsing shared values
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Errors raised while parsing or converting shared types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount has more than {decimals} decimal places: {value}")]
    TooPrecise { value: String, decimals: u32 },

    #[error("Unsupported decimals: {0}")]
    UnsupportedDecimals(u32),

    #[error("Amount out of range: {0}")]
    OutOfRange(String),
}
