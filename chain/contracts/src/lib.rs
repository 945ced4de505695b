//! Sealed-bid procurement contract
//!
//! This crate implements the tender state machine: commit-reveal bidding
//! under deadline phases, lowest-valid-bid award, and milestone escrow
//! payouts guarded against reentrancy.
//!
//! # Modules
//! - `errors`: Error taxonomy with per-variant categories
//! - `events`: Contract events and event subscribers
//! - `security`: Access control (owner, auditors) and reentrancy guard
//! - `config`: Deployment policy (payout caller policy, milestone limit)
//! - `commitment`: Keccak-256 bid commitments
//! - `registry`: Tender, bid and milestone records and their stores
//! - `contract`: The `Procurement` state machine, queries, event delivery
//! - `auction`: Tender creation, bidding, reveal, winner selection
//! - `payment`: Escrow funding, milestone approval, payout release
//! - `replay`: Rebuilding a ledger from committed events

pub mod errors;
pub mod events;
pub mod security;
pub mod config;
pub mod commitment;
pub mod registry;
pub mod contract;
pub mod auction;
pub mod payment;
pub mod replay;

pub use config::{PayoutPolicy, ProcurementConfig};
pub use contract::{LedgerState, Procurement, TenderPhase};
pub use errors::{ErrorKind, ProcurementError, TransferError};
pub use events::{EventRecord, EventSink, ProcurementEvent};
pub use payment::{PayoutHook, PayoutInstruction, RecordedPayouts};
pub use replay::ReplayError;

/// Contract ABI version, frozen after release
pub const CONTRACT_ABI_VERSION: &str = "1.0.0";
