//! Persistence for the procurement ledger
//!
//! Provides durable snapshots of the ledger, an append-only event journal
//! fed by the contract's event subscription, a checksum-validating journal
//! reader, and crash recovery by snapshot load plus journal replay.
//!
//! # Modules
//! - `state`: Flattened, composite-keyed ledger layout used on disk
//! - `snapshot`: Checksummed, optionally compressed snapshot files
//! - `journal`: Journal entry format, writer, and the journal event sink
//! - `reader`: Sequential journal reader with corruption detection
//! - `recovery`: Snapshot + journal replay back to a live ledger

pub mod state;
pub mod snapshot;
pub mod journal;
pub mod reader;
pub mod recovery;
