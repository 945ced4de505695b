//! Recovery: boot from snapshot + journal replay
//!
//! 1. Load the latest snapshot, or start from a fresh ledger
//! 2. Open the journal and seek to `snapshot.sequence + 1`
//! 3. Decode and apply every later event with `LedgerState::apply`
//! 4. Optionally compare the final state hash against an expected one
//!
//! A rejected or out-of-order event aborts recovery. So does a checksum
//! mismatch. A torn final entry, as left by a crash mid-append, is
//! skipped and logged by the reader.

use crate::journal::JournalError;
use crate::reader::{JournalReader, ReaderError};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotLoader, SnapshotWriter};
use crate::state::PersistedState;
use procurement_contracts::{LedgerState, ReplayError};
use procurement_types::ids::Address;
use procurement_types::time::Timestamp;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("State hash divergence: expected {expected}, got {actual} at sequence {sequence}")]
    HashDivergence {
        expected: String,
        actual: String,
        sequence: u64,
    },
}

// ── Recovery Metrics ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecoveryMetrics {
    pub snapshot_load_time_ms: u64,
    /// 0 if recovery started from a fresh ledger.
    pub snapshot_sequence: u64,
    pub replay_count: u64,
    pub replay_time_ms: u64,
    pub total_recovery_time_ms: u64,
    pub final_state_hash: String,
    pub final_sequence: u64,
    /// Journal regions the reader skipped.
    pub corruptions: usize,
}

// ── Recovery Log ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecoveryLogEntry {
    pub stage: RecoveryStage,
    pub message: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStage {
    Start,
    SnapshotSearch,
    SnapshotLoad,
    JournalOpen,
    JournalSeek,
    Replay,
    Validation,
    Complete,
    Error,
}

// ── Recovery Engine ─────────────────────────────────────────────────

/// Orchestrates snapshot loading and journal replay.
pub struct RecoveryEngine {
    snapshot_dir: PathBuf,
    journal_dir: PathBuf,
    log: Vec<RecoveryLogEntry>,
}

impl RecoveryEngine {
    pub fn new(snapshot_dir: impl Into<PathBuf>, journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            journal_dir: journal_dir.into(),
            log: Vec::new(),
        }
    }

    /// Rebuild the ledger. `genesis_owner` seeds the fresh ledger when no
    /// snapshot exists; a snapshot carries its own owner.
    pub fn recover(
        &mut self,
        genesis_owner: Address,
        expected_hash: Option<&str>,
    ) -> Result<(LedgerState, RecoveryMetrics), RecoveryError> {
        let result = self.run(genesis_owner, expected_hash);
        if let Err(err) = &result {
            error!(error = %err, "Recovery aborted");
            self.log_stage(RecoveryStage::Error, &err.to_string(), 0);
        }
        result
    }

    fn run(
        &mut self,
        genesis_owner: Address,
        expected_hash: Option<&str>,
    ) -> Result<(LedgerState, RecoveryMetrics), RecoveryError> {
        let total_start = Instant::now();
        let mut metrics = RecoveryMetrics::default();

        self.log_stage(RecoveryStage::Start, "Recovery started", 0);

        let mut state = self.load_snapshot(genesis_owner, &mut metrics)?;
        let snapshot_seq = metrics.snapshot_sequence;

        self.log_stage(RecoveryStage::JournalOpen, "Opening journal", 0);
        let mut reader = JournalReader::open(&self.journal_dir)?;

        if snapshot_seq > 0 {
            self.log_stage(
                RecoveryStage::JournalSeek,
                &format!("Seeking to sequence {}", snapshot_seq + 1),
                0,
            );
            reader.seek_to_sequence(snapshot_seq + 1)?;
        }

        let replay_start = Instant::now();
        self.log_stage(RecoveryStage::Replay, "Starting journal replay", 0);

        while let Some(entry) = reader.next_entry()? {
            let record = entry.decode_record()?;
            state.apply(&record)?;
            metrics.replay_count += 1;
        }

        metrics.replay_time_ms = replay_start.elapsed().as_millis() as u64;
        metrics.final_sequence = state.last_event_sequence;
        metrics.corruptions = reader.corruption_log().len();

        self.log_stage(
            RecoveryStage::Replay,
            &format!(
                "Replayed {} entries in {}ms",
                metrics.replay_count, metrics.replay_time_ms
            ),
            metrics.replay_time_ms,
        );

        let final_hash = PersistedState::capture(&state).compute_hash()?;
        metrics.final_state_hash = final_hash.clone();

        if let Some(expected) = expected_hash {
            self.log_stage(RecoveryStage::Validation, "Validating state hash", 0);
            if final_hash != expected {
                return Err(RecoveryError::HashDivergence {
                    expected: expected.to_string(),
                    actual: final_hash,
                    sequence: metrics.final_sequence,
                });
            }
        }

        metrics.total_recovery_time_ms = total_start.elapsed().as_millis() as u64;

        info!(
            snapshot_sequence = snapshot_seq,
            replayed = metrics.replay_count,
            final_sequence = metrics.final_sequence,
            corruptions = metrics.corruptions,
            elapsed_ms = metrics.total_recovery_time_ms,
            "Recovery complete"
        );
        self.log_stage(
            RecoveryStage::Complete,
            &format!(
                "Recovery complete: {} events in {}ms, final seq={}",
                metrics.replay_count, metrics.total_recovery_time_ms, metrics.final_sequence
            ),
            metrics.total_recovery_time_ms,
        );

        Ok((state, metrics))
    }

    /// Snapshot `state` at its last committed event.
    pub fn take_snapshot(
        &self,
        state: &LedgerState,
        taken_at: Timestamp,
        compress: bool,
    ) -> Result<PathBuf, RecoveryError> {
        let snapshot = Snapshot::capture(state, taken_at, compress)?;
        Ok(SnapshotWriter::new(&self.snapshot_dir, compress).write(&snapshot)?)
    }

    pub fn log(&self) -> &[RecoveryLogEntry] {
        &self.log
    }

    // ── Internal ────────────────────────────────────────────────────

    fn load_snapshot(
        &mut self,
        genesis_owner: Address,
        metrics: &mut RecoveryMetrics,
    ) -> Result<LedgerState, RecoveryError> {
        self.log_stage(RecoveryStage::SnapshotSearch, "Searching for snapshots", 0);
        let start = Instant::now();

        match SnapshotLoader::new(&self.snapshot_dir).load_latest() {
            Ok(snapshot) => {
                let state = snapshot.restore()?;
                metrics.snapshot_load_time_ms = start.elapsed().as_millis() as u64;
                metrics.snapshot_sequence = snapshot.sequence;

                let short_hash = snapshot.checksum.get(..16).unwrap_or(&snapshot.checksum);
                self.log_stage(
                    RecoveryStage::SnapshotLoad,
                    &format!("Snapshot loaded: seq={}, hash={}", snapshot.sequence, short_hash),
                    metrics.snapshot_load_time_ms,
                );
                Ok(state)
            }
            Err(SnapshotError::NoSnapshots) => {
                self.log_stage(
                    RecoveryStage::SnapshotSearch,
                    "No snapshots found, starting from a fresh ledger",
                    0,
                );
                Ok(LedgerState::new(genesis_owner))
            }
            Err(e) => Err(RecoveryError::Snapshot(e)),
        }
    }

    fn log_stage(&mut self, stage: RecoveryStage, message: &str, elapsed_ms: u64) {
        self.log.push(RecoveryLogEntry {
            stage,
            message: message.to_string(),
            elapsed_ms,
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────
