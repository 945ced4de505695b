//! Ledger snapshots with integrity and compression
//!
//! - Full ledger state in its persisted layout (`PersistedState`)
//! - SHA-256 integrity hash over the serialized state
//! - Optional zstd compression
//! - Snapshot versioning for forward compatibility
//! - Interval policy (every N events) and cleanup policy (keep last N)

use procurement_contracts::LedgerState;
use procurement_types::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::state::PersistedState;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("No snapshots found")]
    NoSnapshots,

    #[error("Snapshot state is inconsistent: {0}")]
    InvalidState(String),
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The ledger as of one committed event sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Last event folded into `state`; replay resumes after it.
    pub sequence: u64,
    pub taken_at: Timestamp,
    pub state: PersistedState,
    /// SHA-256 of the serialized state.
    pub checksum: String,
    /// Whether the data on disk is zstd-compressed.
    pub compressed: bool,
}

impl Snapshot {
    pub fn new(
        sequence: u64,
        taken_at: Timestamp,
        state: PersistedState,
        compressed: bool,
    ) -> Result<Self, SnapshotError> {
        let checksum = state.compute_hash()?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            sequence,
            taken_at,
            state,
            checksum,
            compressed,
        })
    }

    /// Snapshot a live ledger at its last committed event.
    pub fn capture(
        ledger: &LedgerState,
        taken_at: Timestamp,
        compressed: bool,
    ) -> Result<Self, SnapshotError> {
        Self::new(
            ledger.last_event_sequence,
            taken_at,
            PersistedState::capture(ledger),
            compressed,
        )
    }

    pub fn verify_integrity(&self) -> Result<bool, SnapshotError> {
        Ok(self.checksum == self.state.compute_hash()?)
    }

    /// Rebuild the live ledger. The stored sequence must agree with the
    /// state's own event counter.
    pub fn restore(&self) -> Result<LedgerState, SnapshotError> {
        if self.sequence != self.state.last_event_sequence {
            return Err(SnapshotError::InvalidState(format!(
                "snapshot sequence {} but state at {}",
                self.sequence, self.state.last_event_sequence
            )));
        }
        self.state.restore()
    }
}

// ── Snapshot Writer ─────────────────────────────────────────────────

/// Writes snapshots to disk with optional zstd compression.
pub struct SnapshotWriter {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    /// Write a snapshot atomically: serialize, compress, write tmp, fsync, rename.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let data = bincode::serialize(snapshot)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (final_data, ext) = if self.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "snap.zst")
        } else {
            (data, "snap")
        };

        let filename = format!("snapshot-{:012}.{}", snapshot.sequence, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&final_data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        info!(
            sequence = snapshot.sequence,
            tenders = snapshot.state.tenders.len(),
            bytes = final_data.len(),
            path = %path.display(),
            "Snapshot written"
        );
        Ok(path)
    }
}

// ── Snapshot Loader ─────────────────────────────────────────────────

/// Loads snapshots from disk, verifying integrity.
pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self, path: &Path) -> Result<Snapshot, SnapshotError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let is_compressed = path.extension().map(|e| e == "zst").unwrap_or(false);

        let decompressed = if is_compressed {
            zstd::decode_all(data.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };

        let snapshot: Snapshot = bincode::deserialize(&decompressed)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }

        let actual = snapshot.state.compute_hash()?;
        if snapshot.checksum != actual {
            return Err(SnapshotError::IntegrityFailure {
                expected: snapshot.checksum.clone(),
                actual,
            });
        }

        debug!(sequence = snapshot.sequence, path = %path.display(), "Snapshot loaded");
        Ok(snapshot)
    }

    /// Load the snapshot with the highest sequence number.
    pub fn load_latest(&self) -> Result<Snapshot, SnapshotError> {
        let path = self.find_latest()?;
        self.load(&path)
    }

    pub fn find_latest(&self) -> Result<PathBuf, SnapshotError> {
        self.list_snapshots()?
            .into_iter()
            .max_by_key(|(seq, _)| *seq)
            .map(|(_, path)| path)
            .ok_or(SnapshotError::NoSnapshots)
    }

    /// All snapshots as (sequence, path) pairs, ascending.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("snapshot-")
                && (name.ends_with(".snap") || name.ends_with(".snap.zst"))
            {
                if let Some(seq) = Self::parse_sequence(&name) {
                    results.push((seq, entry.path()));
                }
            }
        }
        results.sort_by_key(|(seq, _)| *seq);
        Ok(results)
    }

    fn parse_sequence(filename: &str) -> Option<u64> {
        filename
            .strip_prefix("snapshot-")?
            .trim_end_matches(".snap.zst")
            .trim_end_matches(".snap")
            .parse::<u64>()
            .ok()
    }
}

// ── Snapshot Interval Policy ────────────────────────────────────────

/// Decides when to take a new snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotIntervalPolicy {
    /// Snapshot every N events.
    pub event_interval: u64,
    pub last_snapshot_seq: u64,
}

impl SnapshotIntervalPolicy {
    /// Every 10,000 events. Tender ledgers see far fewer events than a
    /// trading engine.
    pub fn default_policy() -> Self {
        Self::with_interval(10_000)
    }

    pub fn with_interval(interval: u64) -> Self {
        Self {
            event_interval: interval,
            last_snapshot_seq: 0,
        }
    }

    pub fn should_snapshot(&self, current_seq: u64) -> bool {
        current_seq >= self.last_snapshot_seq.saturating_add(self.event_interval)
    }

    pub fn record_snapshot(&mut self, seq: u64) {
        self.last_snapshot_seq = seq;
    }
}

// ── Snapshot Cleanup Policy ─────────────────────────────────────────

/// Keeps only the most recent snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotCleanupPolicy {
    pub max_snapshots: usize,
}

impl SnapshotCleanupPolicy {
    pub fn new(max_snapshots: usize) -> Self {
        Self { max_snapshots }
    }

    /// Remove old snapshots, returning the removed paths.
    pub fn cleanup(&self, dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
        let snapshots = SnapshotLoader::new(dir).list_snapshots()?;

        let mut removed = Vec::new();
        let to_remove = snapshots.len().saturating_sub(self.max_snapshots);
        for (_, path) in snapshots.into_iter().take(to_remove) {
            fs::remove_file(&path)?;
            removed.push(path);
        }
        Ok(removed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{busy_contract, owner};
    use procurement_types::amount::Amount;
    use procurement_types::ids::TenderId;
    use procurement_types::time::ManualClock;
    use tempfile::TempDir;

    fn sample_state() -> (LedgerState, Timestamp) {
        let clock = ManualClock::new(Timestamp::from_unix_seconds(1_000));
        let c = busy_contract(&clock);
        (c.state().clone(), c.now())
    }

    #[test]
    fn test_snapshot_write_and_load_uncompressed() {
        let tmp = TempDir::new().unwrap();
        let (ledger, now) = sample_state();
        let snapshot = Snapshot::capture(&ledger, now, false).unwrap();

        let path = SnapshotWriter::new(tmp.path(), false).write(&snapshot).unwrap();
        let loaded = SnapshotLoader::new(tmp.path()).load(&path).unwrap();

        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.sequence, ledger.last_event_sequence);
        assert_eq!(loaded.taken_at, now);
        assert_eq!(loaded.restore().unwrap(), ledger);
    }

    #[test]
    fn test_snapshot_write_and_load_compressed() {
        let tmp = TempDir::new().unwrap();
        let (ledger, now) = sample_state();
        let snapshot = Snapshot::capture(&ledger, now, true).unwrap();

        let path = SnapshotWriter::new(tmp.path(), true).write(&snapshot).unwrap();
        assert!(path.to_string_lossy().ends_with(".snap.zst"));

        let loaded = SnapshotLoader::new(tmp.path()).load(&path).unwrap();
        assert_eq!(loaded.restore().unwrap(), ledger);
        assert!(loaded.verify_integrity().unwrap());
    }

    #[test]
    fn test_snapshot_integrity_detects_tamper() {
        let (ledger, now) = sample_state();
        let mut snapshot = Snapshot::capture(&ledger, now, false).unwrap();
        // Inflate the escrow after hashing
        snapshot.state.escrow = Amount::new(1_000_000);
        assert!(!snapshot.verify_integrity().unwrap());
    }

    #[test]
    fn test_tampered_file_rejected_on_load() {
        let tmp = TempDir::new().unwrap();
        let (ledger, now) = sample_state();
        let mut snapshot = Snapshot::capture(&ledger, now, false).unwrap();
        snapshot.state.escrow = Amount::new(1_000_000);
        let path = SnapshotWriter::new(tmp.path(), false).write(&snapshot).unwrap();

        assert!(matches!(
            SnapshotLoader::new(tmp.path()).load(&path),
            Err(SnapshotError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn test_restore_rejects_sequence_mismatch() {
        let (ledger, now) = sample_state();
        let mut snapshot = Snapshot::capture(&ledger, now, false).unwrap();
        snapshot.sequence += 1;
        assert!(matches!(
            snapshot.restore(),
            Err(SnapshotError::InvalidState(_))
        ));
    }

    #[test]
    fn test_empty_ledger_snapshot() {
        let ledger = LedgerState::new(owner());
        let snapshot = Snapshot::capture(&ledger, Timestamp::from_unix_seconds(5), false).unwrap();
        assert_eq!(snapshot.sequence, 0);
        assert_eq!(snapshot.state.tender_counter, TenderId::new(1));
        assert_eq!(snapshot.restore().unwrap(), ledger);
    }

    #[test]
    fn test_snapshot_interval_policy() {
        let mut policy = SnapshotIntervalPolicy::with_interval(100);
        assert!(!policy.should_snapshot(50));
        assert!(policy.should_snapshot(100));
        assert!(policy.should_snapshot(200));

        policy.record_snapshot(100);
        assert!(!policy.should_snapshot(150));
        assert!(policy.should_snapshot(200));
    }

    #[test]
    fn test_snapshot_interval_default() {
        let policy = SnapshotIntervalPolicy::default_policy();
        assert_eq!(policy.event_interval, 10_000);
    }

    #[test]
    fn test_snapshot_cleanup_policy() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), false);
        let mut ledger = LedgerState::new(owner());

        for i in 1..=5u64 {
            ledger.last_event_sequence = i * 1000;
            let snap = Snapshot::capture(&ledger, Timestamp::from_unix_seconds(i), false).unwrap();
            writer.write(&snap).unwrap();
        }

        let removed = SnapshotCleanupPolicy::new(2).cleanup(tmp.path()).unwrap();
        assert_eq!(removed.len(), 3, "Should remove 3 of 5 snapshots");

        let remaining = SnapshotLoader::new(tmp.path()).list_snapshots().unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].0, 4000);
        assert_eq!(remaining[1].0, 5000);
    }

    #[test]
    fn test_load_latest_snapshot() {
        let tmp = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(tmp.path(), false);
        let mut ledger = LedgerState::new(owner());

        for i in [100u64, 500, 300] {
            ledger.last_event_sequence = i;
            let snap = Snapshot::capture(&ledger, Timestamp::from_unix_seconds(i), false).unwrap();
            writer.write(&snap).unwrap();
        }

        let latest = SnapshotLoader::new(tmp.path()).load_latest().unwrap();
        assert_eq!(latest.sequence, 500);
    }

    #[test]
    fn test_no_snapshots_returns_error() {
        let tmp = TempDir::new().unwrap();
        let loader = SnapshotLoader::new(tmp.path());
        assert!(matches!(
            loader.load_latest(),
            Err(SnapshotError::NoSnapshots)
        ));
    }
}
