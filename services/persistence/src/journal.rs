//! Append-only event journal with checksums
//!
//! Every committed contract event lands here as one entry, in sequence
//! order. A snapshot plus the journal tail after it reproduces the ledger.
//!
//! # Binary Format (per entry)
//! ```text
//! [total_len: u32]
//! [sequence:  u64]
//! [timestamp: u64]   // emitted_at, unix seconds
//! [event_type_len: u16][event_type: bytes]
//! [payload_len: u32][payload: bytes]   // bincode EventRecord
//! [checksum: u32]  // CRC32C over sequence+timestamp+event_type+payload
//! ```

use crc32c::crc32c;
use procurement_contracts::{EventRecord, EventSink};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info};

/// Bodies above this are treated as corruption.
const MAX_BODY_LEN: usize = 100_000_000;

/// 8 (seq) + 8 (ts) + 2 (et_len) + 4 (pl_len) + 4 (crc)
const MIN_BODY_LEN: usize = 26;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("Journal size limit exceeded: {current} >= {limit}")]
    SizeLimitExceeded { current: u64, limit: u64 },

    #[error("Entry {entry} carries event record {record}")]
    RecordMismatch { entry: u64, record: u64 },
}

// ── Journal Entry ───────────────────────────────────────────────────

/// One persisted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Event sequence, gapless from 1
    pub sequence: u64,
    /// Contract time the event was emitted at, unix seconds
    pub timestamp: u64,
    pub event_type: String,
    /// Bincode-serialized `EventRecord`
    pub payload: Vec<u8>,
    /// CRC32C over (sequence ++ timestamp ++ event_type ++ payload)
    pub checksum: u32,
}

impl JournalEntry {
    pub fn new(sequence: u64, timestamp: u64, event_type: String, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, timestamp, &event_type, &payload);
        Self {
            sequence,
            timestamp,
            event_type,
            payload,
            checksum,
        }
    }

    /// Encode a committed contract event.
    pub fn from_record(record: &EventRecord) -> Result<Self, JournalError> {
        let payload =
            bincode::serialize(record).map_err(|e| JournalError::Serialization(e.to_string()))?;
        Ok(Self::new(
            record.sequence,
            record.emitted_at.as_unix_seconds(),
            record.event.event_type().to_string(),
            payload,
        ))
    }

    /// Decode the contract event this entry carries.
    pub fn decode_record(&self) -> Result<EventRecord, JournalError> {
        let record: EventRecord = bincode::deserialize(&self.payload)
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        if record.sequence != self.sequence {
            return Err(JournalError::RecordMismatch {
                entry: self.sequence,
                record: record.sequence,
            });
        }
        Ok(record)
    }

    pub fn compute_checksum(sequence: u64, timestamp: u64, event_type: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(8 + 8 + event_type.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(event_type.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        let expected =
            Self::compute_checksum(self.sequence, self.timestamp, &self.event_type, &self.payload);
        self.checksum == expected
    }

    /// Serialize entry to the binary wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, JournalError> {
        let event_type_bytes = self.event_type.as_bytes();
        let event_type_len = u16::try_from(event_type_bytes.len()).map_err(|_| {
            JournalError::Serialization(format!("event type too long: {}", event_type_bytes.len()))
        })?;
        let payload_len = u32::try_from(self.payload.len()).map_err(|_| {
            JournalError::Serialization(format!("payload too long: {}", self.payload.len()))
        })?;

        let body_len = MIN_BODY_LEN + event_type_bytes.len() + self.payload.len();
        if body_len > MAX_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "entry body of {} bytes exceeds {}",
                body_len, MAX_BODY_LEN
            )));
        }

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&event_type_len.to_le_bytes());
        buf.extend_from_slice(event_type_bytes);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        Ok(buf)
    }

    /// Deserialize entry from the binary wire format.
    ///
    /// Returns `(entry, bytes_consumed)`. Corrupted data yields an error,
    /// never a panic.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let body_len = u32::from_le_bytes(take::<4>(data, 0, "length prefix")?) as usize;

        if body_len > MAX_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "Implausible body length: {} (likely corruption)",
                body_len
            )));
        }

        let total = 4 + body_len;
        let body = data.get(4..total).ok_or_else(|| {
            JournalError::Serialization(format!(
                "Incomplete entry: need {} bytes, have {}",
                total,
                data.len()
            ))
        })?;

        if body_len < MIN_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "Body too small: {} bytes, minimum is {}",
                body_len, MIN_BODY_LEN
            )));
        }

        let mut pos = 0;
        let sequence = u64::from_le_bytes(take::<8>(body, pos, "sequence")?);
        pos += 8;
        let timestamp = u64::from_le_bytes(take::<8>(body, pos, "timestamp")?);
        pos += 8;

        let event_type_len = u16::from_le_bytes(take::<2>(body, pos, "event type length")?) as usize;
        pos += 2;
        let event_type_bytes = slice(body, pos, event_type_len, "event type")?;
        let event_type = String::from_utf8(event_type_bytes.to_vec())
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        pos += event_type_len;

        let payload_len = u32::from_le_bytes(take::<4>(body, pos, "payload length")?) as usize;
        pos += 4;
        let payload = slice(body, pos, payload_len, "payload")?.to_vec();
        pos += payload_len;

        let checksum = u32::from_le_bytes(take::<4>(body, pos, "checksum")?);

        let entry = Self {
            sequence,
            timestamp,
            event_type,
            payload,
            checksum,
        };
        Ok((entry, total))
    }
}

fn slice<'a>(data: &'a [u8], pos: usize, len: usize, what: &str) -> Result<&'a [u8], JournalError> {
    pos.checked_add(len)
        .and_then(|end| data.get(pos..end))
        .ok_or_else(|| {
            JournalError::Serialization(format!(
                "{} of {} bytes exceeds remaining data ({} bytes)",
                what,
                len,
                data.len().saturating_sub(pos)
            ))
        })
}

fn take<const N: usize>(data: &[u8], pos: usize, what: &str) -> Result<[u8; N], JournalError> {
    let bytes = slice(data, pos, N, what)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// Controls when buffered data is flushed to OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    EveryWrite,
    EveryN(usize),
}

/// Controls when `fsync` (durable write) is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
    /// Only on file rotation and explicit `sync`
    OnRotation,
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Rotate once the current file reaches this size (default 64 MiB).
    pub max_file_size: u64,
    /// Maximum total journal size in bytes (0 = unlimited).
    pub max_total_size: u64,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer with checksums, rotation, and fsync control.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    /// 0 until the first append or `set_next_sequence`.
    next_sequence: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
    file_index: u64,
    total_size: u64,
}

impl JournalWriter {
    /// Open the latest journal file for appending, creating the directory
    /// if needed.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = Self::find_latest_index(&config.dir);
        let current_file = Self::journal_path(&config.dir, file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;

        let current_file_size = file.metadata()?.len();
        let total_size = Self::compute_total_size(&config.dir)?;

        debug!(path = %current_file.display(), total_size, "Journal opened");
        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            next_sequence: 0,
            writes_since_flush: 0,
            writes_since_fsync: 0,
            file_index,
            total_size,
        })
    }

    /// Set the next expected sequence number (used after recovery).
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    /// Append a journal entry. Sequences must be contiguous.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if self.next_sequence > 0 && entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }

        if self.config.max_total_size > 0 && self.total_size >= self.config.max_total_size {
            return Err(JournalError::SizeLimitExceeded {
                current: self.total_size,
                limit: self.config.max_total_size,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let bytes = entry.to_bytes()?;
        self.writer.write_all(&bytes)?;

        let written = bytes.len() as u64;
        self.current_file_size += written;
        self.total_size += written;
        self.next_sequence = entry.sequence.saturating_add(1);
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;

        Ok(())
    }

    /// Encode and append one committed contract event.
    pub fn append_record(&mut self, record: &EventRecord) -> Result<JournalEntry, JournalError> {
        let entry = JournalEntry::from_record(record)?;
        self.append(&entry)?;
        Ok(entry)
    }

    /// Force flush + fsync (used before shutdown / rotation).
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn apply_flush_policy(&mut self) -> Result<(), JournalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            // Flush first so fsync covers the buffered bytes
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;

        self.file_index += 1;
        self.current_file = Self::journal_path(&self.config.dir, self.file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;

        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        info!(path = %self.current_file.display(), "Journal rotated");
        Ok(())
    }

    pub(crate) fn journal_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("journal-{:06}.bin", index))
    }

    fn find_latest_index(dir: &Path) -> u64 {
        fs::read_dir(dir)
            .ok()
            .and_then(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        name.strip_prefix("journal-")?
                            .strip_suffix(".bin")?
                            .parse::<u64>()
                            .ok()
                    })
                    .max()
            })
            .unwrap_or(0)
    }

    fn compute_total_size(dir: &Path) -> Result<u64, JournalError> {
        let mut total = 0u64;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }
}

// ── Journal Sink ────────────────────────────────────────────────────

struct SinkInner {
    writer: JournalWriter,
    appended: u64,
    last_error: Option<String>,
}

/// Event subscriber that journals every committed contract event.
///
/// Clones share one writer, so a handle can stay with the caller after
/// another is handed to `Procurement::subscribe`. Append failures cannot
/// propagate through the contract; the sink logs them and keeps the first
/// one for the caller to inspect.
#[derive(Clone)]
pub struct JournalSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl JournalSink {
    pub fn new(writer: JournalWriter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                writer,
                appended: 0,
                last_error: None,
            })),
        }
    }

    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        Ok(Self::new(JournalWriter::open(config)?))
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entries written through this sink.
    pub fn appended(&self) -> u64 {
        self.lock().appended
    }

    /// First append failure, if any. Events after it are not journaled.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn sync(&self) -> Result<(), JournalError> {
        self.lock().writer.sync()
    }
}

impl EventSink for JournalSink {
    fn on_event(&mut self, record: &EventRecord) {
        let mut inner = self.lock();
        if inner.last_error.is_some() {
            return;
        }
        match inner.writer.append_record(record) {
            Ok(_) => inner.appended += 1,
            Err(err) => {
                error!(
                    sequence = record.sequence,
                    event_type = record.event.event_type(),
                    error = %err,
                    "Journal append failed"
                );
                inner.last_error = Some(err.to_string());
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
