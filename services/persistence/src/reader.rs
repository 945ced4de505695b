//! Journal reader with corruption detection
//!
//! - Sequential entry reading across rotated journal files
//! - CRC32C checksum validation on every read
//! - Corruption log with byte offsets
//! - Partial recovery: skip corrupted entries, keep the valid ones
//! - Seek to a sequence for replay after a snapshot
//! - Gapless sequence validation

use crate::journal::{JournalEntry, JournalError};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Checksum mismatch at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch { offset: u64, sequence: u64 },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("Sequence not monotonic: prev={prev}, current={current}")]
    NotMonotonic { prev: u64, current: u64 },
}

// ── Corruption Log ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    /// Offset across all journal files, in read order.
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptionKind {
    /// Frame intact, contents altered
    ChecksumMismatch,
    /// Frame unreadable; the rest of the file is skipped
    TruncatedEntry,
}

// ── Journal Reader ──────────────────────────────────────────────────

/// Sequential journal reader with checksum validation.
pub struct JournalReader {
    /// Journal files sorted by index.
    files: Vec<PathBuf>,
    current_file_idx: usize,
    data: Vec<u8>,
    pos: usize,
    global_offset: u64,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

impl JournalReader {
    /// Open a reader over all journal files in `dir`. A missing directory
    /// reads as an empty journal.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = Self::discover_files(dir)?;
        let mut reader = Self {
            files,
            current_file_idx: 0,
            data: Vec::new(),
            pos: 0,
            global_offset: 0,
            last_sequence: None,
            corruption_log: Vec::new(),
        };
        reader.load_current_file()?;
        Ok(reader)
    }

    /// Read the next entry, validating its checksum.
    ///
    /// Returns `None` once all files are exhausted. A checksum mismatch is
    /// returned as an error with the reader already past the bad entry.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                return Ok(None);
            }

            let offset_before = self.global_offset;
            let remaining = self.data.get(self.pos..).unwrap_or_default();
            match JournalEntry::from_bytes(remaining) {
                Ok((entry, consumed)) => {
                    self.pos += consumed;
                    self.global_offset += consumed as u64;

                    if !entry.verify_checksum() {
                        self.log_corruption(
                            offset_before,
                            CorruptionKind::ChecksumMismatch,
                            format!(
                                "CRC32C mismatch for seq={}, stored={:#010x}",
                                entry.sequence, entry.checksum
                            ),
                        );
                        return Err(ReaderError::ChecksumMismatch {
                            offset: offset_before,
                            sequence: entry.sequence,
                        });
                    }

                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Err(err) => {
                    let skipped = remaining.len();
                    self.log_corruption(
                        offset_before,
                        CorruptionKind::TruncatedEntry,
                        format!("{} bytes unreadable: {}", skipped, err),
                    );
                    self.pos = self.data.len();
                    self.global_offset += skipped as u64;
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read all entries, failing at the first sequence gap.
    pub fn read_all_validated(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        let mut expected_seq: Option<u64> = None;

        while let Some(entry) = self.next_entry()? {
            if let Some(exp) = expected_seq {
                if entry.sequence != exp {
                    return Err(ReaderError::SequenceGap {
                        expected: exp,
                        got: entry.sequence,
                    });
                }
            }
            expected_seq = Some(entry.sequence.saturating_add(1));
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Position the reader before the first entry with
    /// `sequence >= target_seq`. Returns the number of entries skipped.
    pub fn seek_to_sequence(&mut self, target_seq: u64) -> Result<u64, ReaderError> {
        let mut skipped = 0u64;
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                break;
            }

            let remaining = self.data.get(self.pos..).unwrap_or_default();
            match JournalEntry::from_bytes(remaining) {
                Ok((entry, consumed)) => {
                    if entry.sequence >= target_seq {
                        // Left in place for next_entry()
                        break;
                    }
                    self.pos += consumed;
                    self.global_offset += consumed as u64;
                    self.last_sequence = Some(entry.sequence);
                    skipped += 1;
                }
                Err(_) => {
                    // next_entry() reports it if this file is read again
                    self.global_offset += remaining.len() as u64;
                    self.pos = self.data.len();
                }
            }
        }
        Ok(skipped)
    }

    /// Read every entry that passes its checksum, skipping the rest.
    pub fn recover_entries(&mut self) -> (Vec<JournalEntry>, Vec<CorruptionRecord>) {
        let mut entries = Vec::new();

        loop {
            match self.next_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                // Already past the bad entry
                Err(ReaderError::ChecksumMismatch { .. }) => continue,
                Err(_) => break,
            }
        }

        (entries, self.corruption_log.clone())
    }

    pub fn current_offset(&self) -> u64 {
        self.global_offset
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    /// Check that entries carry gapless, increasing sequences.
    pub fn validate_sequences(entries: &[JournalEntry]) -> Result<(), ReaderError> {
        for window in entries.windows(2) {
            let (prev, curr) = (&window[0], &window[1]);

            if curr.sequence <= prev.sequence {
                return Err(ReaderError::NotMonotonic {
                    prev: prev.sequence,
                    current: curr.sequence,
                });
            }

            if curr.sequence != prev.sequence + 1 {
                return Err(ReaderError::SequenceGap {
                    expected: prev.sequence + 1,
                    got: curr.sequence,
                });
            }
        }
        Ok(())
    }

    /// Sequences in `expected_start..=expected_end` with no entry.
    pub fn find_missing_sequences(
        entries: &[JournalEntry],
        expected_start: u64,
        expected_end: u64,
    ) -> Vec<u64> {
        let present: HashSet<u64> = entries.iter().map(|e| e.sequence).collect();
        (expected_start..=expected_end)
            .filter(|s| !present.contains(s))
            .collect()
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn log_corruption(&mut self, byte_offset: u64, kind: CorruptionKind, detail: String) {
        warn!(byte_offset, kind = ?kind, detail = %detail, "Journal corruption detected");
        self.corruption_log.push(CorruptionRecord {
            byte_offset,
            kind,
            detail,
        });
    }

    fn discover_files(dir: &Path) -> Result<Vec<PathBuf>, ReaderError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let idx = name
                    .strip_prefix("journal-")?
                    .strip_suffix(".bin")?
                    .parse::<u64>()
                    .ok()?;
                Some((idx, e.path()))
            })
            .collect();

        files.sort_by_key(|(idx, _)| *idx);
        Ok(files.into_iter().map(|(_, p)| p).collect())
    }

    fn load_current_file(&mut self) -> Result<(), ReaderError> {
        self.data.clear();
        self.pos = 0;
        if let Some(path) = self.files.get(self.current_file_idx) {
            File::open(path)?.read_to_end(&mut self.data)?;
        }
        Ok(())
    }

    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        if self.current_file_idx >= self.files.len() {
            return Ok(false);
        }
        self.current_file_idx += 1;
        if self.current_file_idx < self.files.len() {
            self.load_current_file()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalConfig, JournalWriter};
    use tempfile::TempDir;

    /// Every test entry is 4 + 26 + 1 + 10 = 41 bytes on disk.
    const ENTRY_LEN: usize = 41;
    /// Offset of the payload inside one entry.
    const PAYLOAD_AT: usize = 4 + 8 + 8 + 2 + 1 + 4;

    fn entry(seq: u64) -> JournalEntry {
        JournalEntry::new(seq, 1_000 + seq, "E".into(), vec![seq as u8; 10])
    }

    fn write_test_entries(dir: &Path, count: u64) -> PathBuf {
        let mut writer = JournalWriter::open(JournalConfig::new(dir)).unwrap();
        writer.set_next_sequence(1);
        for seq in 1..=count {
            writer.append(&entry(seq)).unwrap();
        }
        writer.sync().unwrap();
        writer.current_file_path().to_path_buf()
    }

    fn flip_byte(path: &Path, at: usize) {
        let mut data = fs::read(path).unwrap();
        data[at] ^= 0xFF;
        fs::write(path, &data).unwrap();
    }

    #[test]
    fn test_sequential_read() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 50);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[49].sequence, 50);
        assert_eq!(reader.last_sequence(), Some(50));
    }

    #[test]
    fn test_checksum_validation_detects_corruption() {
        let tmp = TempDir::new().unwrap();
        let path = write_test_entries(tmp.path(), 5);
        // Second entry's payload
        flip_byte(&path, ENTRY_LEN + PAYLOAD_AT + 1);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap().sequence, 1);
        match reader.next_entry() {
            Err(ReaderError::ChecksumMismatch { offset, sequence }) => {
                assert_eq!(offset, ENTRY_LEN as u64);
                assert_eq!(sequence, 2);
            }
            other => panic!("Expected ChecksumMismatch, got: {:?}", other),
        }
    }

    #[test]
    fn test_partial_recovery_skips_corrupted() {
        let tmp = TempDir::new().unwrap();
        let path = write_test_entries(tmp.path(), 10);
        flip_byte(&path, PAYLOAD_AT);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let (entries, corruptions) = reader.recover_entries();

        assert_eq!(entries.len(), 9);
        assert_eq!(entries[0].sequence, 2);
        assert_eq!(corruptions.len(), 1);
        assert_eq!(corruptions[0].kind, CorruptionKind::ChecksumMismatch);
        assert_eq!(corruptions[0].byte_offset, 0);
    }

    #[test]
    fn test_torn_tail_is_logged_and_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = write_test_entries(tmp.path(), 3);
        let mut data = fs::read(&path).unwrap();
        data.truncate(data.len() - 5);
        fs::write(&path, &data).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(reader.corruption_log().len(), 1);
        assert_eq!(reader.corruption_log()[0].kind, CorruptionKind::TruncatedEntry);
        assert_eq!(reader.corruption_log()[0].byte_offset, 2 * ENTRY_LEN as u64);
    }

    #[test]
    fn test_offset_tracking() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 5);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.current_offset(), 0);
        reader.next_entry().unwrap();
        assert_eq!(reader.current_offset(), ENTRY_LEN as u64);
    }

    #[test]
    fn test_replay_from_sequence() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 20);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let skipped = reader.seek_to_sequence(11).unwrap();
        assert_eq!(skipped, 10);
        assert_eq!(reader.last_sequence(), Some(10));

        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.sequence, 11);
    }

    #[test]
    fn test_seek_past_end() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 4);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.seek_to_sequence(100).unwrap(), 4);
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_sequence_validation_detects_gap() {
        let entries = vec![entry(1), entry(2), entry(5)];

        match JournalReader::validate_sequences(&entries) {
            Err(ReaderError::SequenceGap { expected, got }) => {
                assert_eq!(expected, 3);
                assert_eq!(got, 5);
            }
            other => panic!("Expected SequenceGap, got: {:?}", other),
        }
        assert!(JournalReader::validate_sequences(&[entry(1), entry(2)]).is_ok());
    }

    #[test]
    fn test_not_monotonic_detection() {
        match JournalReader::validate_sequences(&[entry(5), entry(3)]) {
            Err(ReaderError::NotMonotonic { prev, current }) => {
                assert_eq!(prev, 5);
                assert_eq!(current, 3);
            }
            other => panic!("Expected NotMonotonic, got: {:?}", other),
        }
    }

    #[test]
    fn test_detect_missing_sequence() {
        let entries = vec![entry(1), entry(3), entry(5)];
        let missing = JournalReader::find_missing_sequences(&entries, 1, 5);
        assert_eq!(missing, vec![2, 4]);
    }

    #[test]
    fn test_read_all_validated() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 20);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert_eq!(reader.read_all_validated().unwrap().len(), 20);
    }

    #[test]
    fn test_missing_directory_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let mut reader = JournalReader::open(&tmp.path().join("absent")).unwrap();
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_multi_file_read() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 100,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        writer.set_next_sequence(1);
        for seq in 1..=30 {
            writer.append(&entry(seq)).unwrap();
        }
        writer.sync().unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all_validated().unwrap();
        assert_eq!(entries.len(), 30);
        assert_eq!(entries.last().unwrap().sequence, 30);
    }
}
