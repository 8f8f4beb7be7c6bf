//! Durable audit log for published events.
//!
//! Frame layout on disk:
//! ```text
//! ┌──────────┬──────────────────────────────────────────┐
//! │ len: u32 │ AuditFrame (bincode)                     │
//! │          │   sequence: u64                          │
//! │          │   checksum: u32 (FNV-1a over payload)    │
//! │          │   payload: LZ4(bincode(EventRecord))     │
//! └──────────┴──────────────────────────────────────────┘
//! ```
//!
//! Append is write-ahead with respect to dispatch: the bus awaits the
//! append before any handler sees the record. Replay verifies checksums
//! and skips corrupt frames; a torn tail (partial final frame from a
//! crash) ends replay without failing it.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::event::EventRecord;

/// Audit log errors.
#[derive(Debug, Clone)]
pub enum AuditError {
    Io(String),
    Serialization(String),
    ChecksumMismatch { sequence: u64 },
    Closed,
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Audit log I/O error: {e}"),
            Self::Serialization(e) => write!(f, "Audit log serialization error: {e}"),
            Self::ChecksumMismatch { sequence } => {
                write!(f, "Audit log checksum mismatch at sequence {sequence}")
            }
            Self::Closed => write!(f, "Audit log is closed"),
        }
    }
}

impl std::error::Error for AuditError {}

/// Append-only event persistence. The bus writes here before dispatch.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Durably append one record; returns the assigned sequence number.
    async fn append(&self, record: &EventRecord) -> Result<u64, AuditError>;
}

/// One on-disk frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuditFrame {
    sequence: u64,
    checksum: u32,
    payload: Vec<u8>,
}

impl AuditFrame {
    fn new(sequence: u64, record: &EventRecord) -> Result<Self, AuditError> {
        let raw = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        let payload = lz4_flex::compress_prepend_size(&raw);
        let checksum = fnv1a(sequence, &payload);
        Ok(Self {
            sequence,
            checksum,
            payload,
        })
    }

    fn verify(&self) -> bool {
        self.checksum == fnv1a(self.sequence, &self.payload)
    }

    fn into_record(self) -> Result<EventRecord, AuditError> {
        if !self.verify() {
            return Err(AuditError::ChecksumMismatch {
                sequence: self.sequence,
            });
        }
        let raw = lz4_flex::decompress_size_prepended(&self.payload)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        let (record, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        Ok(record)
    }

    fn encode(&self) -> Result<Vec<u8>, AuditError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| AuditError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, AuditError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| AuditError::Serialization(e.to_string()))?;
        Ok(frame)
    }
}

/// FNV-1a over the sequence number and payload bytes.
fn fnv1a(sequence: u64, payload: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in sequence.to_le_bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    for byte in payload {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// In-memory audit log for tests.
pub struct MemoryAuditLog {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub async fn records(&self) -> Vec<EventRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: &EventRecord) -> Result<u64, AuditError> {
        let mut records = self.records.lock().await;
        records.push(record.clone());
        Ok(records.len() as u64 - 1)
    }
}

struct FileAuditInner {
    writer: BufWriter<File>,
    next_sequence: u64,
}

/// File-backed audit log with length-prefixed, checksummed frames.
pub struct FileAuditLog {
    path: PathBuf,
    inner: Mutex<FileAuditInner>,
}

impl FileAuditLog {
    /// Open (or create) the log at `path` and seek past existing frames.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        let next_sequence = match Self::scan(&path) {
            Ok(scan) => scan.next_sequence,
            Err(_) => 0, // fresh file
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuditError::Io(e.to_string()))?;
        Ok(Self {
            path,
            inner: Mutex::new(FileAuditInner {
                writer: BufWriter::new(file),
                next_sequence,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay every valid record, in append order.
    ///
    /// Returns the records and the number of corrupt frames skipped. A
    /// truncated final frame ends the scan without being counted as data
    /// loss beyond itself.
    pub async fn replay(&self) -> Result<(Vec<EventRecord>, usize), AuditError> {
        // Make buffered frames visible before reading the file back.
        {
            let mut inner = self.inner.lock().await;
            inner
                .writer
                .flush()
                .map_err(|e| AuditError::Io(e.to_string()))?;
        }
        let scan = Self::scan(&self.path)?;
        Ok((scan.records, scan.corrupted))
    }

    fn scan(path: &Path) -> Result<ReplayScan, AuditError> {
        let mut file = File::open(path).map_err(|e| AuditError::Io(e.to_string()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| AuditError::Io(e.to_string()))?;

        let mut scan = ReplayScan::default();
        let mut frames = 0u64;
        let mut offset = 0usize;

        while offset + 4 <= bytes.len() {
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&bytes[offset..offset + 4]);
            let len = u32::from_le_bytes(len_bytes) as usize;
            offset += 4;

            if offset + len > bytes.len() {
                // Torn tail from a crash mid-write.
                scan.corrupted += 1;
                break;
            }
            frames += 1;

            match AuditFrame::decode(&bytes[offset..offset + len]) {
                Ok(frame) => {
                    // A corrupt frame still burns its sequence number.
                    scan.next_sequence = scan.next_sequence.max(frame.sequence + 1);
                    match frame.into_record() {
                        Ok(record) => scan.records.push(record),
                        Err(e) => {
                            log::warn!("Skipping corrupt audit frame at offset {offset}: {e}");
                            scan.corrupted += 1;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Skipping undecodable audit frame at offset {offset}: {e}");
                    scan.corrupted += 1;
                }
            }
            offset += len;
        }

        // Undecodable frames carry no readable sequence; the frame count
        // bounds it (sequences are assigned densely from zero).
        scan.next_sequence = scan.next_sequence.max(frames);
        Ok(scan)
    }
}

#[derive(Default)]
struct ReplayScan {
    records: Vec<EventRecord>,
    corrupted: usize,
    next_sequence: u64,
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(&self, record: &EventRecord) -> Result<u64, AuditError> {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;

        let frame = AuditFrame::new(sequence, record)?;
        let encoded = frame.encode()?;
        inner
            .writer
            .write_all(&(encoded.len() as u32).to_le_bytes())
            .map_err(|e| AuditError::Io(e.to_string()))?;
        inner
            .writer
            .write_all(&encoded)
            .map_err(|e| AuditError::Io(e.to_string()))?;
        inner
            .writer
            .flush()
            .map_err(|e| AuditError::Io(e.to_string()))?;

        inner.next_sequence += 1;
        Ok(sequence)
    }
}
