//! Ledger persistence
//!
//! A [`LedgerStore`] receives every entry right before the in-memory ledger
//! accepts it, and can hand the full history back for replay. Stores only
//! ever append. Next to the entries a store keeps the deploy-nonce
//! watermark, so identities handed out before initialization survive a
//! restart.

use crate::entry::LedgerEntry;
use crate::error::StoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Append-only backing storage for a [`crate::CreationLedger`]
#[cfg_attr(test, mockall::automock)]
pub trait LedgerStore: Send + Sync {
    /// Durably record `entry`
    ///
    /// # Errors
    /// Any failure means the entry must be treated as never written.
    fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Every stored entry, in append order
    ///
    /// # Errors
    /// Returns an error if the history cannot be read back.
    fn load(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Durably record that every deploy nonce below `next` was handed out
    ///
    /// # Errors
    /// Any failure means the previous watermark still stands.
    fn reserve(&self, next: u64) -> Result<(), StoreError>;

    /// Watermark last recorded by [`LedgerStore::reserve`], `0` if none
    ///
    /// # Errors
    /// Returns an error if the watermark cannot be read back.
    fn reserved(&self) -> Result<u64, StoreError>;
}

/// Volatile store, the default for in-process ledgers
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<LedgerEntry>>,
    watermark: Mutex<u64>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`, as if they had been appended
    #[must_use]
    pub fn with_entries(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            watermark: Mutex::new(0),
        }
    }
}

impl LedgerStore for MemoryStore {
    fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    fn reserve(&self, next: u64) -> Result<(), StoreError> {
        let mut watermark = self.watermark.lock();
        *watermark = (*watermark).max(next);
        Ok(())
    }

    fn reserved(&self) -> Result<u64, StoreError> {
        Ok(*self.watermark.lock())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Watermark {
    next_nonce: u64,
}

/// One JSON object per line, written and synced on every append
///
/// The watermark lives beside the ledger in `<path>.nonce` and is replaced
/// atomically.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    watermark_path: PathBuf,
    file: Mutex<File>,
    read_only: bool,
}

impl JsonLinesStore {
    /// Open (or create) the file at `path`
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the file cannot be opened for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        Ok(Self::with_file(path, file, false))
    }

    /// Open an existing file for reading only
    ///
    /// Appends and reservations fail with [`StoreError::Unavailable`].
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the file does not exist or cannot be
    /// read.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(Self::with_file(path, file, true))
    }

    fn with_file(path: PathBuf, file: File, read_only: bool) -> Self {
        let mut watermark = path.clone().into_os_string();
        watermark.push(".nonce");
        Self {
            path,
            watermark_path: PathBuf::from(watermark),
            file: Mutex::new(file),
            read_only,
        }
    }

    /// Backing file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File holding the deploy-nonce watermark
    #[inline]
    #[must_use]
    pub fn watermark_path(&self) -> &Path {
        &self.watermark_path
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::Unavailable(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl LedgerStore for JsonLinesStore {
    fn append(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let mut line = serde_json::to_vec(entry).map_err(|source| StoreError::Encode {
            sequence: entry.sequence,
            source,
        })?;
        line.push(b'\n');

        let mut file = self.file.lock();
        append_line(&mut *file, &line).map_err(|e| StoreError::io(&self.path, e))?;

        tracing::trace!(sequence = entry.sequence, path = %self.path.display(), "ledger entry persisted");
        Ok(())
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let file = File::open(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let mut entries = Vec::new();

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|source| StoreError::Decode {
                line: index + 1,
                source,
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    fn reserve(&self, next: u64) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let body = serde_json::to_vec(&Watermark { next_nonce: next }).map_err(|source| {
            StoreError::Watermark {
                path: self.watermark_path.clone(),
                source,
            }
        })?;

        let _file = self.file.lock();
        let mut staging = self.watermark_path.clone().into_os_string();
        staging.push(".tmp");
        replace_file(&self.watermark_path, Path::new(&staging), &body)
            .map_err(|e| StoreError::io(&self.watermark_path, e))?;

        tracing::trace!(next_nonce = next, path = %self.watermark_path.display(), "nonce watermark persisted");
        Ok(())
    }

    fn reserved(&self) -> Result<u64, StoreError> {
        match fs::read(&self.watermark_path) {
            Ok(bytes) => serde_json::from_slice::<Watermark>(&bytes)
                .map(|w| w.next_nonce)
                .map_err(|source| StoreError::Watermark {
                    path: self.watermark_path.clone(),
                    source,
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StoreError::io(&self.watermark_path, e)),
        }
    }
}

/// Append target that can be cut back to an earlier length
trait LineSink: Write {
    fn written_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LineSink for File {
    fn written_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write `line` in full or cut the sink back to where it was
fn append_line<S: LineSink>(sink: &mut S, line: &[u8]) -> io::Result<()> {
    let start = sink.written_len()?;
    let written = sink
        .write_all(line)
        .and_then(|()| sink.flush())
        .and_then(|()| sink.sync());

    if let Err(err) = written {
        if let Err(rollback) = sink.truncate_to(start) {
            tracing::warn!(error = %rollback, "partial ledger line could not be rolled back");
        }
        return Err(err);
    }
    Ok(())
}

fn replace_file(target: &Path, staging: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = File::create(staging)?;
    file.write_all(body)?;
    file.sync_all()?;
    fs::rename(staging, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{NewEntry, GENESIS_HASH};
    use chrono::Utc;
    use clonefab_types::{Identity, ParamSet};

    fn entry(sequence: u64) -> LedgerEntry {
        LedgerEntry::seal(
            sequence,
            NewEntry {
                instance: Identity::derive(&Identity::named("deployer"), sequence),
                creator: Identity::named("alice"),
                params: ParamSet::new("Token", "TKN"),
                deploy_nonce: sequence,
            },
            Utc::now(),
            GENESIS_HASH,
        )
    }

    #[test]
    fn memory_store_keeps_order() {
        let store = MemoryStore::new();
        store.append(&entry(0)).unwrap();
        store.append(&entry(1)).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].sequence, 0);
        assert_eq!(loaded[1].sequence, 1);
    }

    #[test]
    fn json_lines_store_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let written = vec![entry(0), entry(1)];
        let store = JsonLinesStore::open(&path).unwrap();
        for e in &written {
            store.append(e).unwrap();
        }
        drop(store);

        let reopened = JsonLinesStore::open(&path).unwrap();
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded, written);
        assert!(loaded.iter().all(LedgerEntry::hash_is_valid));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn json_lines_store_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let line = serde_json::to_string(&entry(0)).unwrap();
        std::fs::write(&path, format!("{line}\n\n")).unwrap();

        let store = JsonLinesStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn json_lines_store_reports_bad_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let line = serde_json::to_string(&entry(0)).unwrap();
        std::fs::write(&path, format!("{line}\nnot json\n")).unwrap();

        let store = JsonLinesStore::open(&path).unwrap();
        let err = store.load().unwrap_err();
        assert!(matches!(err, StoreError::Decode { line: 2, .. }));
    }

    /// Sink that accepts `budget` bytes and then fails every write
    struct ShortSink {
        bytes: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("no space left"));
            }
            let n = buf.len().min(self.budget);
            self.bytes.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LineSink for ShortSink {
        fn written_len(&self) -> io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_line_is_rolled_back_before_next_append() {
        let mut sink = ShortSink {
            bytes: b"first\n".to_vec(),
            budget: 4,
        };

        assert!(append_line(&mut sink, b"rejected entry\n").is_err());
        assert_eq!(sink.bytes, b"first\n");

        sink.budget = usize::MAX;
        append_line(&mut sink, b"second\n").unwrap();
        assert_eq!(sink.bytes, b"first\nsecond\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn append_to_full_device_fails_with_io() {
        let store = JsonLinesStore::open("/dev/full").unwrap();
        let err = store.append(&entry(0)).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        let err = store.append(&entry(0)).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn open_existing_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");

        let err = JsonLinesStore::open_existing(&path).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn read_only_store_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        JsonLinesStore::open(&path).unwrap().append(&entry(0)).unwrap();

        let store = JsonLinesStore::open_existing(&path).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
        assert!(matches!(store.append(&entry(1)), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.reserve(3), Err(StoreError::Unavailable(_))));
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn watermark_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        let store = JsonLinesStore::open(&path).unwrap();
        assert_eq!(store.reserved().unwrap(), 0);
        store.reserve(4).unwrap();
        store.reserve(7).unwrap();
        drop(store);

        let reopened = JsonLinesStore::open(&path).unwrap();
        assert_eq!(reopened.reserved().unwrap(), 7);
        assert_eq!(reopened.watermark_path(), dir.path().join("ledger.jsonl.nonce"));
        assert!(reopened.load().unwrap().is_empty());
    }

    #[test]
    fn garbled_watermark_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let store = JsonLinesStore::open(&path).unwrap();
        std::fs::write(store.watermark_path(), "seven").unwrap();

        assert!(matches!(store.reserved(), Err(StoreError::Watermark { .. })));
    }

    #[test]
    fn memory_watermark_only_moves_forward() {
        let store = MemoryStore::new();
        store.reserve(5).unwrap();
        store.reserve(2).unwrap();
        assert_eq!(store.reserved().unwrap(), 5);
    }
}
