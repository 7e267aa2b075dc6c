//! File-based record store.

use crate::error::{StoreError, StoreResult};
use crate::traits::{check_upsert, next_timestamp, scan_order, validate, RecordStore, UpsertOutcome};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tally_protocol::{RecordId, SyncableRecord, Timestamp};
use tracing::{debug, warn};

/// A file-based record store.
///
/// Every accepted write is appended to a JSON-lines log; on open the log is
/// replayed and the newest version of each id wins. Compaction rewrites the
/// log with one line per surviving record.
///
/// # Durability
///
/// - Each write is flushed to the OS before `upsert` returns
/// - [`FileStore::sync`] calls `File::sync_all()` to ensure data is on disk
/// - Compaction writes a temporary file and renames it over the log
///
/// # Recovery
///
/// A torn final line (a crash mid-append) is dropped with a warning, whatever
/// bytes it ends in. A malformed line anywhere else is reported as
/// [`StoreError::Corrupted`]. An append that fails part way is cut back off
/// the log before the error is returned.
///
/// # Example
///
/// ```no_run
/// use tally_protocol::LedgerRecord;
/// use tally_store::{FileStore, RecordStore};
/// use std::path::Path;
///
/// let store = FileStore::<LedgerRecord>::open(Path::new("ledger.jsonl")).unwrap();
/// println!("{} records", store.len().unwrap());
/// ```
#[derive(Debug)]
pub struct FileStore<R> {
    path: PathBuf,
    inner: Mutex<Inner<R>>,
}

#[derive(Debug)]
struct Inner<R> {
    records: HashMap<RecordId, R>,
    log: BufWriter<File>,
    /// Lines in the log, including superseded versions.
    log_lines: usize,
    /// Length of the log up to its last complete line.
    log_bytes: u64,
    /// Set when a failed append could not be cut back off the log.
    needs_rewrite: bool,
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl<R> Inner<R> {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        {
            if let Some(keep) = self.fail_after.take() {
                self.log.write_all(&line[..keep.min(line.len())])?;
                self.log.flush()?;
                return Err(io::Error::other("injected write failure"));
            }
        }
        self.log.write_all(line)?;
        self.log.flush()
    }
}

impl<R: SyncableRecord> FileStore<R> {
    /// Opens or creates a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or holds corrupted lines.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let (records, log_lines, torn) = Self::replay(path)?;
        let log = OpenOptions::new().create(true).append(true).open(path)?;
        let log_bytes = log.metadata()?.len();

        debug!(path = %path.display(), records = records.len(), log_lines, "opened record store");

        let store = Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                records,
                log: BufWriter::new(log),
                log_lines,
                log_bytes,
                needs_rewrite: false,
                #[cfg(test)]
                fail_after: None,
            }),
        };
        if torn {
            // Appending after a partial line would corrupt the next record.
            store.compact()?;
        }
        Ok(store)
    }

    /// Opens or creates a store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of lines in the log, superseded versions included.
    pub fn log_lines(&self) -> usize {
        self.inner.lock().log_lines
    }

    /// Syncs the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    pub fn sync(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.log.flush()?;
        inner.log.get_ref().sync_all()?;
        Ok(())
    }

    /// Rewrites the log with one line per current record.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite fails; the old log is left intact.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        self.rewrite(&mut inner)
    }

    fn replay(path: &Path) -> StoreResult<(HashMap<RecordId, R>, usize, bool)> {
        let mut records: HashMap<RecordId, R> = HashMap::new();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((records, 0, false)),
            Err(e) => return Err(e.into()),
        };

        // Raw bytes: a torn line may end inside a multi-byte character.
        let lines: Vec<Vec<u8>> = BufReader::new(file).split(b'\n').collect::<Result<_, _>>()?;
        let last = lines.len().saturating_sub(1);
        let mut log_lines = 0;
        let mut torn = false;

        for (number, line) in lines.iter().enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record: R = match serde_json::from_slice(line) {
                Ok(record) => record,
                Err(e) if number == last => {
                    warn!(path = %path.display(), line = number + 1, error = %e, "dropping torn final line");
                    torn = true;
                    continue;
                }
                Err(e) => {
                    return Err(StoreError::Corrupted(format!(
                        "{}:{}: {}",
                        path.display(),
                        number + 1,
                        e
                    )))
                }
            };
            log_lines += 1;

            let newer = records
                .get(record.id())
                .map_or(true, |current| record.updated_at() > current.updated_at());
            if newer {
                records.insert(record.id().clone(), record);
            }
        }

        Ok((records, log_lines, torn))
    }

    fn append(&self, inner: &mut Inner<R>, record: &R) -> StoreResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        if inner.needs_rewrite {
            self.rewrite(inner)?;
        }

        if let Err(e) = inner.write_line(&line) {
            warn!(path = %self.path.display(), error = %e, "append failed; cutting partial line");
            if let Err(repair) = self.discard_partial(inner) {
                warn!(path = %self.path.display(), error = %repair, "could not cut partial line");
                inner.needs_rewrite = true;
            }
            return Err(e.into());
        }
        inner.log_bytes += line.len() as u64;
        inner.log_lines += 1;
        Ok(())
    }

    /// Truncates the log to its last complete line and drops buffered bytes.
    fn discard_partial(&self, inner: &mut Inner<R>) -> StoreResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(inner.log_bytes)?;
        let stale = std::mem::replace(&mut inner.log, BufWriter::new(file));
        // Unflushed bytes belong to the failed line.
        drop(stale.into_parts());
        Ok(())
    }

    fn rewrite(&self, inner: &mut Inner<R>) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            let mut ordered: Vec<&R> = inner.records.values().collect();
            ordered.sort_by(|a, b| scan_order(*a, *b));
            for record in ordered {
                serde_json::to_writer(&mut tmp, record)?;
                tmp.write_all(b"\n")?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let log = OpenOptions::new().append(true).open(&self.path)?;
        inner.log_bytes = log.metadata()?.len();
        inner.log = BufWriter::new(log);
        inner.log_lines = inner.records.len();
        inner.needs_rewrite = false;
        Ok(())
    }
}

impl<R: SyncableRecord> RecordStore for FileStore<R> {
    type Record = R;

    fn get(&self, id: &RecordId) -> StoreResult<Option<R>> {
        Ok(self.inner.lock().records.get(id).cloned())
    }

    fn get_changed_since(&self, version: Timestamp) -> StoreResult<Vec<R>> {
        let mut changed: Vec<R> = self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| r.updated_at() > version)
            .cloned()
            .collect();
        changed.sort_by(scan_order);
        Ok(changed)
    }

    fn upsert(&self, record: R) -> StoreResult<UpsertOutcome> {
        let mut inner = self.inner.lock();
        let outcome = check_upsert(inner.records.get(record.id()), &record)?;
        if outcome == UpsertOutcome::Written {
            self.append(&mut inner, &record)?;
            inner.records.insert(record.id().clone(), record);
        }
        Ok(outcome)
    }

    fn write_local(&self, mut record: R, now: Timestamp) -> StoreResult<R> {
        let mut inner = self.inner.lock();
        let previous = inner.records.get(record.id()).map(SyncableRecord::updated_at);
        record.set_updated_at(next_timestamp(now, previous));
        validate(&record)?;
        self.append(&mut inner, &record)?;
        inner.records.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    fn remove_tombstones(&self, up_to: Timestamp) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner
            .records
            .retain(|_, r| !(r.is_deleted() && r.updated_at() <= up_to));
        let removed = before - inner.records.len();
        if removed > 0 {
            self.rewrite(&mut inner)?;
        }
        debug!(removed, up_to, "compacted tombstones");
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.inner.lock().records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_protocol::{LedgerRecord, Transaction};
    use tempfile::tempdir;

    fn txn(id: &str, updated_at: Timestamp, deleted: bool) -> LedgerRecord {
        LedgerRecord::from(Transaction {
            id: RecordId::from(id),
            updated_at,
            is_deleted: deleted,
            amount: 50,
            ..Default::default()
        })
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");

        {
            let store = FileStore::open(&path).unwrap();
            store.upsert(txn("1", 100, false)).unwrap();
            store.upsert(txn("1", 150, true)).unwrap();
            store.upsert(txn("2", 120, false)).unwrap();
            store.sync().unwrap();
        }

        let store = FileStore::<LedgerRecord>::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.log_lines(), 3);
        let one = store.get(&RecordId::from("1")).unwrap().unwrap();
        assert_eq!(one.updated_at(), 150);
        assert!(one.is_deleted());
    }

    #[test]
    fn unchanged_upsert_does_not_grow_log() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("s.jsonl")).unwrap();
        store.upsert(txn("1", 100, false)).unwrap();
        assert_eq!(store.upsert(txn("1", 100, false)).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(store.log_lines(), 1);
    }

    #[test]
    fn torn_final_line_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        {
            let store = FileStore::open(&path).unwrap();
            store.upsert(txn("1", 100, false)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"kind":"transaction","id":"2","upd"#).unwrap();
        drop(file);

        let store = FileStore::<LedgerRecord>::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);

        // The log was repaired, so later appends stay readable.
        store.upsert(txn("3", 300, false)).unwrap();
        drop(store);
        let store = FileStore::<LedgerRecord>::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn torn_multibyte_character_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        {
            let store = FileStore::open(&path).unwrap();
            store.upsert(txn("1", 100, false)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        // Cut inside the three-byte encoding of a euro sign.
        file.write_all(b"{\"kind\":\"transaction\",\"id\":\"2\",\"note\":\"\xE2\x82")
            .unwrap();
        drop(file);

        let store = FileStore::<LedgerRecord>::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        store.upsert(txn("3", 300, false)).unwrap();
        drop(store);

        let store = FileStore::<LedgerRecord>::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert!(store.get(&RecordId::from("2")).unwrap().is_none());
    }

    #[test]
    fn failed_append_leaves_log_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let store = FileStore::open(&path).unwrap();
        store.upsert(txn("1", 100, false)).unwrap();

        store.inner.lock().fail_after = Some(12);
        let err = store.upsert(txn("2", 200, false)).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.get(&RecordId::from("2")).unwrap().is_none());

        store.upsert(txn("3", 300, false)).unwrap();
        assert_eq!(store.log_lines(), 2);
        drop(store);

        let reopened = FileStore::<LedgerRecord>::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.log_lines(), 2);
        assert!(reopened.get(&RecordId::from("3")).unwrap().is_some());
    }

    #[test]
    fn corrupted_middle_line_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        fs::write(
            &path,
            "garbage\n{\"kind\":\"ledger\",\"id\":\"l\",\"updatedAt\":1}\n",
        )
        .unwrap();

        let err = FileStore::<LedgerRecord>::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted(_)));
    }

    #[test]
    fn tombstone_compaction_rewrites_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.jsonl");
        let store = FileStore::open(&path).unwrap();
        store.upsert(txn("1", 10, false)).unwrap();
        store.upsert(txn("1", 20, true)).unwrap();
        store.upsert(txn("2", 30, false)).unwrap();

        assert_eq!(store.remove_tombstones(25).unwrap(), 1);
        assert_eq!(store.log_lines(), 1);

        // New writes land after compaction.
        store.write_local(txn("3", 0, false), 40).unwrap();
        drop(store);

        let reopened = FileStore::<LedgerRecord>::open(&path).unwrap();
        assert_eq!(reopened.len().unwrap(), 2);
        assert!(reopened.get(&RecordId::from("1")).unwrap().is_none());
    }
}
