use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::codec::{self, HEADER};
use crate::error::{LedgerError, LedgerResult};
use crate::record::{Entry, EventId, EventRecord, Ledger, MalformedRow, StoredEvent};

/// The delimited-text table on disk. Every call opens, uses and closes the
/// file; no handle outlives an operation.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the directory and a header-plus-seed table when the file is
    /// missing. Returns whether anything was created.
    #[tracing::instrument(skip(self, seed), fields(path = %self.path.display()))]
    pub fn ensure_exists(&self, seed: &EventRecord) -> LedgerResult<bool> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            info!(dir = %dir.display(), "creating ledger directory");
            fs::create_dir_all(dir).map_err(|err| LedgerError::storage(dir, err))?;
        }

        if self.path.exists() {
            return Ok(false);
        }

        let mut seeded = Ledger::default();
        seeded.push(StoredEvent::new(seed.clone()));
        self.rewrite_all(&seeded)?;
        info!(seed = %seed.name, due = %seed.due_date, "created ledger with seed row");
        Ok(true)
    }

    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load_all(&self) -> LedgerResult<Ledger> {
        let text = fs::read_to_string(&self.path)
            .map_err(|err| LedgerError::storage(&self.path, err))?;
        let ledger = parse_table(&text);

        debug!(
            rows = ledger.row_count(),
            malformed = ledger.malformed_count(),
            "loaded ledger"
        );
        Ok(ledger)
    }

    /// Replaces the file with `ledger`, via a temp file in the same
    /// directory so readers see either the old or the new table.
    #[tracing::instrument(skip(self, ledger), fields(path = %self.path.display(), rows = ledger.row_count()))]
    pub fn rewrite_all(&self, ledger: &Ledger) -> LedgerResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let storage = |err| LedgerError::storage(&self.path, err);

        let mut temp = NamedTempFile::new_in(dir).map_err(storage)?;
        let text = ledger.to_text().map_err(storage)?;
        temp.write_all(text.as_bytes()).map_err(storage)?;
        temp.flush().map_err(storage)?;
        temp.persist(&self.path)
            .map_err(|err| LedgerError::storage(&self.path, err.error))?;

        debug!("rewrote ledger");
        Ok(())
    }

    /// Appends one brand-new row. Existing rows are never touched.
    #[tracing::instrument(skip(self, event), fields(path = %self.path.display(), id = %event.id))]
    pub fn append_one(&self, event: &StoredEvent) -> LedgerResult<()> {
        let storage = |err| LedgerError::storage(&self.path, err);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(storage)?;

        let line = event.to_line().map_err(storage)?;
        let len = file.metadata().map_err(storage)?.len();
        let mut payload = String::new();
        if len == 0 {
            payload.push_str(HEADER);
            payload.push('\n');
        } else {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).map_err(storage)?;
            file.read_exact(&mut last).map_err(storage)?;
            if last[0] != b'\n' {
                debug!("ledger lacks a final newline; adding one before append");
                payload.push('\n');
            }
        }
        payload.push_str(&line);

        file.write_all(payload.as_bytes()).map_err(storage)?;
        file.flush().map_err(storage)?;
        Ok(())
    }
}

/// Parses a whole table. The first record is the header; rows that fail
/// to decode are kept as [`MalformedRow`]s instead of aborting the load.
pub fn parse_table(text: &str) -> Ledger {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = codec::split_records(text).into_iter();

    let Some(header) = records.next() else {
        return Ledger::default();
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for raw in records {
        let decoded = raw.row.and_then(|row| EventRecord::from_raw(&row));

        match decoded {
            Ok((record, id)) => {
                let id = match id {
                    Some(id) if seen.insert(id) => id,
                    Some(id) => {
                        warn!(line = raw.line, %id, "duplicate record id; assigning a fresh one");
                        fresh_id(&mut seen)
                    }
                    None => fresh_id(&mut seen),
                };
                entries.push(Entry::Event(StoredEvent::loaded(id, record, raw.text)));
            }
            Err(reason) => {
                warn!(line = raw.line, error = %reason, "skipping malformed record");
                entries.push(Entry::Malformed(MalformedRow {
                    line: raw.line,
                    text: raw.text.to_string(),
                    reason,
                }));
            }
        }
    }

    Ledger {
        header: header.text.to_string(),
        entries,
    }
}

fn fresh_id(seen: &mut HashSet<EventId>) -> EventId {
    let id = EventId::new();
    seen.insert(id);
    id
}
