use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::warn;

use crate::{data::models::ledger::entitlement_record_model::EntitlementRecordModel, errors::IapError};

/// Append-only storage for ledger changes.
pub(crate) trait LedgerJournalDatasource: Send + Sync {
    /// All entries written so far, oldest first.
    fn load(&self) -> Result<Vec<EntitlementRecordModel>, IapError>;

    /// Durably appends one entry. Only returns once the entry is on disk.
    fn append(&self, entry: &EntitlementRecordModel) -> Result<(), IapError>;
}

/// JSON-lines journal file.
pub(crate) struct LedgerJournalFileDatasource {
    path: PathBuf,
    file: Mutex<File>,
}

impl LedgerJournalFileDatasource {
    pub(crate) fn open(path: &Path) -> Result<Self, IapError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                IapError::LedgerJournal(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                IapError::LedgerJournal(format!("failed to open {}: {e}", path.display()))
            })?;
        repair_torn_tail(&mut file, path).map_err(|e| {
            IapError::LedgerJournal(format!("failed to repair {}: {e}", path.display()))
        })?;
        Ok(Self {
            path: path.to_owned(),
            file: Mutex::new(file),
        })
    }
}

impl LedgerJournalDatasource for LedgerJournalFileDatasource {
    fn load(&self) -> Result<Vec<EntitlementRecordModel>, IapError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(IapError::LedgerJournal(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                IapError::LedgerJournal(format!("failed to read {}: {e}", self.path.display()))
            })?;
        let last_index = lines.len().saturating_sub(1);
        let mut entries = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                // A torn final line is what a crash mid-append leaves behind.
                Err(e) if index == last_index => {
                    warn!(path = %self.path.display(), error = %e, "skipping torn journal tail");
                }
                Err(e) => {
                    return Err(IapError::LedgerJournal(format!(
                        "corrupt entry at line {} of {}: {e}",
                        index + 1,
                        self.path.display()
                    )))
                }
            }
        }
        Ok(entries)
    }

    fn append(&self, entry: &EntitlementRecordModel) -> Result<(), IapError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| IapError::LedgerJournal(format!("failed to encode entry: {e}")))?;
        line.push('\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| IapError::LedgerJournal("journal file lock poisoned".into()))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                IapError::LedgerJournal(format!("failed to append to {}: {e}", self.path.display()))
            })
    }
}

/// Leaves the journal ending on a line boundary, so the next append does not
/// land on the same line as a partially written entry.
fn repair_torn_tail(file: &mut File, path: &Path) -> std::io::Result<()> {
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    if contents.is_empty() || contents.ends_with(b"\n") {
        return Ok(());
    }
    let tail_start = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    if serde_json::from_slice::<EntitlementRecordModel>(&contents[tail_start..]).is_ok() {
        // Complete entry, only the newline is missing.
        file.write_all(b"\n")?;
    } else {
        warn!(
            path = %path.display(),
            bytes = contents.len() - tail_start,
            "truncating torn journal tail"
        );
        file.set_len(tail_start as u64)?;
    }
    file.sync_data()
}

/// Journal kept in memory only, for ephemeral sessions and tests.
#[derive(Default)]
pub(crate) struct LedgerJournalMemoryDatasource {
    entries: Mutex<Vec<EntitlementRecordModel>>,
}

impl LedgerJournalMemoryDatasource {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl LedgerJournalDatasource for LedgerJournalMemoryDatasource {
    fn load(&self) -> Result<Vec<EntitlementRecordModel>, IapError> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .map_err(|_| IapError::LedgerJournal("journal lock poisoned".into()))
    }

    fn append(&self, entry: &EntitlementRecordModel) -> Result<(), IapError> {
        self.entries
            .lock()
            .map(|mut entries| entries.push(entry.clone()))
            .map_err(|_| IapError::LedgerJournal("journal lock poisoned".into()))
    }
}
