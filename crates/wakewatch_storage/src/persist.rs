#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use wakewatch_kernel_contracts::ph1j::EventRecord;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable sink for journal rows. Writes happen off the orchestrator path.
pub trait JournalPersistence: Send + Sync {
    fn persist(&self, record: &EventRecord) -> Result<(), PersistError>;
}

/// One JSON object per line, appended.
#[derive(Debug, Clone)]
pub struct JsonlJournalFile {
    path: PathBuf,
}

impl JsonlJournalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<EventRecord>, PersistError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }
}

impl JournalPersistence for JsonlJournalFile {
    fn persist(&self, record: &EventRecord) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}
