//! Durable per-run backup sessions.
//!
//! Layout of one session directory `{dataset}_{YYYYmmdd_HHMMSS}`:
//!
//! - `original.csv`: the dataset as submitted, written before any provider call
//! - `row_<index>.csv`: one snapshot per row, rewritten as the row progresses
//! - `progress.log`: append-only failure log
//! - `FINAL.csv`: the processed dataset, present only when the run completed
//!
//! Every CSV is written to a temporary file in the session directory and then
//! renamed over the target, so a crash mid-write never clobbers the previous
//! snapshot of that file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::dataset::Dataset;
use crate::error::{BacktransError, Result};

pub const ORIGINAL_FILE: &str = "original.csv";
pub const FINAL_FILE: &str = "FINAL.csv";
pub const LOG_FILE: &str = "progress.log";

pub fn row_file_name(index: usize) -> String {
    format!("row_{}.csv", index)
}

fn storage_err(context: impl std::fmt::Display, err: impl std::fmt::Display) -> BacktransError {
    BacktransError::Storage(format!("{}: {}", context, err))
}

/// Root directory holding every backup session
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

/// Listing entry for one session directory
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: String,
    pub path: PathBuf,
    pub completed: bool,
    pub row_snapshots: usize,
}

impl BackupStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh session directory for `dataset_name`
    ///
    /// Two sessions for the same name within the same second share a directory.
    pub fn open_session(&self, dataset_name: &str) -> Result<SessionHandle> {
        let id = format!(
            "{}_{}",
            sanitize_name(dataset_name),
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let dir = self.root.join(&id);

        fs::create_dir_all(&dir)
            .map_err(|e| storage_err(format!("Cannot create backup directory {}", dir.display()), e))?;

        info!("Opened backup session {}", dir.display());
        Ok(SessionHandle {
            id,
            dir,
            completed: false,
        })
    }

    /// Session identifiers in lexical order; empty when the root does not exist yet
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.session_summaries()?.into_iter().map(|s| s.id).collect())
    }

    pub fn session_summaries(&self) -> Result<Vec<SessionSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| storage_err("Cannot list backup sessions", e))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path().to_path_buf();
            sessions.push(SessionSummary {
                id: entry.file_name().to_string_lossy().into_owned(),
                completed: path.join(FINAL_FILE).is_file(),
                row_snapshots: count_row_snapshots(&path),
                path,
            });
        }
        Ok(sessions)
    }
}

/// One run's backup directory, owned exclusively by that run
#[derive(Debug)]
pub struct SessionHandle {
    id: String,
    dir: PathBuf,
    completed: bool,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn snapshot_original(&self, dataset: &Dataset) -> Result<()> {
        let bytes = dataset.to_csv_bytes()?;
        self.write_atomic(ORIGINAL_FILE, &bytes)?;
        debug!("Saved original snapshot ({} rows)", dataset.len());
        Ok(())
    }

    /// Append one line to `progress.log`, flushed to disk before returning
    pub fn append_log(&self, message: &str) -> Result<()> {
        let path = self.log_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| storage_err(format!("Cannot open {}", path.display()), e))?;

        writeln!(file, "{}", message)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|e| storage_err(format!("Cannot append to {}", path.display()), e))
    }

    /// Write or replace the snapshot of a single row
    pub fn write_row(&self, index: usize, headers: &[String], values: &[String]) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(headers)?;
        writer.write_record(values)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| storage_err(format!("Cannot encode row {}", index), e))?;

        self.write_atomic(&row_file_name(index), &bytes)
    }

    /// Write the consolidated snapshot and mark the session complete
    pub fn commit_final(&mut self, dataset: &Dataset) -> Result<()> {
        let bytes = dataset.to_csv_bytes()?;
        self.write_atomic(FINAL_FILE, &bytes)?;
        self.completed = true;
        info!("Backup session {} committed", self.id);
        Ok(())
    }

    fn write_atomic(&self, file_name: &str, bytes: &[u8]) -> Result<()> {
        let target = self.dir.join(file_name);
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| storage_err(format!("Cannot stage {}", target.display()), e))?;

        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| storage_err(format!("Cannot write {}", target.display()), e))?;

        tmp.persist(&target)
            .map_err(|e| storage_err(format!("Cannot replace {}", target.display()), e.error))?;
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    let base = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "dataset".to_string() } else { cleaned }
}

fn count_row_snapshots(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    name.starts_with("row_") && name.ends_with(".csv")
                })
                .count()
        })
        .unwrap_or(0)
}
