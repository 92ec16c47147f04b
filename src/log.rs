use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::fs::{OpenOptions, File};
use std::io::{BufReader, BufWriter, Write, BufRead};
use anyhow::{Result, Context};
use chrono::Utc;

pub const JOURNAL_FILE_NAME: &str = ".w24_downloads.jsonl";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    /// Server answered with a failure frame
    Refused,
    /// Connection or disk error mid-transfer
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub sequence: u64,
    pub command: String,
    pub destination: Option<PathBuf>,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub error: Option<String>,
}

impl TransferLogEntry {
    pub fn new(sequence: u64, command: &str, status: TransferStatus) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            sequence,
            command: command.to_string(),
            destination: None,
            status,
            bytes_transferred: 0,
            error: None,
        }
    }
}

/// JSONL journal of archive downloads, kept next to the downloads
pub struct TransferLog {
    log_file_path: PathBuf,
}

impl TransferLog {
    pub fn new(download_dir: &Path) -> Self {
        let log_file_path = download_dir.join(JOURNAL_FILE_NAME);
        TransferLog { log_file_path }
    }

    pub fn path(&self) -> &Path {
        &self.log_file_path
    }

    pub fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        if let Some(parent) = self.log_file_path.parent() {
            crate::workspace::ensure_private_dir(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransferLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
