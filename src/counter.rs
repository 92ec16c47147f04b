//! Persistent session counter used for instance selection

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait CounterStore {
    /// Read the stored value (0 if absent), add one, persist and return it.
    fn increment(&self) -> Result<u64>;
    /// Set the stored value back to zero.
    fn reset(&self) -> Result<()>;
}

/// Counter kept as decimal text in a single file.
///
/// Writes go through a temp file that is renamed over the target, so a
/// reader never sees a half-written value. There is no locking: two clients
/// incrementing at the same moment can both read N and both write N+1.
pub struct FileCounterStore {
    path: PathBuf,
}

impl FileCounterStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current value; missing or unparsable content reads as 0.
    pub fn current(&self) -> u64 {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    fn store(&self, value: u64) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create counter directory {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        write!(tmp, "{}", value)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("write counter file {}", self.path.display()))?;
        Ok(())
    }
}

impl CounterStore for FileCounterStore {
    fn increment(&self) -> Result<u64> {
        let next = self.current().saturating_add(1);
        self.store(next)?;
        Ok(next)
    }

    fn reset(&self) -> Result<()> {
        self.store(0)
    }
}
