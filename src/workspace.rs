//! Connection-scoped scratch space and directory helpers

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identity of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }

    /// First 8 hex digits, enough to tell log lines apart
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("create directory {}", path.display()))?;
    }
    Ok(())
}

/// Create a directory only the owner can enter (0700 on Unix)
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)
            .with_context(|| format!("create directory {}", path.display()))?;
    }
    #[cfg(not(unix))]
    ensure_dir_exists(path)?;
    Ok(())
}

/// Scratch directory owned by one connection handler.
///
/// The directory lives at `<root>/conn-<id>` and is created on first use.
/// Dropping the workspace removes it and everything inside.
pub struct ConnectionWorkspace {
    dir: PathBuf,
    next_archive: u64,
}

impl ConnectionWorkspace {
    pub fn new(root: &Path, id: &ConnectionId) -> Self {
        Self {
            dir: root.join(format!("conn-{}", id)),
            next_archive: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh path for the next archive produced on this connection
    pub fn archive_path(&mut self) -> Result<PathBuf> {
        ensure_dir_exists(&self.dir)?;
        self.next_archive += 1;
        Ok(self.dir.join(format!("archive-{}.tar.gz", self.next_archive)))
    }
}

impl Drop for ConnectionWorkspace {
    fn drop(&mut self) {
        if self.dir.exists() {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dir_exists() {
        let temp_dir = TempDir::new().unwrap();
        let new_dir = temp_dir.path().join("new").join("nested").join("dir");

        assert!(!new_dir.exists());
        ensure_dir_exists(&new_dir).unwrap();
        assert!(new_dir.is_dir());

        // Should be idempotent
        ensure_dir_exists(&new_dir).unwrap();
        assert!(new_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_dir_mode() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("downloads");
        ensure_private_dir(&dir).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_workspaces_are_distinct_and_lazy() {
        let root = TempDir::new().unwrap();
        let mut a = ConnectionWorkspace::new(root.path(), &ConnectionId::new());
        let mut b = ConnectionWorkspace::new(root.path(), &ConnectionId::new());
        assert_ne!(a.dir(), b.dir());
        assert!(!a.dir().exists());

        let pa = a.archive_path().unwrap();
        let pb = b.archive_path().unwrap();
        assert_ne!(pa, pb);
        assert!(a.dir().is_dir());
        assert_ne!(a.archive_path().unwrap(), pa);
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let dir;
        {
            let mut ws = ConnectionWorkspace::new(root.path(), &ConnectionId::new());
            let p = ws.archive_path().unwrap();
            std::fs::write(&p, b"payload").unwrap();
            dir = ws.dir().to_path_buf();
            assert!(dir.exists());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_connection_id_short() {
        let id = ConnectionId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.to_string().starts_with(&id.short()));
    }
}
