//! Query/archive backend consumed by connection handlers
//!
//! Handlers only see the [`Backend`] trait. [`FsBackend`] answers queries by
//! walking a served root directory and packing matches into a gzip tar.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::archive::{write_tar_gz, ArchivePayload};
use crate::command::{ArchiveQuery, ListOrder};
use crate::fs_enum::{enumerate_matching, find_file, list_subdirectories, FileFilter, FileInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Created(ArchivePayload),
    /// The query matched no files; nothing was written
    NoMatches,
}

pub trait Backend: Send + Sync + 'static {
    fn list_directories(&self, order: ListOrder) -> Result<Vec<String>>;

    fn find_file(&self, name: &str) -> Result<Option<FileInfo>>;

    /// Run `query` and write the resulting archive to `dest`.
    fn archive(&self, query: &ArchiveQuery, dest: &Path) -> Result<ArchiveOutcome>;
}

/// How many levels below the served root each archive query searches.
///
/// 1 means the root's own files only. By default extension and
/// modified-before queries stay at the top level, while size-range and
/// modified-after queries also look one directory down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveDepths {
    pub size_range: usize,
    pub extensions: usize,
    pub modified_before: usize,
    pub modified_after: usize,
}

impl Default for ArchiveDepths {
    fn default() -> Self {
        Self {
            size_range: 2,
            extensions: 1,
            modified_before: 1,
            modified_after: 2,
        }
    }
}

impl ArchiveDepths {
    /// Same depth for every query
    pub fn uniform(depth: usize) -> Self {
        Self {
            size_range: depth,
            extensions: depth,
            modified_before: depth,
            modified_after: depth,
        }
    }

    pub fn for_query(&self, query: &ArchiveQuery) -> usize {
        match query {
            ArchiveQuery::SizeRange { .. } => self.size_range,
            ArchiveQuery::Extensions(_) => self.extensions,
            ArchiveQuery::ModifiedBefore(_) => self.modified_before,
            ArchiveQuery::ModifiedAfter(_) => self.modified_after,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, depth) in [
            ("size_range", self.size_range),
            ("extensions", self.extensions),
            ("modified_before", self.modified_before),
            ("modified_after", self.modified_after),
        ] {
            if depth == 0 {
                bail!("archive depth for {} must be at least 1", name);
            }
        }
        Ok(())
    }
}

pub struct FsBackend {
    root: PathBuf,
    depths: ArchiveDepths,
}

impl FsBackend {
    pub fn new<P: AsRef<Path>>(root: P, depths: ArchiveDepths) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            bail!("root is not a directory: {}", root.display());
        }
        depths.validate()?;
        Ok(Self {
            root: root.to_path_buf(),
            depths,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Backend for FsBackend {
    fn list_directories(&self, order: ListOrder) -> Result<Vec<String>> {
        list_subdirectories(&self.root, order)
    }

    fn find_file(&self, name: &str) -> Result<Option<FileInfo>> {
        find_file(&self.root, name)
    }

    fn archive(&self, query: &ArchiveQuery, dest: &Path) -> Result<ArchiveOutcome> {
        let filter = FileFilter::for_query(query, self.depths.for_query(query))?;
        let files = enumerate_matching(&self.root, &filter)
            .with_context(|| format!("search {}", self.root.display()))?;
        if files.is_empty() {
            return Ok(ArchiveOutcome::NoMatches);
        }
        let payload = write_tar_gz(&self.root, &files, dest)?;
        if payload.size == 0 {
            let _ = std::fs::remove_file(&payload.path);
            return Ok(ArchiveOutcome::NoMatches);
        }
        Ok(ArchiveOutcome::Created(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_bad_root_and_depth() {
        let tmp = TempDir::new().unwrap();
        assert!(FsBackend::new(tmp.path().join("nope"), ArchiveDepths::default()).is_err());
        assert!(FsBackend::new(tmp.path(), ArchiveDepths::uniform(0)).is_err());
        let mut depths = ArchiveDepths::default();
        depths.modified_after = 0;
        assert!(FsBackend::new(tmp.path(), depths).is_err());
    }

    #[test]
    fn test_archive_no_matches_writes_nothing() {
        let root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), b"abc").unwrap();
        let backend = FsBackend::new(root.path(), ArchiveDepths::default()).unwrap();
        let dest = ws.path().join("out.tar.gz");

        let outcome = backend
            .archive(&ArchiveQuery::Extensions(vec!["pdf".into()]), &dest)
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::NoMatches);
        assert!(!dest.exists());
    }

    #[test]
    fn test_archive_created() {
        let root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), b"abc").unwrap();
        fs::write(root.path().join("b.txt"), b"defg").unwrap();
        let backend = FsBackend::new(root.path(), ArchiveDepths::uniform(1)).unwrap();
        let dest = ws.path().join("out.tar.gz");

        match backend
            .archive(&ArchiveQuery::Extensions(vec!["txt".into()]), &dest)
            .unwrap()
        {
            ArchiveOutcome::Created(p) => {
                assert_eq!(p.file_count, 2);
                assert_eq!(p.path, dest);
                assert!(p.size > 0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_list_and_find_delegate_to_root() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("b")).unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        fs::write(root.path().join("b/x.log"), b"1").unwrap();
        let backend = FsBackend::new(root.path(), ArchiveDepths::default()).unwrap();

        assert_eq!(
            backend.list_directories(ListOrder::Alphabetical).unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(backend.find_file("x.log").unwrap().unwrap().size, 1);
    }

    #[test]
    fn test_default_depths_per_query() {
        let root = TempDir::new().unwrap();
        let ws = TempDir::new().unwrap();
        fs::write(root.path().join("top.txt"), b"top level").unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        fs::write(root.path().join("sub/nested.txt"), b"one level down").unwrap();
        let backend = FsBackend::new(root.path(), ArchiveDepths::default()).unwrap();
        let tomorrow = chrono::Local::now().date_naive() + chrono::Duration::days(1);
        let long_ago = chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();

        let dest = ws.path().join("out.tar.gz");
        let count = |query: ArchiveQuery| match backend.archive(&query, &dest).unwrap() {
            ArchiveOutcome::Created(p) => p.file_count,
            ArchiveOutcome::NoMatches => 0,
        };
        assert_eq!(count(ArchiveQuery::Extensions(vec!["txt".into()])), 1);
        assert_eq!(count(ArchiveQuery::ModifiedBefore(tomorrow)), 1);
        assert_eq!(count(ArchiveQuery::SizeRange { min: 0, max: 1000 }), 2);
        assert_eq!(count(ArchiveQuery::ModifiedAfter(long_ago)), 2);
    }
}
