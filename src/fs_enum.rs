use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

use crate::command::{ArchiveQuery, ListOrder};
// Filesystem enumeration and query filters

/// Regular file matched by a query
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Metadata reported for a located file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Local>,
    /// Permission bits (rwx for user, group, other)
    pub mode: u32,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Size: {} bytes, Modified: {}, Permissions: {:o}",
            self.name,
            self.size,
            self.modified.format("%Y-%m-%d %H:%M:%S"),
            self.mode
        )
    }
}

/// Selection criteria for archive queries
pub struct FileFilter {
    /// Exclusive lower size bound
    pub min_size: Option<u64>,
    /// Exclusive upper size bound
    pub max_size: Option<u64>,
    /// Accepted extensions, compared case-sensitively
    pub extensions: Vec<String>,
    pub modified_before: Option<SystemTime>,
    pub modified_since: Option<SystemTime>,
    /// Levels below the root to descend (1 = root's own files)
    pub max_depth: usize,
    pub include_hidden: bool,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            min_size: None,
            max_size: None,
            extensions: Vec::new(),
            modified_before: None,
            modified_since: None,
            max_depth: 2,
            include_hidden: false,
        }
    }
}

impl FileFilter {
    pub fn for_query(query: &ArchiveQuery, max_depth: usize) -> Result<Self> {
        let mut filter = FileFilter {
            max_depth,
            ..FileFilter::default()
        };
        match query {
            ArchiveQuery::SizeRange { min, max } => {
                filter.min_size = Some(*min);
                filter.max_size = Some(*max);
            }
            ArchiveQuery::Extensions(exts) => filter.extensions = exts.clone(),
            ArchiveQuery::ModifiedBefore(day) => {
                let next = day
                    .succ_opt()
                    .with_context(|| format!("no day after {}", day))?;
                filter.modified_before = Some(local_midnight(next)?);
            }
            ArchiveQuery::ModifiedAfter(day) => {
                filter.modified_since = Some(local_midnight(*day)?);
            }
        }
        Ok(filter)
    }

    fn should_include_file(&self, path: &Path, metadata: &Metadata) -> bool {
        let size = metadata.len();
        if let Some(min) = self.min_size {
            if size <= min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if size >= max {
                return false;
            }
        }

        if !self.extensions.is_empty() {
            let ext = path.extension().map(|e| e.to_string_lossy());
            match ext {
                Some(e) if self.extensions.iter().any(|x| *x == e) => {}
                _ => return false,
            }
        }

        if self.modified_before.is_some() || self.modified_since.is_some() {
            let Ok(mtime) = metadata.modified() else {
                return false;
            };
            if let Some(before) = self.modified_before {
                if mtime >= before {
                    return false;
                }
            }
            if let Some(since) = self.modified_since {
                if mtime < since {
                    return false;
                }
            }
        }

        true
    }
}

/// Start of `day` in the server's local time zone
pub fn local_midnight(day: NaiveDate) -> Result<SystemTime> {
    let naive = day
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("invalid midnight for {}", day))?;
    // DST gaps can skip midnight; take the earliest valid instant
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + chrono::Duration::hours(1))).earliest())
        .with_context(|| format!("{} has no local midnight", day))?;
    Ok(SystemTime::from(local))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Files under `root` accepted by `filter`, in walk order (sorted by name).
pub fn enumerate_matching(root: &Path, filter: &FileFilter) -> Result<Vec<FileEntry>> {
    if !root.is_dir() {
        anyhow::bail!("search root is not a directory: {}", root.display());
    }
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .max_depth(filter.max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| filter.include_hidden || !is_hidden(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if filter.should_include_file(entry.path(), &metadata) {
                entries.push(FileEntry {
                    path: entry.path().to_path_buf(),
                    size: metadata.len(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        } // else: skip unreadable entries
    }

    Ok(entries)
}

/// Names of the immediate subdirectories of `root`.
pub fn list_subdirectories(root: &Path, order: ListOrder) -> Result<Vec<String>> {
    let mut dirs: Vec<(String, SystemTime)> = Vec::new();
    let rd = std::fs::read_dir(root).with_context(|| format!("read_dir {}", root.display()))?;
    for entry in rd.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        dirs.push((name, mtime));
    }

    match order {
        ListOrder::Alphabetical => dirs.sort_by(|a, b| a.0.cmp(&b.0)),
        ListOrder::ModifiedTime => dirs.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0))),
    }
    Ok(dirs.into_iter().map(|(name, _)| name).collect())
}

/// First regular file named `name` anywhere under `root`, skipping hidden
/// entries. Directories are visited in name order so the result is stable.
pub fn find_file(root: &Path, name: &str) -> Result<Option<FileInfo>> {
    if !root.is_dir() {
        anyhow::bail!("search root is not a directory: {}", root.display());
    }
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || entry.file_name().to_string_lossy() != name {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        return Ok(Some(FileInfo {
            name: name.to_string(),
            size: metadata.len(),
            modified: DateTime::<Local>::from(modified),
            mode: permission_bits(&metadata),
        }));
    }
    Ok(None)
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    fn names(entries: &[FileEntry], root: &Path) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    fn sized(path: &Path, size: usize) {
        if let Some(p) = path.parent() {
            fs::create_dir_all(p).unwrap();
        }
        fs::write(path, vec![b'x'; size]).unwrap();
    }

    #[test]
    fn test_size_range_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        sized(&root.join("small.bin"), 100);
        sized(&root.join("mid.bin"), 150);
        sized(&root.join("big.bin"), 200);

        let query = ArchiveQuery::SizeRange { min: 100, max: 200 };
        let filter = FileFilter::for_query(&query, 2).unwrap();
        let found = enumerate_matching(root, &filter).unwrap();
        assert_eq!(names(&found, root), vec!["mid.bin"]);

        let inverted = ArchiveQuery::SizeRange { min: 100, max: 50 };
        let filter = FileFilter::for_query(&inverted, 2).unwrap();
        assert!(enumerate_matching(root, &filter).unwrap().is_empty());
    }

    #[test]
    fn test_extensions_depth_and_hidden() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        sized(&root.join("a.txt"), 1);
        sized(&root.join("b.pdf"), 1);
        sized(&root.join("c.rs"), 1);
        sized(&root.join(".secret.txt"), 1);
        sized(&root.join(".hidden/d.txt"), 1);
        sized(&root.join("sub/e.txt"), 1);
        sized(&root.join("sub/deeper/f.txt"), 1);

        let query = ArchiveQuery::Extensions(vec!["txt".into(), "pdf".into()]);
        let filter = FileFilter::for_query(&query, 2).unwrap();
        let found = enumerate_matching(root, &filter).unwrap();
        assert_eq!(names(&found, root), vec!["a.txt", "b.pdf", "sub/e.txt"]);

        let filter = FileFilter::for_query(&query, 1).unwrap();
        let found = enumerate_matching(root, &filter).unwrap();
        assert_eq!(names(&found, root), vec!["a.txt", "b.pdf"]);
    }

    #[test]
    fn test_modified_before_includes_that_day() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let noon = SystemTime::from(
            Local
                .from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap())
                .earliest()
                .unwrap(),
        );
        let next_noon = noon + std::time::Duration::from_secs(24 * 3600);

        sized(&root.join("on_day.txt"), 1);
        sized(&root.join("next_day.txt"), 1);
        set_file_mtime(root.join("on_day.txt"), FileTime::from_system_time(noon)).unwrap();
        set_file_mtime(root.join("next_day.txt"), FileTime::from_system_time(next_noon)).unwrap();

        let before = FileFilter::for_query(&ArchiveQuery::ModifiedBefore(day), 2).unwrap();
        assert_eq!(
            names(&enumerate_matching(root, &before).unwrap(), root),
            vec!["on_day.txt"]
        );

        let after = FileFilter::for_query(&ArchiveQuery::ModifiedAfter(day), 2).unwrap();
        assert_eq!(
            names(&enumerate_matching(root, &after).unwrap(), root),
            vec!["next_day.txt", "on_day.txt"]
        );

        let later = day.succ_opt().unwrap().succ_opt().unwrap();
        let after_later = FileFilter::for_query(&ArchiveQuery::ModifiedAfter(later), 2).unwrap();
        assert!(enumerate_matching(root, &after_later).unwrap().is_empty());
    }

    #[test]
    fn test_list_subdirectories_orders() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        for (name, secs) in [("zeta", 1_000), ("alpha", 3_000), ("mid", 2_000)] {
            let d = root.join(name);
            fs::create_dir(&d).unwrap();
            set_file_mtime(&d, FileTime::from_unix_time(secs, 0)).unwrap();
        }
        sized(&root.join("plain.txt"), 3);

        let alpha = list_subdirectories(root, ListOrder::Alphabetical).unwrap();
        assert_eq!(alpha, vec!["alpha", "mid", "zeta"]);
        let by_time = list_subdirectories(root, ListOrder::ModifiedTime).unwrap();
        assert_eq!(by_time, vec!["zeta", "mid", "alpha"]);
    }

    #[test]
    fn test_list_subdirectories_missing_root() {
        let tmp = TempDir::new().unwrap();
        assert!(list_subdirectories(&tmp.path().join("gone"), ListOrder::Alphabetical).is_err());
    }

    #[test]
    fn test_find_file_two_levels_deep() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let target = root.join("projects/2024/report.txt");
        sized(&target, 42);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o640)).unwrap();
        }

        let info = find_file(root, "report.txt").unwrap().expect("file should be found");
        assert_eq!(info.name, "report.txt");
        assert_eq!(info.size, 42);
        #[cfg(unix)]
        assert_eq!(info.mode, 0o640);

        let line = info.to_string();
        assert!(line.starts_with("report.txt, Size: 42 bytes, Modified: "));
        #[cfg(unix)]
        assert!(line.ends_with(", Permissions: 640"));

        assert!(find_file(root, "missing.txt").unwrap().is_none());
    }

    #[test]
    fn test_find_file_skips_hidden() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        sized(&root.join(".cache/note.md"), 5);
        assert!(find_file(root, "note.md").unwrap().is_none());
        sized(&root.join("docs/note.md"), 6);
        assert_eq!(find_file(root, "note.md").unwrap().unwrap().size, 6);
    }
}
