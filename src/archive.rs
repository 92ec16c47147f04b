//! gzip-compressed tar archives of query results

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::Builder;

use crate::fs_enum::FileEntry;

/// Archive written to disk and ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePayload {
    pub path: PathBuf,
    /// Size of the compressed archive in bytes
    pub size: u64,
    pub file_count: u64,
}

/// Write `files` into a `.tar.gz` at `dest`, storing each entry relative to
/// `root`. A file that vanished after enumeration aborts the archive.
pub fn write_tar_gz(root: &Path, files: &[FileEntry], dest: &Path) -> Result<ArchivePayload> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let out = File::create(dest).with_context(|| format!("create archive {}", dest.display()))?;
    let encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut file_count = 0u64;
    for entry in files {
        let rel_path = entry.path.strip_prefix(root).unwrap_or(&entry.path);
        builder
            .append_path_with_name(&entry.path, rel_path)
            .with_context(|| format!("append {}", entry.path.display()))?;
        file_count += 1;
    }

    let encoder = builder.into_inner().context("finish tar stream")?;
    let mut writer = encoder.finish().context("finish gzip stream")?;
    writer.flush()?;
    drop(writer);

    let size = fs::metadata(dest)
        .with_context(|| format!("stat archive {}", dest.display()))?
        .len();
    Ok(ArchivePayload {
        path: dest.to_path_buf(),
        size,
        file_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::time::SystemTime;
    use tar::Archive;
    use tempfile::TempDir;

    fn entry(path: PathBuf) -> FileEntry {
        let size = fs::metadata(&path).unwrap().len();
        FileEntry {
            path,
            size,
            modified: SystemTime::now(),
        }
    }

    #[test]
    fn test_archive_contains_relative_entries() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("docs")).unwrap();
        fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        fs::write(src.path().join("docs/b.txt"), b"bravo bravo").unwrap();

        let files = vec![
            entry(src.path().join("a.txt")),
            entry(src.path().join("docs/b.txt")),
        ];
        let dest = out.path().join("ws/result.tar.gz");
        let payload = write_tar_gz(src.path(), &files, &dest).unwrap();
        assert_eq!(payload.file_count, 2);
        assert_eq!(payload.size, fs::metadata(&dest).unwrap().len());
        assert!(payload.size > 0);

        let mut archive = Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let mut seen = Vec::new();
        for e in archive.entries().unwrap() {
            let mut e = e.unwrap();
            let name = e.path().unwrap().to_string_lossy().replace('\\', "/");
            let mut body = String::new();
            e.read_to_string(&mut body).unwrap();
            seen.push((name, body));
        }
        assert_eq!(
            seen,
            vec![
                ("a.txt".to_string(), "alpha".to_string()),
                ("docs/b.txt".to_string(), "bravo bravo".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_source_fails() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let ghost = FileEntry {
            path: src.path().join("ghost.txt"),
            size: 1,
            modified: SystemTime::now(),
        };
        assert!(write_tar_gz(src.path(), &[ghost], &out.path().join("x.tar.gz")).is_err());
    }
}
