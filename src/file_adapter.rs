//! Whole-file byte storage used by the playlist store.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use log::warn;

/// Reads and overwrites one file as a unit.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file contents, or `None` if the file is missing or unreadable.
    pub fn read(&self) -> Option<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    "FileAdapter: failed to read {}, treating as absent: {}",
                    self.path.display(),
                    err
                );
                None
            }
        }
    }

    /// Replaces the file contents. Writes a sibling temp file and renames it over
    /// the destination so readers never observe a half-written document.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut tmp_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path().join("nothing.json"));
        assert!(adapter.read().is_none());
    }

    #[test]
    fn test_write_creates_parent_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path().join("nested").join("doc.json"));
        adapter.write(b"first").unwrap();
        adapter.write(b"second").unwrap();
        assert_eq!(adapter.read().as_deref(), Some(&b"second"[..]));
        assert!(!dir.path().join("nested").join("doc.json.tmp").exists());
    }

    #[test]
    fn test_write_into_file_path_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let adapter = FileAdapter::new(blocker.join("doc.json"));
        assert!(adapter.write(b"data").is_err());
    }
}
