//! Storage sinks for exported artifacts

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Destination for consolidated artifacts. `path` is relative and `/`-separated.
pub trait StorageSink: Send + Sync {
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()>;
}

/// Local directory sink with atomic tmp→rename writes
#[derive(Debug, Clone)]
pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if part == "." || part == ".." {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path escapes sink root: {path}"),
                ));
            }
            full.push(part);
        }
        Ok(full)
    }
}

impl StorageSink for LocalSink {
    fn write(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let final_path = self.resolve(path)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = final_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let written = fs::write(&tmp_path, data).and_then(|()| fs::rename(&tmp_path, &final_path));
        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_nested_path() {
        let dir = TempDir::new().unwrap();
        let sink = LocalSink::new(dir.path());
        sink.write("run1/details.json", b"[]").unwrap();
        let written = fs::read(dir.path().join("run1").join("details.json")).unwrap();
        assert_eq!(written, b"[]");
        assert!(!dir.path().join("run1").join("details.json.tmp").exists());
    }

    #[test]
    fn overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let sink = LocalSink::new(dir.path());
        sink.write("a.xml", b"one").unwrap();
        sink.write("a.xml", b"two").unwrap();
        assert_eq!(fs::read(dir.path().join("a.xml")).unwrap(), b"two");
    }

    #[test]
    fn failed_rename_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let sink = LocalSink::new(dir.path());
        // A non-empty directory at the target path makes the rename fail
        fs::create_dir_all(dir.path().join("run").join("taken.json").join("inner")).unwrap();
        assert!(sink.write("run/taken.json", b"[]").is_err());
        assert!(!dir.path().join("run").join("taken.json.tmp").exists());
    }

    #[test]
    fn rejects_parent_traversal() {
        let dir = TempDir::new().unwrap();
        let sink = LocalSink::new(dir.path());
        let err = sink.write("../escape.json", b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
