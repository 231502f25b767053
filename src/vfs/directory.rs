//! Replacement files stored loose under a directory.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use super::{FileReference, OpenFile, VfsBackend, is_escaping, normalize_name};
use crate::error::{ReplacerError, Result};

/// Filesystem backend rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryVfs {
    root: PathBuf,
}

impl DirectoryVfs {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ReplacerError::NotADirectory { path: root });
        }
        log::debug!("Directory VFS rooted at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl VfsBackend for DirectoryVfs {
    fn get_file(&self, name: &str) -> Option<FileReference> {
        let name = normalize_name(name);
        if name.is_empty() || is_escaping(&name) {
            return None;
        }
        if self.root.join(&name).is_file() {
            Some(FileReference::new(name, 0))
        } else {
            None
        }
    }

    fn open_file_for_read(&self, file: &FileReference) -> io::Result<OpenFile> {
        let handle = File::open(self.root.join(file.name()))?;
        let size = handle.metadata()?.len();
        Ok(OpenFile::new(Box::new(BufReader::new(handle)), size))
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_get_and_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/tex.png"), b"hello").unwrap();

        let vfs = DirectoryVfs::new(dir.path()).unwrap();
        let file = vfs.get_file("sub\\tex.png").unwrap();
        assert_eq!(file.name(), "sub/tex.png");

        let mut open = vfs.open_file_for_read(&file).unwrap();
        assert_eq!(open.size(), 5);
        let mut text = String::new();
        open.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_missing_and_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = DirectoryVfs::new(dir.path()).unwrap();
        assert!(vfs.get_file("nope.png").is_none());
        assert!(vfs.get_file("../etc/passwd").is_none());
        assert!(vfs.get_file("").is_none());
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            DirectoryVfs::new(&file),
            Err(ReplacerError::NotADirectory { .. })
        ));
    }
}
