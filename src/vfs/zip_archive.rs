//! Replacement packs shipped as a single zip archive.

use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use texreplace_formats::record::capacity_hint;
use zip::ZipArchive;

use super::{FileReference, OpenFile, ReadSeek, VfsBackend, is_escaping, normalize_name};
use crate::error::Result;

/// Filesystem backend over the entries of a zip archive.
///
/// Entries are not seekable inside the archive, so opening one inflates it
/// into memory.
pub struct ZipVfs {
    archive: Mutex<ZipArchive<Box<dyn ReadSeek>>>,
    name: String,
}

impl ZipVfs {
    /// Open a zip archive on disk.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.zip")
            .to_string();
        log::info!("Opening replacement ZIP: {:?}", path);
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(io::BufReader::new(file)), name)
    }

    /// Use an archive held in memory.
    pub fn from_bytes(data: Vec<u8>, name: impl Into<String>) -> Result<Self> {
        Self::from_reader(Box::new(Cursor::new(data)), name.into())
    }

    fn from_reader(reader: Box<dyn ReadSeek>, name: String) -> Result<Self> {
        let archive = ZipArchive::new(reader)?;
        log::debug!("ZIP '{}' contains {} entries", name, archive.len());
        Ok(Self {
            archive: Mutex::new(archive),
            name,
        })
    }

    pub fn len(&self) -> usize {
        self.archive.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VfsBackend for ZipVfs {
    fn get_file(&self, name: &str) -> Option<FileReference> {
        let name = normalize_name(name);
        if name.is_empty() || is_escaping(&name) {
            return None;
        }
        let archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let index = archive.index_for_name(&name)?;
        Some(FileReference::new(name, index))
    }

    fn open_file_for_read(&self, file: &FileReference) -> io::Result<OpenFile> {
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = archive
            .by_index(file.index())
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))?;
        if entry.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is a directory", file.name()),
            ));
        }
        let declared = usize::try_from(entry.size()).unwrap_or(usize::MAX);
        let mut data = Vec::with_capacity(capacity_hint(declared));
        entry.read_to_end(&mut data)?;
        log::trace!("Inflated '{}' ({} bytes) from {}", file.name(), data.len(), self.name);
        Ok(OpenFile::from_bytes(data))
    }

    fn describe(&self) -> String {
        format!("zip:{}", self.name)
    }
}
