//! Virtual filesystem capability used to find and read replacement files.
//!
//! Backends hand out lightweight [`FileReference`]s for names that exist and
//! open them as seekable [`OpenFile`]s. Closing is dropping the `OpenFile`.

mod directory;
mod zip_archive;

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use texreplace_formats::record::read_fully;

pub use directory::DirectoryVfs;
pub use zip_archive::ZipVfs;

/// Any readable, seekable byte source a backend can return.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Handle to a file known to exist in a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileReference {
    name: Arc<str>,
    index: usize,
}

impl FileReference {
    /// Create a reference; `index` is backend-defined (e.g. a zip entry).
    pub fn new(name: impl Into<Arc<str>>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A file opened for reading.
pub struct OpenFile {
    reader: Box<dyn ReadSeek>,
    size: u64,
}

impl OpenFile {
    pub fn new(reader: Box<dyn ReadSeek>, size: u64) -> Self {
        Self { reader, size }
    }

    /// Open an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::new(Box::new(io::Cursor::new(data)), size)
    }

    /// Total size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fill as much of `buf` as the file allows; returns the count read.
    pub fn read_exact_or_short(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_fully(self, buf)
    }

    /// Seek back to the first byte.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

impl Read for OpenFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for OpenFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile").field("size", &self.size).finish()
    }
}

/// Filesystem capability the replacement loader reads through.
pub trait VfsBackend: Send + Sync {
    /// Look up a file by name, `None` if it does not exist.
    fn get_file(&self, name: &str) -> Option<FileReference>;

    /// Open a previously looked-up file.
    fn open_file_for_read(&self, file: &FileReference) -> io::Result<OpenFile>;

    /// Give back a reference obtained from [`get_file`](Self::get_file).
    fn release_file(&self, file: FileReference) {
        drop(file);
    }

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Normalise a lookup name: forward slashes, no leading slash.
pub(crate) fn normalize_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Names that try to escape the backend root.
pub(crate) fn is_escaping(name: &str) -> bool {
    name.split('/').any(|part| part == "..")
}
