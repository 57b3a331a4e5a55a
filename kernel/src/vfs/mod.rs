pub mod tempfs;

use alloc::sync::Arc;

pub type Path = str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// directory entry not found
    NotFound,
    /// Target destination already exists
    Exists,
    /// file is an executable that is currently running
    WriteDenied,
    /// the underlying device failed
    Io,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Exists => write!(f, "destination already exists"),
            Self::WriteDenied => write!(f, "writes to this file are denied"),
            Self::Io => write!(f, "input/output error"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// An open regular file.
///
/// Files have a fixed length once created: writes past the end are
/// truncated, matching the loader's expectation that a mapped file never
/// changes size underneath it.
pub trait File: Send + Sync {
    /// Read from the file into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes read, which is short only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    /// Write `buf` into the file starting at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;
    /// Length of the file in bytes.
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Refuse writes from every opener until a matching [`File::allow_write`].
    fn deny_write(&self);
    fn allow_write(&self);
}

/// A shared handle to an open file. The file is closed when the last
/// reference is dropped.
pub type FileRef = Arc<dyn File>;

pub trait FileSystem {
    fn open(&self, path: &Path) -> Result<FileRef>;
}
