use crate::sync::mutex::Mutex;
use crate::vfs::{Error, File, FileRef, FileSystem, Path, Result};
use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::{
    cmp::min,
    sync::atomic::{AtomicUsize, Ordering},
};

/// A file held entirely in kernel memory.
pub struct TempFile {
    data: Mutex<Vec<u8>>,
    deny_write_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl TempFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
            deny_write_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        }
    }

    /// Number of successful [`File::write_at`] calls so far.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

fn span(len: usize, offset: u64, want: usize) -> Option<(usize, usize)> {
    let start = usize::try_from(offset).ok()?;
    if start >= len {
        return None;
    }
    Some((start, min(len, start.saturating_add(want))))
}

impl File for TempFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.lock();
        let Some((start, end)) = span(data.len(), offset, buf.len()) else {
            return Ok(0);
        };
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        if self.deny_write_count.load(Ordering::Acquire) > 0 {
            return Err(Error::WriteDenied);
        }
        let mut data = self.data.lock();
        let Some((start, end)) = span(data.len(), offset, buf.len()) else {
            return Ok(0);
        };
        data[start..end].copy_from_slice(&buf[..end - start]);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(end - start)
    }

    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn deny_write(&self) {
        self.deny_write_count.fetch_add(1, Ordering::AcqRel);
    }

    fn allow_write(&self) {
        let prev = self.deny_write_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "tempfs: allow_write without deny_write");
    }
}

/// in-memory filesystem with a flat namespace
#[derive(Default)]
pub struct TempFs {
    files: Mutex<BTreeMap<String, Arc<TempFile>>>,
}

impl TempFs {
    pub fn new() -> TempFs {
        Self::default()
    }

    /// Create a file holding `data`. Fails if `path` is already taken.
    pub fn create(&self, path: &Path, data: Vec<u8>) -> Result<Arc<TempFile>> {
        let mut files = self.files.lock();
        if files.contains_key(path) {
            return Err(Error::Exists);
        }
        let file = Arc::new(TempFile::new(data));
        files.insert(String::from(path), file.clone());
        Ok(file)
    }
}

impl FileSystem for TempFs {
    fn open(&self, path: &Path) -> Result<FileRef> {
        let files = self.files.lock();
        let file = files.get(path).ok_or(Error::NotFound)?;
        Ok(file.clone() as FileRef)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn reads_stop_at_end_of_file() {
        let fs = TempFs::new();
        fs.create("a", vec![1, 2, 3]).unwrap();
        let file = fs.open("a").unwrap();

        let mut buf = [0; 8];
        assert_eq!(file.read_at(1, &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[2, 3]);
        assert_eq!(file.read_at(3, &mut buf), Ok(0));
        assert_eq!(file.read_at(u64::MAX, &mut buf), Ok(0));
    }

    #[test]
    fn writes_never_grow_the_file() {
        let fs = TempFs::new();
        let file = fs.create("a", vec![0; 4]).unwrap();
        assert_eq!(file.write_at(2, &[9, 9, 9, 9]), Ok(2));
        assert_eq!(file.contents(), vec![0, 0, 9, 9]);
        assert_eq!(file.len(), 4);
        assert_eq!(file.write_count(), 1);
    }

    #[test]
    fn deny_write_applies_to_every_opener() {
        let fs = TempFs::new();
        fs.create("prog", vec![0; 4]).unwrap();
        let a = fs.open("prog").unwrap();
        let b = fs.open("prog").unwrap();

        a.deny_write();
        assert_eq!(b.write_at(0, &[1]), Err(Error::WriteDenied));
        a.allow_write();
        assert_eq!(b.write_at(0, &[1]), Ok(1));
    }

    #[test]
    fn missing_and_duplicate_paths() {
        let fs = TempFs::new();
        assert_eq!(fs.open("nope").err(), Some(Error::NotFound));
        fs.create("a", vec![]).unwrap();
        assert_eq!(fs.create("a", vec![]).err(), Some(Error::Exists));
        assert!(fs.open("a").unwrap().is_empty());
    }
}
