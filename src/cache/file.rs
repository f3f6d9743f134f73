use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::types::AnyResult;

/// A single content-addressed, random-access cache file for one URL.
///
/// Reads and writes on the same instance are mutually exclusive (there is
/// exactly one file handle, guarded by a mutex); different instances are
/// fully independent. There is no eviction — a `FileCache` lives for as long
/// as its owning `CacheRegistry` entry does.
pub struct FileCache {
    url: String,
    cache_file: PathBuf,
    handle: Mutex<Option<File>>,
}

impl FileCache {
    pub fn open(url: impl Into<String>, cache_file: PathBuf) -> AnyResult<Self> {
        if let Some(parent) = cache_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&cache_file)?;
        Ok(Self {
            url: url.into(),
            cache_file,
            handle: Mutex::new(Some(file)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    pub fn exists(&self) -> bool {
        self.cache_file.exists() && self.length() > 0
    }

    pub fn length(&self) -> u64 {
        let guard = self.handle.lock();
        match guard.as_ref() {
            Some(f) => f.metadata().map(|m| m.len()).unwrap_or(0),
            None => 0,
        }
    }

    /// Writes `data` at `position`, extending the file sparsely if needed.
    /// A no-op once the cache is closed.
    pub fn write(&self, data: &[u8], position: u64) -> std::io::Result<()> {
        let mut guard = self.handle.lock();
        let Some(file) = guard.as_mut() else {
            return Ok(());
        };
        file.seek(SeekFrom::Start(position))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Reads up to `len` bytes starting at `position`. Returns fewer bytes
    /// than requested near EOF rather than padding; returns empty once
    /// closed.
    pub fn read(&self, position: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut guard = self.handle.lock();
        let Some(file) = guard.as_mut() else {
            return Ok(Vec::new());
        };
        file.seek(SeekFrom::Start(position))?;
        let mut buf = vec![0u8; len];
        let mut total = 0;
        loop {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if total == buf.len() {
                break;
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    /// Truncates the file to zero length, discarding cached bytes. Used when
    /// a WebM download turns out to disagree with its own `Content-Length`.
    pub fn invalidate(&self) -> std::io::Result<()> {
        let mut guard = self.handle.lock();
        if let Some(file) = guard.as_mut() {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }

    /// Idempotent: after close, reads return empty and writes are no-ops.
    pub fn close(&self) {
        let mut guard = self.handle.lock();
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open("u", dir.path().join("f.bin")).unwrap();
        cache.write(b"hello world", 0).unwrap();
        assert_eq!(cache.length(), 11);
        assert_eq!(cache.read(0, 5).unwrap(), b"hello");
        assert_eq!(cache.read(6, 100).unwrap(), b"world");
    }

    #[test]
    fn sparse_write_extends_length() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open("u", dir.path().join("f.bin")).unwrap();
        cache.write(b"x", 10).unwrap();
        assert_eq!(cache.length(), 11);
    }

    #[test]
    fn close_is_idempotent_and_silences_io() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open("u", dir.path().join("f.bin")).unwrap();
        cache.write(b"data", 0).unwrap();
        cache.close();
        cache.close();
        assert_eq!(cache.read(0, 4).unwrap(), Vec::<u8>::new());
        cache.write(b"more", 0).unwrap();
    }

    #[test]
    fn invalidate_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open("u", dir.path().join("f.bin")).unwrap();
        cache.write(b"data", 0).unwrap();
        cache.invalidate().unwrap();
        assert_eq!(cache.length(), 0);
        assert!(!cache.exists());
    }
}
