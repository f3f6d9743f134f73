use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::file::FileCache;
use crate::cache::key::cache_filename;
use crate::common::types::AnyResult;

/// Process-wide URL -> `FileCache` mapping. There is exactly one `FileCache`
/// per URL for the lifetime of the registry.
pub struct CacheRegistry {
    entries: DashMap<String, Arc<FileCache>>,
    cache_dir: PathBuf,
}

impl CacheRegistry {
    pub fn new(cache_dir: PathBuf) -> AnyResult<Arc<Self>> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Arc::new(Self {
            entries: DashMap::new(),
            cache_dir,
        }))
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Returns the existing `FileCache` for `url`, or atomically creates one.
    pub fn get_file_cache(&self, url: &str) -> AnyResult<Arc<FileCache>> {
        if let Some(existing) = self.entries.get(url) {
            return Ok(existing.clone());
        }

        let path = self.cache_dir.join(cache_filename(url));
        let entry = self
            .entries
            .entry(url.to_string())
            .or_try_insert_with(|| FileCache::open(url, path).map(Arc::new))?;
        Ok(entry.clone())
    }

    /// Drops all cache entries and closes their file handles. Does not
    /// delete files on disk.
    pub fn release(&self) {
        for entry in self.entries.iter() {
            entry.value().close();
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_file_cache_is_idempotent_per_url() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CacheRegistry::new(dir.path().to_path_buf()).unwrap();
        let a = registry.get_file_cache("https://example.com/v.mp4").unwrap();
        let b = registry.get_file_cache("https://example.com/v.mp4").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_urls_get_distinct_caches() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CacheRegistry::new(dir.path().to_path_buf()).unwrap();
        let a = registry.get_file_cache("https://example.com/a.mp4").unwrap();
        let b = registry.get_file_cache("https://example.com/b.mp4").unwrap();
        assert_ne!(a.cache_file(), b.cache_file());
    }
}
