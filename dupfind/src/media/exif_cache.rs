//! Process-lifetime EXIF lookup cache, mirroring `media.cpp`'s `propCache`:
//! a single `QHash` behind a `QMutex`, keyed on `path + tag list`.
//!
//! Reading EXIF tags is the decoder layer's job (`dupfind-decoders`); this
//! module only owns the cache and the key convention, so it depends on no
//! particular image format crate.

use std::collections::HashMap;
use std::sync::Mutex;

/// Something that can read a set of EXIF tag values from a path. Implemented
/// by `dupfind-decoders` over the `image`/`kamadak-exif`-style tag tables;
/// kept as a trait here so `dupfind` itself stays decoder-agnostic.
pub trait ExifReader {
    /// Read `keys` from the file at `path`, returning one `Option<String>`
    /// per requested key, in the same order, `None` for tags that are
    /// absent or unreadable.
    fn read_exif_keys(&self, path: &str, keys: &[String]) -> Vec<Option<String>>;
}

/// Caches EXIF reads keyed by `path:key1,key2,...`, exactly as in
/// `media.cpp`'s `propertyFunc`'s `exif` branch.
#[derive(Default)]
pub struct ExifCache {
    entries: Mutex<HashMap<String, Vec<Option<String>>>>,
}

impl ExifCache {
    /// A fresh, empty cache.
    pub fn new() -> Self {
        ExifCache { entries: Mutex::new(HashMap::new()) }
    }

    /// Read `keys` for `path` through `reader`, caching the result for
    /// subsequent lookups with the same `(path, keys)` pair.
    pub fn read(
        &self,
        reader: &dyn ExifReader,
        path: &str,
        keys: &[String],
    ) -> Vec<Option<String>> {
        let cache_key = format!("{path}:{}", keys.join(","));
        if let Some(cached) = self.entries.lock().unwrap().get(&cache_key) {
            return cached.clone();
        }
        let values = reader.read_exif_keys(path, keys);
        self.entries.lock().unwrap().insert(cache_key, values.clone());
        values
    }

    /// Number of cached entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingReader {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ExifReader for CountingReader {
        fn read_exif_keys(&self, _path: &str, keys: &[String]) -> Vec<Option<String>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            keys.iter().map(|k| Some(format!("value-for-{k}"))).collect()
        }
    }

    #[test]
    fn caches_repeat_lookups() {
        let reader = CountingReader { calls: std::sync::atomic::AtomicUsize::new(0) };
        let cache = ExifCache::new();
        let keys = vec!["Make".to_string(), "Model".to_string()];
        let first = cache.read(&reader, "a.jpg", &keys);
        let second = cache.read(&reader, "a.jpg", &keys);
        assert_eq!(first, second);
        assert_eq!(reader.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn distinguishes_by_path_and_keys() {
        let reader = CountingReader { calls: std::sync::atomic::AtomicUsize::new(0) };
        let cache = ExifCache::new();
        let keys = vec!["Make".to_string()];
        cache.read(&reader, "a.jpg", &keys);
        cache.read(&reader, "b.jpg", &keys);
        assert_eq!(reader.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }
}
