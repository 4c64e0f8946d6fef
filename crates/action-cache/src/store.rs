use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::CacheError;
use crate::fs::{layout, reader, writer};
use crate::model::{CacheEntry, CacheListing};

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` on a plain miss, `Err(CacheError::Schema)` for an unusable document.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;
    async fn put(&self, key: &str, entry: &CacheEntry) -> CacheResult<()>;
    /// Whether an entry existed.
    async fn remove(&self, key: &str) -> CacheResult<bool>;
    /// Readable entries, newest first. Unusable documents are skipped.
    async fn list(&self) -> CacheResult<Vec<CacheListing>>;
    /// Number of entries removed.
    async fn clear(&self) -> CacheResult<usize>;
}

/// One pretty-printed JSON document per key under a directory.
#[derive(Clone, Debug)]
pub struct FileCacheStore {
    root: PathBuf,
}

impl FileCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> CacheResult<PathBuf> {
        if !layout::is_valid_key(key) {
            return Err(CacheError::InvalidRequest(format!("malformed cache key '{key}'")));
        }
        Ok(layout::entry_path(&self.root, key))
    }

    async fn entry_keys(&self) -> CacheResult<Vec<(String, PathBuf)>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if let Some(key) = layout::key_of(&path) {
                keys.push((key, path));
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let path = self.path_for(key)?;
        reader::read_entry(&path).await
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let path = self.path_for(key)?;
        let written = writer::write_entry(path, entry).await?;
        debug!(target: "action-cache", path = %written.display(), actions = entry.actions.len(), "Stored cache entry");
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<bool> {
        let path = self.path_for(key)?;
        Ok(writer::remove_file(&path).await?)
    }

    async fn list(&self) -> CacheResult<Vec<CacheListing>> {
        let mut listings = Vec::new();
        for (key, path) in self.entry_keys().await? {
            match reader::read_entry(&path).await {
                Ok(Some(entry)) => listings.push(CacheListing {
                    key,
                    instruction: entry.instruction,
                    url: entry.url,
                    actions: entry.actions.len(),
                    timestamp: entry.timestamp,
                }),
                Ok(None) => {}
                Err(err) => warn!(target: "action-cache", %key, "Skipping unreadable cache entry: {}", err),
            }
        }
        listings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(listings)
    }

    async fn clear(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for (_, path) in self.entry_keys().await? {
            if writer::remove_file(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::cache_key;
    use crate::model::{CachedAction, CACHE_VERSION};
    use chrono::Utc;

    fn entry(instruction: &str) -> CacheEntry {
        CacheEntry {
            version: CACHE_VERSION,
            instruction: instruction.into(),
            url: "https://example.com/".into(),
            variable_keys: Vec::new(),
            actions: vec![CachedAction::new("#go", "click").with_description("Go button")],
            message: "clicked".into(),
            action_description: "click go".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entries_round_trip_through_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache"));
        let key = cache_key("click go", "https://example.com/", []);

        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());

        store.put(&key, &entry("click go")).await.unwrap();
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.actions[0].selector, "#go");

        let text = std::fs::read_to_string(dir.path().join("cache").join(format!("{key}.json"))).unwrap();
        assert!(text.contains("\n  \"version\": 1"));
        assert!(text.contains("\"variableKeys\": []"));
        assert!(text.contains("\"actionDescription\""));

        let other = cache_key("click stop", "https://example.com/", []);
        store.put(&other, &entry("click stop")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].instruction, "click stop");

        assert!(store.remove(&key).await.unwrap());
        assert!(!store.remove(&key).await.unwrap());
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unusable_documents_are_schema_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        let garbled = cache_key("a", "u", []);
        let future = cache_key("b", "u", []);

        std::fs::write(dir.path().join(format!("{garbled}.json")), b"{ not json").unwrap();
        let mut newer = serde_json::to_value(entry("b")).unwrap();
        newer["version"] = 2.into();
        std::fs::write(dir.path().join(format!("{future}.json")), newer.to_string()).unwrap();

        assert!(store.get(&garbled).await.unwrap_err().is_schema());
        assert!(store.get(&future).await.unwrap_err().is_schema());
        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(store.get("../etc/passwd").await, Err(CacheError::InvalidRequest(_))));
    }
}
