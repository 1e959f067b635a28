//! Object store capability interface.
//!
//! The remote store is a key/value blob store: per-object size, an
//! opaque content fingerprint (possibly multipart-encoded), and mutable
//! key/value tags. Tag mutation is the only write side effect the
//! verification core performs. A mock implementation backs the tests;
//! the real AWS CLI backend lives in [`crate::aws`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackupError, BackupResult};
use crate::source::{BoxFuture, ByteStream};

/// Whether a listing entry is a real object or an empty path marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A stored blob.
    Object,
    /// An empty directory-style placeholder, skipped by the verifier.
    Placeholder,
}

/// Read-only view of one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Store key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Raw fingerprint string as reported by the store.
    pub fingerprint: String,
    /// Object or placeholder.
    pub kind: ObjectKind,
}

/// Capability interface over the remote object store.
pub trait ObjectStore: Send + Sync {
    /// Lists keys under a prefix.
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, BackupResult<Vec<String>>>;

    /// Size, fingerprint and kind of one object.
    fn info<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackupResult<ObjectInfo>>;

    /// Current tags of one object.
    fn get_tags<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, BackupResult<HashMap<String, String>>>;

    /// Merges tags into an object's tag set. Idempotent.
    fn put_tags<'a>(
        &'a self,
        key: &'a str,
        tags: HashMap<String, String>,
    ) -> BoxFuture<'a, BackupResult<()>>;

    /// Uploads a stream as a new object.
    fn put<'a>(
        &'a self,
        key: &'a str,
        stream: ByteStream,
        size_hint: u64,
        storage_class: Option<&'a str>,
        metadata: HashMap<String, String>,
    ) -> BoxFuture<'a, BackupResult<()>>;
}

/// Operation counters for the mock store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockStoreStats {
    /// Number of list operations.
    pub lists: u64,
    /// Number of info lookups.
    pub infos: u64,
    /// Number of tag reads.
    pub tag_reads: u64,
    /// Number of tag writes.
    pub tag_writes: u64,
    /// Number of uploads.
    pub puts: u64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    size: u64,
    fingerprint: String,
    kind: ObjectKind,
    storage_class: Option<String>,
    metadata: HashMap<String, String>,
}

/// In-memory object store for testing.
///
/// Uploads are drained, fingerprinted with a whole-object digest and
/// recorded; listing order is key order.
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    tags: Mutex<HashMap<String, HashMap<String, String>>>,
    stats: Mutex<MockStoreStats>,
}

impl MockObjectStore {
    /// Creates an empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object with an explicit size and fingerprint.
    pub fn seed_object(&self, key: &str, size: u64, fingerprint: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                size,
                fingerprint: fingerprint.to_string(),
                kind: ObjectKind::Object,
                storage_class: None,
                metadata: HashMap::new(),
            },
        );
    }

    /// Seeds an empty path-marker entry.
    pub fn seed_placeholder(&self, key: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                size: 0,
                fingerprint: String::new(),
                kind: ObjectKind::Placeholder,
                storage_class: None,
                metadata: HashMap::new(),
            },
        );
    }

    /// Seeds a tag on an object.
    pub fn seed_tag(&self, key: &str, tag: &str, value: &str) {
        self.tags
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(tag.to_string(), value.to_string());
    }

    /// Current tags of an object, for assertions.
    pub fn tags_for(&self, key: &str) -> HashMap<String, String> {
        self.tags.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    /// Size, fingerprint, storage class and metadata of an uploaded
    /// object, for assertions.
    pub fn uploaded(&self, key: &str) -> Option<(u64, String, Option<String>, HashMap<String, String>)> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| (o.size, o.fingerprint.clone(), o.storage_class.clone(), o.metadata.clone()))
    }

    /// Operation counters.
    pub fn stats(&self) -> MockStoreStats {
        self.stats.lock().unwrap().clone()
    }
}

impl ObjectStore for MockObjectStore {
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, BackupResult<Vec<String>>> {
        let keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        self.stats.lock().unwrap().lists += 1;
        Box::pin(async move {
            debug!(count = keys.len(), "mock list");
            Ok(keys)
        })
    }

    fn info<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackupResult<ObjectInfo>> {
        let found = self.objects.lock().unwrap().get(key).cloned();
        self.stats.lock().unwrap().infos += 1;
        Box::pin(async move {
            let obj = found.ok_or_else(|| BackupError::Store {
                op: "info".to_string(),
                reason: format!("no such key: {}", key),
            })?;
            Ok(ObjectInfo {
                key: key.to_string(),
                size: obj.size,
                fingerprint: obj.fingerprint,
                kind: obj.kind,
            })
        })
    }

    fn get_tags<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, BackupResult<HashMap<String, String>>> {
        let tags = self.tags.lock().unwrap().get(key).cloned().unwrap_or_default();
        self.stats.lock().unwrap().tag_reads += 1;
        Box::pin(async move { Ok(tags) })
    }

    fn put_tags<'a>(
        &'a self,
        key: &'a str,
        tags: HashMap<String, String>,
    ) -> BoxFuture<'a, BackupResult<()>> {
        self.tags
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(tags);
        self.stats.lock().unwrap().tag_writes += 1;
        Box::pin(async move { Ok(()) })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        mut stream: ByteStream,
        size_hint: u64,
        storage_class: Option<&'a str>,
        metadata: HashMap<String, String>,
    ) -> BoxFuture<'a, BackupResult<()>> {
        Box::pin(async move {
            let mut hasher = Md5::new();
            let mut size = 0u64;
            let mut buf = [0u8; 8192];
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                size += n as u64;
            }
            stream.finish().await?;
            debug!(key = %key, size = size, size_hint = size_hint, "mock put");
            self.objects.lock().unwrap().insert(
                key.to_string(),
                StoredObject {
                    size,
                    fingerprint: hex::encode(hasher.finalize()),
                    kind: ObjectKind::Object,
                    storage_class: storage_class.map(String::from),
                    metadata,
                },
            );
            self.stats.lock().unwrap().puts += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_seed_and_info() {
        let store = MockObjectStore::new();
        store.seed_object("tank_AT_monthly-1", 1000, "abcd");

        let info = store.info("tank_AT_monthly-1").await.unwrap();
        assert_eq!(info.size, 1000);
        assert_eq!(info.fingerprint, "abcd");
        assert_eq!(info.kind, ObjectKind::Object);
    }

    #[tokio::test]
    async fn test_info_missing_key() {
        let store = MockObjectStore::new();
        assert!(store.info("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_list_respects_prefix() {
        let store = MockObjectStore::new();
        store.seed_object("backups/a", 1, "x");
        store.seed_object("backups/b", 1, "y");
        store.seed_object("other/c", 1, "z");

        let keys = store.list("backups/").await.unwrap();
        assert_eq!(keys, vec!["backups/a", "backups/b"]);
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_tag_merge_semantics() {
        let store = MockObjectStore::new();
        store.seed_object("k", 1, "x");
        store.seed_tag("k", "existing", "1");

        let mut tags = HashMap::new();
        tags.insert("new".to_string(), "2".to_string());
        store.put_tags("k", tags).await.unwrap();

        let all = store.get_tags("k").await.unwrap();
        assert_eq!(all.get("existing").map(String::as_str), Some("1"));
        assert_eq!(all.get("new").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_put_tags_idempotent() {
        let store = MockObjectStore::new();
        store.seed_object("k", 1, "x");

        let mut tags = HashMap::new();
        tags.insert("confirmed".to_string(), "true".to_string());
        store.put_tags("k", tags.clone()).await.unwrap();
        store.put_tags("k", tags).await.unwrap();

        assert_eq!(store.tags_for("k").len(), 1);
    }

    #[tokio::test]
    async fn test_put_records_upload() {
        let store = MockObjectStore::new();
        let mut metadata = HashMap::new();
        metadata.insert("parent".to_string(), "tank@monthly-1".to_string());

        let stream = ByteStream::from_reader(Cursor::new(b"hello world".to_vec()));
        store
            .put("tank_AT_daily-1", stream, 11, Some("DEEP_ARCHIVE"), metadata)
            .await
            .unwrap();

        let (size, fingerprint, class, metadata) = store.uploaded("tank_AT_daily-1").unwrap();
        assert_eq!(size, 11);
        assert_eq!(fingerprint, "5eb63bbbe01eeed093cb22bb8f5acdc0");
        assert_eq!(class.as_deref(), Some("DEEP_ARCHIVE"));
        assert_eq!(metadata.get("parent").map(String::as_str), Some("tank@monthly-1"));
        assert_eq!(store.stats().puts, 1);
    }

    #[tokio::test]
    async fn test_placeholder_kind() {
        let store = MockObjectStore::new();
        store.seed_placeholder("backups/");
        let info = store.info("backups/").await.unwrap();
        assert_eq!(info.kind, ObjectKind::Placeholder);
    }
}
