use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{COLLECTIONS, RecordStore, StoreError, validate_key};

const RECORD_EXTENSION: &str = ".json";

/// Number of lock shards guarding record mutations
const LOCK_SHARDS: usize = 64;

/// File-backed store: one `<collection>/<id>.json` file per record
///
/// Writes go to a hidden staging file in the collection directory first and
/// are moved into place afterwards, so a reader never sees a partial record.
/// Create, update and delete of the same record are serialized, so an update
/// can never bring back a record a concurrent delete removed.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
    locks: Arc<[Mutex<()>]>,
}

impl FileStore {
    /// Open a store rooted at `base_dir`, creating it and the well-known
    /// collections if needed
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let locks = (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect();
        let store = Self { base_dir: base_dir.into(), locks };

        for collection in COLLECTIONS {
            fs::create_dir_all(store.base_dir.join(collection)).await?;
        }

        debug!(path = %store.base_dir.display(), "Record store opened");
        Ok(store)
    }

    #[cfg(test)]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn lock_shard(&self, path: &Path) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.locks[(hasher.finish() % self.locks.len() as u64) as usize]
    }

    /// Exclusive access to mutate the record stored at `path`
    async fn lock_record(&self, path: &Path) -> MutexGuard<'_, ()> {
        self.lock_shard(path).lock().await
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, StoreError> {
        validate_key(collection)?;
        Ok(self.base_dir.join(collection))
    }

    fn record_path(&self, collection: &str, id: &str) -> Result<PathBuf, StoreError> {
        validate_key(id)?;
        Ok(self.collection_dir(collection)?.join(format!("{id}{RECORD_EXTENSION}")))
    }

    /// Serialize `payload` into a synced staging file next to its final location
    async fn stage(&self, dir: &Path, id: &str, payload: &Value) -> Result<PathBuf, StoreError> {
        let bytes = serde_json::to_vec(payload).map_err(StoreError::Serialize)?;
        fs::create_dir_all(dir).await?;

        let staging = dir.join(format!(".{id}.{:016x}.tmp", rand::random::<u64>()));
        let result = async {
            let mut file = fs::OpenOptions::new().write(true).create_new(true).open(&staging).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;

        match result {
            Ok(()) => Ok(staging),
            Err(e) => {
                discard(&staging).await;
                Err(e.into())
            }
        }
    }
}

async fn discard(staging: &Path) {
    if let Err(e) = fs::remove_file(staging).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %staging.display(), "Failed to remove staging file: {}", e);
        }
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn create(&self, collection: &str, id: &str, payload: &Value) -> Result<(), StoreError> {
        let path = self.record_path(collection, id)?;
        let dir = self.collection_dir(collection)?;
        let staging = self.stage(&dir, id, payload).await?;

        // A hard link never replaces an existing file, which makes this an
        // atomic create-if-absent
        let linked = {
            let _lock = self.lock_record(&path).await;
            fs::hard_link(&staging, &path).await
        };
        discard(&staging).await;

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::already_exists(collection, id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Value, StoreError> {
        let path = self.record_path(collection, id)?;

        let bytes = fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::not_found(collection, id),
            _ => e.into(),
        })?;

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
            collection: collection.to_string(),
            id: id.to_string(),
            source,
        })
    }

    async fn update(&self, collection: &str, id: &str, payload: &Value) -> Result<(), StoreError> {
        let path = self.record_path(collection, id)?;
        let dir = self.collection_dir(collection)?;
        let staging = self.stage(&dir, id, payload).await?;

        // The existence check and the rename must not interleave with a delete
        let replaced = {
            let _lock = self.lock_record(&path).await;
            match fs::try_exists(&path).await {
                Ok(true) => fs::rename(&staging, &path).await.map_err(StoreError::from),
                Ok(false) => Err(StoreError::not_found(collection, id)),
                Err(e) => Err(e.into()),
            }
        };

        if replaced.is_err() {
            discard(&staging).await;
        }
        replaced
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(collection, id)?;
        let _lock = self.lock_record(&path).await;

        fs::remove_file(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::not_found(collection, id),
            _ => e.into(),
        })
    }

    async fn list(&self, collection: &str) -> Result<BTreeSet<String>, StoreError> {
        let dir = self.collection_dir(collection)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(id) = file_name.to_str().and_then(|name| name.strip_suffix(RECORD_EXTENSION))
            else {
                continue;
            };

            if validate_key(id).is_ok() {
                ids.insert(id.to_string());
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_creates_collections() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data")).await.unwrap();

        for collection in COLLECTIONS {
            assert!(store.base_dir().join(collection).is_dir());
            assert!(store.list(collection).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let payload = json!({"id": "a", "nested": {"values": [1, 2, 3]}});

        store.create("checks", "a", &payload).await.unwrap();
        assert_eq!(store.read("checks", "a").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.create("users", "0705465771", &json!({"first": 1})).await.unwrap();
        let err = store.create("users", "0705465771", &json!({"second": 2})).await.unwrap_err();

        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.read("users", "0705465771").await.unwrap(), json!({"first": 1}));
    }

    #[tokio::test]
    async fn test_update_replaces_whole_payload() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store
            .create("checks", "a", &json!({"state": "down", "extra": "a much longer leftover value"}))
            .await
            .unwrap();
        store.update("checks", "a", &json!({"state": "up"})).await.unwrap();

        assert_eq!(store.read("checks", "a").await.unwrap(), json!({"state": "up"}));
        let raw = std::fs::read_to_string(dir.path().join("checks/a.json")).unwrap();
        assert_eq!(raw, r#"{"state":"up"}"#);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        assert!(matches!(store.read("checks", "nope").await, Err(StoreError::NotFound { .. })));
        assert!(matches!(
            store.update("checks", "nope", &json!({})).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(store.delete("checks", "nope").await, Err(StoreError::NotFound { .. })));
        // update must not have created the record
        assert!(store.list("checks").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_after_delete() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        for id in ["a", "b", "c"] {
            store.create("checks", id, &json!({"id": id})).await.unwrap();
        }
        store.delete("checks", "b").await.unwrap();

        let ids: Vec<_> = store.list("checks").await.unwrap().into_iter().collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_list_ignores_staging_and_foreign_files() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.create("checks", "a", &json!({})).await.unwrap();
        std::fs::write(dir.path().join("checks/.a.0000000000000001.tmp"), "{").unwrap();
        std::fs::write(dir.path().join("checks/notes.txt"), "hello").unwrap();

        let ids: Vec<_> = store.list("checks").await.unwrap().into_iter().collect();
        assert_eq!(ids, vec!["a"]);
        assert!(store.list("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("checks/broken.json"), "{\"state\":").unwrap();

        assert!(matches!(store.read("checks", "broken").await, Err(StoreError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_invalid_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        assert!(matches!(
            store.create("checks", "../escape", &json!({})).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.read("../etc", "passwd").await, Err(StoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_concurrent_updates_on_different_ids() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());

        for i in 0..16 {
            store.create("checks", &format!("id{i}"), &json!({"n": 0})).await.unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.update("checks", &format!("id{i}"), &json!({"n": i})).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            assert_eq!(store.read("checks", &format!("id{i}")).await.unwrap(), json!({"n": i}));
        }
        assert_eq!(store.list("checks").await.unwrap().len(), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_racing_delete_never_resurrects() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());

        for round in 0..200 {
            store.create("checks", "racy", &json!({"round": round})).await.unwrap();

            let updater = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.update("checks", "racy", &json!({"updated": true})).await })
            };
            let deleter = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.delete("checks", "racy").await })
            };

            let updated = updater.await.unwrap();
            deleter.await.unwrap().unwrap();

            // Whatever the order, a successful delete leaves the record gone
            assert!(
                matches!(store.read("checks", "racy").await, Err(StoreError::NotFound { .. })),
                "record came back in round {round} (update result: {updated:?})"
            );
        }

        // Staging files of rejected updates are cleaned up
        assert_eq!(std::fs::read_dir(dir.path().join("checks")).unwrap().count(), 0);
    }
}
