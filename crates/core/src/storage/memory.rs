use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{validate_key, ObjectEntry, ObjectMeta, ObjectStore, StorageError, StoredObject};

/// In-process object store. `set_unavailable` makes every call fail, which
/// lets tests exercise the transient-infrastructure paths.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, (Vec<u8>, ObjectMeta)>>,
    unavailable: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, meta: ObjectMeta) -> Result<(), StorageError> {
        self.check()?;
        validate_key(key)?;
        self.objects
            .write()
            .await
            .insert(key.to_string(), (bytes, meta));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        self.check()?;
        Ok(self
            .objects
            .read()
            .await
            .get(key)
            .map(|(bytes, meta)| StoredObject {
                bytes: bytes.clone(),
                meta: meta.clone(),
            }))
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectEntry>, StorageError> {
        self.check()?;
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, (bytes, _))| ObjectEntry {
                key: k.clone(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check()?;
        Ok(self.objects.write().await.remove(key).is_some())
    }
}
