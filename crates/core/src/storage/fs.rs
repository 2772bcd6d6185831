use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_key, ObjectEntry, ObjectMeta, ObjectStore, StorageError, StoredObject};

pub(crate) const META_SUFFIX: &str = ".meta.json";

/// Object store rooted at a local directory. Metadata lives in a
/// `<object>.meta.json` sidecar next to each object.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(META_SUFFIX);
        PathBuf::from(os)
    }
}

fn unavailable(e: std::io::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, meta: ObjectMeta) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
        }

        let meta_json =
            serde_json::to_vec(&meta).map_err(|e| StorageError::Metadata(e.to_string()))?;

        // Write to a temp name then rename so readers never see a partial object.
        let tmp = {
            let mut os = path.as_os_str().to_owned();
            os.push(".partial");
            PathBuf::from(os)
        };
        tokio::fs::write(&tmp, &bytes).await.map_err(unavailable)?;
        tokio::fs::write(Self::meta_path(&path), meta_json)
            .await
            .map_err(unavailable)?;
        tokio::fs::rename(&tmp, &path).await.map_err(unavailable)?;

        tracing::debug!(key, size = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(e)),
        };

        let meta = match tokio::fs::read(Self::meta_path(&path)).await {
            Ok(raw) => {
                serde_json::from_slice(&raw).map_err(|e| StorageError::Metadata(e.to_string()))?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => ObjectMeta::default(),
            Err(e) => return Err(unavailable(e)),
        };

        Ok(Some(StoredObject { bytes, meta }))
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(unavailable(e)),
            };

            while let Some(entry) = read_dir.next_entry().await.map_err(unavailable)? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", rel, name)
                };
                let file_type = entry.file_type().await.map_err(unavailable)?;

                if file_type.is_dir() {
                    // Only descend where the prefix can still match.
                    let dir_key = format!("{}/", key);
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((entry.path(), key));
                    }
                } else if !name.ends_with(META_SUFFIX)
                    && !name.ends_with(".partial")
                    && key.starts_with(prefix)
                {
                    let size = entry.metadata().await.map_err(unavailable)?.len();
                    entries.push(ObjectEntry { key, size });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(unavailable(e)),
        };
        match tokio::fs::remove_file(Self::meta_path(&path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(unavailable(e)),
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let meta = ObjectMeta::new("text/plain").with("manuscript-id", "m1");
        store
            .put("u1/m1/20260101T000000Z_book.txt", b"hello".to_vec(), meta.clone())
            .await
            .unwrap();

        let obj = store
            .get("u1/m1/20260101T000000Z_book.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(obj.bytes, b"hello");
        assert_eq!(obj.meta, meta);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.get("u1/nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_prefix_skips_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        for key in ["u1/m1/a.txt", "u1/m1/a.txt-developmental.json", "u1/m2/b.txt", "u2/m3/c.txt"] {
            store
                .put(key, vec![1, 2, 3], ObjectMeta::default())
                .await
                .unwrap();
        }

        let listed = store.list("u1/m1/", 100).await.unwrap();
        let keys: Vec<_> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["u1/m1/a.txt", "u1/m1/a.txt-developmental.json"]);
        assert_eq!(listed[0].size, 3);

        let limited = store.list("u1/", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .put("u1/x.json", b"{}".to_vec(), ObjectMeta::new("application/json"))
            .await
            .unwrap();
        assert!(store.delete("u1/x.json").await.unwrap());
        assert!(!store.delete("u1/x.json").await.unwrap());
        assert!(store.get("u1/x.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let err = store
            .put("../outside", vec![], ObjectMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
