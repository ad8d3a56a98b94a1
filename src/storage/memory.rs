//! In-memory blob container.
//!
//! Blobs are held in a `tokio::sync::RwLock<HashMap<...>>`. A configurable
//! limit (`max_size_bytes`) caps the total stored bytes; 0 means unlimited.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::backend::{
    compute_etag, content_type_for, validate_blob_name, BlobError, BlobInfo, BlobResult,
    BlobStore, StoredBlob,
};

pub struct MemoryBlobStore {
    container: String,
    /// name -> (data, etag).
    blobs: tokio::sync::RwLock<HashMap<String, (Bytes, String)>>,
    max_size_bytes: u64,
}

impl MemoryBlobStore {
    pub fn new(container: impl Into<String>, max_size_bytes: u64) -> Self {
        Self {
            container: container.into(),
            blobs: tokio::sync::RwLock::new(HashMap::new()),
            max_size_bytes,
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn container(&self) -> &str {
        &self.container
    }

    fn put(
        &self,
        name: &str,
        data: Bytes,
        overwrite: bool,
    ) -> Pin<Box<dyn Future<Output = BlobResult<BlobInfo>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            validate_blob_name(&name)?;
            let mut blobs = self.blobs.write().await;

            let replaced = match blobs.get(&name) {
                Some(_) if !overwrite => return Err(BlobError::AlreadyExists(name)),
                Some((old, _)) => old.len() as u64,
                None => 0,
            };
            if self.max_size_bytes > 0 {
                let current: u64 = blobs.values().map(|(d, _)| d.len() as u64).sum();
                let available = self.max_size_bytes.saturating_sub(current - replaced);
                let needed = data.len() as u64;
                if needed > available {
                    return Err(BlobError::Full { needed, available });
                }
            }

            let etag = compute_etag(&data);
            let size = data.len() as u64;
            blobs.insert(name.clone(), (data, etag.clone()));
            Ok(BlobInfo { name, size, etag })
        })
    }

    fn get(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = BlobResult<Option<StoredBlob>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            validate_blob_name(&name)?;
            let blobs = self.blobs.read().await;
            Ok(blobs.get(&name).map(|(data, etag)| StoredBlob {
                data: data.clone(),
                etag: etag.clone(),
                content_type: content_type_for(&name),
            }))
        })
    }

    fn delete(&self, name: &str) -> Pin<Box<dyn Future<Output = BlobResult<bool>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            validate_blob_name(&name)?;
            Ok(self.blobs.write().await.remove(&name).is_some())
        })
    }

    fn exists(&self, name: &str) -> Pin<Box<dyn Future<Output = BlobResult<bool>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            validate_blob_name(&name)?;
            Ok(self.blobs.read().await.contains_key(&name))
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = BlobResult<Vec<BlobInfo>>> + Send + '_>> {
        Box::pin(async move {
            let blobs = self.blobs.read().await;
            let mut infos: Vec<BlobInfo> = blobs
                .iter()
                .map(|(name, (data, etag))| BlobInfo {
                    name: name.clone(),
                    size: data.len() as u64,
                    etag: etag.clone(),
                })
                .collect();
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(infos)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryBlobStore::new("productimages", 0);
        let info = store
            .put("a.png", Bytes::from_static(b"png"), false)
            .await
            .unwrap();
        assert_eq!(info.size, 3);

        let blob = store.get("a.png").await.unwrap().unwrap();
        assert_eq!(blob.data, Bytes::from_static(b"png"));
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(blob.etag, info.etag);

        assert!(store.delete("a.png").await.unwrap());
        assert!(!store.delete("a.png").await.unwrap());
        assert!(store.get("a.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_without_overwrite_conflicts() {
        let store = MemoryBlobStore::new("contracts", 0);
        store.put("c.pdf", Bytes::from_static(b"1"), false).await.unwrap();
        let err = store
            .put("c.pdf", Bytes::from_static(b"2"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists(_)));

        store.put("c.pdf", Bytes::from_static(b"22"), true).await.unwrap();
        assert_eq!(store.list().await.unwrap()[0].size, 2);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let store = MemoryBlobStore::new("small", 10);
        store.put("a", Bytes::from(vec![0u8; 8]), false).await.unwrap();
        let err = store
            .put("b", Bytes::from(vec![0u8; 3]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Full { needed: 3, available: 2 }));
        // Replacing a blob only counts the difference.
        store.put("a", Bytes::from(vec![0u8; 10]), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let store = MemoryBlobStore::new("c", 0);
        for name in ["b", "c", "a"] {
            store.put(name, Bytes::from_static(b"x"), false).await.unwrap();
        }
        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let store = MemoryBlobStore::new("c", 0);
        assert!(matches!(
            store.get("../x").await.unwrap_err(),
            BlobError::InvalidName(_)
        ));
    }
}
