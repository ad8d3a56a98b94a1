//! Local filesystem blob container.
//!
//! Each container is a directory `{root}/{container}` holding one flat file
//! per blob. All writes follow crash-only design: write to a temp file under
//! `{root}/.tmp`, fsync, rename.

use bytes::Bytes;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;

use super::backend::{
    compute_etag, content_type_for, validate_blob_name, BlobError, BlobInfo, BlobResult,
    BlobStore, StoredBlob,
};

pub struct LocalBlobStore {
    container: String,
    root: PathBuf,
    dir: PathBuf,
}

impl LocalBlobStore {
    /// Open (creating if needed) `container` under `root`.
    pub fn new(root: impl Into<PathBuf>, container: impl Into<String>) -> anyhow::Result<Self> {
        let root = root.into();
        let container = container.into();
        if validate_blob_name(&container).is_err() {
            anyhow::bail!("invalid container name {:?}", container);
        }
        let dir = root.join(&container);
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            container,
            root,
            dir,
        })
    }

    /// Path of blob `name`. Names are validated flat, so the path cannot leave
    /// the container directory.
    fn resolve(&self, name: &str) -> BlobResult<PathBuf> {
        validate_blob_name(name)?;
        Ok(self.dir.join(name))
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }
}

impl BlobStore for LocalBlobStore {
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
            let final_path = self.resolve(&name)?;
            if !overwrite && final_path.is_file() {
                return Err(BlobError::AlreadyExists(name));
            }

            let etag = compute_etag(&data);

            // Crash-only: temp-fsync-rename pattern.
            let tmp_path = self.temp_path();
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&tmp_path, &final_path)?;

            Ok(BlobInfo {
                name,
                size: data.len() as u64,
                etag,
            })
        })
    }

    fn get(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = BlobResult<Option<StoredBlob>>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let path = self.resolve(&name)?;
            let data = match std::fs::read(&path) {
                Ok(data) => Bytes::from(data),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            Ok(Some(StoredBlob {
                etag: compute_etag(&data),
                content_type: content_type_for(&name),
                data,
            }))
        })
    }

    fn delete(&self, name: &str) -> Pin<Box<dyn Future<Output = BlobResult<bool>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let path = self.resolve(&name)?;
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn exists(&self, name: &str) -> Pin<Box<dyn Future<Output = BlobResult<bool>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let path = self.resolve(&name)?;
            Ok(path.is_file())
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = BlobResult<Vec<BlobInfo>>> + Send + '_>> {
        Box::pin(async move {
            let mut infos = Vec::new();
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                let data = std::fs::read(entry.path())?;
                infos.push(BlobInfo {
                    name,
                    size: data.len() as u64,
                    etag: compute_etag(&data),
                });
            }
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(infos)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
