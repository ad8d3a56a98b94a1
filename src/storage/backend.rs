//! Abstract blob store trait.
//!
//! A [`BlobStore`] is one flat container of named blobs: the product image
//! container and the contracts file share are two instances. Implementations
//! decide where the bytes physically live.

use bytes::Bytes;
use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob name {0:?}")]
    InvalidName(String),

    #[error("blob {0} already exists")]
    AlreadyExists(String),

    #[error("container is full: {needed} bytes needed, {available} available")]
    Full { needed: u64, available: u64 },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::Io(err.into())
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Listing entry for one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub size: u64,
    /// Quoted hex MD5 of the content.
    pub etag: String,
}

/// A blob's data plus the metadata needed to serve it.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub etag: String,
    pub content_type: &'static str,
}

/// Async blob container contract.
pub trait BlobStore: Send + Sync + 'static {
    /// Container (or share) name, used to build public URLs.
    fn container(&self) -> &str;

    /// Write a blob. With `overwrite == false` an existing blob is an error.
    fn put(
        &self,
        name: &str,
        data: Bytes,
        overwrite: bool,
    ) -> Pin<Box<dyn Future<Output = BlobResult<BlobInfo>> + Send + '_>>;

    /// Read a blob. A missing blob is `Ok(None)`.
    fn get(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = BlobResult<Option<StoredBlob>>> + Send + '_>>;

    /// Delete a blob if it exists. Returns whether it existed.
    fn delete(&self, name: &str) -> Pin<Box<dyn Future<Output = BlobResult<bool>> + Send + '_>>;

    fn exists(&self, name: &str) -> Pin<Box<dyn Future<Output = BlobResult<bool>> + Send + '_>>;

    /// All blobs, sorted by name.
    fn list(&self) -> Pin<Box<dyn Future<Output = BlobResult<Vec<BlobInfo>>> + Send + '_>>;
}

/// Blob names are flat: no separators, no parent references, no leading dot.
pub fn validate_blob_name(name: &str) -> BlobResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidName(name.to_string()))
    }
}

/// Quoted hex MD5 of `data`.
pub fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Content type served for a blob, from its extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Name of the blob a public URL points at: its last path segment.
pub fn blob_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let decoded = percent_encoding::percent_decode_str(last)
        .decode_utf8()
        .ok()?
        .into_owned();
    validate_blob_name(&decoded).ok()?;
    Some(decoded)
}

/// Everything except RFC 3986 unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Public URL of `name` in `container`.
pub fn public_url(base_url: &str, container: &str, name: &str) -> String {
    let encoded = utf8_percent_encode(name, SEGMENT).to_string();
    format!("{}/{}/{}", base_url.trim_end_matches('/'), container, encoded)
}
