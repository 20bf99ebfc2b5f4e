//! Key/blob storage for staged training data and batch job output.
//!
//! Objects are addressed as `s3://{bucket}/{key}`. `LocalBlobStore` maps
//! that address onto a directory tree (`{root}/{bucket}/{key}`);
//! `MemoryBlobStore` keeps objects in memory.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const URI_SCHEME: &str = "s3://";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Address of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobUri {
    bucket: String,
    key: String,
}

impl BlobUri {
    pub fn new(bucket: &str, key: &str) -> Result<Self, StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Parse `s3://bucket/key`. A bare prefix (`s3://bucket/`) has an empty key.
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        validate_bucket(bucket).map_err(|_| StorageError::InvalidUri(uri.to_string()))?;
        if !key.is_empty() {
            validate_key(key).map_err(|_| StorageError::InvalidUri(uri.to_string()))?;
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a path segment to the key.
    pub fn join(&self, segment: &str) -> Result<Self, StorageError> {
        let segment = segment.trim_start_matches('/');
        let key = if self.key.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.key.trim_end_matches('/'), segment)
        };
        Self::new(&self.bucket, &key)
    }
}

impl fmt::Display for BlobUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", URI_SCHEME, self.bucket, self.key)
    }
}

impl FromStr for BlobUri {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobUri {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobUri> for String {
    fn from(uri: BlobUri) -> Self {
        uri.to_string()
    }
}

fn validate_bucket(bucket: &str) -> Result<(), StorageError> {
    if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
        return Err(StorageError::InvalidKey(format!("bad bucket name '{}'", bucket)));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    // Keys must stay inside their bucket when mapped onto a filesystem
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// A key/blob store.
///
/// `put` returns only after the object is durably written, so the returned
/// URI can be handed to the recognition service immediately.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<BlobUri, StorageError>;

    async fn get(&self, uri: &BlobUri) -> Result<Vec<u8>, StorageError>;
}

/// Filesystem-backed store rooted at a directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path backing an object.
    pub fn object_path(&self, uri: &BlobUri) -> PathBuf {
        self.root.join(&uri.bucket).join(&uri.key)
    }
}

/// Write through a synced temp file in the target directory, then rename, so
/// readers never see a partial object.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<BlobUri, StorageError> {
        let uri = BlobUri::new(bucket, key)?;
        let path = self.object_path(&uri);
        let bytes_len = bytes.len();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        debug!("Stored {} bytes at {}", bytes_len, uri);
        Ok(uri)
    }

    async fn get(&self, uri: &BlobUri) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(uri);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(uri.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<BlobUri, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|uri| uri.bucket == bucket)
                    .map(|uri| uri.key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<BlobUri, StorageError> {
        let uri = BlobUri::new(bucket, key)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Io(std::io::Error::other("store lock poisoned")))?;
        objects.insert(uri.clone(), bytes.to_vec());
        Ok(uri)
    }

    async fn get(&self, uri: &BlobUri) -> Result<Vec<u8>, StorageError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StorageError::Io(std::io::Error::other("store lock poisoned")))?;
        objects
            .get(uri)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_uri() {
        let uri = BlobUri::parse("s3://training/movies/train/docs.txt").unwrap();
        assert_eq!(uri.bucket(), "training");
        assert_eq!(uri.key(), "movies/train/docs.txt");
        assert_eq!(uri.to_string(), "s3://training/movies/train/docs.txt");
    }

    #[test]
    fn test_parse_prefix_uri() {
        let uri = BlobUri::parse("s3://training/").unwrap();
        assert_eq!(uri.key(), "");
        let uri = BlobUri::parse("s3://training").unwrap();
        assert_eq!(uri.bucket(), "training");
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        assert!(BlobUri::parse("http://training/key").is_err());
        assert!(BlobUri::parse("s3:///key").is_err());
        assert!(BlobUri::parse("s3://training/../etc/passwd").is_err());
    }

    #[test]
    fn test_join() {
        let prefix = BlobUri::parse("s3://out/jobs/").unwrap();
        let joined = prefix.join("output/output.tar.gz").unwrap();
        assert_eq!(joined.to_string(), "s3://out/jobs/output/output.tar.gz");

        let root = BlobUri::parse("s3://out").unwrap();
        assert_eq!(root.join("a.txt").unwrap().key(), "a.txt");
    }

    #[test]
    fn test_key_cannot_escape_bucket() {
        assert!(BlobUri::new("bucket", "../other/key").is_err());
        assert!(BlobUri::new("bucket", "/abs").is_err());
        assert!(BlobUri::new("bucket/nested", "key").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let uri = BlobUri::new("bucket", "a/b.csv").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"s3://bucket/a/b.csv\"");
        let back: BlobUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
    }

    #[tokio::test]
    async fn test_local_store_put_get() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let uri = store
            .put("bucket", "movies/train.txt", b"line one\nline two\n")
            .await
            .unwrap();
        assert_eq!(uri.to_string(), "s3://bucket/movies/train.txt");
        assert!(dir.path().join("bucket/movies/train.txt").exists());

        let bytes = store.get(&uri).await.unwrap();
        assert_eq!(bytes, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn test_local_store_overwrite_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        store.put("bucket", "out/result.json", b"first").await.unwrap();
        let uri = store.put("bucket", "out/result.json", b"second").await.unwrap();
        assert_eq!(store.get(&uri).await.unwrap(), b"second");

        let names: Vec<String> = std::fs::read_dir(dir.path().join("bucket/out"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["result.json"]);
    }

    #[tokio::test]
    async fn test_local_store_missing_object() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let uri = BlobUri::new("bucket", "nope.txt").unwrap();
        assert!(matches!(
            store.get(&uri).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        assert!(store.is_empty());
        store.put("b", "k2", b"two").await.unwrap();
        let uri = store.put("b", "k1", b"one").await.unwrap();
        assert_eq!(store.get(&uri).await.unwrap(), b"one");
        assert_eq!(store.keys("b"), vec!["k1", "k2"]);
        assert_eq!(store.len(), 2);
    }
}
