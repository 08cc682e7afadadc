//! Object Store gateway implementations (component A).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{ObjectStoreError, ObjectStoreResult};
use crate::storage_traits::ObjectStore;

/// Filesystem-backed object store for tests and local development.
///
/// Keys are explicit (unlike content-addressing): `put("digests/x/y.mp3", ...)`
/// writes to `<root>/digests/x/y.mp3`, creating parent directories as
/// needed. Grounded on the teacher's `FsCasStore` atomic-write-then-rename
/// pattern, generalized from a digest-derived path to a caller-supplied key.
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    /// Create a store rooted at `root`, serving public URLs under
    /// `public_base_url` (e.g. `https://cdn.poddigest.dev`).
    pub fn new(root: impl AsRef<Path>, public_base_url: impl Into<String>) -> ObjectStoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url: public_base_url.into(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> ObjectStoreResult<()> {
        let path = self.path_for(key);
        let parent = path
            .parent()
            .ok_or_else(|| ObjectStoreError::Fatal(format!("key has no parent: {key}")))?
            .to_path_buf();
        tokio::task::spawn_blocking(move || -> ObjectStoreResult<()> {
            std::fs::create_dir_all(&parent)?;
            let mut tmp = NamedTempFile::new_in(&parent)?;
            std::io::Write::write_all(&mut tmp, &data)?;
            tmp.persist(&path)
                .map_err(|e| ObjectStoreError::Fatal(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| ObjectStoreError::Fatal(e.to_string()))??;
        debug!(key, "object written");
        Ok(())
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Vec<u8>> {
        let path = self.path_for(key);
        tokio::fs::read(&path).await.map_err(ObjectStoreError::from)
    }

    async fn head(&self, key: &str) -> ObjectStoreResult<bool> {
        Ok(tokio::fs::metadata(self.path_for(key)).await.is_ok())
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
    }
}

/// S3-compatible object store, reachable behind the `s3` feature.
///
/// Puts/gets go through plain HTTPS PUT/GET against a presigned-URL-style
/// endpoint (via `reqwest`) rather than a full AWS SDK, since the only
/// contract this gateway needs is `put`/`get`/`head`/`delete`/`public_url`
/// and the workspace already depends on `reqwest` for the transcription and
/// feed-fetch HTTP clients.
#[cfg(feature = "s3")]
pub struct S3ObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    public_base_url: String,
}

#[cfg(feature = "s3")]
impl S3ObjectStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }
}

#[cfg(feature = "s3")]
#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> ObjectStoreResult<()> {
        let resp = self
            .client
            .put(self.object_url(key))
            .header("content-type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;
        if resp.status().is_server_error() {
            return Err(ObjectStoreError::Transient(resp.status().to_string()));
        }
        if !resp.status().is_success() {
            return Err(ObjectStoreError::Fatal(resp.status().to_string()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Vec<u8>> {
        let resp = self
            .client
            .get(self.object_url(key))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ObjectStoreError::Transient(e.to_string()))
    }

    async fn head(&self, key: &str) -> ObjectStoreResult<bool> {
        let resp = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;
        Ok(resp.status().is_success())
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        let resp = self
            .client
            .delete(self.object_url(key))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transient(e.to_string()))?;
        if resp.status().is_server_error() {
            return Err(ObjectStoreError::Transient(resp.status().to_string()));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://cdn.poddigest.dev").unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, store) = store();
        store
            .put("digests/u1/d1.mp3", b"audio bytes".to_vec(), "audio/mpeg")
            .await
            .unwrap();
        let got = store.get("digests/u1/d1.mp3").await.unwrap();
        assert_eq!(got, b"audio bytes");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let (_dir, store) = store();
        let err = store.get("nope.mp3").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn head_reflects_existence() {
        let (_dir, store) = store();
        assert!(!store.head("x.mp3").await.unwrap());
        store.put("x.mp3", b"y".to_vec(), "audio/mpeg").await.unwrap();
        assert!(store.head("x.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.put("x.mp3", b"y".to_vec(), "audio/mpeg").await.unwrap();
        store.delete("x.mp3").await.unwrap();
        store.delete("x.mp3").await.unwrap();
        assert!(!store.head("x.mp3").await.unwrap());
    }

    #[test]
    fn public_url_joins_base_and_key() {
        let (_dir, store) = store();
        assert_eq!(
            store.public_url("digests/u1/d1.mp3"),
            "https://cdn.poddigest.dev/digests/u1/d1.mp3"
        );
    }
}
