use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path as ObjPath,
    ObjectMeta, ObjectStore,
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::debug;

use crate::{
    error::AppError,
    utils::config::{AppConfig, StorageKind},
};

pub type DynStore = Arc<dyn ObjectStore>;

/// Client for the remote store holding the archived index.
///
/// Objects live under a single named container (a folder prefix); the
/// persistence manager keeps at most one live archive object per name.
#[derive(Clone)]
pub struct RemoteStore {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
    container: String,
}

impl RemoteStore {
    /// Builds the configured backend. Credentials are resolved here, once,
    /// at startup; no operation later in the session triggers an
    /// authentication flow.
    pub async fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let (store, local_base): (DynStore, Option<PathBuf>) = match cfg.storage {
            StorageKind::Local => {
                let base = resolve_base_dir(&cfg.data_dir);
                if !base.exists() {
                    tokio::fs::create_dir_all(&base).await?;
                }
                let store = LocalFileSystem::new_with_prefix(base.clone())?;
                (Arc::new(store), Some(base))
            }
            StorageKind::Memory => (Arc::new(InMemory::new()), None),
            StorageKind::S3 => {
                if cfg.s3_bucket.is_empty() {
                    return Err(AppError::Validation(
                        "s3 storage requires the s3_bucket setting".into(),
                    ));
                }
                let store = AmazonS3Builder::from_env()
                    .with_bucket_name(&cfg.s3_bucket)
                    .build()
                    .map_err(|e| AppError::Auth(e.to_string()))?;
                (Arc::new(store), None)
            }
        };

        Ok(Self {
            store,
            backend_kind: cfg.storage.clone(),
            local_base,
            container: cfg.container_name.clone(),
        })
    }

    /// Injects a custom backend, used by tests and by callers that already
    /// hold a store handle.
    pub fn with_backend(
        store: DynStore,
        backend_kind: StorageKind,
        container: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
            container: container.into(),
        }
    }

    /// An isolated in-memory store, for tests.
    pub fn memory(container: impl Into<String>) -> Self {
        Self::with_backend(Arc::new(InMemory::new()), StorageKind::Memory, container)
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    pub fn container_name(&self) -> &str {
        &self.container
    }

    /// Find-or-create of the container. For the local backend the folder is
    /// created on first use; prefix-based backends materialise containers
    /// implicitly. Idempotent: repeated calls yield the same path.
    pub async fn resolve_container(&self) -> Result<ObjPath, AppError> {
        if let Some(base) = &self.local_base {
            let dir = base.join(&self.container);
            if !dir.exists() {
                tokio::fs::create_dir_all(&dir).await?;
                debug!(container = %self.container, "Created container folder");
            }
        }
        Ok(ObjPath::from(self.container.as_str()))
    }

    /// Looks the object up by name within the container. `None` is the
    /// legitimate empty state, not an error. Transient failures are retried
    /// a bounded number of times; the lookup is idempotent.
    pub async fn find_object(&self, name: &str) -> Result<Option<ObjectMeta>, AppError> {
        let container = self.resolve_container().await?;
        let location = container.child(name);

        let result = RetryIf::spawn(
            retry_strategy(),
            || self.store.head(&location),
            is_transient,
        )
        .await;

        match result {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(AppError::Store(e)),
        }
    }

    /// Uploads the file at `local_path` as `name` within the container.
    /// Create-or-overwrite is the store's native put semantics; keeping a
    /// single live object per name is the caller's policy.
    pub async fn upload_object(&self, name: &str, local_path: &Path) -> Result<(), AppError> {
        let container = self.resolve_container().await?;
        let location = container.child(name);

        let data = tokio::fs::read(local_path).await?;
        let payload = object_store::PutPayload::from_bytes(Bytes::from(data));
        self.store.put(&location, payload).await?;

        debug!(object = %location, "Uploaded archive object");
        Ok(())
    }

    /// Downloads the named object into `local_path`, creating parent
    /// directories. A vanished object surfaces as a store error after the
    /// bounded retries; it is reported, not retried indefinitely.
    pub async fn download_object(&self, name: &str, local_path: &Path) -> Result<(), AppError> {
        let container = self.resolve_container().await?;
        let location = container.child(name);

        let bytes = RetryIf::spawn(
            retry_strategy(),
            || async {
                let result = self.store.get(&location).await?;
                result.bytes().await
            },
            is_transient,
        )
        .await?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &bytes).await?;

        debug!(object = %location, bytes = bytes.len(), "Downloaded archive object");
        Ok(())
    }

    /// Deletes the named object; deleting a missing object is a no-op.
    pub async fn delete_object(&self, name: &str) -> Result<(), AppError> {
        let container = self.resolve_container().await?;
        let location = container.child(name);

        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(AppError::Store(e)),
        }
    }

    /// Publishes `from_name` as `to_name` with an overwriting rename. The
    /// final name always resolves to exactly one object; there is no window
    /// with zero live objects during a replacement.
    pub async fn swap_object(&self, from_name: &str, to_name: &str) -> Result<(), AppError> {
        let container = self.resolve_container().await?;
        let from = container.child(from_name);
        let to = container.child(to_name);

        self.store.rename(&from, &to).await?;

        debug!(from = %from, to = %to, "Swapped archive object into place");
        Ok(())
    }

    /// All objects currently inside the container.
    pub async fn list_objects(&self) -> Result<Vec<ObjectMeta>, AppError> {
        let container = self.resolve_container().await?;
        let objects = self
            .store
            .list(Some(&container))
            .try_collect::<Vec<_>>()
            .await?;
        Ok(objects)
    }
}

fn retry_strategy() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(100).map(jitter).take(3)
}

// NotFound is a definitive answer; everything else may be transient.
fn is_transient(error: &object_store::Error) -> bool {
    !matches!(error, object_store::Error::NotFound { .. })
}

/// Resolves the local backend base directory; relative paths are anchored at
/// the current working directory.
fn resolve_base_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with('/') {
        PathBuf::from(data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_resolve_container_is_idempotent() {
        let store = RemoteStore::memory("document-index");
        let first = store.resolve_container().await.expect("first resolve");
        let second = store.resolve_container().await.expect("second resolve");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_find_object_missing_is_none() {
        let store = RemoteStore::memory("document-index");
        let found = store
            .find_object("vector-index.tar.gz")
            .await
            .expect("find should succeed");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_upload_find_download_round_trip() {
        let store = RemoteStore::memory("document-index");
        let scratch = tempdir().expect("scratch dir");

        let source = scratch.path().join("payload.bin");
        tokio::fs::write(&source, b"archive bytes")
            .await
            .expect("write source");

        store
            .upload_object("vector-index.tar.gz", &source)
            .await
            .expect("upload");

        let meta = store
            .find_object("vector-index.tar.gz")
            .await
            .expect("find")
            .expect("object should exist");
        assert_eq!(meta.size, 13);

        let target = scratch.path().join("restored/payload.bin");
        store
            .download_object("vector-index.tar.gz", &target)
            .await
            .expect("download");
        let restored = tokio::fs::read(&target).await.expect("read restored");
        assert_eq!(restored, b"archive bytes");
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_noop() {
        let store = RemoteStore::memory("document-index");
        store
            .delete_object("never-uploaded.tar.gz")
            .await
            .expect("delete of missing object should succeed");
    }

    #[tokio::test]
    async fn test_swap_replaces_and_keeps_single_object() {
        let store = RemoteStore::memory("document-index");
        let scratch = tempdir().expect("scratch dir");

        let first = scratch.path().join("first.bin");
        tokio::fs::write(&first, b"old").await.expect("write first");
        store
            .upload_object("vector-index.tar.gz", &first)
            .await
            .expect("upload first");

        let second = scratch.path().join("second.bin");
        tokio::fs::write(&second, b"new contents")
            .await
            .expect("write second");
        store
            .upload_object("vector-index.tar.gz.staging", &second)
            .await
            .expect("upload staging");

        store
            .swap_object("vector-index.tar.gz.staging", "vector-index.tar.gz")
            .await
            .expect("swap");

        let objects = store.list_objects().await.expect("list");
        assert_eq!(objects.len(), 1);
        assert!(objects[0]
            .location
            .as_ref()
            .ends_with("vector-index.tar.gz"));

        let target = scratch.path().join("swapped.bin");
        store
            .download_object("vector-index.tar.gz", &target)
            .await
            .expect("download");
        let bytes = tokio::fs::read(&target).await.expect("read");
        assert_eq!(bytes, b"new contents");
    }

    #[tokio::test]
    async fn test_local_backend_creates_container_folder() {
        let base = tempdir().expect("base dir");
        let cfg = crate::utils::config::AppConfig {
            openai_api_key: "test".into(),
            openai_base_url: "https://example.com".into(),
            query_model: "test-model".into(),
            embedding_backend: crate::utils::embedding::EmbeddingBackend::Hashed,
            embedding_model: "test".into(),
            embedding_dimensions: 8,
            storage: StorageKind::Local,
            data_dir: base.path().to_string_lossy().into_owned(),
            s3_bucket: String::new(),
            container_name: "document-index".into(),
            archive_name: "vector-index.tar.gz".into(),
            index_dir: base.path().join("index").to_string_lossy().into_owned(),
            retrieval_top_k: 4,
            chunk_max_chars: 2000,
            chunk_overlap_chars: 200,
        };

        let store = RemoteStore::new(&cfg).await.expect("build local store");
        store.resolve_container().await.expect("resolve");
        assert!(base.path().join("document-index").is_dir());

        let scratch = tempdir().expect("scratch");
        let source = scratch.path().join("obj.bin");
        tokio::fs::write(&source, b"on disk").await.expect("write");
        store
            .upload_object("vector-index.tar.gz", &source)
            .await
            .expect("upload");
        assert!(base
            .path()
            .join("document-index/vector-index.tar.gz")
            .is_file());
    }
}
