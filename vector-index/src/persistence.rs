use std::{fmt, path::PathBuf};

use tracing::{debug, info, instrument};

use common::{
    error::AppError,
    storage::{archive, remote::RemoteStore},
    utils::embedding::EmbeddingProvider,
};

use crate::index::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No prior snapshot existed; this upload created the index.
    Created,
    /// A prior snapshot was recovered and the new content merged into it.
    Merged,
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Created => write!(f, "created"),
            UpdateOutcome::Merged => write!(f, "merged"),
        }
    }
}

/// Result of an index update, handed back to the shell so the session
/// pipeline can be rebuilt without another remote fetch.
pub struct UpdateReport {
    pub outcome: UpdateOutcome,
    pub added_chunks: usize,
    pub index: VectorIndex,
}

/// Orchestrates load-or-create-or-merge of the vector index against the
/// local working directory and the remote store.
///
/// Known limitation: no cross-process locking. Two concurrent sessions race
/// with last-writer-wins, possibly after merging a stale snapshot.
pub struct IndexPersistence {
    remote: RemoteStore,
    embedder: EmbeddingProvider,
    index_dir: PathBuf,
    archive_name: String,
}

impl IndexPersistence {
    pub fn new(
        remote: RemoteStore,
        embedder: EmbeddingProvider,
        index_dir: impl Into<PathBuf>,
        archive_name: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            embedder,
            index_dir: index_dir.into(),
            archive_name: archive_name.into(),
        }
    }

    pub fn embedder(&self) -> &EmbeddingProvider {
        &self.embedder
    }

    /// Embeds `chunks` into a fresh index, merges it with the persisted
    /// snapshot when one exists, and publishes the combined index locally
    /// and remotely. Scratch directories clean up on every exit path.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn update_from_chunks(&self, chunks: &[String]) -> Result<UpdateReport, AppError> {
        self.update_inner(chunks).await.map_err(AppError::persistence)
    }

    async fn update_inner(&self, chunks: &[String]) -> Result<UpdateReport, AppError> {
        // Embedding can take a while for large documents; it runs inline on
        // the single flow of control.
        let fresh = VectorIndex::from_chunks(chunks, &self.embedder).await?;
        let added_chunks = fresh.len();

        let (combined, outcome) = match self.fetch_snapshot().await? {
            Some(mut current) => {
                current.merge(fresh)?;
                (current, UpdateOutcome::Merged)
            }
            None => (fresh, UpdateOutcome::Created),
        };

        // Recreate the working directory so stale files from a previous
        // revision never mix into the archive.
        if tokio::fs::try_exists(&self.index_dir).await? {
            tokio::fs::remove_dir_all(&self.index_dir).await?;
        }
        combined.save(&self.index_dir).await?;

        let scratch = tempfile::tempdir()?;
        let archive_path = scratch.path().join(&self.archive_name);
        archive::pack_dir(&self.index_dir, &archive_path).await?;

        // Publish under a staging name, then swap into place: the fixed
        // object name never has zero live objects, and never more than one.
        let staging_name = self.staging_name();
        self.remote.upload_object(&staging_name, &archive_path).await?;
        self.remote.swap_object(&staging_name, &self.archive_name).await?;

        info!(
            outcome = %outcome,
            added = added_chunks,
            total = combined.len(),
            revision = combined.revision(),
            "Index update persisted"
        );

        Ok(UpdateReport {
            outcome,
            added_chunks,
            index: combined,
        })
    }

    /// Fetches the persisted index for answering questions. `None` is the
    /// legitimate empty state: no document has been uploaded yet.
    #[instrument(skip_all)]
    pub async fn load_for_query(&self) -> Result<Option<VectorIndex>, AppError> {
        self.fetch_snapshot().await.map_err(AppError::persistence)
    }

    /// Whether a snapshot currently exists remotely, without downloading it.
    pub async fn snapshot_exists(&self) -> Result<bool, AppError> {
        Ok(self.remote.find_object(&self.archive_name).await?.is_some())
    }

    async fn fetch_snapshot(&self) -> Result<Option<VectorIndex>, AppError> {
        if self.remote.find_object(&self.archive_name).await?.is_none() {
            debug!(archive = %self.archive_name, "No remote snapshot found");
            return Ok(None);
        }

        let scratch = tempfile::tempdir()?;
        let archive_path = scratch.path().join(&self.archive_name);
        self.remote
            .download_object(&self.archive_name, &archive_path)
            .await?;

        let restore_dir = scratch.path().join("restored");
        archive::unpack_archive(&archive_path, &restore_dir).await?;

        // The index is fully in memory after load; the scratch directory is
        // dropped when this scope ends, on success and failure alike.
        let index = VectorIndex::load(&restore_dir).await?;
        debug!(chunks = index.len(), revision = index.revision(), "Restored snapshot");
        Ok(Some(index))
    }

    fn staging_name(&self) -> String {
        format!("{}.staging", self.archive_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ARCHIVE_NAME: &str = "vector-index.tar.gz";

    fn test_persistence(index_dir: &std::path::Path) -> IndexPersistence {
        let remote = RemoteStore::memory("document-index");
        let embedder = EmbeddingProvider::new_hashed(64).expect("hashed provider");
        IndexPersistence::new(remote, embedder, index_dir, ARCHIVE_NAME)
    }

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| (*t).to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_update_creates_index() {
        let workspace = tempdir().expect("workspace");
        let persistence = test_persistence(&workspace.path().join("index"));

        let report = persistence
            .update_from_chunks(&chunks(&["Revenue increased 10%."]))
            .await
            .expect("update");

        assert_eq!(report.outcome, UpdateOutcome::Created);
        assert_eq!(report.added_chunks, 1);
        assert_eq!(report.index.len(), 1);
        assert!(persistence.snapshot_exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn test_second_update_merges_and_keeps_one_object() {
        let workspace = tempdir().expect("workspace");
        let persistence = test_persistence(&workspace.path().join("index"));

        let first = persistence
            .update_from_chunks(&chunks(&["Revenue increased 10%."]))
            .await
            .expect("first update");
        assert_eq!(first.outcome, UpdateOutcome::Created);

        let second = persistence
            .update_from_chunks(&chunks(&["Expenses decreased."]))
            .await
            .expect("second update");
        assert_eq!(second.outcome, UpdateOutcome::Merged);
        assert_eq!(second.index.len(), 2);

        // Exactly one live archive object under the fixed name.
        let objects = persistence_list(&persistence).await;
        assert_eq!(objects.len(), 1);
        assert!(objects[0].location.as_ref().ends_with(ARCHIVE_NAME));
    }

    async fn persistence_list(persistence: &IndexPersistence) -> Vec<object_store::ObjectMeta> {
        persistence.remote.list_objects().await.expect("list objects")
    }

    #[tokio::test]
    async fn test_merged_index_answers_both_documents() {
        let workspace = tempdir().expect("workspace");
        let persistence = test_persistence(&workspace.path().join("index"));

        persistence
            .update_from_chunks(&chunks(&["Revenue increased 10%."]))
            .await
            .expect("first update");
        persistence
            .update_from_chunks(&chunks(&["Expenses decreased."]))
            .await
            .expect("second update");

        let index = persistence
            .load_for_query()
            .await
            .expect("load")
            .expect("snapshot should exist");

        let revenue_query = persistence
            .embedder()
            .embed("What happened to revenue?")
            .await
            .expect("embed");
        assert!(index.top_k(&revenue_query, 1)[0].text.contains("Revenue"));

        let expenses_query = persistence
            .embedder()
            .embed("What about expenses?")
            .await
            .expect("embed");
        assert!(index.top_k(&expenses_query, 1)[0].text.contains("Expenses"));
    }

    #[tokio::test]
    async fn test_load_for_query_empty_state_is_none() {
        let workspace = tempdir().expect("workspace");
        let persistence = test_persistence(&workspace.path().join("index"));

        let loaded = persistence.load_for_query().await.expect("load");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_empty_chunk_list() {
        let workspace = tempdir().expect("workspace");
        let persistence = test_persistence(&workspace.path().join("index"));

        let result = persistence.update_from_chunks(&[]).await;
        match result {
            Err(AppError::Persistence(cause)) => {
                assert!(matches!(*cause, AppError::Validation(_)));
            }
            other => panic!("expected persistence error, got {:?}", other.map(|r| r.outcome)),
        }
    }

    #[tokio::test]
    async fn test_corrupt_remote_snapshot_is_persistence_error() {
        let workspace = tempdir().expect("workspace");
        let persistence = test_persistence(&workspace.path().join("index"));

        // Plant garbage bytes under the archive name.
        let garbage = workspace.path().join("garbage.bin");
        tokio::fs::write(&garbage, b"not a tar.gz stream")
            .await
            .expect("write garbage");
        persistence
            .remote
            .upload_object(ARCHIVE_NAME, &garbage)
            .await
            .expect("upload garbage");

        let result = persistence.load_for_query().await;
        assert!(matches!(result, Err(AppError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_unreachable_store_surfaces_store_error() {
        use async_trait::async_trait;
        use futures::stream::{self, BoxStream, StreamExt};
        use object_store::{
            path::Path as ObjPath, GetOptions, GetResult, ListResult, MultipartUpload,
            ObjectMeta, ObjectStore, PutMultipartOpts, PutOptions, PutPayload, PutResult,
        };

        #[derive(Debug)]
        struct UnreachableStore;

        impl std::fmt::Display for UnreachableStore {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "UnreachableStore")
            }
        }

        fn unreachable_error() -> object_store::Error {
            object_store::Error::Generic {
                store: "UnreachableStore",
                source: "network unreachable".into(),
            }
        }

        #[async_trait]
        impl ObjectStore for UnreachableStore {
            async fn put_opts(
                &self,
                _location: &ObjPath,
                _payload: PutPayload,
                _opts: PutOptions,
            ) -> object_store::Result<PutResult> {
                Err(unreachable_error())
            }

            async fn put_multipart_opts(
                &self,
                _location: &ObjPath,
                _opts: PutMultipartOpts,
            ) -> object_store::Result<Box<dyn MultipartUpload>> {
                Err(unreachable_error())
            }

            async fn get_opts(
                &self,
                _location: &ObjPath,
                _options: GetOptions,
            ) -> object_store::Result<GetResult> {
                Err(unreachable_error())
            }

            async fn delete(&self, _location: &ObjPath) -> object_store::Result<()> {
                Err(unreachable_error())
            }

            fn list(
                &self,
                _prefix: Option<&ObjPath>,
            ) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
                stream::once(async { Err(unreachable_error()) }).boxed()
            }

            async fn list_with_delimiter(
                &self,
                _prefix: Option<&ObjPath>,
            ) -> object_store::Result<ListResult> {
                Err(unreachable_error())
            }

            async fn copy(&self, _from: &ObjPath, _to: &ObjPath) -> object_store::Result<()> {
                Err(unreachable_error())
            }

            async fn copy_if_not_exists(
                &self,
                _from: &ObjPath,
                _to: &ObjPath,
            ) -> object_store::Result<()> {
                Err(unreachable_error())
            }
        }

        let workspace = tempdir().expect("workspace");
        let remote = RemoteStore::with_backend(
            std::sync::Arc::new(UnreachableStore),
            common::utils::config::StorageKind::Memory,
            "document-index",
        );
        let embedder = EmbeddingProvider::new_hashed(64).expect("hashed provider");
        let persistence = IndexPersistence::new(
            remote,
            embedder,
            workspace.path().join("index"),
            ARCHIVE_NAME,
        );

        let result = persistence.load_for_query().await;
        match result {
            Err(AppError::Persistence(cause)) => {
                assert!(matches!(*cause, AppError::Store(_)));
            }
            other => panic!(
                "expected persistence-wrapped store error, got {:?}",
                other.map(|i| i.map(|idx| idx.len()))
            ),
        }

        // No partial local state left behind.
        assert!(!workspace.path().join("index").exists());
    }
}
