use super::query::{Query, SearchHit, SearchRequest};
use crate::core::{DocumentVersion, Result, TaskStatus, VersionedDocument};
use crate::mutation::UpdateScript;
use async_trait::async_trait;
use serde_json::Value;

/// How a by-query mutation treats documents that changed underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    /// Abort the whole task on the first version conflict.
    #[default]
    Abort,
    /// Skip conflicting documents and carry on.
    Proceed,
}

impl ConflictMode {
    pub fn as_param(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Proceed => "proceed",
        }
    }
}

/// Asynchronous server-side bulk mutations.
///
/// Submissions return a task id that is polled with `get_task_status`.
#[async_trait]
pub trait BulkMutationClient: Send + Sync {
    async fn submit_update_by_query(
        &self,
        index: &str,
        query: &Query,
        script: &UpdateScript,
        conflicts: ConflictMode,
    ) -> Result<String>;

    async fn submit_delete_by_query(
        &self,
        index: &str,
        query: &Query,
        conflicts: ConflictMode,
    ) -> Result<String>;

    /// Copies matching documents from `source_index` into `dest_index`,
    /// overwriting documents with the same id.
    async fn submit_reindex(&self, source_index: &str, dest_index: &str, query: &Query)
    -> Result<String>;

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus>;
}

/// Search and single-document access.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<VersionedDocument>>;

    /// Writes a full document source.
    ///
    /// With `expected` set the write only succeeds when the stored version
    /// still matches; otherwise it fails with `VersionConflict`, or
    /// `NotFound` when the document is gone.
    async fn write_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        expected: Option<DocumentVersion>,
    ) -> Result<DocumentVersion>;
}

/// Everything the archiver needs from a search engine.
pub trait SearchEngine: BulkMutationClient + DocumentClient {}

impl<T: BulkMutationClient + DocumentClient> SearchEngine for T {}
