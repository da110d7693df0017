use super::client::{BulkMutationClient, ConflictMode, DocumentClient};
use super::http::ElasticsearchClient;
use super::memory::InMemorySearchEngine;
use super::query::{Query, SearchHit, SearchRequest};
use crate::config::EngineConfig;
use crate::core::{DocumentVersion, Result, TaskStatus, VersionedDocument};
use crate::mutation::UpdateScript;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Enum over every search engine backend, chosen once from configuration.
#[derive(Clone)]
pub enum EngineVariant {
    Memory(InMemorySearchEngine),
    Elasticsearch(ElasticsearchClient),
}

impl EngineVariant {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        match config {
            EngineConfig::Memory => Ok(Self::Memory(InMemorySearchEngine::new())),
            EngineConfig::Elasticsearch { url, timeout_ms } => Ok(Self::Elasticsearch(
                ElasticsearchClient::new(url, Duration::from_millis(*timeout_ms))?,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Elasticsearch(_) => "elasticsearch",
        }
    }
}

#[async_trait]
impl BulkMutationClient for EngineVariant {
    async fn submit_update_by_query(
        &self,
        index: &str,
        query: &Query,
        script: &UpdateScript,
        conflicts: ConflictMode,
    ) -> Result<String> {
        match self {
            Self::Memory(inner) => {
                inner
                    .submit_update_by_query(index, query, script, conflicts)
                    .await
            }
            Self::Elasticsearch(inner) => {
                inner
                    .submit_update_by_query(index, query, script, conflicts)
                    .await
            }
        }
    }

    async fn submit_delete_by_query(
        &self,
        index: &str,
        query: &Query,
        conflicts: ConflictMode,
    ) -> Result<String> {
        match self {
            Self::Memory(inner) => inner.submit_delete_by_query(index, query, conflicts).await,
            Self::Elasticsearch(inner) => {
                inner.submit_delete_by_query(index, query, conflicts).await
            }
        }
    }

    async fn submit_reindex(
        &self,
        source_index: &str,
        dest_index: &str,
        query: &Query,
    ) -> Result<String> {
        match self {
            Self::Memory(inner) => inner.submit_reindex(source_index, dest_index, query).await,
            Self::Elasticsearch(inner) => {
                inner.submit_reindex(source_index, dest_index, query).await
            }
        }
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        match self {
            Self::Memory(inner) => inner.get_task_status(task_id).await,
            Self::Elasticsearch(inner) => inner.get_task_status(task_id).await,
        }
    }
}

#[async_trait]
impl DocumentClient for EngineVariant {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        match self {
            Self::Memory(inner) => inner.search(request).await,
            Self::Elasticsearch(inner) => inner.search(request).await,
        }
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<VersionedDocument>> {
        match self {
            Self::Memory(inner) => inner.get_document(index, id).await,
            Self::Elasticsearch(inner) => inner.get_document(index, id).await,
        }
    }

    async fn write_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        expected: Option<DocumentVersion>,
    ) -> Result<DocumentVersion> {
        match self {
            Self::Memory(inner) => inner.write_document(index, id, source, expected).await,
            Self::Elasticsearch(inner) => inner.write_document(index, id, source, expected).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_backend_from_config() {
        let memory = EngineVariant::from_config(&EngineConfig::Memory).unwrap();
        assert_eq!(memory.name(), "memory");

        let remote = EngineVariant::from_config(&EngineConfig::Elasticsearch {
            url: "http://search:9200".to_string(),
            timeout_ms: 500,
        })
        .unwrap();
        assert_eq!(remote.name(), "elasticsearch");
    }
}
