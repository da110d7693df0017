use super::client::{BulkMutationClient, ConflictMode, DocumentClient};
use super::query::{Query, SearchHit, SearchRequest};
use crate::core::{
    ArchiveError, DocumentVersion, Result, TaskKind, TaskProgress, TaskStatus, VersionedDocument,
};
use crate::mutation::UpdateScript;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Elasticsearch REST client for bulk tasks and document access.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    base_url: String,
    http: Client,
}

impl ElasticsearchClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ArchiveError::Config(format!("http client: {}", err)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn submit(
        &self,
        kind: TaskKind,
        index: &str,
        path: String,
        body: Value,
    ) -> Result<String> {
        let rejected = |message: String| ArchiveError::Submission {
            operation: kind.to_string(),
            index: index.to_string(),
            message,
        };

        let response = self
            .http
            .post(self.url(&path))
            .json(&body)
            .send()
            .await
            .map_err(|err| rejected(err.to_string()))?;
        let status = response.status();
        let payload = read_json(response).await.map_err(|err| rejected(err.to_string()))?;
        if !status.is_success() {
            return Err(rejected(format!("{}: {}", status, error_reason(&payload))));
        }

        let task_id = payload
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| rejected("response carries no task id".to_string()))?;
        debug!("submitted {} task {} on '{}'", kind, task_id, index);
        Ok(task_id.to_string())
    }
}

async fn read_json(response: Response) -> reqwest::Result<Value> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    }))
}

fn error_reason(payload: &Value) -> String {
    payload
        .pointer("/error/reason")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

fn count(status: &Value, field: &str) -> u64 {
    status.get(field).and_then(Value::as_u64).unwrap_or(0)
}

/// Parses a `GET _tasks/<id>` response.
pub fn parse_task_status(payload: &Value) -> TaskStatus {
    let completed = payload
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let status = payload.pointer("/task/status").unwrap_or(&Value::Null);
    let progress = TaskProgress {
        total: count(status, "total"),
        updated: count(status, "updated"),
        created: count(status, "created"),
        deleted: count(status, "deleted"),
        version_conflicts: count(status, "version_conflicts"),
    };

    let error = if let Some(error) = payload.get("error") {
        Some(error_reason(&json!({ "error": error })))
    } else {
        payload
            .pointer("/response/failures")
            .and_then(Value::as_array)
            .filter(|failures| !failures.is_empty())
            .map(|failures| {
                let first = failures[0]
                    .pointer("/cause/reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| failures[0].to_string());
                format!("{} failures, first: {}", failures.len(), first)
            })
    };

    TaskStatus {
        completed,
        progress,
        error,
    }
}

#[async_trait]
impl BulkMutationClient for ElasticsearchClient {
    async fn submit_update_by_query(
        &self,
        index: &str,
        query: &Query,
        script: &UpdateScript,
        conflicts: ConflictMode,
    ) -> Result<String> {
        let path = format!(
            "{}/_update_by_query?wait_for_completion=false&conflicts={}&refresh=true",
            index,
            conflicts.as_param()
        );
        let body = json!({ "query": query.to_json(), "script": script.to_json() });
        self.submit(TaskKind::Update, index, path, body).await
    }

    async fn submit_delete_by_query(
        &self,
        index: &str,
        query: &Query,
        conflicts: ConflictMode,
    ) -> Result<String> {
        let path = format!(
            "{}/_delete_by_query?wait_for_completion=false&conflicts={}&refresh=true",
            index,
            conflicts.as_param()
        );
        let body = json!({ "query": query.to_json() });
        self.submit(TaskKind::Delete, index, path, body).await
    }

    async fn submit_reindex(
        &self,
        source_index: &str,
        dest_index: &str,
        query: &Query,
    ) -> Result<String> {
        let body = json!({
            "source": { "index": source_index, "query": query.to_json() },
            "dest": { "index": dest_index },
        });
        self.submit(
            TaskKind::Reindex,
            source_index,
            "_reindex?wait_for_completion=false&refresh=true".to_string(),
            body,
        )
        .await
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let failed = |message: String| ArchiveError::Poll {
            task_id: task_id.to_string(),
            message,
        };
        let response = self
            .http
            .get(self.url(&format!("_tasks/{}", task_id)))
            .send()
            .await
            .map_err(|err| failed(err.to_string()))?;
        let status = response.status();
        let payload = read_json(response).await.map_err(|err| failed(err.to_string()))?;
        if !status.is_success() {
            return Err(failed(format!("{}: {}", status, error_reason(&payload))));
        }
        Ok(parse_task_status(&payload))
    }
}

#[async_trait]
impl DocumentClient for ElasticsearchClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let failed = |message: String| ArchiveError::Submission {
            operation: "search".to_string(),
            index: request.index.clone(),
            message,
        };
        let response = self
            .http
            .post(self.url(&format!("{}/_search", request.index)))
            .json(&request.body())
            .send()
            .await
            .map_err(|err| failed(err.to_string()))?;
        let status = response.status();
        let payload = read_json(response).await.map_err(|err| failed(err.to_string()))?;
        if !status.is_success() {
            return Err(failed(format!("{}: {}", status, error_reason(&payload))));
        }

        let hits = payload
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                Some(SearchHit {
                    index: hit.get("_index")?.as_str()?.to_string(),
                    id: hit.get("_id")?.as_str()?.to_string(),
                    source: hit.get("_source").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<VersionedDocument>> {
        let target = format!("{}/{}", index, id);
        let response = self
            .http
            .get(self.url(&format!("{}/_doc/{}", index, id)))
            .send()
            .await
            .map_err(|err| ArchiveError::Io(err.to_string()).into_runtime("get", &target))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        let payload = read_json(response)
            .await
            .map_err(|err| ArchiveError::Io(err.to_string()).into_runtime("get", &target))?;
        if !status.is_success() {
            return Err(ArchiveError::Io(format!("{}: {}", status, error_reason(&payload)))
                .into_runtime("get", &target));
        }
        if payload.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }

        Ok(Some(VersionedDocument {
            id: id.to_string(),
            source: payload.get("_source").cloned().unwrap_or(Value::Null),
            version: DocumentVersion {
                seq_no: payload.get("_seq_no").and_then(Value::as_u64).unwrap_or(0),
                primary_term: payload
                    .get("_primary_term")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            },
        }))
    }

    async fn write_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        expected: Option<DocumentVersion>,
    ) -> Result<DocumentVersion> {
        let target = format!("{}/{}", index, id);
        let mut path = format!("{}/_doc/{}?refresh=true", index, id);
        if let Some(expected) = expected {
            path.push_str(&format!(
                "&if_seq_no={}&if_primary_term={}",
                expected.seq_no, expected.primary_term
            ));
        }

        let response = self
            .http
            .put(self.url(&path))
            .json(source)
            .send()
            .await
            .map_err(|err| ArchiveError::Io(err.to_string()).into_runtime("write", &target))?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(ArchiveError::VersionConflict {
                target_id: id.to_string(),
            });
        }
        let payload = read_json(response)
            .await
            .map_err(|err| ArchiveError::Io(err.to_string()).into_runtime("write", &target))?;
        if status == StatusCode::NOT_FOUND {
            return Err(ArchiveError::NotFound {
                target_id: id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ArchiveError::Io(format!("{}: {}", status, error_reason(&payload)))
                .into_runtime("write", &target));
        }

        Ok(DocumentVersion {
            seq_no: payload.get("_seq_no").and_then(Value::as_u64).unwrap_or(0),
            primary_term: payload
                .get("_primary_term")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskOutcome;

    #[test]
    fn parses_running_task_progress() {
        let status = parse_task_status(&json!({
            "completed": false,
            "task": { "status": { "total": 10, "updated": 0, "created": 4, "deleted": 0 } }
        }));
        assert!(!status.completed);
        assert_eq!(status.progress.created, 4);
        assert!((status.fraction() - 0.4).abs() < f64::EPSILON);
        assert_eq!(status.error, None);
    }

    #[test]
    fn reports_bulk_failures_as_task_error() {
        let status = parse_task_status(&json!({
            "completed": true,
            "task": { "status": { "total": 2, "deleted": 1 } },
            "response": { "failures": [ { "cause": { "reason": "mapper_parsing_exception" } } ] }
        }));
        assert!(status.completed);
        assert_eq!(
            status.error.as_deref(),
            Some("1 failures, first: mapper_parsing_exception")
        );
    }

    #[test]
    fn keeps_version_conflicts_apart_from_errors() {
        let status = parse_task_status(&json!({
            "completed": true,
            "task": { "status": { "total": 1, "updated": 0, "version_conflicts": 1 } },
            "response": { "failures": [] }
        }));
        assert!(status.completed);
        assert_eq!(status.error, None);
        assert_eq!(status.progress.version_conflicts, 1);
        assert!(TaskOutcome::from(status.progress).skipped_on_conflict());
    }

    #[test]
    fn reports_top_level_error() {
        let status = parse_task_status(&json!({
            "completed": true,
            "error": { "type": "index_not_found_exception", "reason": "no such index [x]" }
        }));
        assert_eq!(status.error.as_deref(), Some("no such index [x]"));
    }
}
