use crate::archive::{
    BucketGranularity, IndexBinding, MAX_IDS_PER_BATCH, SelectorSettings, WorkerDelays,
    validate_index_name,
};
use crate::core::{ArchiveError, Result, fields};
use crate::mutation::ConflictRetryPolicy;
use crate::task::PollBackoffPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Longest accepted retention, one hundred years.
pub const MAX_RETENTION_SECS: u64 = 100 * 365 * 86_400;

/// Which search engine backend to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineConfig {
    Memory,
    Elasticsearch {
        url: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::Elasticsearch {
            url: "http://localhost:9200".to_string(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Hot index names and the dependent indices archived with instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub list_view: String,
    pub batch_operation: String,
    pub dependents: Vec<IndexBinding>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            list_view: "operate-list-view".to_string(),
            batch_operation: "operate-batch-operation".to_string(),
            dependents: vec![
                IndexBinding::new("operate-variable", fields::PROCESS_INSTANCE_KEY),
                IndexBinding::new("operate-incident", fields::PROCESS_INSTANCE_KEY),
                IndexBinding::new("operate-flownode-instance", fields::PROCESS_INSTANCE_KEY),
                IndexBinding::new("operate-sequence-flow", fields::PROCESS_INSTANCE_KEY),
                IndexBinding::new("operate-operation", fields::PROCESS_INSTANCE_KEY),
            ],
        }
    }
}

/// Archiver configuration
///
/// Loaded from a JSON file; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    /// Identifier of this node in logs
    pub node_id: String,

    /// Partitions owned by this node
    pub partitions: Vec<u32>,

    /// Search engine backend
    pub engine: EngineConfig,

    /// Index names
    pub indices: IndexConfig,

    /// Minimum age of a finished record before it is archived
    pub retention_secs: u64,

    /// Archive index granularity
    pub granularity: BucketGranularity,

    /// Maximum ids moved per batch (capped at 1000)
    pub batch_size: usize,

    /// Hits read per selection pass
    pub candidate_limit: usize,

    /// Task status polling schedule
    pub poll_backoff: PollBackoffPolicy,

    /// Version conflict retries on single-document writes
    pub conflict_retry: ConflictRetryPolicy,

    /// Worker delay after a tick that archived nothing
    pub idle_delay_ms: u64,

    /// Worker delay after a failed tick
    pub error_delay_ms: u64,

    /// Archive finished batch operations too
    pub archive_batch_operations: bool,

    /// Only the owner of this partition archives batch operations
    pub batch_operation_partition: u32,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            node_id: "archiver-1".to_string(),
            partitions: vec![1],
            engine: EngineConfig::default(),
            indices: IndexConfig::default(),
            retention_secs: 3_600,
            granularity: BucketGranularity::Daily,
            batch_size: 100,
            candidate_limit: 10_000,
            poll_backoff: PollBackoffPolicy::default(),
            conflict_retry: ConflictRetryPolicy::default(),
            idle_delay_ms: 60_000,
            error_delay_ms: 10_000,
            archive_batch_operations: true,
            batch_operation_partition: 1,
        }
    }
}

impl ArchiverConfig {
    /// Create a configuration for `node_id` with defaults elsewhere
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            ..Self::default()
        }
    }

    /// Parse from a JSON document
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| ArchiveError::Config(format!("invalid archiver config: {}", err)))
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ArchiveError::Config(format!("cannot read '{}': {}", path.display(), err))
        })?;
        Self::from_json_str(&raw)
    }

    /// Set owned partitions
    pub fn partitions(mut self, partitions: impl IntoIterator<Item = u32>) -> Self {
        self.partitions = partitions.into_iter().collect();
        self
    }

    /// Set the engine backend
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set index names
    pub fn indices(mut self, indices: IndexConfig) -> Self {
        self.indices = indices;
        self
    }

    /// Set retention
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    /// Set bucket granularity
    pub fn granularity(mut self, granularity: BucketGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Set batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set task polling schedule
    pub fn poll_backoff(mut self, poll_backoff: PollBackoffPolicy) -> Self {
        self.poll_backoff = poll_backoff;
        self
    }

    /// Set conflict retry policy
    pub fn conflict_retry(mut self, conflict_retry: ConflictRetryPolicy) -> Self {
        self.conflict_retry = conflict_retry;
        self
    }

    /// Set worker delays
    pub fn delays(mut self, idle: Duration, error: Duration) -> Self {
        self.idle_delay_ms = idle.as_millis() as u64;
        self.error_delay_ms = error.as_millis() as u64;
        self
    }

    /// Enable or disable batch-operation archival
    pub fn archive_batch_operations(mut self, enabled: bool) -> Self {
        self.archive_batch_operations = enabled;
        self
    }

    pub fn owned_partitions(&self) -> BTreeSet<u32> {
        self.partitions.iter().copied().collect()
    }

    pub fn selector_settings(&self) -> Result<SelectorSettings> {
        let retention = i64::try_from(self.retention_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .ok_or_else(|| retention_out_of_range(self.retention_secs))?;
        Ok(SelectorSettings {
            retention,
            granularity: self.granularity,
            max_batch_size: self.batch_size,
            candidate_limit: self.candidate_limit,
        })
    }

    pub fn worker_delays(&self) -> WorkerDelays {
        WorkerDelays {
            idle: Duration::from_millis(self.idle_delay_ms),
            error: Duration::from_millis(self.error_delay_ms),
        }
    }

    /// Rejects configurations the archiver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(ArchiveError::Config("node_id must not be empty".to_string()));
        }
        if self.batch_size == 0 || self.batch_size > MAX_IDS_PER_BATCH {
            return Err(ArchiveError::Config(format!(
                "batch_size must be within 1..={}",
                MAX_IDS_PER_BATCH
            )));
        }
        if self.candidate_limit < self.batch_size {
            return Err(ArchiveError::Config(
                "candidate_limit must be at least batch_size".to_string(),
            ));
        }
        if self.retention_secs > MAX_RETENTION_SECS {
            return Err(retention_out_of_range(self.retention_secs));
        }
        if self.poll_backoff.max_attempts == 0 {
            return Err(ArchiveError::Config(
                "poll_backoff.max_attempts must be positive".to_string(),
            ));
        }
        if let EngineConfig::Elasticsearch { url, .. } = &self.engine {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ArchiveError::Config(format!(
                    "engine url '{}' must be http(s)",
                    url
                )));
            }
        }

        validate_index_name(&self.indices.list_view)?;
        validate_index_name(&self.indices.batch_operation)?;
        let mut seen = BTreeSet::new();
        for binding in &self.indices.dependents {
            binding.validate()?;
            if binding.index == self.indices.list_view || !seen.insert(binding.index.as_str()) {
                return Err(ArchiveError::Config(format!(
                    "dependent index '{}' listed twice",
                    binding.index
                )));
            }
        }
        Ok(())
    }
}

fn retention_out_of_range(secs: u64) -> ArchiveError {
    ArchiveError::Config(format!(
        "retention_secs {} exceeds the maximum of {}",
        secs, MAX_RETENTION_SECS
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ArchiverConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ArchiverConfig::from_json_str(
            r#"{
                "node_id": "node-b",
                "partitions": [2, 3],
                "engine": { "kind": "memory" },
                "granularity": "monthly"
            }"#,
        )
        .unwrap();
        assert_eq!(config.node_id, "node-b");
        assert_eq!(config.engine, EngineConfig::Memory);
        assert_eq!(config.granularity, BucketGranularity::Monthly);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.owned_partitions(), BTreeSet::from([2, 3]));
    }

    #[test]
    fn rejects_oversized_batches_and_duplicate_dependents() {
        assert!(ArchiverConfig::default().batch_size(5_000).validate().is_err());

        let mut indices = IndexConfig::default();
        indices
            .dependents
            .push(IndexBinding::new("operate-variable", "scopeKey"));
        assert!(ArchiverConfig::default().indices(indices).validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archiver.json");
        std::fs::write(&path, r#"{ "batch_size": 250, "retention_secs": 60 }"#).unwrap();

        let config = ArchiverConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, 250);
        assert_eq!(
            config.selector_settings().unwrap().retention,
            chrono::Duration::seconds(60)
        );

        let missing = ArchiverConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(ArchiveError::Config(_))));
    }

    #[test]
    fn rejects_retention_beyond_representable_range() {
        let huge = ArchiverConfig::default().retention(Duration::from_secs(1_000_000_000_000_000));
        assert!(matches!(huge.validate(), Err(ArchiveError::Config(_))));
        assert!(matches!(huge.selector_settings(), Err(ArchiveError::Config(_))));

        let century = ArchiverConfig::default().retention(Duration::from_secs(MAX_RETENTION_SECS));
        century.validate().unwrap();
        century.selector_settings().unwrap();
    }
}
