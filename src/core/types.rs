use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Field names shared by the hot-index documents this crate reads and writes.
pub mod fields {
    pub const KEY: &str = "key";
    pub const ID: &str = "id";
    pub const PROCESS_INSTANCE_KEY: &str = "processInstanceKey";
    pub const PARTITION_ID: &str = "partitionId";
    pub const STATE: &str = "state";
    pub const END_DATE: &str = "endDate";
    pub const JOIN_RELATION: &str = "joinRelation";
}

/// Formats a timestamp the way documents store it: RFC 3339, millisecond
/// precision, `Z` suffix. Fixed width keeps lexicographic order equal to
/// chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Identifier of an archivable record.
///
/// Instance keys are numeric and must sort numerically; batch-operation ids
/// are UUID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Numeric(i64),
    Text(String),
}

impl RecordKey {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Numeric),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Numeric(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            (Self::Numeric(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessInstanceState {
    Active,
    Incident,
    Completed,
    Canceled,
}

impl ProcessInstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Incident => "INCIDENT",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
        }
    }
}

/// Marker separating instance rows from related rows in the list-view index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinRelation {
    ProcessInstance,
    Activity,
    Variable,
}

impl JoinRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessInstance => "processInstance",
            Self::Activity => "activity",
            Self::Variable => "variable",
        }
    }
}

/// A row of the list-view index: either the instance itself or a row
/// belonging to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstanceRecord {
    pub key: i64,
    pub process_instance_key: i64,
    pub partition_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ProcessInstanceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub join_relation: JoinRelation,
}

impl ProcessInstanceRecord {
    pub fn instance(
        key: i64,
        partition_id: u32,
        state: ProcessInstanceState,
        end_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key,
            process_instance_key: key,
            partition_id,
            state: Some(state),
            end_date: end_date.as_ref().map(format_timestamp),
            join_relation: JoinRelation::ProcessInstance,
        }
    }

    pub fn related(
        key: i64,
        process_instance_key: i64,
        partition_id: u32,
        relation: JoinRelation,
    ) -> Self {
        Self {
            key,
            process_instance_key,
            partition_id,
            state: None,
            end_date: None,
            join_relation: relation,
        }
    }

    pub fn document_id(&self) -> String {
        self.key.to_string()
    }

    pub fn is_archivable(&self) -> bool {
        self.join_relation == JoinRelation::ProcessInstance
            && self.state.is_some_and(|state| state.is_terminal())
            && self.end_date.is_some()
    }
}

/// A record stored in another index that references a process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentRecord {
    pub id: String,
    pub process_instance_key: i64,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl DependentRecord {
    pub fn new(id: impl Into<String>, process_instance_key: i64) -> Self {
        Self {
            id: id.into(),
            process_instance_key,
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.payload.insert(name.to_string(), value);
        self
    }
}

/// A user-triggered bulk operation. Archived on its own end date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub operation_type: String,
    pub start_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub instances_count: i64,
    #[serde(default)]
    pub operations_finished_count: i64,
}

impl BatchOperationRecord {
    pub fn new(operation_type: &str, start_date: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation_type: operation_type.to_string(),
            start_date: format_timestamp(&start_date),
            end_date: None,
            instances_count: 0,
            operations_finished_count: 0,
        }
    }

    pub fn finished_at(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(format_timestamp(&end_date));
        self
    }
}

/// Optimistic concurrency token of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub seq_no: u64,
    pub primary_term: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub id: String,
    pub source: Value,
    pub version: DocumentVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Update,
    Delete,
    Reindex,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Update => "update_by_query",
            Self::Delete => "delete_by_query",
            Self::Reindex => "reindex",
        };
        write!(f, "{label}")
    }
}

/// Handle to an in-flight bulk mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
    pub kind: TaskKind,
    pub index: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total: u64,
    pub updated: u64,
    pub created: u64,
    pub deleted: u64,
    /// Rows skipped because they changed after the task took its snapshot.
    #[serde(default)]
    pub version_conflicts: u64,
}

impl TaskProgress {
    pub fn processed(&self) -> u64 {
        self.updated + self.created + self.deleted
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStatus {
    pub completed: bool,
    pub progress: TaskProgress,
    pub error: Option<String>,
}

impl TaskStatus {
    /// Fraction of work done in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.completed {
            return 1.0;
        }
        if self.progress.total == 0 {
            return 0.0;
        }
        let done = self.progress.processed() + self.progress.version_conflicts;
        (done as f64 / self.progress.total as f64).clamp(0.0, 1.0)
    }
}

/// Aggregate counts of a completed bulk mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub total: u64,
    pub updated: u64,
    pub created: u64,
    pub deleted: u64,
    pub version_conflicts: u64,
}

impl TaskOutcome {
    pub fn any_rows_affected(&self) -> bool {
        self.updated > 0 || self.deleted > 0
    }

    /// Matched rows left untouched because of a version conflict.
    pub fn skipped_on_conflict(&self) -> bool {
        self.version_conflicts > 0
    }

    /// Rows written to the destination by a reindex.
    pub fn copied(&self) -> u64 {
        self.created + self.updated
    }
}

impl From<TaskProgress> for TaskOutcome {
    fn from(progress: TaskProgress) -> Self {
        Self {
            total: progress.total,
            updated: progress.updated,
            created: progress.created,
            deleted: progress.deleted,
            version_conflicts: progress.version_conflicts,
        }
    }
}
