use super::client::{BulkMutationClient, ConflictMode, DocumentClient};
use super::query::{Query, SearchHit, SearchRequest};
use crate::core::{
    ArchiveError, DocumentVersion, Result, TaskKind, TaskProgress, TaskStatus, VersionedDocument,
};
use crate::mutation::UpdateScript;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::debug;

const PRIMARY_TERM: u64 = 1;

// The in-memory engine is split by responsibility for easier navigation.
include!("memory/tasks.rs");
include!("memory/documents.rs");

#[derive(Debug, Clone)]
struct StoredDocument {
    source: Value,
    seq_no: u64,
}

impl StoredDocument {
    fn version(&self) -> DocumentVersion {
        DocumentVersion {
            seq_no: self.seq_no,
            primary_term: PRIMARY_TERM,
        }
    }
}

type IndexContents = BTreeMap<String, StoredDocument>;

#[derive(Debug)]
struct MemoryState {
    indices: BTreeMap<String, IndexContents>,
    tasks: HashMap<String, MemoryTask>,
    next_seq_no: u64,
    polls_to_complete: u32,
    submit_failures: Vec<(TaskKind, String)>,
    task_failures: Vec<(TaskKind, String, String)>,
    status_failures: u32,
    version_conflicts: HashMap<(String, String), u32>,
    applied_mutations: u64,
    submitted: Vec<(TaskKind, String)>,
}

impl MemoryState {
    fn bump_seq_no(&mut self) -> u64 {
        self.next_seq_no += 1;
        self.next_seq_no
    }

    fn take_injected_conflict(&mut self, index: &str, id: &str) -> bool {
        let key = (index.to_string(), id.to_string());
        match self.version_conflicts.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// A search engine that lives in process memory.
///
/// Bulk mutations run as tasks that complete after a configurable number of
/// status checks; their effects become visible on completion. Failures can
/// be injected at submission, task and status-read level.
#[derive(Clone)]
pub struct InMemorySearchEngine {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for InMemorySearchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySearchEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                indices: BTreeMap::new(),
                tasks: HashMap::new(),
                next_seq_no: 0,
                polls_to_complete: 1,
                submit_failures: Vec::new(),
                task_failures: Vec::new(),
                status_failures: 0,
                version_conflicts: HashMap::new(),
                applied_mutations: 0,
                submitted: Vec::new(),
            })),
        }
    }

    /// Creates the named indices up front.
    pub fn with_indices(self, names: &[&str]) -> Result<Self> {
        for name in names {
            self.create_index(name)?;
        }
        Ok(self)
    }

    pub fn create_index(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock()?;
        state.indices.entry(name.to_string()).or_default();
        Ok(())
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        let state = self.state.lock()?;
        Ok(state.indices.keys().cloned().collect())
    }

    /// Number of status checks a task needs before it reports completion.
    pub fn set_polls_to_complete(&self, polls: u32) -> Result<()> {
        let mut state = self.state.lock()?;
        state.polls_to_complete = polls.max(1);
        Ok(())
    }

    /// Rejects the next submission of `kind` against `index`.
    pub fn fail_submission(&self, kind: TaskKind, index: &str) -> Result<()> {
        let mut state = self.state.lock()?;
        state.submit_failures.push((kind, index.to_string()));
        Ok(())
    }

    /// Makes the next task of `kind` against `index` complete with an error
    /// and without applying anything.
    pub fn fail_task(&self, kind: TaskKind, index: &str, reason: &str) -> Result<()> {
        let mut state = self.state.lock()?;
        state
            .task_failures
            .push((kind, index.to_string(), reason.to_string()));
        Ok(())
    }

    /// Fails the next `count` task status reads.
    pub fn fail_status_reads(&self, count: u32) -> Result<()> {
        let mut state = self.state.lock()?;
        state.status_failures += count;
        Ok(())
    }

    /// Simulates a concurrent writer winning the next `count` writes to
    /// `index/id`.
    pub fn inject_version_conflicts(&self, index: &str, id: &str, count: u32) -> Result<()> {
        let mut state = self.state.lock()?;
        *state
            .version_conflicts
            .entry((index.to_string(), id.to_string()))
            .or_insert(0) += count;
        Ok(())
    }

    /// Number of completed tasks that changed at least one document.
    pub fn mutation_count(&self) -> Result<u64> {
        let state = self.state.lock()?;
        Ok(state.applied_mutations)
    }

    /// Every submission accepted so far, in order.
    pub fn submitted_tasks(&self) -> Result<Vec<(TaskKind, String)>> {
        let state = self.state.lock()?;
        Ok(state.submitted.clone())
    }
}
