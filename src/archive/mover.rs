use super::registry::{ArchiveTarget, IndexBinding};
use super::selector::ArchiveBatch;
use crate::core::{RecordKey, Result, TaskOutcome};
use crate::engine::{ConflictMode, DocumentClient, Query, SearchRequest, query::field_value};
use crate::task::{MutationRequest, TaskPoller};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::iter;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Extra copy rounds for rows rewritten after their first copy.
const RECOPY_ROUNDS: usize = 2;

/// Rows read per comparison; covers a full batch plus its child rows.
const MAX_ROWS_PER_CHECK: usize = 10_000;

/// Moves one batch from the hot indices into its bucket's archive indices.
///
/// Copies are confirmed for every index before anything is deleted. A failed
/// copy leaves the hot indices untouched; a failed delete leaves duplicates
/// that the next pass removes.
///
/// Hot rows that differ from their archived copy are copied again before the
/// delete. Rows rewritten once the delete is running are skipped by it and
/// stay hot, so the next pass archives their latest version.
#[derive(Clone)]
pub struct ArchiveMover {
    poller: TaskPoller,
    documents: Arc<dyn DocumentClient>,
    target: ArchiveTarget,
}

impl ArchiveMover {
    pub fn new(
        poller: TaskPoller,
        documents: Arc<dyn DocumentClient>,
        target: ArchiveTarget,
    ) -> Self {
        Self {
            poller,
            documents,
            target,
        }
    }

    pub fn target(&self) -> &ArchiveTarget {
        &self.target
    }

    /// Archives `batch` and returns the number of primary records that left
    /// the hot index.
    pub async fn move_batch(&self, batch: &ArchiveBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let span = info_span!(
            "archive.batch.move",
            index = %self.target.primary.index,
            bucket = %batch.bucket,
            partition = ?batch.partition_id,
            size = batch.len()
        );
        self.move_instrumented(batch).instrument(span).await
    }

    async fn move_instrumented(&self, batch: &ArchiveBatch) -> Result<usize> {
        let dependents = self.target.dependents.bindings()?;
        let ids = batch.id_values();

        let primary_copy = self.copy(&self.target.primary, batch, &ids).await?;
        if (primary_copy.copied() as usize) < batch.len() {
            event!(
                Level::WARN,
                expected = batch.len(),
                copied = primary_copy.copied(),
                "fewer primary rows copied than selected"
            );
        }
        for binding in &dependents {
            self.copy(binding, batch, &ids).await?;
        }

        let mut withheld = BTreeSet::new();
        for binding in dependents.iter().chain(iter::once(&self.target.primary)) {
            withheld.extend(self.reconcile(binding, batch, &ids).await?);
        }
        let ids: Vec<Value> = batch
            .ids
            .iter()
            .filter(|key| !withheld.contains(*key))
            .map(RecordKey::to_json)
            .collect();
        if ids.is_empty() {
            event!(Level::WARN, withheld = withheld.len(), "whole batch kept hot");
            return Ok(0);
        }

        // Dependents go first: while the root row stays hot, the batch is
        // selected again if a later delete fails.
        for binding in &dependents {
            self.delete(binding, &ids).await?;
        }
        let primary_delete = self.delete(&self.target.primary, &ids).await?;

        let archived = if primary_delete.deleted == 0 {
            0
        } else if withheld.is_empty() && !primary_delete.skipped_on_conflict() {
            batch.len()
        } else {
            let remaining = self.still_hot(&self.target.primary, &batch.id_values()).await?;
            batch.len().saturating_sub(remaining.len())
        };
        if archived < batch.len() {
            event!(
                Level::WARN,
                selected = batch.len(),
                archived,
                conflicts = primary_delete.version_conflicts,
                "some rows changed during archival and remain hot until the next pass"
            );
        }

        event!(
            Level::INFO,
            archived,
            dependents = dependents.len(),
            "batch archived"
        );
        Ok(archived)
    }

    async fn copy(
        &self,
        binding: &IndexBinding,
        batch: &ArchiveBatch,
        ids: &[Value],
    ) -> Result<TaskOutcome> {
        let request = MutationRequest::Reindex {
            source_index: binding.index.clone(),
            dest_index: binding.archive_index(&batch.bucket),
            query: Query::terms(&binding.id_field, ids.to_vec()),
        };
        let outcome = self.poller.run(&request).await?;
        event!(
            Level::DEBUG,
            source = %binding.index,
            dest = %binding.archive_index(&batch.bucket),
            copied = outcome.copied(),
            "copy confirmed"
        );
        Ok(outcome)
    }

    /// Copies rows again while the hot and archived sources differ. Returns
    /// the keys whose rows still differ after the last round.
    async fn reconcile(
        &self,
        binding: &IndexBinding,
        batch: &ArchiveBatch,
        ids: &[Value],
    ) -> Result<BTreeSet<RecordKey>> {
        let mut round = 0;
        loop {
            let diverged = self.diverged(binding, batch, ids).await?;
            if diverged.is_empty() {
                return Ok(diverged);
            }
            if round == RECOPY_ROUNDS {
                event!(
                    Level::WARN,
                    index = %binding.index,
                    rows = diverged.len(),
                    "rows keep changing, leaving them hot"
                );
                return Ok(diverged);
            }
            round += 1;
            event!(
                Level::DEBUG,
                index = %binding.index,
                rows = diverged.len(),
                round,
                "copying rewritten rows again"
            );
            let keys: Vec<Value> = diverged.iter().map(RecordKey::to_json).collect();
            self.copy(binding, batch, &keys).await?;
        }
    }

    async fn diverged(
        &self,
        binding: &IndexBinding,
        batch: &ArchiveBatch,
        ids: &[Value],
    ) -> Result<BTreeSet<RecordKey>> {
        let query = Query::terms(&binding.id_field, ids.to_vec());
        let hot = self
            .documents
            .search(&SearchRequest::new(&binding.index, query.clone()).size(MAX_ROWS_PER_CHECK))
            .await?;
        if hot.is_empty() {
            return Ok(BTreeSet::new());
        }

        let archive_index = binding.archive_index(&batch.bucket);
        let archived: HashMap<String, Value> = self
            .documents
            .search(&SearchRequest::new(&archive_index, query).size(MAX_ROWS_PER_CHECK))
            .await?
            .into_iter()
            .map(|hit| (hit.id, hit.source))
            .collect();

        Ok(hot
            .iter()
            .filter(|hit| archived.get(&hit.id) != Some(&hit.source))
            .filter_map(|hit| field_value(&hit.source, &binding.id_field))
            .filter_map(RecordKey::from_json)
            .collect())
    }

    /// Keys of `ids` that still have rows in the hot index.
    async fn still_hot(
        &self,
        binding: &IndexBinding,
        ids: &[Value],
    ) -> Result<BTreeSet<RecordKey>> {
        let query = Query::terms(&binding.id_field, ids.to_vec());
        let request = SearchRequest::new(&binding.index, query).size(MAX_ROWS_PER_CHECK);
        Ok(self
            .documents
            .search(&request)
            .await?
            .iter()
            .filter_map(|hit| field_value(&hit.source, &binding.id_field))
            .filter_map(RecordKey::from_json)
            .collect())
    }

    async fn delete(&self, binding: &IndexBinding, ids: &[Value]) -> Result<TaskOutcome> {
        let request = MutationRequest::DeleteByQuery {
            index: binding.index.clone(),
            query: Query::terms(&binding.id_field, ids.to_vec()),
            conflicts: ConflictMode::Proceed,
        };
        let outcome = self.poller.run(&request).await?;
        event!(
            Level::DEBUG,
            index = %binding.index,
            deleted = outcome.deleted,
            conflicts = outcome.version_conflicts,
            "hot rows deleted"
        );
        Ok(outcome)
    }
}
