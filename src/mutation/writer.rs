use super::builder::{Mutation, MutationOutcome, ScriptedMutationBuilder};
use super::guards::{GuardDecision, GuardedMutation};
use super::retry::ConflictRetryPolicy;
use super::templates::UpdateScript;
use crate::core::{ArchiveError, DocumentVersion, Result, TaskOutcome};
use crate::engine::{ConflictMode, DocumentClient, Query};
use crate::task::{MutationRequest, TaskPoller};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Level, event};

/// Write path for single documents and by-query updates.
///
/// Every single-document write is read, modify, conditional write, repeated
/// under the conflict retry policy.
#[derive(Clone)]
pub struct DocumentWriter {
    documents: Arc<dyn DocumentClient>,
    poller: TaskPoller,
    builder: ScriptedMutationBuilder,
    retry: ConflictRetryPolicy,
}

impl DocumentWriter {
    pub fn new(
        documents: Arc<dyn DocumentClient>,
        poller: TaskPoller,
        builder: ScriptedMutationBuilder,
        retry: ConflictRetryPolicy,
    ) -> Self {
        Self {
            documents,
            poller,
            builder,
            retry,
        }
    }

    pub fn builder(&self) -> &ScriptedMutationBuilder {
        &self.builder
    }

    /// Applies one mutation to `index/id`.
    ///
    /// A guarded mutation whose precondition fails yields
    /// `MutationOutcome::Skipped` without writing.
    pub async fn apply(
        &self,
        index: &str,
        id: &str,
        mutation: &Mutation,
    ) -> Result<MutationOutcome> {
        let documents = self.documents.as_ref();
        let operation = match mutation {
            Mutation::Script(script) => script.template.clone(),
            Mutation::Guarded(guard) => guard.name().to_string(),
        };

        self.retry
            .run(&operation, id, || async move {
                let current = documents
                    .get_document(index, id)
                    .await?
                    .ok_or_else(|| ArchiveError::NotFound {
                        target_id: id.to_string(),
                    })?;

                let mut source = current.source.clone();
                match mutation {
                    Mutation::Script(script) => script.apply(&mut source)?,
                    Mutation::Guarded(guard) => match guard.apply(&mut source)? {
                        GuardDecision::Apply => {}
                        GuardDecision::Refuse(reason) => {
                            event!(
                                Level::DEBUG,
                                target_id = %id,
                                %reason,
                                "guarded mutation skipped"
                            );
                            return Ok(MutationOutcome::Skipped { reason });
                        }
                    },
                }

                if source == current.source {
                    return Ok(MutationOutcome::Updated {
                        version: current.version,
                    });
                }

                let version = documents
                    .write_document(index, id, &source, Some(current.version))
                    .await?;
                Ok(MutationOutcome::Updated { version })
            })
            .await
    }

    /// Overwrites `fields` of the stored document with values from `source`.
    pub async fn update_fields<T: Serialize>(
        &self,
        index: &str,
        id: &str,
        fields: &[&str],
        source: &T,
    ) -> Result<DocumentVersion> {
        let script = self.builder.overwrite(fields, source)?;
        self.apply(index, id, &Mutation::Script(script))
            .await?
            .require_applied(id)
    }

    /// Adds `delta` to a counter field of one document.
    pub async fn increment(
        &self,
        index: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<DocumentVersion> {
        let script = self.builder.increment(field, delta)?;
        self.apply(index, id, &Mutation::Script(script))
            .await?
            .require_applied(id)
    }

    /// Runs a guarded mutation, reporting a refused precondition as an
    /// outcome rather than an error.
    pub async fn guarded_update<G: GuardedMutation + 'static>(
        &self,
        index: &str,
        id: &str,
        guard: G,
    ) -> Result<MutationOutcome> {
        let mutation = self.builder.guarded(guard);
        self.apply(index, id, &mutation).await
    }

    /// Like `guarded_update`, but a refused precondition is a `Conflict`.
    pub async fn guarded_update_or_conflict<G: GuardedMutation + 'static>(
        &self,
        index: &str,
        id: &str,
        guard: G,
    ) -> Result<DocumentVersion> {
        self.guarded_update(index, id, guard)
            .await?
            .require_applied(id)
    }

    /// Runs `script` over every document matching `query` as an engine task.
    ///
    /// A document rewritten while the task runs fails the task with a
    /// version conflict instead of being skipped.
    pub async fn update_by_query(
        &self,
        index: &str,
        query: Query,
        script: UpdateScript,
    ) -> Result<TaskOutcome> {
        let request = MutationRequest::UpdateByQuery {
            index: index.to_string(),
            query,
            script,
            conflicts: ConflictMode::Abort,
        };
        let outcome = self.poller.run(&request).await?;
        if !outcome.any_rows_affected() {
            event!(Level::DEBUG, index = %index, "update by query matched no rows");
        }
        Ok(outcome)
    }
}
