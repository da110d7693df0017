use super::backoff::PollBackoffPolicy;
use crate::core::{ArchiveError, Result, TaskHandle, TaskKind, TaskOutcome, TaskStatus};
use crate::engine::{BulkMutationClient, ConflictMode, Query};
use crate::mutation::UpdateScript;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Level, event};

/// A server-side bulk mutation to run as an engine task.
#[derive(Debug, Clone)]
pub enum MutationRequest {
    UpdateByQuery {
        index: String,
        query: Query,
        script: UpdateScript,
        conflicts: ConflictMode,
    },
    DeleteByQuery {
        index: String,
        query: Query,
        conflicts: ConflictMode,
    },
    Reindex {
        source_index: String,
        dest_index: String,
        query: Query,
    },
}

impl MutationRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::UpdateByQuery { .. } => TaskKind::Update,
            Self::DeleteByQuery { .. } => TaskKind::Delete,
            Self::Reindex { .. } => TaskKind::Reindex,
        }
    }

    /// Index the request reads from.
    pub fn index(&self) -> &str {
        match self {
            Self::UpdateByQuery { index, .. } | Self::DeleteByQuery { index, .. } => index,
            Self::Reindex { source_index, .. } => source_index,
        }
    }
}

/// Submits bulk mutations and waits for the resulting engine tasks.
#[derive(Clone)]
pub struct TaskPoller {
    client: Arc<dyn BulkMutationClient>,
    backoff: PollBackoffPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl TaskPoller {
    pub fn new(client: Arc<dyn BulkMutationClient>, backoff: PollBackoffPolicy) -> Self {
        Self {
            client,
            backoff,
            shutdown: None,
        }
    }

    /// Makes every wait observe `shutdown`; a `true` value interrupts it.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn backoff(&self) -> &PollBackoffPolicy {
        &self.backoff
    }

    pub async fn submit(&self, request: &MutationRequest) -> Result<TaskHandle> {
        let kind = request.kind();
        let index = request.index().to_string();
        let submitted = match request {
            MutationRequest::UpdateByQuery {
                index,
                query,
                script,
                conflicts,
            } => {
                self.client
                    .submit_update_by_query(index, query, script, *conflicts)
                    .await
            }
            MutationRequest::DeleteByQuery {
                index,
                query,
                conflicts,
            } => {
                self.client
                    .submit_delete_by_query(index, query, *conflicts)
                    .await
            }
            MutationRequest::Reindex {
                source_index,
                dest_index,
                query,
            } => {
                self.client
                    .submit_reindex(source_index, dest_index, query)
                    .await
            }
        };

        let id = submitted.map_err(|err| match err {
            ArchiveError::Submission { .. } => err,
            other => ArchiveError::Submission {
                operation: kind.to_string(),
                index: index.clone(),
                message: other.to_string(),
            },
        })?;
        event!(Level::DEBUG, task_id = %id, kind = %kind, index = %index, "task submitted");
        Ok(TaskHandle { id, kind, index })
    }

    /// Reads the task status once. Failures are reported as `Poll` errors.
    pub async fn poll(&self, handle: &TaskHandle) -> Result<TaskStatus> {
        self.client
            .get_task_status(&handle.id)
            .await
            .map_err(|err| match err {
                ArchiveError::Poll { .. } => err,
                other => ArchiveError::Poll {
                    task_id: handle.id.clone(),
                    message: other.to_string(),
                },
            })
    }

    /// Polls until the task completes, fails, or the attempt budget runs out.
    pub async fn wait(&self, handle: &TaskHandle) -> Result<TaskOutcome> {
        let mut backoff = self.backoff.start();
        let mut last_percent: Option<u64> = None;
        let mut checks = 0u32;

        loop {
            self.check_interrupted(handle)?;
            let status = self.poll(handle).await?;
            checks += 1;

            if let Some(reason) = status.error {
                event!(
                    Level::ERROR,
                    task_id = %handle.id,
                    kind = %handle.kind,
                    index = %handle.index,
                    error = %reason,
                    "task failed"
                );
                return Err(ArchiveError::TaskFailure {
                    task_id: handle.id.clone(),
                    reason,
                });
            }

            if status.completed {
                let outcome = TaskOutcome::from(status.progress);
                event!(
                    Level::DEBUG,
                    task_id = %handle.id,
                    kind = %handle.kind,
                    total = outcome.total,
                    updated = outcome.updated,
                    created = outcome.created,
                    deleted = outcome.deleted,
                    version_conflicts = outcome.version_conflicts,
                    "task completed"
                );
                return Ok(outcome);
            }

            let percent = (status.fraction() * 100.0).round() as u64;
            if last_percent != Some(percent) {
                event!(
                    Level::INFO,
                    task_id = %handle.id,
                    kind = %handle.kind,
                    index = %handle.index,
                    "task progress {}%",
                    percent
                );
                last_percent = Some(percent);
            }

            let Some(delay) = backoff.next() else {
                event!(
                    Level::WARN,
                    task_id = %handle.id,
                    attempts = checks,
                    "task still running after last status check"
                );
                return Err(ArchiveError::PollTimeout {
                    task_id: handle.id.clone(),
                    attempts: checks,
                });
            };
            self.sleep_or_interrupt(handle, delay).await?;
        }
    }

    pub async fn run(&self, request: &MutationRequest) -> Result<TaskOutcome> {
        let handle = self.submit(request).await?;
        self.wait(&handle).await
    }

    fn check_interrupted(&self, handle: &TaskHandle) -> Result<()> {
        let Some(shutdown) = self.shutdown.as_ref() else {
            return Ok(());
        };
        if *shutdown.borrow() {
            event!(Level::WARN, task_id = %handle.id, "shutdown requested, abandoning task wait");
            return Err(ArchiveError::Interrupted {
                task_id: handle.id.clone(),
            });
        }
        Ok(())
    }

    async fn sleep_or_interrupt(&self, handle: &TaskHandle, delay: Duration) -> Result<()> {
        let Some(shutdown) = self.shutdown.as_ref() else {
            tokio::time::sleep(delay).await;
            return Ok(());
        };

        let mut shutdown = shutdown.clone();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can request shutdown any more.
                        (&mut sleep).await;
                        return Ok(());
                    }
                    if *shutdown.borrow() {
                        return self.check_interrupted(handle);
                    }
                }
            }
        }
    }
}
