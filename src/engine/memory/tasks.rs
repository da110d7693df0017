#[derive(Debug, Clone)]
enum PendingOperation {
    Update {
        index: String,
        script: UpdateScript,
        conflicts: ConflictMode,
    },
    Delete {
        index: String,
        conflicts: ConflictMode,
    },
    Reindex {
        source_index: String,
        dest_index: String,
        query: Query,
    },
}

#[derive(Debug)]
struct MemoryTask {
    kind: TaskKind,
    operation: PendingOperation,
    /// Matched ids and their sequence numbers at submission.
    snapshot: BTreeMap<String, u64>,
    polls: u32,
    failure: Option<String>,
    status: TaskStatus,
}

impl MemoryState {
    fn snapshot(&self, index: &str, query: &Query) -> BTreeMap<String, u64> {
        self.indices
            .get(index)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| query.matches(&doc.source))
                    .map(|(id, doc)| (id.clone(), doc.seq_no))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn submit_task(
        &mut self,
        kind: TaskKind,
        index: &str,
        query: &Query,
        operation: PendingOperation,
    ) -> Result<String> {
        if let Some(pos) = self
            .submit_failures
            .iter()
            .position(|(k, i)| *k == kind && i == index)
        {
            self.submit_failures.remove(pos);
            return Err(ArchiveError::Submission {
                operation: kind.to_string(),
                index: index.to_string(),
                message: "request rejected".to_string(),
            });
        }
        if !self.indices.contains_key(index) {
            return Err(ArchiveError::Submission {
                operation: kind.to_string(),
                index: index.to_string(),
                message: format!("no such index [{}]", index),
            });
        }

        let failure = self
            .task_failures
            .iter()
            .position(|(k, i, _)| *k == kind && i == index)
            .map(|pos| self.task_failures.remove(pos).2);

        let snapshot = self.snapshot(index, query);
        let total = snapshot.len() as u64;

        let id = format!("memory:{}", uuid::Uuid::new_v4());
        self.tasks.insert(
            id.clone(),
            MemoryTask {
                kind,
                operation,
                snapshot,
                polls: 0,
                failure,
                status: TaskStatus {
                    completed: false,
                    progress: TaskProgress {
                        total,
                        ..TaskProgress::default()
                    },
                    error: None,
                },
            },
        );
        self.submitted.push((kind, index.to_string()));
        debug!("memory engine accepted {} task {} on '{}'", kind, id, index);
        Ok(id)
    }

    fn poll_task(&mut self, task_id: &str) -> Result<TaskStatus> {
        if self.status_failures > 0 {
            self.status_failures -= 1;
            return Err(ArchiveError::Poll {
                task_id: task_id.to_string(),
                message: "connection reset while reading task status".to_string(),
            });
        }

        let polls_to_complete = self.polls_to_complete;
        let (operation, snapshot, failure) = {
            let task = self.tasks.get_mut(task_id).ok_or_else(|| ArchiveError::Poll {
                task_id: task_id.to_string(),
                message: "unknown task".to_string(),
            })?;
            if task.status.completed {
                return Ok(task.status.clone());
            }
            task.polls += 1;
            if task.polls < polls_to_complete {
                let done =
                    task.status.progress.total * task.polls as u64 / polls_to_complete as u64;
                match task.kind {
                    TaskKind::Update => task.status.progress.updated = done,
                    TaskKind::Delete => task.status.progress.deleted = done,
                    TaskKind::Reindex => task.status.progress.created = done,
                }
                return Ok(task.status.clone());
            }
            (task.operation.clone(), task.snapshot.clone(), task.failure.clone())
        };

        let result = match failure {
            Some(reason) => Err(reason),
            None => self.execute(&operation, &snapshot),
        };

        let task = self.tasks.get_mut(task_id).ok_or_else(|| ArchiveError::Poll {
            task_id: task_id.to_string(),
            message: "unknown task".to_string(),
        })?;
        task.status.completed = true;
        match result {
            Ok(progress) => {
                task.status.progress = progress;
                if progress.processed() > 0 {
                    self.applied_mutations += 1;
                }
            }
            Err(reason) => task.status.error = Some(reason),
        }
        Ok(task.status.clone())
    }

    /// Applies a finished task. An `Err` carries the engine-reported reason.
    ///
    /// Updates and deletes only touch documents whose sequence number still
    /// matches the snapshot taken at submission.
    fn execute(
        &mut self,
        operation: &PendingOperation,
        snapshot: &BTreeMap<String, u64>,
    ) -> std::result::Result<TaskProgress, String> {
        match operation {
            PendingOperation::Update {
                index,
                script,
                conflicts,
            } => {
                let mut progress = TaskProgress {
                    total: snapshot.len() as u64,
                    ..TaskProgress::default()
                };
                for (id, seq_no) in snapshot {
                    if self.changed_since(index, id, *seq_no) {
                        match conflicts {
                            ConflictMode::Abort => return Err(version_conflict(id)),
                            ConflictMode::Proceed => {
                                progress.version_conflicts += 1;
                                continue;
                            }
                        }
                    }
                    let next = self.next_seq_no + 1;
                    let Some(doc) = self.indices.get_mut(index).and_then(|d| d.get_mut(id)) else {
                        continue;
                    };
                    let mut source = doc.source.clone();
                    script.apply(&mut source).map_err(|err| err.to_string())?;
                    if source != doc.source {
                        doc.source = source;
                        doc.seq_no = next;
                        self.next_seq_no = next;
                        progress.updated += 1;
                    }
                }
                Ok(progress)
            }
            PendingOperation::Delete { index, conflicts } => {
                let mut progress = TaskProgress {
                    total: snapshot.len() as u64,
                    ..TaskProgress::default()
                };
                for (id, seq_no) in snapshot {
                    if self.changed_since(index, id, *seq_no) {
                        match conflicts {
                            ConflictMode::Abort => return Err(version_conflict(id)),
                            ConflictMode::Proceed => {
                                progress.version_conflicts += 1;
                                continue;
                            }
                        }
                    }
                    if let Some(docs) = self.indices.get_mut(index) {
                        if docs.remove(id).is_some() {
                            progress.deleted += 1;
                        }
                    }
                }
                Ok(progress)
            }
            PendingOperation::Reindex {
                source_index,
                dest_index,
                query,
            } => {
                let copies: Vec<(String, Value)> = self
                    .indices
                    .get(source_index)
                    .map(|docs| {
                        docs.iter()
                            .filter(|(_, doc)| query.matches(&doc.source))
                            .map(|(id, doc)| (id.clone(), doc.source.clone()))
                            .collect()
                    })
                    .unwrap_or_default();

                let mut progress = TaskProgress {
                    total: copies.len() as u64,
                    ..TaskProgress::default()
                };
                for (id, source) in copies {
                    let seq_no = self.bump_seq_no();
                    let dest = self.indices.entry(dest_index.clone()).or_default();
                    let previous = dest.insert(id, StoredDocument { source, seq_no });
                    if previous.is_some() {
                        progress.updated += 1;
                    } else {
                        progress.created += 1;
                    }
                }
                Ok(progress)
            }
        }
    }

    /// A document conflicts when it was rewritten or removed after the
    /// snapshot, or when a conflict was injected for it.
    fn changed_since(&mut self, index: &str, id: &str, seq_no: u64) -> bool {
        if self.take_injected_conflict(index, id) {
            return true;
        }
        self.indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .is_none_or(|doc| doc.seq_no != seq_no)
    }
}

fn version_conflict(id: &str) -> String {
    format!("version_conflict_engine_exception: [{}]: version conflict", id)
}

#[async_trait]
impl BulkMutationClient for InMemorySearchEngine {
    async fn submit_update_by_query(
        &self,
        index: &str,
        query: &Query,
        script: &UpdateScript,
        conflicts: ConflictMode,
    ) -> Result<String> {
        let mut state = self.state.lock()?;
        state.submit_task(
            TaskKind::Update,
            index,
            query,
            PendingOperation::Update {
                index: index.to_string(),
                script: script.clone(),
                conflicts,
            },
        )
    }

    async fn submit_delete_by_query(
        &self,
        index: &str,
        query: &Query,
        conflicts: ConflictMode,
    ) -> Result<String> {
        let mut state = self.state.lock()?;
        state.submit_task(
            TaskKind::Delete,
            index,
            query,
            PendingOperation::Delete {
                index: index.to_string(),
                conflicts,
            },
        )
    }

    async fn submit_reindex(
        &self,
        source_index: &str,
        dest_index: &str,
        query: &Query,
    ) -> Result<String> {
        let mut state = self.state.lock()?;
        state.submit_task(
            TaskKind::Reindex,
            source_index,
            query,
            PendingOperation::Reindex {
                source_index: source_index.to_string(),
                dest_index: dest_index.to_string(),
                query: query.clone(),
            },
        )
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let mut state = self.state.lock()?;
        state.poll_task(task_id)
    }
}
