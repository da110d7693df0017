use crate::archive::{
    ArchiveJob, ArchiveJobKind, ArchiveMover, ArchiveSweep, ArchiveTarget, ArchiverWorker,
    BatchSelector, DependentIndexRegistry, IndexBinding, PartitionOwnership, SelectionCriteria,
};
use crate::config::ArchiverConfig;
use crate::core::{ArchiveError, Clock, Result, SystemClock, fields};
use crate::engine::{BulkMutationClient, DocumentClient, EngineVariant, SearchEngine};
use crate::mutation::{DocumentWriter, ScriptTemplateRegistry, ScriptedMutationBuilder};
use crate::task::TaskPoller;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Level, event};

/// Entry point wiring the engine, the archival jobs and the write path.
///
/// # Examples
///
/// ```
/// use archivist::{Archiver, ArchiverConfig, EngineConfig};
///
/// # fn main() -> archivist::Result<()> {
/// let config = ArchiverConfig::new("node-a").engine(EngineConfig::Memory);
/// let archiver = Archiver::from_config(config)?;
/// assert_eq!(archiver.jobs().len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct Archiver {
    config: ArchiverConfig,
    jobs: Vec<Arc<ArchiveJob>>,
    dependents: DependentIndexRegistry,
    writer: DocumentWriter,
    ownership: PartitionOwnership,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Archiver {
    /// Builds an archiver over the engine named in `config`.
    pub fn from_config(config: ArchiverConfig) -> Result<Self> {
        let engine = Arc::new(EngineVariant::from_config(&config.engine)?);
        event!(
            Level::INFO,
            engine = engine.name(),
            node = %config.node_id,
            "search engine selected"
        );
        Self::new(config, engine, Arc::new(SystemClock))
    }

    pub fn new<E>(config: ArchiverConfig, engine: Arc<E>, clock: Arc<dyn Clock>) -> Result<Self>
    where
        E: SearchEngine + 'static,
    {
        config.validate()?;

        let registry = ScriptTemplateRegistry::builtin()?;
        registry.validate_all()?;

        let tasks: Arc<dyn BulkMutationClient> = engine.clone();
        let documents: Arc<dyn DocumentClient> = engine;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let poller = TaskPoller::new(tasks, config.poll_backoff.clone()).with_shutdown(shutdown_rx);

        let dependents = DependentIndexRegistry::from_bindings(config.indices.dependents.clone())?;
        let settings = config.selector_settings()?;

        let instances_target = ArchiveTarget::new(
            IndexBinding::new(&config.indices.list_view, fields::PROCESS_INSTANCE_KEY),
            dependents.clone(),
        )?;
        let instances = ArchiveJob::new(
            ArchiveJobKind::ProcessInstances,
            BatchSelector::new(
                documents.clone(),
                SelectionCriteria::process_instances(&config.indices.list_view),
                settings.clone(),
                clock.clone(),
            ),
            ArchiveMover::new(poller.clone(), documents.clone(), instances_target),
        );

        let mut jobs = vec![Arc::new(instances)];
        if config.archive_batch_operations {
            let target = ArchiveTarget::standalone(IndexBinding::new(
                &config.indices.batch_operation,
                fields::ID,
            ))?;
            let batch_operations = ArchiveJob::new(
                ArchiveJobKind::BatchOperations,
                BatchSelector::new(
                    documents.clone(),
                    SelectionCriteria::batch_operations(&config.indices.batch_operation),
                    settings,
                    clock,
                ),
                ArchiveMover::new(poller.clone(), documents.clone(), target),
            )
            .only_on_partition(config.batch_operation_partition);
            jobs.push(Arc::new(batch_operations));
        }

        let writer = DocumentWriter::new(
            documents,
            poller,
            ScriptedMutationBuilder::new(Arc::new(registry)),
            config.conflict_retry.clone(),
        );
        let ownership = PartitionOwnership::new(config.partitions.iter().copied());

        Ok(Self {
            config,
            jobs,
            dependents,
            writer,
            ownership,
            shutdown,
        })
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    pub fn jobs(&self) -> &[Arc<ArchiveJob>] {
        &self.jobs
    }

    pub fn job(&self, kind: ArchiveJobKind) -> Option<&Arc<ArchiveJob>> {
        self.jobs.iter().find(|job| job.kind() == kind)
    }

    /// Registry handle shared with the instance mover; bindings added here
    /// take part in the next batch.
    pub fn dependents(&self) -> &DependentIndexRegistry {
        &self.dependents
    }

    pub fn writer(&self) -> &DocumentWriter {
        &self.writer
    }

    pub fn ownership(&self) -> &PartitionOwnership {
        &self.ownership
    }

    /// Archives the next batch of `kind` within `owned_partitions`.
    pub async fn archive_next_batch(
        &self,
        kind: ArchiveJobKind,
        owned_partitions: &BTreeSet<u32>,
    ) -> Result<usize> {
        let job = self
            .job(kind)
            .ok_or_else(|| ArchiveError::Config(format!("archive job '{}' is disabled", kind)))?;
        job.archive_next_batch(owned_partitions).await
    }

    /// Drains every job once over the currently owned partitions.
    ///
    /// ```
    /// use archivist::{Archiver, ArchiverConfig, EngineConfig, InMemorySearchEngine, SystemClock};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let engine = InMemorySearchEngine::new()
    ///     .with_indices(&["operate-list-view", "operate-batch-operation"])?;
    /// let mut config = ArchiverConfig::new("node-a").engine(EngineConfig::Memory);
    /// config.indices.dependents.clear();
    /// let archiver = Archiver::new(config, Arc::new(engine), Arc::new(SystemClock))?;
    ///
    /// assert_eq!(archiver.sweep_once().await?, 0);
    /// # Ok::<(), archivist::ArchiveError>(())
    /// # }).unwrap();
    /// ```
    pub async fn sweep_once(&self) -> Result<usize> {
        let owned = self.ownership.snapshot()?;
        let mut total = 0;
        for job in &self.jobs {
            loop {
                let archived = job.archive_next_batch(&owned).await?;
                if archived == 0 {
                    break;
                }
                total += archived;
            }
        }
        event!(Level::INFO, archived = total, node = %self.config.node_id, "sweep finished");
        Ok(total)
    }

    /// Spawns the background worker loops.
    pub fn start(&self) -> ArchiverWorker {
        let jobs = self
            .jobs
            .iter()
            .map(|job| job.clone() as Arc<dyn ArchiveSweep>)
            .collect();
        ArchiverWorker::spawn(
            jobs,
            self.ownership.clone(),
            self.config.worker_delays(),
            self.shutdown.clone(),
        )
    }

    /// Interrupts in-flight task waits and stops any running worker.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
