use super::job::{ArchiveJobKind, ArchiveSweep};
use crate::core::{ArchiveError, Result};
use log::{error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

/// Partitions this node currently owns. Shared with the running workers.
#[derive(Debug, Clone, Default)]
pub struct PartitionOwnership {
    partitions: Arc<RwLock<BTreeSet<u32>>>,
}

impl PartitionOwnership {
    pub fn new(partitions: impl IntoIterator<Item = u32>) -> Self {
        Self {
            partitions: Arc::new(RwLock::new(partitions.into_iter().collect())),
        }
    }

    pub fn set(&self, partitions: impl IntoIterator<Item = u32>) -> Result<()> {
        let mut guard = self.partitions.write()?;
        *guard = partitions.into_iter().collect();
        Ok(())
    }

    pub fn snapshot(&self) -> Result<BTreeSet<u32>> {
        Ok(self.partitions.read()?.clone())
    }
}

/// Delays between ticks of a worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerDelays {
    /// After a tick that archived nothing.
    pub idle: Duration,
    /// After a failed tick.
    pub error: Duration,
}

impl Default for WorkerDelays {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            error: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct KindCounters {
    archived: AtomicU64,
    ticks: AtomicU64,
    failures: AtomicU64,
}

/// Counters kept by the worker loops, per job kind.
#[derive(Debug, Default)]
pub struct WorkerStats {
    counters: HashMap<ArchiveJobKind, KindCounters>,
}

impl WorkerStats {
    fn for_kinds(kinds: impl IntoIterator<Item = ArchiveJobKind>) -> Self {
        Self {
            counters: kinds
                .into_iter()
                .map(|kind| (kind, KindCounters::default()))
                .collect(),
        }
    }

    pub fn archived(&self, kind: ArchiveJobKind) -> u64 {
        self.counters
            .get(&kind)
            .map(|c| c.archived.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn ticks(&self, kind: ArchiveJobKind) -> u64 {
        self.counters
            .get(&kind)
            .map(|c| c.ticks.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn failures(&self, kind: ArchiveJobKind) -> u64 {
        self.counters
            .get(&kind)
            .map(|c| c.failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Background loops driving each archival job kind on its own task.
pub struct ArchiverWorker {
    stop_tx: Arc<watch::Sender<bool>>,
    join_handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl ArchiverWorker {
    /// Spawns one loop per job. Setting `shutdown` to `true` stops them and
    /// interrupts any task wait that observes the same channel.
    pub fn spawn(
        jobs: Vec<Arc<dyn ArchiveSweep>>,
        ownership: PartitionOwnership,
        delays: WorkerDelays,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        let stats = Arc::new(WorkerStats::for_kinds(jobs.iter().map(|job| job.kind())));
        let join_handles = jobs
            .into_iter()
            .map(|job| {
                tokio::spawn(run_job_loop(
                    job,
                    ownership.clone(),
                    delays,
                    shutdown.subscribe(),
                    stats.clone(),
                ))
            })
            .collect();

        Self {
            stop_tx: shutdown,
            join_handles,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Signals the loops to stop and waits for them to finish.
    pub async fn stop(mut self) -> Result<()> {
        let _ = self.stop_tx.send(true);
        for join_handle in self.join_handles.drain(..) {
            join_handle
                .await
                .map_err(|err| ArchiveError::Io(format!("archiver worker join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for ArchiverWorker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        for join_handle in self.join_handles.drain(..) {
            join_handle.abort();
        }
    }
}

async fn run_job_loop(
    job: Arc<dyn ArchiveSweep>,
    ownership: PartitionOwnership,
    delays: WorkerDelays,
    mut stop_rx: watch::Receiver<bool>,
    stats: Arc<WorkerStats>,
) {
    let kind = job.kind();
    let Some(counters) = stats.counters.get(&kind) else {
        return;
    };
    info!("archiver worker '{}' started", kind);

    loop {
        if *stop_rx.borrow() {
            break;
        }
        counters.ticks.fetch_add(1, Ordering::Relaxed);

        let delay = match ownership.snapshot() {
            Err(err) => {
                error!("archiver '{}' cannot read partition ownership: {}", kind, err);
                delays.error
            }
            Ok(owned) => match job.archive_next_batch(&owned).await {
                Ok(archived) if archived > 0 => {
                    counters.archived.fetch_add(archived as u64, Ordering::Relaxed);
                    info!("archiver '{}' archived {} records", kind, archived);
                    Duration::ZERO
                }
                Ok(_) => delays.idle,
                Err(ArchiveError::Interrupted { task_id }) => {
                    warn!(
                        "archiver '{}' interrupted waiting for task '{}', batch left for next run",
                        kind, task_id
                    );
                    break;
                }
                Err(err) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    error!("archiver '{}' tick failed, retrying later: {}", kind, err);
                    delays.error
                }
            },
        };

        if delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = sleep(delay) => {}
        }
    }

    info!("archiver worker '{}' stopped", kind);
}
