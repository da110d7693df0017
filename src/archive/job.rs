use super::mover::ArchiveMover;
use super::selector::BatchSelector;
use crate::core::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArchiveJobKind {
    ProcessInstances,
    BatchOperations,
}

impl fmt::Display for ArchiveJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ProcessInstances => "process_instances",
            Self::BatchOperations => "batch_operations",
        };
        write!(f, "{label}")
    }
}

/// One scheduler tick of an archival job.
#[async_trait]
pub trait ArchiveSweep: Send + Sync {
    fn kind(&self) -> ArchiveJobKind;

    /// Archives the next eligible batch within `owned_partitions`.
    ///
    /// Returns the number of records archived; zero means nothing to do.
    async fn archive_next_batch(&self, owned_partitions: &BTreeSet<u32>) -> Result<usize>;
}

/// Selector plus mover for one kind of archivable record.
pub struct ArchiveJob {
    kind: ArchiveJobKind,
    selector: BatchSelector,
    mover: ArchiveMover,
    required_partition: Option<u32>,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ArchiveJob {
    pub fn new(kind: ArchiveJobKind, selector: BatchSelector, mover: ArchiveMover) -> Self {
        Self {
            kind,
            selector,
            mover,
            required_partition: None,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Runs the job only on the node owning `partition`.
    pub fn only_on_partition(mut self, partition: u32) -> Self {
        self.required_partition = Some(partition);
        self
    }

    pub fn selector(&self) -> &BatchSelector {
        &self.selector
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.in_flight))
    }
}

#[async_trait]
impl ArchiveSweep for ArchiveJob {
    fn kind(&self) -> ArchiveJobKind {
        self.kind
    }

    async fn archive_next_batch(&self, owned_partitions: &BTreeSet<u32>) -> Result<usize> {
        if let Some(partition) = self.required_partition {
            if !owned_partitions.contains(&partition) {
                return Ok(0);
            }
        }

        let Some(_guard) = self.try_begin() else {
            event!(Level::DEBUG, job = %self.kind, "sweep already in flight, skipping tick");
            return Ok(0);
        };

        let Some(batch) = self.selector.next_batch(owned_partitions).await? else {
            return Ok(0);
        };
        self.mover.move_batch(&batch).await
    }
}
