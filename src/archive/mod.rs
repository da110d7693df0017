pub mod bucket;
pub mod job;
pub mod mover;
pub mod registry;
pub mod selector;
pub mod worker;

pub use bucket::{Bucket, BucketGranularity};
pub use job::{ArchiveJob, ArchiveJobKind, ArchiveSweep};
pub use mover::ArchiveMover;
pub use registry::{ArchiveTarget, DependentIndexRegistry, IndexBinding, validate_index_name};
pub use selector::{
    ArchiveBatch, BatchSelector, MAX_IDS_PER_BATCH, SelectionCriteria, SelectorSettings,
};
pub use worker::{ArchiverWorker, PartitionOwnership, WorkerDelays, WorkerStats};
