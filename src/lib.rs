// ============================================================================
// Archivist Library
// ============================================================================

pub mod archive;
pub mod config;
pub mod core;
pub mod engine;
pub mod facade;
pub mod mutation;
pub mod task;
pub mod telemetry;

// Re-export main types for convenience
pub use archive::{
    ArchiveBatch, ArchiveJob, ArchiveJobKind, ArchiveMover, ArchiveSweep, ArchiveTarget,
    ArchiverWorker, BatchSelector, Bucket, BucketGranularity, DependentIndexRegistry,
    IndexBinding, PartitionOwnership, SelectionCriteria, SelectorSettings, WorkerDelays,
};
pub use config::{ArchiverConfig, EngineConfig, IndexConfig};
pub use core::{ArchiveError, Clock, ManualClock, RecordKey, Result, SystemClock, TaskOutcome};
pub use engine::{
    BulkMutationClient, ConflictMode, DocumentClient, ElasticsearchClient, EngineVariant,
    InMemorySearchEngine, Query, SearchEngine,
};
pub use facade::Archiver;
pub use mutation::{
    ConflictRetryPolicy, DocumentWriter, Mutation, MutationOutcome, ScriptTemplateRegistry,
    ScriptedMutationBuilder,
};
pub use task::{MutationRequest, PollBackoffPolicy, TaskPoller};
