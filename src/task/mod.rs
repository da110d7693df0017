pub mod backoff;
pub mod poller;

pub use backoff::{ExponentialBackoff, PollBackoffPolicy};
pub use poller::{MutationRequest, TaskPoller};
