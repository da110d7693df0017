pub mod builder;
pub mod guards;
pub mod retry;
pub mod templates;
pub mod writer;

pub use builder::{Mutation, MutationOutcome, ScriptedMutationBuilder};
pub use guards::{CollectionRoleGuard, GuardDecision, GuardedMutation, RoleAssignment, RoleChange};
pub use retry::ConflictRetryPolicy;
pub use templates::{ScriptOp, ScriptTemplate, ScriptTemplateRegistry, UpdateScript};
pub use writer::DocumentWriter;
