use super::guards::GuardedMutation;
use super::templates::{INCREMENT_COUNTER, OVERWRITE_FIELDS, ScriptTemplateRegistry, UpdateScript};
use crate::core::{ArchiveError, DocumentVersion, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// One update expression against a single document.
#[derive(Clone)]
pub enum Mutation {
    /// Engine-renderable script (field overwrite or counter increment).
    Script(UpdateScript),
    /// Application-level check-then-write that may refuse.
    Guarded(Arc<dyn GuardedMutation>),
}

impl std::fmt::Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Script(script) => f.debug_tuple("Script").field(&script.template).finish(),
            Self::Guarded(guard) => f.debug_tuple("Guarded").field(&guard.name()).finish(),
        }
    }
}

/// Result of applying a mutation to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Updated { version: DocumentVersion },
    /// A guarded mutation declined to write because its precondition failed.
    Skipped { reason: String },
}

impl MutationOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }

    /// Maps a skipped guarded mutation to a domain `Conflict`.
    pub fn require_applied(self, target_id: &str) -> Result<DocumentVersion> {
        match self {
            Self::Updated { version } => Ok(version),
            Self::Skipped { reason } => Err(ArchiveError::Conflict {
                target_id: target_id.to_string(),
                reason,
            }),
        }
    }
}

/// Builds update expressions from the script template registry.
#[derive(Debug, Clone)]
pub struct ScriptedMutationBuilder {
    registry: Arc<ScriptTemplateRegistry>,
}

impl ScriptedMutationBuilder {
    pub fn new(registry: Arc<ScriptTemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ScriptTemplateRegistry {
        &self.registry
    }

    /// Overwrites only `fields`, taking their values from `source`.
    ///
    /// Fields absent from the serialized source are written as null.
    pub fn overwrite<T: Serialize>(&self, fields: &[&str], source: &T) -> Result<UpdateScript> {
        if fields.is_empty() {
            return Err(ArchiveError::Template(
                "overwrite needs at least one field".to_string(),
            ));
        }
        let serialized = serde_json::to_value(source)?;
        let object = serialized.as_object().ok_or_else(|| {
            ArchiveError::Template("overwrite source must serialize to an object".to_string())
        })?;

        let mut doc = serde_json::Map::new();
        for field in fields {
            doc.insert(
                field.to_string(),
                object.get(*field).cloned().unwrap_or(Value::Null),
            );
        }

        let mut params = serde_json::Map::new();
        params.insert(
            "fields".to_string(),
            Value::Array(fields.iter().map(|f| Value::from(*f)).collect()),
        );
        params.insert("doc".to_string(), Value::Object(doc));
        self.registry.render(OVERWRITE_FIELDS, params)
    }

    /// Adds `delta` to a numeric counter; a missing counter counts as zero.
    pub fn increment(&self, field: &str, delta: i64) -> Result<UpdateScript> {
        if field.trim().is_empty() {
            return Err(ArchiveError::Template(
                "increment field must not be empty".to_string(),
            ));
        }
        let mut params = serde_json::Map::new();
        params.insert("field".to_string(), Value::from(field));
        params.insert("delta".to_string(), Value::from(delta));
        self.registry.render(INCREMENT_COUNTER, params)
    }

    pub fn guarded<G: GuardedMutation + 'static>(&self, guard: G) -> Mutation {
        Mutation::Guarded(Arc::new(guard))
    }
}
