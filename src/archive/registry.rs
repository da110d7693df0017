use super::bucket::Bucket;
use crate::core::{ArchiveError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref INDEX_NAME: Regex =
        Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("valid index regex");
    static ref FIELD_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("valid field regex");
}

pub fn validate_index_name(name: &str) -> Result<()> {
    if name.len() > 255 || !INDEX_NAME.is_match(name) {
        return Err(ArchiveError::Config(format!("invalid index name '{}'", name)));
    }
    Ok(())
}

/// An index whose documents move during archival, and the field linking
/// them to the archived ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexBinding {
    pub index: String,
    pub id_field: String,
}

impl IndexBinding {
    pub fn new(index: &str, id_field: &str) -> Self {
        Self {
            index: index.to_string(),
            id_field: id_field.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_index_name(&self.index)?;
        if !FIELD_NAME.is_match(&self.id_field) {
            return Err(ArchiveError::Config(format!(
                "invalid id field '{}' for index '{}'",
                self.id_field, self.index
            )));
        }
        Ok(())
    }

    pub fn archive_index(&self, bucket: &Bucket) -> String {
        bucket.destination_index(&self.index)
    }
}

/// Dependent indices contributed by other subsystems.
///
/// Shared handle: clones see the same registrations.
#[derive(Debug, Clone, Default)]
pub struct DependentIndexRegistry {
    bindings: Arc<RwLock<Vec<IndexBinding>>>,
}

impl DependentIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: Vec<IndexBinding>) -> Result<Self> {
        let registry = Self::new();
        for binding in bindings {
            registry.register(binding)?;
        }
        Ok(registry)
    }

    /// Registers a dependent index. Registering the same index twice with a
    /// different id field is an error; an identical registration is ignored.
    pub fn register(&self, binding: IndexBinding) -> Result<()> {
        binding.validate()?;
        let mut bindings = self.bindings.write()?;
        if let Some(existing) = bindings.iter().find(|b| b.index == binding.index) {
            if existing.id_field != binding.id_field {
                return Err(ArchiveError::Config(format!(
                    "index '{}' already registered with id field '{}'",
                    binding.index, existing.id_field
                )));
            }
            return Ok(());
        }
        bindings.push(binding);
        Ok(())
    }

    pub fn bindings(&self) -> Result<Vec<IndexBinding>> {
        Ok(self.bindings.read()?.clone())
    }

    pub fn len(&self) -> usize {
        self.bindings.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The primary index of an archivable entity together with its dependents.
#[derive(Debug, Clone)]
pub struct ArchiveTarget {
    pub primary: IndexBinding,
    pub dependents: DependentIndexRegistry,
}

impl ArchiveTarget {
    pub fn new(primary: IndexBinding, dependents: DependentIndexRegistry) -> Result<Self> {
        primary.validate()?;
        Ok(Self {
            primary,
            dependents,
        })
    }

    pub fn standalone(primary: IndexBinding) -> Result<Self> {
        Self::new(primary, DependentIndexRegistry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_uppercase_and_blank_index_names() {
        assert!(validate_index_name("operate-list-view-8.3.0_").is_ok());
        assert!(validate_index_name("Operate").is_err());
        assert!(validate_index_name("").is_err());
        assert!(validate_index_name("has space").is_err());
    }

    #[test]
    fn duplicate_registration_must_agree_on_id_field() {
        let registry = DependentIndexRegistry::new();
        registry.register(IndexBinding::new("variable", "processInstanceKey")).unwrap();
        registry.register(IndexBinding::new("variable", "processInstanceKey")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.register(IndexBinding::new("variable", "scopeKey")).is_err());
    }

    #[test]
    fn clones_share_registrations() {
        let registry = DependentIndexRegistry::new();
        let handle = registry.clone();
        handle.register(IndexBinding::new("incident", "processInstanceKey")).unwrap();
        assert_eq!(registry.bindings().unwrap()[0].index, "incident");
    }
}
