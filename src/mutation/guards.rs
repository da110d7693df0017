use crate::core::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decision of a guarded mutation after inspecting the current document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The source was modified and should be written back.
    Apply,
    /// The precondition failed; nothing is written.
    Refuse(String),
}

/// A business rule expressed as read, verify, modify.
///
/// `apply` receives a copy of the current source and may modify it. It runs
/// again on every conflict retry, against freshly read state.
pub trait GuardedMutation: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, source: &mut Value) -> Result<GuardDecision>;
}

pub const ROLE_MANAGER: &str = "manager";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub identity: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleChange {
    Assign { identity: String, role: String },
    Remove { identity: String },
}

/// Changes a role on a collection document (`{"roles": [...]}`) unless the
/// change would leave the collection without a manager.
#[derive(Debug, Clone)]
pub struct CollectionRoleGuard {
    change: RoleChange,
}

impl CollectionRoleGuard {
    pub fn assign(identity: &str, role: &str) -> Self {
        Self {
            change: RoleChange::Assign {
                identity: identity.to_string(),
                role: role.to_string(),
            },
        }
    }

    pub fn remove(identity: &str) -> Self {
        Self {
            change: RoleChange::Remove {
                identity: identity.to_string(),
            },
        }
    }

    fn identity(&self) -> &str {
        match &self.change {
            RoleChange::Assign { identity, .. } | RoleChange::Remove { identity } => identity,
        }
    }
}

impl GuardedMutation for CollectionRoleGuard {
    fn name(&self) -> &str {
        "collection_role_change"
    }

    fn apply(&self, source: &mut Value) -> Result<GuardDecision> {
        let raw_roles = source.get("roles").cloned().unwrap_or(Value::Array(Vec::new()));
        let mut roles: Vec<RoleAssignment> = serde_json::from_value(raw_roles)?;

        let identity = self.identity();
        let position = roles.iter().position(|r| r.identity == identity);
        let managers = roles.iter().filter(|r| r.role == ROLE_MANAGER).count();
        let target_is_manager = position.is_some_and(|idx| roles[idx].role == ROLE_MANAGER);

        match &self.change {
            RoleChange::Remove { .. } => {
                let Some(idx) = position else {
                    return Err(ArchiveError::NotFound {
                        target_id: identity.to_string(),
                    });
                };
                if target_is_manager && managers == 1 {
                    return Ok(GuardDecision::Refuse(format!(
                        "'{}' is the last manager of the collection",
                        identity
                    )));
                }
                roles.remove(idx);
            }
            RoleChange::Assign { role, .. } => {
                if target_is_manager && managers == 1 && role != ROLE_MANAGER {
                    return Ok(GuardDecision::Refuse(format!(
                        "'{}' is the last manager of the collection",
                        identity
                    )));
                }
                match position {
                    Some(idx) => roles[idx].role = role.clone(),
                    None => roles.push(RoleAssignment {
                        identity: identity.to_string(),
                        role: role.clone(),
                    }),
                }
            }
        }

        let object = source.as_object_mut().ok_or_else(|| {
            ArchiveError::Template("collection document must be an object".to_string())
        })?;
        object.insert("roles".to_string(), serde_json::to_value(&roles)?);
        Ok(GuardDecision::Apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection() -> Value {
        json!({
            "name": "reports",
            "roles": [
                { "identity": "ana", "role": "manager" },
                { "identity": "ben", "role": "editor" }
            ]
        })
    }

    #[test]
    fn refuses_to_demote_last_manager() {
        let mut doc = collection();
        let decision = CollectionRoleGuard::assign("ana", "viewer").apply(&mut doc).unwrap();
        assert!(matches!(decision, GuardDecision::Refuse(_)));
        assert_eq!(doc, collection());
    }

    #[test]
    fn allows_demotion_once_another_manager_exists() {
        let mut doc = collection();
        CollectionRoleGuard::assign("ben", ROLE_MANAGER).apply(&mut doc).unwrap();
        let decision = CollectionRoleGuard::remove("ana").apply(&mut doc).unwrap();
        assert_eq!(decision, GuardDecision::Apply);
        assert_eq!(doc["roles"], json!([{ "identity": "ben", "role": "manager" }]));
    }

    #[test]
    fn removing_unknown_identity_is_not_found() {
        let mut doc = collection();
        let err = CollectionRoleGuard::remove("zoe").apply(&mut doc).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { target_id } if target_id == "zoe"));
    }
}
