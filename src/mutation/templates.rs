use crate::core::{ArchiveError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const OVERWRITE_FIELDS: &str = "overwrite_fields";
pub const INCREMENT_COUNTER: &str = "increment_counter";

/// Local evaluation strategy of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOp {
    /// `params.fields` lists the names copied from `params.doc`.
    Overwrite,
    /// Adds `params.delta` to the numeric field named by `params.field`.
    Increment,
}

/// A named, versioned engine-side update script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTemplate {
    pub name: String,
    pub version: u32,
    pub op: ScriptOp,
    pub source: String,
    pub params: BTreeSet<String>,
}

impl ScriptTemplate {
    pub fn new(name: &str, version: u32, op: ScriptOp, source: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version,
            op,
            source: source.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Parameter names referenced as `params.<name>` in the script source.
    pub fn referenced_params(&self) -> BTreeSet<String> {
        PARAM_REFERENCE
            .captures_iter(&self.source)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !TEMPLATE_NAME.is_match(&self.name) {
            return Err(ArchiveError::Template(format!(
                "invalid template name '{}'",
                self.name
            )));
        }
        if self.version == 0 {
            return Err(ArchiveError::Template(format!(
                "template '{}' must have a version >= 1",
                self.name
            )));
        }
        let referenced = self.referenced_params();
        if referenced != self.params {
            let missing: Vec<_> = referenced.difference(&self.params).cloned().collect();
            let unused: Vec<_> = self.params.difference(&referenced).cloned().collect();
            return Err(ArchiveError::Template(format!(
                "template '{}' v{} parameter mismatch: undeclared={:?} unused={:?}",
                self.name, self.version, missing, unused
            )));
        }
        Ok(())
    }
}

lazy_static! {
    static ref PARAM_REFERENCE: Regex =
        Regex::new(r"params\.([A-Za-z_][A-Za-z0-9_]*)").expect("valid param regex");
    static ref TEMPLATE_NAME: Regex =
        Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid template name regex");
    static ref BUILTIN_TEMPLATES: Vec<ScriptTemplate> = vec![
        ScriptTemplate::new(
            OVERWRITE_FIELDS,
            1,
            ScriptOp::Overwrite,
            "for (String field : params.fields) { ctx._source[field] = params.doc[field]; }",
            &["fields", "doc"],
        ),
        ScriptTemplate::new(
            INCREMENT_COUNTER,
            1,
            ScriptOp::Increment,
            "def current = ctx._source[params.field]; \
             ctx._source[params.field] = (current == null ? 0 : current) + params.delta;",
            &["field", "delta"],
        ),
    ];
}

/// Registry of script templates keyed by name; the latest version wins.
#[derive(Debug, Clone, Default)]
pub struct ScriptTemplateRegistry {
    templates: BTreeMap<String, ScriptTemplate>,
}

impl ScriptTemplateRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in templates.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::empty();
        for template in BUILTIN_TEMPLATES.iter() {
            registry.register(template.clone())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, template: ScriptTemplate) -> Result<()> {
        template.validate()?;
        if let Some(existing) = self.templates.get(&template.name) {
            if existing.version >= template.version {
                return Err(ArchiveError::Template(format!(
                    "template '{}' v{} does not supersede registered v{}",
                    template.name, template.version, existing.version
                )));
            }
        }
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ScriptTemplate> {
        self.templates.get(name)
    }

    /// Re-validates every registered template. Run once at startup.
    pub fn validate_all(&self) -> Result<()> {
        for template in self.templates.values() {
            template.validate()?;
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    /// Binds parameters to a template, checking they match its declared set.
    pub fn render(
        &self,
        name: &str,
        params: serde_json::Map<String, Value>,
    ) -> Result<UpdateScript> {
        let template = self
            .get(name)
            .ok_or_else(|| ArchiveError::Template(format!("unknown template '{}'", name)))?;
        let provided: BTreeSet<String> = params.keys().cloned().collect();
        if provided != template.params {
            return Err(ArchiveError::Template(format!(
                "template '{}' expects params {:?}, got {:?}",
                name, template.params, provided
            )));
        }
        Ok(UpdateScript {
            template: template.name.clone(),
            version: template.version,
            op: template.op,
            source: template.source.clone(),
            params,
        })
    }
}

/// A rendered update script: template source plus bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateScript {
    pub template: String,
    pub version: u32,
    pub op: ScriptOp,
    pub source: String,
    pub params: serde_json::Map<String, Value>,
}

impl UpdateScript {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "source": self.source,
            "lang": "painless",
            "params": Value::Object(self.params.clone()),
        })
    }

    /// Applies the script to a document source in process.
    pub fn apply(&self, source: &mut Value) -> Result<()> {
        let target = source.as_object_mut().ok_or_else(|| {
            ArchiveError::Template(format!("script '{}' needs an object source", self.template))
        })?;

        match self.op {
            ScriptOp::Overwrite => {
                let fields = self.param("fields")?.as_array().ok_or_else(|| {
                    ArchiveError::Template("params.fields must be an array".to_string())
                })?;
                let doc = self.param("doc")?;
                for field in fields {
                    let Some(name) = field.as_str() else {
                        return Err(ArchiveError::Template(
                            "params.fields must hold strings".to_string(),
                        ));
                    };
                    let value = doc.get(name).cloned().unwrap_or(Value::Null);
                    target.insert(name.to_string(), value);
                }
            }
            ScriptOp::Increment => {
                let field = self.param("field")?.as_str().ok_or_else(|| {
                    ArchiveError::Template("params.field must be a string".to_string())
                })?;
                let delta = self.param("delta")?.as_i64().ok_or_else(|| {
                    ArchiveError::Template("params.delta must be an integer".to_string())
                })?;
                let current = match target.get(field) {
                    None | Some(Value::Null) => 0,
                    Some(value) => value.as_i64().ok_or_else(|| {
                        ArchiveError::Template(format!("field '{}' is not an integer", field))
                    })?,
                };
                target.insert(field.to_string(), Value::from(current.saturating_add(delta)));
            }
        }
        Ok(())
    }

    fn param(&self, name: &str) -> Result<&Value> {
        self.params.get(name).ok_or_else(|| {
            ArchiveError::Template(format!("script '{}' missing param '{}'", self.template, name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_validate() {
        let registry = ScriptTemplateRegistry::builtin().unwrap();
        registry.validate_all().unwrap();
        assert_eq!(registry.names(), vec![INCREMENT_COUNTER, OVERWRITE_FIELDS]);
    }

    #[test]
    fn rejects_undeclared_parameter_reference() {
        let template = ScriptTemplate::new(
            "bad",
            1,
            ScriptOp::Increment,
            "ctx._source[params.field] += params.amount;",
            &["field", "delta"],
        );
        let err = template.validate().unwrap_err();
        assert!(matches!(err, ArchiveError::Template(msg) if msg.contains("amount")));
    }

    #[test]
    fn newer_version_replaces_older_but_not_the_reverse() {
        let mut registry = ScriptTemplateRegistry::builtin().unwrap();
        let v2 = ScriptTemplate::new(
            INCREMENT_COUNTER,
            2,
            ScriptOp::Increment,
            "ctx._source[params.field] = (ctx._source[params.field] ?: 0) + params.delta;",
            &["field", "delta"],
        );
        registry.register(v2.clone()).unwrap();
        assert_eq!(registry.get(INCREMENT_COUNTER).unwrap().version, 2);

        let mut stale = v2;
        stale.version = 1;
        assert!(registry.register(stale).is_err());
    }
}
