use crate::core::parse_timestamp;
use serde_json::{Value, json};
use std::cmp::Ordering;

/// Subset of the search engine query DSL used by archival and the write path.
///
/// Renders to engine JSON and evaluates locally for the in-memory engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    Exists { field: String },
    Bool {
        must: Vec<Query>,
        must_not: Vec<Query>,
    },
}

impl Query {
    pub fn term(field: &str, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn terms(field: &str, values: Vec<Value>) -> Self {
        Self::Terms {
            field: field.to_string(),
            values,
        }
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::Range {
            field: field.to_string(),
            gte: None,
            lte: Some(value.into()),
        }
    }

    pub fn exists(field: &str) -> Self {
        Self::Exists {
            field: field.to_string(),
        }
    }

    pub fn all_of(must: Vec<Query>) -> Self {
        Self::Bool {
            must,
            must_not: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::MatchAll => json!({ "match_all": {} }),
            Self::Term { field, value } => json!({ "term": { field: value } }),
            Self::Terms { field, values } => json!({ "terms": { field: values } }),
            Self::Range { field, gte, lte } => {
                let mut bounds = serde_json::Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".to_string(), gte.clone());
                }
                if let Some(lte) = lte {
                    bounds.insert("lte".to_string(), lte.clone());
                }
                json!({ "range": { field: Value::Object(bounds) } })
            }
            Self::Exists { field } => json!({ "exists": { "field": field } }),
            Self::Bool { must, must_not } => {
                let mut clauses = serde_json::Map::new();
                if !must.is_empty() {
                    clauses.insert(
                        "filter".to_string(),
                        Value::Array(must.iter().map(Query::to_json).collect()),
                    );
                }
                if !must_not.is_empty() {
                    clauses.insert(
                        "must_not".to_string(),
                        Value::Array(must_not.iter().map(Query::to_json).collect()),
                    );
                }
                json!({ "bool": Value::Object(clauses) })
            }
        }
    }

    /// Evaluates the query against a document source.
    pub fn matches(&self, source: &Value) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => field_value(source, field)
                .is_some_and(|actual| compare_json(actual, value) == Ordering::Equal),
            Self::Terms { field, values } => field_value(source, field).is_some_and(|actual| {
                values
                    .iter()
                    .any(|candidate| compare_json(actual, candidate) == Ordering::Equal)
            }),
            Self::Range { field, gte, lte } => {
                let Some(actual) = field_value(source, field) else {
                    return false;
                };
                if actual.is_null() {
                    return false;
                }
                let lower_ok = gte
                    .as_ref()
                    .is_none_or(|bound| compare_json(actual, bound) != Ordering::Less);
                let upper_ok = lte
                    .as_ref()
                    .is_none_or(|bound| compare_json(actual, bound) != Ordering::Greater);
                lower_ok && upper_ok
            }
            Self::Exists { field } => field_value(source, field).is_some_and(|v| !v.is_null()),
            Self::Bool { must, must_not } => {
                must.iter().all(|query| query.matches(source))
                    && !must_not.iter().any(|query| query.matches(source))
            }
        }
    }
}

/// Resolves a dotted field path inside a document source.
pub fn field_value<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = source;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Total order over JSON scalars used for term matching, ranges and sorting.
///
/// Nulls sort last. Numbers compare numerically; strings that both parse as
/// RFC 3339 timestamps compare chronologically.
pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,

        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },

        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },

        // Keyword fields holding numeric ids are matched against numeric terms.
        (Value::String(x), Value::Number(y)) | (Value::Number(y), Value::String(x))
            if x.parse::<i64>().ok() == y.as_i64() && y.as_i64().is_some() =>
        {
            Ordering::Equal
        }

        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: SortOrder::Asc,
        }
    }

    pub fn to_json(&self) -> Value {
        let order = match self.order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        json!({ &self.field: { "order": order } })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    pub query: Query,
    pub sort: Vec<SortField>,
    pub size: usize,
}

impl SearchRequest {
    pub fn new(index: &str, query: Query) -> Self {
        Self {
            index: index.to_string(),
            query,
            sort: Vec::new(),
            size: 10,
        }
    }

    pub fn sort_by(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn body(&self) -> Value {
        json!({
            "query": self.query.to_json(),
            "sort": self.sort.iter().map(SortField::to_json).collect::<Vec<_>>(),
            "size": self.size,
            "seq_no_primary_term": true,
        })
    }

    /// Orders two document sources by this request's sort fields.
    pub fn compare_sources(&self, a: &Value, b: &Value) -> Ordering {
        for sort in &self.sort {
            let left = field_value(a, &sort.field).unwrap_or(&Value::Null);
            let right = field_value(b, &sort.field).unwrap_or(&Value::Null);
            let ordering = match sort.order {
                SortOrder::Asc => compare_json(left, right),
                SortOrder::Desc => compare_json(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub index: String,
    pub id: String,
    pub source: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_on_timestamps_compares_chronologically() {
        let doc = json!({ "endDate": "2026-10-17T08:00:00.000Z" });
        assert!(Query::lte("endDate", "2026-10-18T00:00:00+00:00").matches(&doc));
        assert!(!Query::lte("endDate", "2026-10-16T23:59:59.999Z").matches(&doc));
    }

    #[test]
    fn bool_query_requires_all_filters_and_no_exclusions() {
        let doc = json!({ "state": "COMPLETED", "partitionId": 2 });
        let query = Query::Bool {
            must: vec![
                Query::terms("state", vec![json!("COMPLETED"), json!("CANCELED")]),
                Query::terms("partitionId", vec![json!(1), json!(2)]),
            ],
            must_not: vec![Query::term("partitionId", 3)],
        };
        assert!(query.matches(&doc));
        assert!(!Query::term("partitionId", 1).matches(&doc));
    }

    #[test]
    fn missing_and_null_fields_do_not_match_ranges() {
        let doc = json!({ "endDate": null });
        assert!(!Query::lte("endDate", "2026-10-18T00:00:00.000Z").matches(&doc));
        assert!(!Query::exists("endDate").matches(&doc));
        assert!(!Query::exists("other").matches(&doc));
    }

    #[test]
    fn renders_bool_filters_as_engine_json() {
        let query = Query::all_of(vec![Query::term("joinRelation", "processInstance")]);
        assert_eq!(
            query.to_json(),
            json!({ "bool": { "filter": [ { "term": { "joinRelation": "processInstance" } } ] } })
        );
    }

    #[test]
    fn sorts_nulls_last() {
        let request = SearchRequest::new("idx", Query::MatchAll).sort_by(SortField::asc("n"));
        assert_eq!(
            request.compare_sources(&json!({ "n": 1 }), &json!({})),
            Ordering::Less
        );
    }
}
