use super::bucket::{Bucket, BucketGranularity};
use crate::core::{
    Clock, ProcessInstanceState, RecordKey, Result, fields, format_timestamp, parse_timestamp,
};
use crate::engine::{DocumentClient, Query, SearchRequest, SortField, query::field_value};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{Level, event};

/// Upper bound of ids per batch, keeping terms queries within clause limits.
pub const MAX_IDS_PER_BATCH: usize = 1000;

/// One unit of archival work: ids sharing a bucket (and partition).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveBatch {
    pub bucket: Bucket,
    pub partition_id: Option<u32>,
    pub ids: Vec<RecordKey>,
}

impl ArchiveBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_values(&self) -> Vec<Value> {
        self.ids.iter().map(RecordKey::to_json).collect()
    }
}

/// What to select and how to read it from the hot index.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCriteria {
    pub index: String,
    pub id_field: String,
    pub end_date_field: String,
    pub filters: Vec<Query>,
    /// When set, only records whose partition is owned are selected.
    pub partition_field: Option<String>,
}

impl SelectionCriteria {
    /// Finished process instance rows of the list-view index.
    pub fn process_instances(list_view_index: &str) -> Self {
        Self {
            index: list_view_index.to_string(),
            id_field: fields::PROCESS_INSTANCE_KEY.to_string(),
            end_date_field: fields::END_DATE.to_string(),
            filters: vec![
                Query::term(fields::JOIN_RELATION, "processInstance"),
                Query::terms(
                    fields::STATE,
                    vec![
                        Value::from(ProcessInstanceState::Completed.as_str()),
                        Value::from(ProcessInstanceState::Canceled.as_str()),
                    ],
                ),
            ],
            partition_field: Some(fields::PARTITION_ID.to_string()),
        }
    }

    /// Finished batch operations. Not partition scoped.
    pub fn batch_operations(batch_operation_index: &str) -> Self {
        Self {
            index: batch_operation_index.to_string(),
            id_field: fields::ID.to_string(),
            end_date_field: fields::END_DATE.to_string(),
            filters: Vec::new(),
            partition_field: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorSettings {
    pub retention: Duration,
    pub granularity: BucketGranularity,
    pub max_batch_size: usize,
    /// Hits read per selection pass.
    pub candidate_limit: usize,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            retention: Duration::hours(1),
            granularity: BucketGranularity::Daily,
            max_batch_size: 100,
            candidate_limit: 10_000,
        }
    }
}

/// Finds archivable records and groups them into batches.
#[derive(Clone)]
pub struct BatchSelector {
    documents: Arc<dyn DocumentClient>,
    criteria: SelectionCriteria,
    settings: SelectorSettings,
    clock: Arc<dyn Clock>,
}

impl BatchSelector {
    pub fn new(
        documents: Arc<dyn DocumentClient>,
        criteria: SelectionCriteria,
        settings: SelectorSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            criteria,
            settings,
            clock,
        }
    }

    pub fn criteria(&self) -> &SelectionCriteria {
        &self.criteria
    }

    /// Records that ended at or before this instant are eligible. `None`
    /// when the retention reaches past the earliest representable instant.
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.clock.now().checked_sub_signed(self.settings.retention)
    }

    fn batch_limit(&self) -> usize {
        self.settings.max_batch_size.clamp(1, MAX_IDS_PER_BATCH)
    }

    pub fn query(&self, owned_partitions: &BTreeSet<u32>, cutoff: DateTime<Utc>) -> Query {
        let mut must = self.criteria.filters.clone();
        must.push(Query::lte(
            &self.criteria.end_date_field,
            format_timestamp(&cutoff),
        ));
        if let Some(partition_field) = &self.criteria.partition_field {
            must.push(Query::terms(
                partition_field,
                owned_partitions.iter().map(|p| Value::from(*p)).collect(),
            ));
        }
        Query::all_of(must)
    }

    /// All batches currently eligible, oldest bucket first.
    pub async fn select(&self, owned_partitions: &BTreeSet<u32>) -> Result<Vec<ArchiveBatch>> {
        if self.criteria.partition_field.is_some() && owned_partitions.is_empty() {
            return Ok(Vec::new());
        }
        let Some(cutoff) = self.cutoff() else {
            event!(
                Level::WARN,
                index = %self.criteria.index,
                retention_secs = self.settings.retention.num_seconds(),
                "retention reaches before the earliest instant, nothing is eligible"
            );
            return Ok(Vec::new());
        };

        let query = self.query(owned_partitions, cutoff);
        let request = SearchRequest::new(&self.criteria.index, query)
            .sort_by(SortField::asc(&self.criteria.end_date_field))
            .sort_by(SortField::asc(&self.criteria.id_field))
            .size(self.settings.candidate_limit.max(1));
        let hits = self.documents.search(&request).await?;

        let mut grouped: BTreeMap<(Bucket, Option<u32>), BTreeSet<RecordKey>> = BTreeMap::new();
        for hit in &hits {
            let Some(end_date) = field_value(&hit.source, &self.criteria.end_date_field)
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
            else {
                event!(
                    Level::WARN,
                    index = %hit.index,
                    id = %hit.id,
                    "skipping record without a readable end date"
                );
                continue;
            };

            let partition_id = match &self.criteria.partition_field {
                Some(field) => {
                    let partition = field_value(&hit.source, field)
                        .and_then(Value::as_u64)
                        .and_then(|p| u32::try_from(p).ok());
                    match partition {
                        Some(p) if owned_partitions.contains(&p) => Some(p),
                        _ => continue,
                    }
                }
                None => None,
            };

            let key = field_value(&hit.source, &self.criteria.id_field)
                .and_then(RecordKey::from_json)
                .unwrap_or_else(|| match hit.id.parse::<i64>() {
                    Ok(numeric) => RecordKey::Numeric(numeric),
                    Err(_) => RecordKey::Text(hit.id.clone()),
                });

            let bucket = Bucket::for_end_date(end_date, self.settings.granularity);
            grouped.entry((bucket, partition_id)).or_default().insert(key);
        }

        let limit = self.batch_limit();
        let mut batches = Vec::new();
        for ((bucket, partition_id), ids) in grouped {
            let ids: Vec<RecordKey> = ids.into_iter().collect();
            for chunk in ids.chunks(limit) {
                batches.push(ArchiveBatch {
                    bucket,
                    partition_id,
                    ids: chunk.to_vec(),
                });
            }
        }

        event!(
            Level::DEBUG,
            index = %self.criteria.index,
            candidates = hits.len(),
            batches = batches.len(),
            "archive selection finished"
        );
        Ok(batches)
    }

    /// The oldest eligible batch, if any.
    pub async fn next_batch(
        &self,
        owned_partitions: &BTreeSet<u32>,
    ) -> Result<Option<ArchiveBatch>> {
        Ok(self.select(owned_partitions).await?.into_iter().next())
    }
}
