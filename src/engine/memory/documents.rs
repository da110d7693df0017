impl InMemorySearchEngine {
    /// Stores `source` under `index/id`, creating the index when needed.
    pub fn insert(&self, index: &str, id: &str, source: Value) -> Result<DocumentVersion> {
        let mut state = self.state.lock()?;
        let seq_no = state.bump_seq_no();
        let doc = StoredDocument { source, seq_no };
        let version = doc.version();
        state
            .indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(version)
    }

    pub fn insert_record<T: Serialize>(
        &self,
        index: &str,
        id: &str,
        record: &T,
    ) -> Result<DocumentVersion> {
        self.insert(index, id, serde_json::to_value(record)?)
    }

    pub fn document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let state = self.state.lock()?;
        Ok(state
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.source.clone()))
    }

    pub fn contains(&self, index: &str, id: &str) -> Result<bool> {
        Ok(self.document(index, id)?.is_some())
    }

    /// Ids stored in `index`, in id order. Empty when the index is absent.
    pub fn ids(&self, index: &str) -> Result<Vec<String>> {
        let state = self.state.lock()?;
        Ok(state
            .indices
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn count(&self, index: &str) -> Result<usize> {
        let state = self.state.lock()?;
        Ok(state.indices.get(index).map(|docs| docs.len()).unwrap_or(0))
    }
}

#[async_trait]
impl DocumentClient for InMemorySearchEngine {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let state = self.state.lock()?;
        let docs = state
            .indices
            .get(&request.index)
            .ok_or_else(|| ArchiveError::Submission {
                operation: "search".to_string(),
                index: request.index.clone(),
                message: format!("no such index [{}]", request.index),
            })?;

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter(|(_, doc)| request.query.matches(&doc.source))
            .map(|(id, doc)| SearchHit {
                index: request.index.clone(),
                id: id.clone(),
                source: doc.source.clone(),
            })
            .collect();
        hits.sort_by(|a, b| request.compare_sources(&a.source, &b.source));
        hits.truncate(request.size);
        Ok(hits)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<VersionedDocument>> {
        let state = self.state.lock()?;
        Ok(state
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|doc| VersionedDocument {
                id: id.to_string(),
                source: doc.source.clone(),
                version: doc.version(),
            }))
    }

    async fn write_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        expected: Option<DocumentVersion>,
    ) -> Result<DocumentVersion> {
        let mut state = self.state.lock()?;

        if let Some(expected) = expected {
            let current = state
                .indices
                .get(index)
                .and_then(|docs| docs.get(id))
                .map(|doc| doc.version())
                .ok_or_else(|| ArchiveError::NotFound {
                    target_id: id.to_string(),
                })?;

            if state.take_injected_conflict(index, id) {
                // A concurrent writer got there first.
                let seq_no = state.bump_seq_no();
                if let Some(doc) = state.indices.get_mut(index).and_then(|d| d.get_mut(id)) {
                    doc.seq_no = seq_no;
                }
                return Err(ArchiveError::VersionConflict {
                    target_id: id.to_string(),
                });
            }
            if current != expected {
                return Err(ArchiveError::VersionConflict {
                    target_id: id.to_string(),
                });
            }
        }

        let seq_no = state.bump_seq_no();
        let doc = StoredDocument {
            source: source.clone(),
            seq_no,
        };
        let version = doc.version();
        state
            .indices
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(version)
    }
}
