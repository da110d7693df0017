pub mod client;
pub mod http;
pub mod memory;
pub mod query;
pub mod variant;

pub use client::{BulkMutationClient, ConflictMode, DocumentClient, SearchEngine};
pub use http::ElasticsearchClient;
pub use memory::InMemorySearchEngine;
pub use query::{Query, SearchHit, SearchRequest, SortField, SortOrder};
pub use variant::EngineVariant;
