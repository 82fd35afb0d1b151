//! Vector memory used by the chat flow.
//!
//! Stores embeddings with flat metadata and answers nearest-neighbour
//! queries filtered by metadata equality.

mod store;

pub use store::InMemoryVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("empty embedding for {0}")]
    EmptyEmbedding(String),

    #[error("embedding provider error: {0}")]
    Provider(#[from] crate::llm::LlmError),
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// One stored vector with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Embedding {
    pub fn new(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Exact-match filter over metadata keys; every entry must match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    equals: HashMap<String, Value>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, metadata: &HashMap<String, Value>) -> bool {
        self.equals
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub embedding: Embedding,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace by id
    async fn upsert(&self, embeddings: Vec<Embedding>) -> MemoryResult<()>;

    /// Best `top_k` matches for `vector`, highest score first
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> MemoryResult<Vec<ScoredMatch>>;

    async fn count(&self) -> MemoryResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_requires_every_key() {
        let meta: HashMap<String, Value> =
            [("namespace".to_string(), json!("ns1")), ("kind".to_string(), json!("reply"))]
                .into_iter()
                .collect();
        assert!(MetadataFilter::new().matches(&meta));
        assert!(MetadataFilter::new().equals("namespace", "ns1").matches(&meta));
        assert!(!MetadataFilter::new()
            .equals("namespace", "ns1")
            .equals("kind", "question")
            .matches(&meta));
        assert!(!MetadataFilter::new().equals("missing", 1).matches(&meta));
    }
}
