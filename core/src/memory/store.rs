use super::{Embedding, MemoryError, MemoryResult, MetadataFilter, ScoredMatch, VectorStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Process-local vector store ranked by cosine similarity.
///
/// The first upsert fixes the dimension; later vectors of another length
/// are rejected.
#[derive(Default)]
pub struct InMemoryVectorStore {
    items: DashMap<String, Embedding>,
    dimension: AtomicUsize,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_dimension(&self, embedding: &Embedding) -> MemoryResult<()> {
        let actual = embedding.values.len();
        if actual == 0 {
            return Err(MemoryError::EmptyEmbedding(embedding.id.clone()));
        }
        match self
            .dimension
            .compare_exchange(0, actual, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(expected) if expected == actual => Ok(()),
            Err(expected) => Err(MemoryError::DimensionMismatch { expected, actual }),
        }
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, embeddings: Vec<Embedding>) -> MemoryResult<()> {
        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }
        let n = embeddings.len();
        for embedding in embeddings {
            trace!(target: "memory", id = %embedding.id, "Upsert embedding");
            self.items.insert(embedding.id.clone(), embedding);
        }
        debug!(target: "memory", count = n, total = self.items.len(), "Upserted embeddings");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> MemoryResult<Vec<ScoredMatch>> {
        let expected = self.dimension.load(Ordering::SeqCst);
        if expected != 0 && expected != vector.len() {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let mut matches: Vec<ScoredMatch> = self
            .items
            .iter()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| ScoredMatch {
                score: cosine_similarity(vector, &entry.values),
                embedding: entry.value().clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        debug!(target: "memory", top_k, returned = matches.len(), "Vector query");
        Ok(matches)
    }

    async fn count(&self) -> MemoryResult<usize> {
        Ok(self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn query_ranks_and_filters() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![
                Embedding::new("a", vec![1.0, 0.0]).with_metadata("namespace", "ns1"),
                Embedding::new("b", vec![0.7, 0.7]).with_metadata("namespace", "ns1"),
                Embedding::new("c", vec![1.0, 0.0]).with_metadata("namespace", "ns2"),
            ])
            .await
            .unwrap();

        let filter = MetadataFilter::new().equals("namespace", "ns1");
        let hits = store.query(&[1.0, 0.1], 5, &filter).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|m| m.embedding.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let top = store.query(&[1.0, 0.1], 1, &MetadataFilter::new()).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.upsert(vec![Embedding::new("a", vec![1.0])]).await.unwrap();
        store.upsert(vec![Embedding::new("a", vec![2.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_mismatched_dimension() {
        let store = InMemoryVectorStore::new();
        store.upsert(vec![Embedding::new("a", vec![1.0, 0.0])]).await.unwrap();
        let err = store
            .upsert(vec![Embedding::new("b", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { expected: 2, actual: 1 }));
        assert!(store.query(&[1.0], 1, &MetadataFilter::new()).await.is_err());
        assert!(matches!(
            store.upsert(vec![Embedding::new("e", vec![])]).await,
            Err(MemoryError::EmptyEmbedding(_))
        ));
    }
}
