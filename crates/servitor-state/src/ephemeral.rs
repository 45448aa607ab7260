//! In-process vector store
//!
//! `EphemeralVectorStore` keeps every record in a `Vec` and ranks by exact
//! cosine similarity. Nothing survives the process.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::schema::{VectorRecall, VectorRecord};
use crate::storage_traits::{cosine_similarity, RecallFilter, StorageResult, VectorStore};

/// In-memory vector store backed by a `Vec<VectorRecord>` in insertion order.
#[derive(Debug, Default)]
pub struct EphemeralVectorStore {
    records: Mutex<Vec<VectorRecord>>,
}

impl EphemeralVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl VectorStore for EphemeralVectorStore {
    async fn store(&self, record: VectorRecord) -> StorageResult<()> {
        let mut records = self.records.lock();
        if let Some(first) = records.first() {
            if first.embedding.len() != record.embedding.len() {
                return Err(StorageError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: record.embedding.len(),
                });
            }
        }
        debug!(
            channel = %record.channel,
            tokens = record.tokens,
            lines = record.lines.len(),
            "storing vector record"
        );
        records.push(record);
        Ok(())
    }

    async fn retrieve(
        &self,
        embedding: &[f32],
        filter: &RecallFilter,
    ) -> StorageResult<Vec<VectorRecall>> {
        let records = self.records.lock();
        let mut hits: Vec<VectorRecall> = records
            .iter()
            .filter(|r| filter.admits(r.tokens, r.timestamp, &r.channel))
            .map(|r| VectorRecall {
                lines: r.lines.clone(),
                tokens: r.tokens,
                timestamp: r.timestamp,
                similarity: cosine_similarity(embedding, &r.embedding),
            })
            .collect();

        // stable sort: equal scores keep insertion order
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(filter.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActorInfo, ChannelInfo, ChatLine};
    use chrono::{Duration, Utc};

    fn record(channel: &str, content: &str, tokens: usize, embedding: Vec<f32>) -> VectorRecord {
        let line = ChatLine::new(
            ActorInfo::user("alice"),
            ChannelInfo::new(channel, channel, false),
            content,
            content,
        )
        .with_tokens(vec![0; tokens]);
        VectorRecord::from_window(vec![line], embedding)
            .with_timestamp(Utc::now() - Duration::minutes(10))
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_similarity() {
        let store = EphemeralVectorStore::new();
        store.store(record("c", "far", 1, vec![0.0, 1.0])).await.unwrap();
        store.store(record("c", "near", 1, vec![1.0, 0.1])).await.unwrap();

        let hits = store
            .retrieve(&[1.0, 0.0], &RecallFilter::new(2, 100, Utc::now()))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].lines[0].message.content, "near");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let store = EphemeralVectorStore::new();
        for name in ["first", "second", "third"] {
            store.store(record("c", name, 1, vec![1.0, 1.0])).await.unwrap();
        }
        let hits = store
            .retrieve(&[1.0, 1.0], &RecallFilter::new(3, 100, Utc::now()))
            .await
            .unwrap();
        let order: Vec<_> = hits
            .iter()
            .map(|h| h.lines[0].message.content.as_str())
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_limit_defaults_to_top_one() {
        let store = EphemeralVectorStore::new();
        store.store(record("c", "a", 1, vec![1.0])).await.unwrap();
        store.store(record("c", "b", 1, vec![1.0])).await.unwrap();
        let hits = store
            .retrieve(&[1.0], &RecallFilter::new(1, 100, Utc::now()))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_dimension_change() {
        let store = EphemeralVectorStore::new();
        store.store(record("c", "a", 1, vec![1.0, 0.0])).await.unwrap();
        let err = store.store(record("c", "b", 1, vec![1.0])).await.unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { expected: 2, actual: 1 }));
        assert_eq!(store.len(), 1);
    }
}
