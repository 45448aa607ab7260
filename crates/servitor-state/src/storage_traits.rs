//! Storage trait definitions for Servitor
//!
//! - `VectorStore`: persistence and similarity retrieval of embedded line
//!   windows
//!
//! The trait is async and backend-agnostic. An in-process implementation is
//! provided by the `ephemeral` module, a SurrealDB one by `surreal_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::schema::{VectorRecall, VectorRecord};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Filters applied to a similarity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallFilter {
    /// Maximum number of records returned
    pub limit: usize,
    /// Records with more aggregate tokens than this are skipped
    pub max_tokens: usize,
    /// Records stored at or after this instant are skipped
    pub before: DateTime<Utc>,
    /// When set, records from a different channel ignore `before`
    pub channel: Option<String>,
}

impl RecallFilter {
    pub fn new(limit: usize, max_tokens: usize, before: DateTime<Utc>) -> Self {
        Self {
            limit,
            max_tokens,
            before,
            channel: None,
        }
    }

    pub fn for_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Whether a stored record passes the token and recency filters.
    pub fn admits(&self, tokens: usize, timestamp: DateTime<Utc>, channel: &str) -> bool {
        if tokens > self.max_tokens {
            return false;
        }
        match &self.channel {
            Some(current) if current != channel => true,
            _ => timestamp < self.before,
        }
    }
}

/// Embedded line-window store.
///
/// Guarantees:
/// - `store(record)` persists the record unchanged.
/// - `retrieve` returns at most `filter.limit` records admitted by the filter,
///   ordered by descending cosine similarity to the query embedding.
/// - A miss is an empty vector, never an error.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist an embedded window.
    async fn store(&self, record: VectorRecord) -> StorageResult<()>;

    /// Retrieve the nearest records to `embedding` under `filter`.
    async fn retrieve(
        &self,
        embedding: &[f32],
        filter: &RecallFilter,
    ) -> StorageResult<Vec<VectorRecall>>;
}

/// Cosine similarity of two vectors.
///
/// Mismatched lengths, empty vectors and zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_filter_token_cap_is_inclusive() {
        let now = Utc::now();
        let f = RecallFilter::new(1, 10, now);
        assert!(f.admits(10, now - Duration::seconds(1), "a"));
        assert!(!f.admits(11, now - Duration::seconds(1), "a"));
    }

    #[test]
    fn test_filter_recency_is_strict() {
        let now = Utc::now();
        let f = RecallFilter::new(1, 10, now);
        assert!(!f.admits(1, now, "a"));
        assert!(!f.admits(1, now + Duration::seconds(1), "a"));
    }

    #[test]
    fn test_filter_other_channel_bypasses_recency() {
        let now = Utc::now();
        let f = RecallFilter::new(1, 10, now).for_channel("a");
        assert!(f.admits(1, now + Duration::seconds(5), "b"));
        assert!(!f.admits(1, now + Duration::seconds(5), "a"));
        // token cap still applies across channels
        assert!(!f.admits(11, now - Duration::seconds(5), "b"));
    }
}
