//! Knowledge memories: text that does not come from the conversation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use servitor_state::{cosine_similarity, ChatLine};

use super::{MemoryProvider, RecallRequest};
use crate::driver::EmbeddingDriver;
use crate::error::Result;

/// Always recalls the same text.
#[derive(Debug, Clone)]
pub struct StaticMemory {
    content: String,
}

impl StaticMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl MemoryProvider for StaticMemory {
    async fn save(&self, _line: &ChatLine) -> Result<()> {
        Ok(())
    }

    async fn recall(&self, _request: &RecallRequest<'_>) -> Result<String> {
        Ok(self.content.clone())
    }
}

struct Section {
    content: String,
    embedding: Vec<f32>,
}

/// Embedded text sections recalled by similarity to the incoming message.
pub struct KnowledgeMemory {
    embedder: Arc<dyn EmbeddingDriver>,
    limit: usize,
    sections: Mutex<Vec<Section>>,
}

impl KnowledgeMemory {
    pub const DEFAULT_LIMIT: usize = 3;

    pub fn new(embedder: Arc<dyn EmbeddingDriver>) -> Self {
        Self {
            embedder,
            limit: Self::DEFAULT_LIMIT,
            sections: Mutex::new(Vec::new()),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Embed and add sections.
    pub async fn add<I, S>(&self, sections: I) -> Result<()>
    where
        I: IntoIterator<Item = S> + Send,
        I::IntoIter: Send,
        S: Into<String> + Send,
    {
        for content in sections {
            let content = content.into();
            let embedding = self.embedder.embed(&content).await?;
            self.sections.lock().push(Section { content, embedding });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.lock().is_empty()
    }
}

#[async_trait]
impl MemoryProvider for KnowledgeMemory {
    async fn save(&self, _line: &ChatLine) -> Result<()> {
        Ok(())
    }

    async fn recall(&self, request: &RecallRequest<'_>) -> Result<String> {
        let query = self.embedder.embed(&request.line.message.content).await?;

        let sections = self.sections.lock();
        let mut scored: Vec<(f32, &str)> = sections
            .iter()
            .map(|s| (cosine_similarity(&query, &s.embedding), s.content.as_str()))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(self.limit)
            .map(|(_, content)| content)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
