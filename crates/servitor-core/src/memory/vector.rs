//! Long-term conversation memory over an embedding-indexed store.
//!
//! Every saved line slides a small view over the channel's recent lines;
//! the view is embedded and stored. Recall embeds the incoming line and
//! injects the closest stored views that predate the short-term window.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use servitor_state::{ChatLine, RecallFilter, VectorRecord, VectorStore};
use tracing::debug;

use super::{MemoryProvider, RecallRequest};
use crate::driver::EmbeddingDriver;
use crate::error::Result;
use crate::format::{format_date, render_template, ContextFormatter};
use crate::obs;

const RECALL_TEMPLATE: &str = "\n\nrecalled excerpt from previous conversation on {date}:\n\n{fragment}";

/// Which text of a view gets embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedSource {
    /// The formatted second-to-last line of the view.
    #[default]
    SecondToLast,
    /// The whole formatted view.
    View,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorMemoryConfig {
    /// Lines kept in the rolling buffer per channel.
    pub window_size: usize,
    /// Lines per stored view.
    pub window_view: usize,
    pub embed_source: EmbedSource,
    /// Views returned per recall.
    pub recall_limit: usize,
    /// Upper bound on the tokens of a recalled view.
    pub recall_budget: usize,
    /// Let views from other channels bypass the recency cutoff.
    pub channel_scoped: bool,
}

impl Default for VectorMemoryConfig {
    fn default() -> Self {
        Self {
            window_size: 128,
            window_view: 3,
            embed_source: EmbedSource::SecondToLast,
            recall_limit: 1,
            recall_budget: 256,
            channel_scoped: true,
        }
    }
}

pub struct VectorMemory {
    embedder: Arc<dyn EmbeddingDriver>,
    store: Arc<dyn VectorStore>,
    formatter: Arc<ContextFormatter>,
    config: VectorMemoryConfig,
    buffers: Mutex<HashMap<String, Vec<ChatLine>>>,
}

impl VectorMemory {
    pub fn new(
        embedder: Arc<dyn EmbeddingDriver>,
        store: Arc<dyn VectorStore>,
        formatter: Arc<ContextFormatter>,
        config: VectorMemoryConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            formatter,
            config,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &VectorMemoryConfig {
        &self.config
    }

    /// Push a line into the rolling buffer; returns the view to store, if any.
    fn push(&self, line: &ChatLine) -> Option<Vec<ChatLine>> {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(line.channel.id.clone()).or_default();

        if buffer.iter().any(|l| l.message.id == line.message.id) {
            return None;
        }
        buffer.push(line.clone());
        if buffer.len() > self.config.window_size {
            let excess = buffer.len() - self.config.window_size;
            buffer.drain(..excess);
        }

        let view = self.config.window_view;
        if view == 0 || buffer.len() < view {
            return None;
        }
        Some(buffer[buffer.len() - view..].to_vec())
    }

    fn representative_text(&self, view: &[ChatLine]) -> String {
        let text = match self.config.embed_source {
            EmbedSource::SecondToLast => view
                .iter()
                .rev()
                .nth(1)
                .or(view.last())
                .map(|l| self.formatter.format_line(l))
                .unwrap_or_default(),
            EmbedSource::View => self.format_lines(view),
        };
        text.trim().to_string()
    }

    fn format_lines(&self, lines: &[ChatLine]) -> String {
        lines.iter().map(|l| self.formatter.format_line(l)).collect()
    }

    fn buffer_start(&self, channel: &str) -> Option<chrono::DateTime<Utc>> {
        self.buffers
            .lock()
            .get(channel)
            .and_then(|b| b.first())
            .and_then(|l| l.message.timestamp)
    }
}

#[async_trait]
impl MemoryProvider for VectorMemory {
    async fn save(&self, line: &ChatLine) -> Result<()> {
        let Some(view) = self.push(line) else {
            return Ok(());
        };

        let embedding = self.embedder.embed(&self.representative_text(&view)).await?;
        let record = VectorRecord::from_window(view, embedding);
        obs::emit_longterm_stored(&record.channel, record.lines.len(), record.tokens);
        self.store.store(record).await?;
        Ok(())
    }

    async fn recall(&self, request: &RecallRequest<'_>) -> Result<String> {
        let line = request.line;
        let cutoff = request
            .window_start
            .or_else(|| self.buffer_start(line.channel_id()))
            .unwrap_or_else(Utc::now);
        let budget = request.budget.min(self.config.recall_budget);

        let mut filter = RecallFilter::new(self.config.recall_limit.max(1), budget, cutoff);
        if self.config.channel_scoped {
            filter = filter.for_channel(line.channel_id());
        }

        let query = self.formatter.format_line(line);
        let embedding = self.embedder.embed(query.trim()).await?;
        let hits = self.store.retrieve(&embedding, &filter).await?;

        let Some(best) = hits.first() else {
            debug!(channel = %line.channel_id(), "no vector recall");
            return Ok(String::new());
        };
        obs::emit_recall_hit(line.channel_id(), hits.len(), best.similarity);

        Ok(hits
            .iter()
            .map(|hit| {
                let date = format_date(&hit.timestamp);
                let fragment = self.format_lines(&hit.lines);
                render_template(
                    RECALL_TEMPLATE,
                    &[("date", &date), ("fragment", fragment.trim())],
                )
            })
            .collect())
    }
}
