//! Memory subsystem feeding the prompt assembler.
//!
//! Short-term memory is a per-channel sliding window rendered verbatim;
//! long-term providers inject text recalled from older history or from
//! fixed knowledge. Every provider speaks [`MemoryProvider`].

pub mod knowledge;
pub mod vector;
pub mod window;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use servitor_state::ChatLine;

use crate::error::Result;

pub use knowledge::{KnowledgeMemory, StaticMemory};
pub use vector::{EmbedSource, VectorMemory, VectorMemoryConfig};
pub use window::{slide_window, window_size, WindowMemory, DEFAULT_WINDOW_LIMIT, LINE_OVERHEAD};

/// What a provider is asked to recall against.
#[derive(Debug, Clone)]
pub struct RecallRequest<'a> {
    /// The incoming line.
    pub line: &'a ChatLine,
    /// Token budget for the recalled text.
    pub budget: usize,
    /// Oldest timestamp of the channel's short-term window, if any.
    pub window_start: Option<DateTime<Utc>>,
}

impl<'a> RecallRequest<'a> {
    pub fn new(line: &'a ChatLine, budget: usize) -> Self {
        Self {
            line,
            budget,
            window_start: None,
        }
    }

    pub fn with_window_start(mut self, window_start: Option<DateTime<Utc>>) -> Self {
        self.window_start = window_start;
        self
    }
}

/// A source of prompt text keyed on the incoming line.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Record a line. Providers that do not learn ignore it.
    async fn save(&self, line: &ChatLine) -> Result<()>;

    /// Text to inject for this request; empty when nothing applies.
    async fn recall(&self, request: &RecallRequest<'_>) -> Result<String>;
}
