//! Structured observability hooks for channel activity.
//!
//! - `ChannelSpan`: RAII guard entering a channel-scoped span
//! - `emit_*`: one event per notable step of the save/infer pipeline
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{debug, info};

/// RAII guard that enters a channel-scoped tracing span.
///
/// ```ignore
/// let _span = ChannelSpan::enter("chan-42");
/// // events emitted here carry channel = "chan-42"
/// ```
pub struct ChannelSpan {
    _span: tracing::span::EnteredSpan,
}

impl ChannelSpan {
    pub fn enter(channel: &str) -> Self {
        Self {
            _span: channel_span(channel).entered(),
        }
    }
}

/// Channel-scoped span for instrumenting futures.
pub fn channel_span(channel: &str) -> tracing::Span {
    tracing::info_span!("servitor.channel", channel = %channel)
}

/// A line entered the short-term window.
pub fn emit_line_saved(channel: &str, message_id: &str, tokens: usize) {
    debug!(
        event = "window.line_saved",
        channel = %channel,
        message_id = %message_id,
        tokens = tokens,
    );
}

/// Lines were evicted from the front of a window.
pub fn emit_window_evicted(channel: &str, evicted: usize, remaining: usize) {
    debug!(
        event = "window.evicted",
        channel = %channel,
        evicted = evicted,
        remaining = remaining,
    );
}

/// An embedded view was written to the vector store.
pub fn emit_longterm_stored(channel: &str, lines: usize, tokens: usize) {
    debug!(
        event = "longterm.stored",
        channel = %channel,
        lines = lines,
        tokens = tokens,
    );
}

/// Vector recall produced at least one excerpt.
pub fn emit_recall_hit(channel: &str, hits: usize, best_similarity: f32) {
    info!(
        event = "longterm.recall_hit",
        channel = %channel,
        hits = hits,
        best_similarity = best_similarity,
    );
}

/// One request/response exchange with the backend finished.
pub fn emit_inference_round(channel: &str, round: usize, state: &str, tokens: usize, stop_reason: &str) {
    info!(
        event = "inference.round",
        channel = %channel,
        round = round,
        state = %state,
        tokens = tokens,
        stop_reason = %stop_reason,
    );
}

/// The continuation state machine reached `Done`.
pub fn emit_continuation_finished(channel: &str, rounds: usize, total_tokens: usize) {
    info!(
        event = "inference.finished",
        channel = %channel,
        rounds = rounds,
        total_tokens = total_tokens,
    );
}
