//! Per-channel short-term memory with token-budget eviction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::Mutex;
use servitor_state::{ActorInfo, ChannelInfo, ChatLine, MessageInfo};

use super::{MemoryProvider, RecallRequest};
use crate::character::AgentDescriptor;
use crate::error::Result;
use crate::format::{render_template, ContextFormatter};
use crate::obs;

/// Default token limit of a channel window.
pub const DEFAULT_WINDOW_LIMIT: usize = 2048;

/// Fixed per-line cost added to each line's token count.
pub const LINE_OVERHEAD: usize = 2;

/// Message id of the seeded warmup line.
pub const WARMUP_ID: &str = "intro";

/// Cost of a buffer: Σ(tokens + overhead).
pub fn window_size(lines: &[ChatLine]) -> usize {
    lines.iter().map(|l| l.token_count() + LINE_OVERHEAD).sum()
}

/// Drop lines from the front until the cost is strictly below `limit`.
///
/// Returns the number of evicted lines.
pub fn slide_window(lines: &mut Vec<ChatLine>, limit: usize) -> usize {
    let mut size = window_size(lines);
    let mut evict = 0;
    while evict < lines.len() && size >= limit {
        size -= lines[evict].token_count() + LINE_OVERHEAD;
        evict += 1;
    }
    lines.drain(..evict);
    evict
}

fn time_of_day(hour: u32) -> &'static str {
    match hour {
        h if h < 12 => "morning",
        h if h < 18 => "afternoon",
        _ => "evening",
    }
}

/// Short-term memory: one ordered buffer per channel id.
pub struct WindowMemory {
    formatter: Arc<ContextFormatter>,
    agent: Option<AgentDescriptor>,
    limit: usize,
    buffers: Mutex<HashMap<String, Vec<ChatLine>>>,
}

impl WindowMemory {
    pub fn new(formatter: Arc<ContextFormatter>, agent: Option<AgentDescriptor>) -> Self {
        Self {
            formatter,
            agent,
            limit: DEFAULT_WINDOW_LIMIT,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn warmup_line(&self, channel: &ChannelInfo) -> Option<ChatLine> {
        let agent = self.agent.as_ref()?;
        let warmup = agent.warmup.as_ref()?;

        let timeofday = time_of_day(Local::now().hour());
        let response = render_template(&warmup.response, &[("timeofday", timeofday)]);
        let content = self
            .formatter
            .compose_with_thought(&response, Some(&warmup.thought));

        Some(ChatLine {
            actor: ActorInfo::agent(self.formatter.normalize(&agent.name)),
            channel: channel.clone(),
            message: MessageInfo {
                id: WARMUP_ID.to_string(),
                content,
                tokens: Vec::new(),
                tokens_raw: Vec::new(),
                timestamp: Some(Utc::now()),
            },
        })
    }

    /// Create the channel buffer if it does not exist yet.
    ///
    /// A new buffer holds only the warmup line, when the agent has one.
    pub fn open(&self, channel: &ChannelInfo) {
        self.buffers
            .lock()
            .entry(channel.id.clone())
            .or_insert_with(|| self.warmup_line(channel).into_iter().collect());
    }

    /// Append a line to its channel buffer, then evict to the limit.
    ///
    /// A new buffer is seeded with the warmup line. Lines whose id is
    /// already buffered are ignored.
    pub fn save(&self, line: ChatLine) {
        let channel = line.channel.id.clone();
        let _span = obs::ChannelSpan::enter(&channel);
        let mut buffers = self.buffers.lock();

        let buffer = buffers.entry(channel.clone()).or_insert_with(|| {
            self.warmup_line(&line.channel).into_iter().collect()
        });

        if buffer.iter().any(|l| l.message.id == line.message.id) {
            return;
        }

        obs::emit_line_saved(&channel, &line.message.id, line.token_count());
        buffer.push(line);

        let evicted = slide_window(buffer, self.limit);
        if evicted > 0 {
            obs::emit_window_evicted(&channel, evicted, buffer.len());
        }
    }

    /// Render the channel buffer trimmed to `budget` tokens.
    ///
    /// Works on a copy; stored state is never touched.
    pub fn recall(&self, line: &ChatLine, budget: usize) -> String {
        let mut window = self.get_window(line.channel_id());
        slide_window(&mut window, budget);
        window
            .iter()
            .map(|l| self.formatter.format_line(l))
            .collect()
    }

    pub fn reset(&self, channel: &str) {
        self.buffers.lock().remove(channel);
    }

    pub fn get_window(&self, channel: &str) -> Vec<ChatLine> {
        self.buffers
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_oldest(&self, channel: &str) -> Option<ChatLine> {
        self.buffers
            .lock()
            .get(channel)
            .and_then(|b| b.first().cloned())
    }

    /// Timestamp of the oldest buffered line.
    pub fn oldest_timestamp(&self, channel: &str) -> Option<DateTime<Utc>> {
        self.buffers
            .lock()
            .get(channel)
            .and_then(|b| b.first())
            .and_then(|l| l.message.timestamp)
    }

    pub fn get_count(&self, channel: &str) -> usize {
        self.buffers.lock().get(channel).map_or(0, Vec::len)
    }

    /// Distinct normalized speaker names, in first-seen order.
    pub fn get_roles(&self, channel: &str) -> Vec<String> {
        let buffers = self.buffers.lock();
        let mut roles: Vec<String> = Vec::new();
        for line in buffers.get(channel).into_iter().flatten() {
            let name = self.formatter.normalize_name(&line.actor.friendlyname);
            if !roles.contains(&name) {
                roles.push(name);
            }
        }
        roles
    }
}

#[async_trait]
impl MemoryProvider for WindowMemory {
    async fn save(&self, line: &ChatLine) -> Result<()> {
        WindowMemory::save(self, line.clone());
        Ok(())
    }

    async fn recall(&self, request: &RecallRequest<'_>) -> Result<String> {
        Ok(WindowMemory::recall(self, request.line, request.budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatterOptions;

    fn line(channel: &str, id: &str, author: &str, tokens: usize) -> ChatLine {
        ChatLine::new(
            ActorInfo::user(author),
            ChannelInfo::new(channel, channel, false),
            id,
            format!("message {id}"),
        )
        .with_tokens(vec![1; tokens])
    }

    fn memory() -> WindowMemory {
        WindowMemory::new(Arc::new(ContextFormatter::default()), None)
    }

    #[test]
    fn test_window_size_counts_overhead() {
        assert_eq!(window_size(&[line("c", "1", "a", 3), line("c", "2", "a", 0)]), 7);
        assert_eq!(window_size(&[]), 0);
    }

    #[test]
    fn test_slide_window_evicts_until_below_limit() {
        let mut lines = vec![
            line("c", "1", "a", 3),
            line("c", "2", "a", 3),
            line("c", "3", "a", 3),
        ];
        // 15 total; limit 10 drops one (10 is not below 10), then another
        assert_eq!(slide_window(&mut lines, 10), 2);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].message.id, "3");
    }

    #[test]
    fn test_save_dedupes_by_id() {
        let mem = memory();
        mem.save(line("c", "1", "alice", 2));
        mem.save(line("c", "1", "alice", 2));
        assert_eq!(mem.get_count("c"), 1);
    }

    #[test]
    fn test_save_respects_limit() {
        let mem = memory().with_limit(20);
        for i in 0..10 {
            mem.save(line("c", &i.to_string(), "alice", 3));
            assert!(window_size(&mem.get_window("c")) < 20);
        }
        let ids: Vec<_> = mem
            .get_window("c")
            .into_iter()
            .map(|l| l.message.id)
            .collect();
        assert_eq!(ids, vec!["7", "8", "9"]);
    }

    #[test]
    fn test_recall_does_not_mutate() {
        let mem = memory();
        for i in 0..4 {
            mem.save(line("c", &i.to_string(), "alice", 3));
        }
        let query = line("c", "x", "bob", 0);
        let text = mem.recall(&query, 11);
        assert_eq!(text, "ALICE: message 2\n\nALICE: message 3\n\n");
        assert_eq!(mem.get_count("c"), 4);
    }

    #[test]
    fn test_recall_budget_too_small() {
        let mem = memory();
        mem.save(line("c", "1", "alice", 10));
        assert_eq!(mem.recall(&line("c", "x", "bob", 0), 5), "");
        assert_eq!(mem.recall(&line("elsewhere", "x", "bob", 0), 500), "");
    }

    #[test]
    fn test_unknown_channel_defaults() {
        let mem = memory();
        assert!(mem.get_window("nope").is_empty());
        assert!(mem.get_oldest("nope").is_none());
        assert_eq!(mem.get_count("nope"), 0);
        assert!(mem.get_roles("nope").is_empty());
    }

    #[test]
    fn test_roles_are_distinct_and_normalized() {
        let mem = memory();
        mem.save(line("c", "1", "Alice!", 1));
        mem.save(line("c", "2", "bob", 1));
        mem.save(line("c", "3", "alice", 1));
        assert_eq!(mem.get_roles("c"), vec!["ALICE", "BOB"]);
    }

    #[test]
    fn test_warmup_seeded_once_and_after_reset() {
        let formatter = Arc::new(ContextFormatter::new(FormatterOptions {
            internal_monologue: true,
            ..Default::default()
        }));
        let mem = WindowMemory::new(formatter, Some(AgentDescriptor::named("Servo Bot")));

        mem.save(line("c", "1", "alice", 1));
        mem.save(line("c", "2", "alice", 1));
        let window = mem.get_window("c");
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].message.id, WARMUP_ID);
        assert_eq!(window[0].actor.friendlyname, "servobot");
        assert!(window[0].actor.is_self);
        assert_eq!(
            window[0].message.content,
            "(thought: I am now online.) Hello! How may I assist you today?"
        );

        mem.reset("c");
        assert_eq!(mem.get_count("c"), 0);
        mem.save(line("c", "3", "alice", 1));
        assert_eq!(mem.get_count("c"), 2);
        assert_eq!(mem.get_window("c")[0].message.id, WARMUP_ID);
    }

    #[test]
    fn test_open_seeds_warmup_only() {
        let mem = WindowMemory::new(
            Arc::new(ContextFormatter::default()),
            Some(AgentDescriptor::named("Servo Bot")),
        );
        let channel = ChannelInfo::new("c", "c", false);
        mem.open(&channel);
        mem.open(&channel);

        let window = mem.get_window("c");
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].actor.friendlyname, "servobot");

        let plain = memory();
        plain.open(&channel);
        assert_eq!(plain.get_count("c"), 0);
        assert!(plain.get_window("c").is_empty());
    }

    #[test]
    fn test_time_of_day_boundaries() {
        assert_eq!(time_of_day(0), "morning");
        assert_eq!(time_of_day(11), "morning");
        assert_eq!(time_of_day(12), "afternoon");
        assert_eq!(time_of_day(17), "afternoon");
        assert_eq!(time_of_day(18), "evening");
    }
}
