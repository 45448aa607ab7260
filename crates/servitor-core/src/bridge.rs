//! Prompt assembly and the continuation loop around a stateless backend.
//!
//! The prompt is laid out as
//!
//! ```text
//! {preamble}{long-term recall}\n\n\n{header}\n\n{short-term window}{input stub}
//! ```
//!
//! and the short-term window is trimmed so that the whole prompt plus the
//! generation fits the hard token limit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use servitor_state::{ActorInfo, ChannelInfo, ChatLine, MessageInfo};
use tokio::sync::OnceCell;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::character::AgentDescriptor;
use crate::driver::{InferenceArguments, InferenceDriver, InferenceResult, StopReason};
use crate::error::Result;
use crate::format::{decapitalize, format_date, render_template, ContextFormatter};
use crate::memory::{MemoryProvider, RecallRequest, WindowMemory};
use crate::obs;

const HEADER_MULTIUSER: &str =
    "the following is a real conversation between {char} and users in {channel} on {date}.";
const HEADER_DIRECT: &str = "the following is a real conversation between {char} and {user} on {date}.";
const HEADER_TIMESTAMPS: &str = "all timestamps are in {timezone}.";
const HEADER_SUFFIX: &str =
    " the conversation transcript continues for the remainder of this document without any other text.";

const CONTEXT_TEMPLATE: &str = "{prompt}{injected}\n\n\n{header}\n\n";

/// Speaker labels models tend to invent when they run past their turn.
const HALLUCINATED_ROLES: [&str; 6] = ["USER", "User", "user", "HUMAN", "Human", "human"];

/// Used when neither the caller nor the backend sets `max_new_tokens`.
const FALLBACK_MAX_NEW_TOKENS: u32 = 256;

fn stray_paren_regex() -> &'static Regex {
    static STRAY_PAREN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    STRAY_PAREN.get_or_init(|| Regex::new(r"^([^(]+?[\w.?!])\)").expect("Invalid regex"))
}

/// Drop an unmatched closing parenthesis the model left after the first
/// sentence. Only the leftmost occurrence is touched.
pub fn strip_stray_paren(content: &str) -> String {
    stray_paren_regex().replace(content, "$1").into_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Preamble; may reference `{char}`, `{name}`, `{extra}` and pronoun keys.
    pub baseprompt: String,
    /// Announced in the header when set.
    pub timezone: Option<String>,
    /// Token limit of prompt plus generation.
    pub hard_limit: usize,
    /// Continuation rounds allowed after a token-limit stop.
    pub max_tries: usize,
    /// Token budget handed to each long-term provider.
    pub longterm_budget: usize,
    /// Token limit of each short-term channel buffer.
    pub window_limit: usize,
    /// Positional repeat inhibit sent under internal monologue.
    pub repeat_inhibit: Vec<Vec<u32>>,
    /// Caller arguments merged into every request.
    pub args: InferenceArguments,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            baseprompt: String::new(),
            timezone: None,
            hard_limit: 2048,
            max_tries: 2,
            longterm_budget: 256,
            window_limit: crate::memory::DEFAULT_WINDOW_LIMIT,
            // " )", ' "', " *" in LLaMA-family vocabularies
            repeat_inhibit: vec![vec![1723], vec![376], vec![334]],
            args: InferenceArguments::default(),
        }
    }
}

/// Unique message ids for generated lines: `{uuid}:{counter}`.
#[derive(Debug)]
pub struct LineIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl Default for LineIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl LineIdGenerator {
    pub fn new() -> Self {
        Self {
            prefix: Uuid::new_v4().to_string(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}", self.prefix, n)
    }
}

/// Phase of the reply loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationState {
    /// First request with the assembled prompt.
    Initial,
    /// One more request after an empty reply, carrying the thought.
    EmptyRetry,
    /// Extend a reply cut off by the token limit.
    TokenLimitContinuation,
    Done,
}

impl ContinuationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContinuationState::Initial => "initial",
            ContinuationState::EmptyRetry => "empty_retry",
            ContinuationState::TokenLimitContinuation => "token_limit_continuation",
            ContinuationState::Done => "done",
        }
    }

    /// Where to go after a round that ended with `result`.
    fn after(result: &InferenceResult, continuations: usize, max_tries: usize) -> Self {
        let has_fragments = result.fragments.as_ref().is_some_and(|f| !f.is_empty());
        if result.stop_reason == StopReason::TokenLimit && has_fragments && continuations < max_tries
        {
            ContinuationState::TokenLimitContinuation
        } else {
            ContinuationState::Done
        }
    }
}

/// One request/response exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub state: ContinuationState,
    pub text: String,
    pub tokens: Vec<u32>,
    pub stop_reason: StopReason,
}

/// A reply together with the rounds that produced it.
#[derive(Debug, Clone)]
pub struct Inference {
    pub reply: ChatLine,
    pub rounds: Vec<Round>,
}

/// A fully assembled prompt and its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    /// Preamble, long-term block and header.
    pub top: String,
    pub window: String,
    pub input: String,
}

impl AssembledContext {
    pub fn prompt(&self) -> String {
        format!("{}{}{}", self.top, self.window, self.input)
    }
}

/// Ties short-term and long-term memory, the formatter and a backend into a
/// save/infer cycle for any number of channels.
pub struct Bridge {
    agent: AgentDescriptor,
    config: BridgeConfig,
    driver: Arc<dyn InferenceDriver>,
    formatter: Arc<ContextFormatter>,
    shortterm: Arc<WindowMemory>,
    longterm: Vec<Arc<dyn MemoryProvider>>,
    max_new_tokens: OnceCell<u32>,
    ids: LineIdGenerator,
}

impl Bridge {
    pub fn new(
        agent: AgentDescriptor,
        config: BridgeConfig,
        driver: Arc<dyn InferenceDriver>,
        formatter: Arc<ContextFormatter>,
    ) -> Self {
        let shortterm = Arc::new(
            WindowMemory::new(formatter.clone(), Some(agent.clone()))
                .with_limit(config.window_limit),
        );
        Self {
            agent,
            config,
            driver,
            formatter,
            shortterm,
            longterm: Vec::new(),
            max_new_tokens: OnceCell::new(),
            ids: LineIdGenerator::new(),
        }
    }

    /// Replace the short-term memory.
    pub fn with_shortterm(mut self, shortterm: Arc<WindowMemory>) -> Self {
        self.shortterm = shortterm;
        self
    }

    /// Add a long-term provider; recall order follows insertion order.
    pub fn with_longterm(mut self, provider: Arc<dyn MemoryProvider>) -> Self {
        self.longterm.push(provider);
        self
    }

    pub fn agent(&self) -> &AgentDescriptor {
        &self.agent
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn formatter(&self) -> &ContextFormatter {
        &self.formatter
    }

    pub fn shortterm(&self) -> &Arc<WindowMemory> {
        &self.shortterm
    }

    /// Tokenize a line and record it.
    ///
    /// `tokens_raw` covers the content, `tokens` the formatted line. The line
    /// always enters short-term memory; long-term providers only see it when
    /// `persist_longterm` is set.
    pub async fn save(&self, mut line: ChatLine, persist_longterm: bool) -> Result<()> {
        line.message.tokens_raw = self.driver.tokenize(&line.message.content).await?;
        line.message.tokens = self
            .driver
            .tokenize(&self.formatter.format_line(&line))
            .await?;

        self.shortterm.save(line.clone());

        if persist_longterm {
            for provider in &self.longterm {
                provider.save(&line).await?;
            }
        }
        Ok(())
    }

    /// Start a channel without a line; seeds the warmup exchange.
    pub fn open(&self, channel: &ChannelInfo) {
        self.shortterm.open(channel);
    }

    pub fn reset(&self, channel: &str) {
        self.shortterm.reset(channel);
    }

    pub fn get_window(&self, channel: &str) -> Vec<ChatLine> {
        self.shortterm.get_window(channel)
    }

    pub fn get_roles(&self, channel: &str) -> Vec<String> {
        self.shortterm.get_roles(channel)
    }

    pub fn get_oldest(&self, channel: &str) -> Option<ChatLine> {
        self.shortterm.get_oldest(channel)
    }

    pub fn get_count(&self, channel: &str) -> usize {
        self.shortterm.get_count(channel)
    }

    /// Token budget reserved for the generation.
    pub async fn max_new_tokens(&self) -> Result<u32> {
        if let Some(n) = self.config.args.max_new_tokens {
            return Ok(n);
        }
        let n = self
            .max_new_tokens
            .get_or_try_init(|| async {
                let defaults = self.driver.defaults().await?;
                Ok::<_, crate::error::ServitorError>(
                    defaults.max_new_tokens.unwrap_or(FALLBACK_MAX_NEW_TOKENS),
                )
            })
            .await?;
        Ok(*n)
    }

    fn format_params(&self) -> Vec<(&'static str, String)> {
        let agent = &self.agent;
        let mut params = vec![
            ("char", agent.name.clone()),
            ("name", agent.name.clone()),
            ("extra", String::new()),
            ("xe", agent.pronouns.xe.clone()),
            ("xem", agent.pronouns.xem.clone()),
            ("xyr", agent.pronouns.xyr.clone()),
            ("xyrs", agent.pronouns.xyrs.clone()),
            ("xemself", agent.pronouns.xemself.clone()),
        ];
        if let Some(extra) = &agent.extra {
            let rendered = render_template(extra, &borrow_params(&params));
            params[2].1 = format!("{}\n\n", rendered);
        }
        params
    }

    fn header(&self, line: &ChatLine) -> String {
        let template = if line.channel.isprivate {
            HEADER_DIRECT
        } else {
            HEADER_MULTIUSER
        };
        let suffix = match &self.config.timezone {
            Some(tz) => format!(
                " {}{}",
                render_template(HEADER_TIMESTAMPS, &[("timezone", tz)]),
                HEADER_SUFFIX
            ),
            None => HEADER_SUFFIX.to_string(),
        };

        let user = self.formatter.normalize(&line.actor.friendlyname);
        let channel = format!("#{}", self.formatter.normalize(&line.channel.friendlyname));
        let date = format_date(&Utc::now());
        render_template(
            &format!("{template}{suffix}"),
            &[
                ("char", &self.agent.name),
                ("name", &self.agent.name),
                ("user", &user),
                ("channel", &channel),
                ("date", &date),
            ],
        )
    }

    /// Preamble, long-term block and header.
    async fn compose_top(&self, line: &ChatLine) -> Result<String> {
        let request = RecallRequest::new(line, self.config.longterm_budget)
            .with_window_start(self.shortterm.oldest_timestamp(line.channel_id()));

        // Each non-empty recall gets its own paragraph.
        let mut injected = String::new();
        for provider in &self.longterm {
            let recalled = provider.recall(&request).await?;
            let recalled = recalled.trim_start_matches('\n');
            if !recalled.is_empty() {
                injected.push_str("\n\n");
                injected.push_str(recalled);
            }
        }

        let params = self.format_params();
        let prompt = render_template(self.config.baseprompt.trim(), &borrow_params(&params));
        let header = self.header(line);

        Ok(render_template(
            CONTEXT_TEMPLATE,
            &[
                ("prompt", &prompt),
                ("injected", &injected),
                ("header", &header),
            ],
        ))
    }

    /// Add the short-term window and the input stub to a composed top.
    async fn complete(
        &self,
        top: String,
        line: &ChatLine,
        thought: Option<&str>,
        trailing: Option<&str>,
    ) -> Result<AssembledContext> {
        let mut input = self
            .formatter
            .format_input_line(&self.agent.name, None, thought);
        if let Some(trailing) = trailing {
            input.push(' ');
            input.push_str(trailing);
        }

        let reserved = self.driver.tokenize(&format!("{top}{input}")).await?.len()
            + self.max_new_tokens().await? as usize;
        let budget = self.config.hard_limit.saturating_sub(reserved);
        let window = self.shortterm.recall(line, budget);

        Ok(AssembledContext { top, window, input })
    }

    /// Build the prompt for `line`.
    ///
    /// `thought` closes the input stub with a known thought; `trailing`
    /// appends partial reply text to continue from.
    pub async fn assemble_context(
        &self,
        line: &ChatLine,
        thought: Option<&str>,
        trailing: Option<&str>,
    ) -> Result<AssembledContext> {
        let top = self.compose_top(line).await?;
        self.complete(top, line, thought, trailing).await
    }

    /// Stop strings: caller list, then every buffered speaker, then the
    /// generic user labels. Order kept, duplicates dropped.
    pub fn stopping_strings(&self, channel: &str) -> Vec<String> {
        let caller = self.config.args.stopping_strings.clone().unwrap_or_default();
        let roles = self.shortterm.get_roles(channel);

        let mut out: Vec<String> = Vec::new();
        let candidates = caller
            .into_iter()
            .chain(roles.iter().map(|r| format!("\n{r}")))
            .chain(HALLUCINATED_ROLES.iter().map(|r| format!("\n{r}")));
        for s in candidates {
            if !out.contains(&s) {
                out.push(s);
            }
        }
        out
    }

    fn repeat_inhibit(&self) -> Vec<Vec<u32>> {
        if self.formatter.options().internal_monologue {
            self.config.repeat_inhibit.clone()
        } else {
            Vec::new()
        }
    }

    async fn request(
        &self,
        context: &AssembledContext,
        base: &InferenceArguments,
    ) -> Result<InferenceResult> {
        let args = InferenceArguments {
            prompt: Some(context.prompt()),
            ..base.clone()
        };
        self.driver.infer(&args).await
    }

    /// Generate a reply to `line`.
    pub async fn infer(&self, line: &ChatLine) -> Result<ChatLine> {
        Ok(self.infer_detailed(line).await?.reply)
    }

    /// Generate a reply and keep the per-round record.
    pub async fn infer_detailed(&self, line: &ChatLine) -> Result<Inference> {
        self.run(line)
            .instrument(obs::channel_span(line.channel_id()))
            .await
    }

    async fn run(&self, line: &ChatLine) -> Result<Inference> {
        let channel = line.channel_id();
        let base = InferenceArguments {
            prompt: None,
            max_new_tokens: Some(self.max_new_tokens().await?),
            stopping_strings: Some(self.stopping_strings(channel)),
            positional_repeat_inhibit: Some(self.repeat_inhibit()),
            ..self.config.args.clone()
        };

        let top = self.compose_top(line).await?;
        let mut rounds: Vec<Round> = Vec::new();
        let mut record = |state: ContinuationState, result: &InferenceResult| {
            obs::emit_inference_round(
                channel,
                rounds.len() + 1,
                state.as_str(),
                result.tokens.len(),
                result.stop_reason.as_str(),
            );
            rounds.push(Round {
                state,
                text: result.text.clone(),
                tokens: result.tokens.clone(),
                stop_reason: result.stop_reason,
            });
        };

        let context = self.complete(top.clone(), line, None, None).await?;
        let mut last = self.request(&context, &base).await?;
        record(ContinuationState::Initial, &last);

        let cleaned = self.formatter.clean_inference(&last.text);
        let thought = cleaned.thought;
        let mut content = cleaned.content;

        let mut continuations = 0;
        let mut state = if content.is_empty() {
            ContinuationState::EmptyRetry
        } else {
            ContinuationState::after(&last, continuations, self.config.max_tries)
        };

        loop {
            match state {
                ContinuationState::EmptyRetry => {
                    debug!("did not get any message content, trying again");
                    let context = self
                        .complete(top.clone(), line, thought.as_deref(), None)
                        .await?;
                    last = self.request(&context, &base).await?;
                    record(state, &last);
                    content = last.text.trim().to_string();
                }
                ContinuationState::TokenLimitContinuation => {
                    continuations += 1;
                    let context = self
                        .complete(top.clone(), line, thought.as_deref(), Some(&content))
                        .await?;
                    last = self.request(&context, &base).await?;
                    record(state, &last);

                    let spaced = last
                        .fragments
                        .as_ref()
                        .and_then(|f| f.first())
                        .is_some_and(|f| f.starts_with(' '));
                    if spaced {
                        content.push(' ');
                        content.push_str(last.text.trim_start());
                    } else {
                        content.push_str(&last.text);
                    }
                }
                ContinuationState::Initial | ContinuationState::Done => break,
            }
            state = ContinuationState::after(&last, continuations, self.config.max_tries);
        }

        let mut content = strip_stray_paren(content.trim());
        let mut thought = thought;
        if self.agent.decapitalize {
            content = decapitalize(&content).into_owned();
            thought = thought.map(|t| decapitalize(&t).into_owned());
        }

        let tokens: Vec<u32> = rounds.iter().flat_map(|r| r.tokens.iter().copied()).collect();
        obs::emit_continuation_finished(channel, rounds.len(), tokens.len());

        let reply = ChatLine {
            actor: ActorInfo::agent(self.agent.name.clone()),
            channel: line.channel.clone(),
            message: MessageInfo {
                id: self.ids.next_id(),
                content: self
                    .formatter
                    .compose_with_thought(&content, thought.as_deref()),
                tokens: tokens.clone(),
                tokens_raw: tokens,
                timestamp: Some(Utc::now()),
            },
        };
        Ok(Inference { reply, rounds })
    }
}

fn borrow_params<'a>(params: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    params.iter().map(|(k, v)| (*k, v.as_str())).collect()
}
