//! Collaborator interfaces consumed by the context layer.
//!
//! - `Tokenizer`: text to token ids
//! - `InferenceDriver`: a stateless text-generation backend
//! - `EmbeddingDriver`: text to embedding vector
//!
//! Implementations live outside this crate (see `servitor-drivers`); the
//! `fakes` module provides deterministic in-process versions for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Turns text into backend token ids.
#[async_trait]
pub trait Tokenizer: Send + Sync {
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>>;
}

/// A stateless text-generation backend.
#[async_trait]
pub trait InferenceDriver: Tokenizer {
    /// Whether the backend answers at all. Never errors.
    async fn ping(&self) -> bool;

    /// The backend's default sampling arguments.
    async fn defaults(&self) -> Result<InferenceArguments>;

    /// Run one generation request.
    async fn infer(&self, args: &InferenceArguments) -> Result<InferenceResult>;
}

/// Turns text into an embedding vector.
#[async_trait]
pub trait EmbeddingDriver: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of produced embeddings, when known up front.
    async fn dimensions(&self) -> Result<Option<usize>> {
        Ok(None)
    }
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model emitted its end marker.
    #[serde(alias = "eos")]
    EndOfSequence,
    /// A stopping string matched.
    #[serde(alias = "stop")]
    StopString,
    /// `max_new_tokens` was reached; the text may be cut mid-sentence.
    #[serde(alias = "length", alias = "max_tokens")]
    TokenLimit,
    #[default]
    #[serde(other)]
    Unknown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndOfSequence => "end_of_sequence",
            StopReason::StopString => "stop_string",
            StopReason::TokenLimit => "token_limit",
            StopReason::Unknown => "unknown",
        }
    }
}

/// Sampling and stopping arguments of one generation request.
///
/// Every field is optional; unset fields are left out of the request so the
/// backend applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceArguments {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_strings: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_repetition_penalty_max: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_repetition_penalty_sustain: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_repetition_penalty_decay: Option<u32>,

    /// Token sequences penalised when they recur at the same position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positional_repeat_inhibit: Option<Vec<Vec<u32>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positional_repetition_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_convert: Option<bool>,
}

impl InferenceArguments {
    /// Sampling defaults that work well for chat on small models.
    pub fn recommended() -> Self {
        Self {
            prompt: None,
            temperature: Some(0.5),
            top_k: Some(32),
            top_p: Some(0.2),
            min_p: Some(0.0),
            min_length: Some(4),
            max_new_tokens: Some(256),
            stopping_strings: Some(vec!["\n".to_string()]),
            token_repetition_penalty_max: Some(1.1),
            token_repetition_penalty_sustain: Some(2048),
            token_repetition_penalty_decay: Some(0),
            positional_repeat_inhibit: Some(Vec::new()),
            positional_repetition_penalty: Some(0.0),
            special_convert: Some(false),
        }
    }

    /// Fill every unset field of `self` from `base`.
    pub fn or(self, base: &InferenceArguments) -> Self {
        Self {
            prompt: self.prompt.or_else(|| base.prompt.clone()),
            temperature: self.temperature.or(base.temperature),
            top_k: self.top_k.or(base.top_k),
            top_p: self.top_p.or(base.top_p),
            min_p: self.min_p.or(base.min_p),
            min_length: self.min_length.or(base.min_length),
            max_new_tokens: self.max_new_tokens.or(base.max_new_tokens),
            stopping_strings: self
                .stopping_strings
                .or_else(|| base.stopping_strings.clone()),
            token_repetition_penalty_max: self
                .token_repetition_penalty_max
                .or(base.token_repetition_penalty_max),
            token_repetition_penalty_sustain: self
                .token_repetition_penalty_sustain
                .or(base.token_repetition_penalty_sustain),
            token_repetition_penalty_decay: self
                .token_repetition_penalty_decay
                .or(base.token_repetition_penalty_decay),
            positional_repeat_inhibit: self
                .positional_repeat_inhibit
                .or_else(|| base.positional_repeat_inhibit.clone()),
            positional_repetition_penalty: self
                .positional_repetition_penalty
                .or(base.positional_repetition_penalty),
            special_convert: self.special_convert.or(base.special_convert),
        }
    }
}

/// Outcome of one generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub text: String,
    #[serde(default)]
    pub tokens: Vec<u32>,
    #[serde(default)]
    pub stop_reason: StopReason,
    /// String form of each generated token, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragments: Option<Vec<String>>,
}
