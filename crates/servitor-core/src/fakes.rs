//! Deterministic in-process collaborators (testing and offline use)
//!
//! Provides `WordTokenizer`, `ScriptedInference` and `HashEmbedder`, which
//! satisfy the driver traits without a backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::driver::{
    EmbeddingDriver, InferenceArguments, InferenceDriver, InferenceResult, StopReason, Tokenizer,
};
use crate::error::{Result, ServitorError};

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Split text into whitespace-led fragments: `"a b"` -> `["a", " b"]`.
pub fn fragments_of(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut prev_ws = true;
    for c in text.chars() {
        let ws = c.is_whitespace();
        if out.is_empty() || (ws && !prev_ws) {
            out.push(String::new());
        }
        if let Some(last) = out.last_mut() {
            last.push(c);
        }
        prev_ws = ws;
    }
    out
}

// ---------------------------------------------------------------------------
// WordTokenizer
// ---------------------------------------------------------------------------

/// One token per whitespace-separated word, ids derived from a word hash.
#[derive(Debug, Default, Clone)]
pub struct WordTokenizer;

impl WordTokenizer {
    pub fn encode(text: &str) -> Vec<u32> {
        text.split_whitespace()
            .map(|w| (fnv1a(w) % 32_000) as u32)
            .collect()
    }
}

#[async_trait]
impl Tokenizer for WordTokenizer {
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(Self::encode(text))
    }
}

// ---------------------------------------------------------------------------
// ScriptedInference
// ---------------------------------------------------------------------------

/// Inference backend replaying queued results and recording every request.
#[derive(Debug, Default)]
pub struct ScriptedInference {
    defaults: InferenceArguments,
    script: Mutex<VecDeque<InferenceResult>>,
    requests: Mutex<Vec<InferenceArguments>>,
    defaults_calls: AtomicUsize,
}

impl ScriptedInference {
    pub fn new(script: impl IntoIterator<Item = InferenceResult>) -> Self {
        Self {
            defaults: InferenceArguments::recommended(),
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn with_defaults(mut self, defaults: InferenceArguments) -> Self {
        self.defaults = defaults;
        self
    }

    /// A result for `text`, tokenized by word and split into fragments.
    pub fn result(text: &str, stop_reason: StopReason) -> InferenceResult {
        InferenceResult {
            text: text.to_string(),
            tokens: WordTokenizer::encode(text),
            stop_reason,
            fragments: Some(fragments_of(text)),
        }
    }

    pub fn push(&self, result: InferenceResult) {
        self.script.lock().push_back(result);
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<InferenceArguments> {
        self.requests.lock().clone()
    }

    pub fn defaults_calls(&self) -> usize {
        self.defaults_calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl Tokenizer for ScriptedInference {
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(WordTokenizer::encode(text))
    }
}

#[async_trait]
impl InferenceDriver for ScriptedInference {
    async fn ping(&self) -> bool {
        true
    }

    async fn defaults(&self) -> Result<InferenceArguments> {
        self.defaults_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.defaults.clone())
    }

    async fn infer(&self, args: &InferenceArguments) -> Result<InferenceResult> {
        self.requests.lock().push(args.clone());
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| ServitorError::Inference("script exhausted".to_string()))
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Bag-of-words embedder: each lowercased word bumps one hashed dimension.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingDriver for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if word.is_empty() {
                continue;
            }
            v[(fnv1a(&word) % self.dimensions as u64) as usize] += 1.0;
        }
        Ok(v)
    }

    async fn dimensions(&self) -> Result<Option<usize>> {
        Ok(Some(self.dimensions))
    }
}
