//! Servitor Core Library
//!
//! Context management for chat agents running on stateless text-generation
//! backends: per-channel short-term windows, embedding-indexed long-term
//! recall, prompt assembly under a hard token budget, and a continuation
//! loop for replies cut off by the token limit.

pub mod bridge;
pub mod character;
pub mod config;
pub mod driver;
pub mod error;
pub mod fakes;
pub mod format;
pub mod memory;
pub mod obs;
pub mod telemetry;

pub use bridge::{
    strip_stray_paren, AssembledContext, Bridge, BridgeConfig, ContinuationState, Inference,
    LineIdGenerator, Round,
};
pub use character::{AgentDescriptor, PronounDescriptor, WarmupDescriptor};
pub use config::{BackendConfig, BackendKind, ServitorConfig, DEFAULT_ENDPOINT};
pub use driver::{
    EmbeddingDriver, InferenceArguments, InferenceDriver, InferenceResult, StopReason, Tokenizer,
};
pub use error::{Result, ServitorError};
pub use format::{decapitalize, render_template, CleanedInference, ContextFormatter, FormatterOptions};
pub use memory::{
    EmbedSource, KnowledgeMemory, MemoryProvider, RecallRequest, StaticMemory, VectorMemory,
    VectorMemoryConfig, WindowMemory,
};
pub use obs::{
    channel_span, emit_continuation_finished, emit_inference_round, emit_line_saved,
    emit_longterm_stored, emit_recall_hit, emit_window_evicted, ChannelSpan,
};
pub use telemetry::init_tracing;

pub use servitor_state::{
    ActorInfo, ChannelInfo, ChatLine, EphemeralVectorStore, MessageInfo, StorageError,
    SurrealVectorStore, VectorStore,
};

/// Servitor version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
