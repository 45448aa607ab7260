//! HTTP backend drivers for Servitor.
//!
//! Each driver implements the tokenizer and inference traits of
//! `servitor-core`; basilisk and OpenAI-compatible servers also embed.
//! [`Backend`] builds the one named by the configuration.

pub mod backend;
pub mod basilisk;
pub mod error;
mod http;
pub mod openai;
pub mod textgen;

pub use backend::Backend;
pub use basilisk::{BasiliskDriver, EmbedResult, TokenizeResult};
pub use error::{DriverError, Result};
pub use openai::OpenAiDriver;
pub use textgen::TextgenDriver;
