//! Servitor-State: chat line schema and vector store backends
//!
//! This crate provides the persistence layer for Servitor's long-term
//! recall: the `ChatLine` data shape shared by every component, and the
//! `VectorStore` abstraction over embedded line windows.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: data shape, similarity retrieval, recency/channel filtering.
//!
//! ## Key Components
//!
//! - `ChatLine`: one chat event (actor, channel, message, token lists)
//! - `VectorStore`: store/retrieve embedded windows
//! - `EphemeralVectorStore`: in-process store with exact cosine ranking
//! - `SurrealVectorStore`: SurrealDB-backed store

pub mod ephemeral;
mod error;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use ephemeral::EphemeralVectorStore;
pub use error::StorageError;
pub use schema::{ActorInfo, ChannelInfo, ChatLine, MessageInfo, VectorRecall, VectorRecord};
pub use storage_traits::{cosine_similarity, RecallFilter, StorageResult, VectorStore};
pub use surreal_store::SurrealVectorStore;
