//! Schema definitions for Servitor chat lines and vector records
//!
//! - `ChatLine`: one message event (actor + channel + message)
//! - `VectorRecord`: a short contiguous window of lines plus its embedding
//! - `VectorRecall`: a ranked record returned by a vector store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Who wrote a line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorInfo {
    /// Username shown to the model
    pub friendlyname: String,
    /// Flags this actor as the agent itself
    #[serde(rename = "self", default)]
    pub is_self: bool,
}

/// Where a line was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Opaque identifier used for indexing channel state
    pub id: String,
    /// Channel name as it may be exposed to the model
    pub friendlyname: String,
    /// One-on-one channel (true) or multi-user channel (false)
    #[serde(default)]
    pub isprivate: bool,
}

/// The message payload of a line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Opaque message identifier, used for deduplication
    pub id: String,
    /// Message contents
    pub content: String,
    /// Tokens of the formatted line
    #[serde(default)]
    pub tokens: Vec<u32>,
    /// Tokens of the raw content
    #[serde(default)]
    pub tokens_raw: Vec<u32>,
    /// When the message was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One chat event flowing through every component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub actor: ActorInfo,
    pub channel: ChannelInfo,
    pub message: MessageInfo,
}

impl ChatLine {
    /// Create a line with empty token lists, timestamped now
    pub fn new(
        actor: ActorInfo,
        channel: ChannelInfo,
        id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            actor,
            channel,
            message: MessageInfo {
                id: id.into(),
                content: content.into(),
                tokens: Vec::new(),
                tokens_raw: Vec::new(),
                timestamp: Some(Utc::now()),
            },
        }
    }

    /// Override the message timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.message.timestamp = Some(timestamp);
        self
    }

    /// Set both token lists
    pub fn with_tokens(mut self, tokens: Vec<u32>) -> Self {
        self.message.tokens_raw = tokens.clone();
        self.message.tokens = tokens;
        self
    }

    /// Channel id shortcut
    pub fn channel_id(&self) -> &str {
        &self.channel.id
    }

    /// Number of tokens of the formatted line
    pub fn token_count(&self) -> usize {
        self.message.tokens.len()
    }
}

impl ActorInfo {
    pub fn user(friendlyname: impl Into<String>) -> Self {
        Self {
            friendlyname: friendlyname.into(),
            is_self: false,
        }
    }

    pub fn agent(friendlyname: impl Into<String>) -> Self {
        Self {
            friendlyname: friendlyname.into(),
            is_self: true,
        }
    }
}

impl ChannelInfo {
    pub fn new(id: impl Into<String>, friendlyname: impl Into<String>, isprivate: bool) -> Self {
        Self {
            id: id.into(),
            friendlyname: friendlyname.into(),
            isprivate,
        }
    }
}

/// An embedded window of lines, immutable once stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Short contiguous window of lines (oldest first)
    pub lines: Vec<ChatLine>,
    /// Aggregate token count of `lines`
    pub tokens: usize,
    /// Time of storage
    pub timestamp: DateTime<Utc>,
    /// Embedding of the representative text
    pub embedding: Vec<f32>,
    /// Channel of the newest line in the window
    pub channel: String,
}

impl VectorRecord {
    /// Build a record from a window, summing the lines' token counts.
    ///
    /// The record is tagged with the channel of its last line.
    pub fn from_window(lines: Vec<ChatLine>, embedding: Vec<f32>) -> Self {
        let tokens = lines.iter().map(ChatLine::token_count).sum();
        let channel = lines
            .last()
            .map(|l| l.channel.id.clone())
            .unwrap_or_default();
        Self {
            lines,
            tokens,
            timestamp: Utc::now(),
            embedding,
            channel,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A record returned by a similarity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecall {
    pub lines: Vec<ChatLine>,
    pub tokens: usize,
    pub timestamp: DateTime<Utc>,
    pub similarity: f32,
}
