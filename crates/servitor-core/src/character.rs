//! Agent persona: name, flavor text, pronouns and warmup.

use serde::{Deserialize, Serialize};

/// Pronoun set of the agent.
///
/// `xe/xem` make good placeholders since every form is distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PronounDescriptor {
    pub xe: String,
    pub xem: String,
    pub xyr: String,
    pub xyrs: String,
    pub xemself: String,
}

impl Default for PronounDescriptor {
    fn default() -> Self {
        Self {
            xe: "it".into(),
            xem: "it".into(),
            xyr: "its".into(),
            xyrs: "its".into(),
            xemself: "itself".into(),
        }
    }
}

/// Canned first exchange seeded into every new channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupDescriptor {
    pub thought: String,
    /// May reference `{timeofday}`.
    pub response: String,
}

impl Default for WarmupDescriptor {
    fn default() -> Self {
        Self {
            thought: "I am now online.".into(),
            response: "Hello! How may I assist you today?".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDescriptor {
    pub name: String,
    /// Flavor text appended to the preamble; may reference pronoun keys.
    pub extra: Option<String>,
    pub pronouns: PronounDescriptor,
    pub warmup: Option<WarmupDescriptor>,
    /// Lowercase capitalized words in replies.
    pub decapitalize: bool,
}

impl Default for AgentDescriptor {
    fn default() -> Self {
        Self {
            name: "assistant".into(),
            extra: None,
            pronouns: PronounDescriptor::default(),
            warmup: Some(WarmupDescriptor::default()),
            decapitalize: false,
        }
    }
}

impl AgentDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn without_warmup(mut self) -> Self {
        self.warmup = None;
        self
    }
}
