//! Rendering of chat lines into prompt text, and cleanup of raw generations.

use std::borrow::Cow;
use std::sync::OnceLock;

use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use servitor_state::ChatLine;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("Invalid regex"))
}

fn capitalized_word_regex() -> &'static Regex {
    static CAPITALIZED: OnceLock<Regex> = OnceLock::new();
    // ASCII boundaries: an accented letter ends the word.
    CAPITALIZED.get_or_init(|| {
        Regex::new(r"(?-u:\b)([A-Z])([a-z]+?)?(?-u:\b)").expect("Invalid regex")
    })
}

/// Replace `{key}` placeholders with the matching value.
///
/// Unknown keys and any other braces are left as they are.
pub fn render_template(template: &str, params: &[(&str, &str)]) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match params.iter().find(|(k, _)| *k == key) {
                Some((_, value)) => (*value).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Lowercase the first letter of every capitalized word.
///
/// Text containing a backtick is assumed to carry code and is returned as is.
pub fn decapitalize(text: &str) -> Cow<'_, str> {
    if text.contains('`') {
        return Cow::Borrowed(text);
    }
    capitalized_word_regex().replace_all(text, |caps: &Captures| {
        let rest = caps.get(2).map_or("", |m| m.as_str());
        format!("{}{}", caps[1].to_lowercase(), rest)
    })
}

/// Lowercase and drop everything that is not an ASCII letter or digit.
pub fn normalize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// 12-hour clock, `h:mm am` / `h:mm pm`.
pub fn format_time<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    let hour = time.hour();
    let ampm = if hour >= 12 { "pm" } else { "am" };
    let hour12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{}:{:02} {}", hour12, time.minute(), ampm)
}

/// Calendar date in local time, e.g. `Fri Oct 16 2026`.
pub fn format_date(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%a %b %d %Y").to_string()
}

/// Formatting knobs. Every field has a default, so partial configs work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterOptions {
    pub name_normalize: bool,
    pub name_capitalize: bool,

    pub message_prefix: String,
    pub message_suffix: String,

    pub author_prefix: String,
    pub author_suffix: String,

    pub timestamps: bool,
    pub append_eos: bool,
    pub append_eos_all: bool,

    pub internal_monologue: bool,
    pub thought_prefix: String,
    pub thought_suffix: String,

    pub message_line: String,
    pub input_line: String,

    pub bos: String,
    pub eos: String,
}

impl Default for FormatterOptions {
    fn default() -> Self {
        Self {
            name_normalize: true,
            name_capitalize: true,
            message_prefix: String::new(),
            message_suffix: "\n\n".into(),
            author_prefix: String::new(),
            author_suffix: ":".into(),
            timestamps: false,
            append_eos: true,
            append_eos_all: false,
            internal_monologue: false,
            thought_prefix: "(thought:".into(),
            thought_suffix: ")".into(),
            message_line:
                "{prefix}{timestamp}{author_prefix}{author}{author_suffix} {content}{suffix}"
                    .into(),
            input_line: "{prefix}{timestamp}{author_prefix}{author}{author_suffix} {miniprompt}"
                .into(),
            bos: "\u{2}".into(),
            eos: "\u{3}".into(),
        }
    }
}

/// A generation split into its private thought and visible content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanedInference {
    pub content: String,
    pub thought: Option<String>,
}

/// Renders lines and prompt stubs according to [`FormatterOptions`].
#[derive(Debug, Clone, Default)]
pub struct ContextFormatter {
    options: FormatterOptions,
}

impl ContextFormatter {
    pub fn new(options: FormatterOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FormatterOptions {
        &self.options
    }

    pub fn normalize(&self, name: &str) -> String {
        normalize(name)
    }

    /// Speaker name as it appears in the transcript.
    pub fn normalize_name(&self, name: &str) -> String {
        let mut name = if self.options.name_normalize {
            normalize(name)
        } else {
            name.to_string()
        };
        if self.options.name_capitalize {
            name = name.to_uppercase();
        }
        name
    }

    /// `"[h:mm am] "` when timestamps are enabled, else empty.
    pub fn format_timestamp(&self, timestamp: Option<DateTime<Utc>>) -> String {
        if !self.options.timestamps {
            return String::new();
        }
        let time = timestamp.unwrap_or_else(Utc::now).with_timezone(&Local);
        format!("[{}] ", format_time(&time))
    }

    pub fn format_line(&self, line: &ChatLine) -> String {
        let o = &self.options;
        let timestamp = self.format_timestamp(line.message.timestamp);
        let author = self.normalize_name(&line.actor.friendlyname);

        let suffix = if o.append_eos_all || (o.append_eos && line.actor.is_self) {
            format!("{}{}", o.eos, o.message_suffix)
        } else {
            o.message_suffix.clone()
        };

        render_template(
            &o.message_line,
            &[
                ("prefix", &o.message_prefix),
                ("timestamp", &timestamp),
                ("author_prefix", &o.author_prefix),
                ("author", &author),
                ("author_suffix", &o.author_suffix),
                ("content", &line.message.content),
                ("suffix", &suffix),
            ],
        )
    }

    /// The open line the model is asked to complete.
    ///
    /// Without an explicit `miniprompt`, monologue mode opens a thought
    /// (closed immediately when `thought` is given).
    pub fn format_input_line(
        &self,
        author: &str,
        miniprompt: Option<&str>,
        thought: Option<&str>,
    ) -> String {
        let o = &self.options;
        let timestamp = self.format_timestamp(None);

        let miniprompt = match miniprompt {
            Some(m) => m.to_string(),
            None if o.internal_monologue => match thought {
                Some(t) => format!("{} {}{}", o.thought_prefix, t, o.thought_suffix),
                None => o.thought_prefix.clone(),
            },
            None => String::new(),
        };
        let author = self.normalize_name(author);

        render_template(
            &o.input_line,
            &[
                ("prefix", &o.message_prefix),
                ("timestamp", &timestamp),
                ("author_prefix", &o.author_prefix),
                ("author", &author),
                ("author_suffix", &o.author_suffix),
                ("bos", &o.bos),
                ("miniprompt", &miniprompt),
            ],
        )
        .trim_end()
        .to_string()
    }

    pub fn format_thought(&self, thought: &str) -> String {
        format!(
            "{} {}{}",
            self.options.thought_prefix, thought, self.options.thought_suffix
        )
    }

    pub fn compose_with_thought(&self, content: &str, thought: Option<&str>) -> String {
        match thought {
            Some(t) if self.options.internal_monologue => {
                format!("{} {}", self.format_thought(t), content)
            }
            _ => content.to_string(),
        }
    }

    /// Split a raw generation into thought and content.
    ///
    /// In monologue mode a leading thought prefix is dropped and the text is
    /// cut at the first thought suffix. Without a suffix everything is
    /// thought and the content is empty.
    pub fn clean_inference(&self, text: &str) -> CleanedInference {
        let text = text.trim();
        if !self.options.internal_monologue {
            return CleanedInference {
                content: text.to_string(),
                thought: None,
            };
        }

        let o = &self.options;
        let text = text.strip_prefix(o.thought_prefix.as_str()).unwrap_or(text);
        match text.find(o.thought_suffix.as_str()) {
            Some(end) if !o.thought_suffix.is_empty() => CleanedInference {
                thought: Some(text[..end].trim().to_string()),
                content: text[end + o.thought_suffix.len()..].trim().to_string(),
            },
            _ => CleanedInference {
                thought: Some(text.trim().to_string()),
                content: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use servitor_state::{ActorInfo, ChannelInfo};

    fn monologue() -> ContextFormatter {
        ContextFormatter::new(FormatterOptions {
            internal_monologue: true,
            ..Default::default()
        })
    }

    fn line(author: ActorInfo, content: &str) -> ChatLine {
        ChatLine::new(author, ChannelInfo::new("c", "general", false), "1", content)
    }

    #[test]
    fn test_render_template_leaves_unknown_keys() {
        let out = render_template("{a} and {b} and {", &[("a", "x")]);
        assert_eq!(out, "x and {b} and {");
    }

    #[test]
    fn test_normalize_name() {
        let f = ContextFormatter::default();
        assert_eq!(f.normalize("Dr. Who_42!"), "drwho42");
        assert_eq!(f.normalize_name("Dr. Who"), "DRWHO");

        let raw = ContextFormatter::new(FormatterOptions {
            name_normalize: false,
            name_capitalize: false,
            ..Default::default()
        });
        assert_eq!(raw.normalize_name("Dr. Who"), "Dr. Who");
    }

    #[test]
    fn test_format_time_twelve_hour() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let at = |h, m| tz.with_ymd_and_hms(2026, 10, 16, h, m, 0).unwrap();
        assert_eq!(format_time(&at(0, 5)), "12:05 am");
        assert_eq!(format_time(&at(9, 30)), "9:30 am");
        assert_eq!(format_time(&at(12, 0)), "12:00 pm");
        assert_eq!(format_time(&at(23, 59)), "11:59 pm");
    }

    #[test]
    fn test_format_line_appends_eos_for_self() {
        let f = ContextFormatter::default();
        assert_eq!(
            f.format_line(&line(ActorInfo::user("alice"), "hi")),
            "ALICE: hi\n\n"
        );
        assert_eq!(
            f.format_line(&line(ActorInfo::agent("bot"), "hello")),
            "BOT: hello\u{3}\n\n"
        );

        let all = ContextFormatter::new(FormatterOptions {
            append_eos_all: true,
            ..Default::default()
        });
        assert_eq!(
            all.format_line(&line(ActorInfo::user("alice"), "hi")),
            "ALICE: hi\u{3}\n\n"
        );
    }

    #[test]
    fn test_format_line_with_timestamps() {
        let f = ContextFormatter::new(FormatterOptions {
            timestamps: true,
            ..Default::default()
        });
        let out = f.format_line(&line(ActorInfo::user("alice"), "hi"));
        assert!(out.starts_with('['));
        assert!(out.contains("m] ALICE: hi"));
    }

    #[test]
    fn test_format_input_line() {
        let plain = ContextFormatter::default();
        assert_eq!(plain.format_input_line("bot", None, None), "BOT:");

        let f = monologue();
        assert_eq!(f.format_input_line("bot", None, None), "BOT: (thought:");
        assert_eq!(
            f.format_input_line("bot", None, Some("hmm")),
            "BOT: (thought: hmm)"
        );
        assert_eq!(f.format_input_line("bot", Some("well"), None), "BOT: well");
    }

    #[test]
    fn test_compose_with_thought() {
        assert_eq!(
            monologue().compose_with_thought("hello", Some("greet them")),
            "(thought: greet them) hello"
        );
        assert_eq!(
            ContextFormatter::default().compose_with_thought("hello", Some("x")),
            "hello"
        );
    }

    #[test]
    fn test_clean_inference_splits_thought() {
        let cleaned = monologue().clean_inference("(thought: this is a test) hello there)");
        assert_eq!(cleaned.thought.as_deref(), Some("this is a test"));
        assert_eq!(cleaned.content, "hello there)");
    }

    #[test]
    fn test_clean_inference_without_closing_marker() {
        let cleaned = monologue().clean_inference(" still thinking about it ");
        assert_eq!(cleaned.thought.as_deref(), Some("still thinking about it"));
        assert_eq!(cleaned.content, "");
    }

    #[test]
    fn test_clean_inference_plain() {
        let cleaned = ContextFormatter::default().clean_inference("  hi there \n");
        assert_eq!(cleaned.content, "hi there");
        assert!(cleaned.thought.is_none());
    }

    #[test]
    fn test_decapitalize() {
        assert_eq!(decapitalize("Hello There, NASA"), "hello there, NASA");
        assert_eq!(decapitalize("I think So"), "i think so");
        assert_eq!(decapitalize("Use `Vec` Here"), "Use `Vec` Here");
        assert_eq!(decapitalize("Café Noir"), "café noir");
        assert_eq!(decapitalize("Zoë Said"), "zoë said");
    }

    #[test]
    fn test_options_from_partial_toml() {
        let opts: FormatterOptions = toml::from_str("internal_monologue = true").unwrap();
        assert!(opts.internal_monologue);
        assert_eq!(opts.author_suffix, ":");
        assert_eq!(opts.eos, "\u{3}");
    }
}
