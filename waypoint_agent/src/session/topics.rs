//! Topic and intent extraction over a message window.
//!
//! Pure pattern matching: the same window always yields the same result.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use waypoint_core::{ConversationMessage, Pillar, Role};

/// Longest topic kept, in words.
const MAX_TOPIC_WORDS: usize = 5;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "my", "our", "your", "their", "this", "that", "these", "those", "me", "us",
    "it", "i", "we", "you", "some", "any", "all", "of", "to", "in", "and", "or", "with", "please",
    "now", "today", "something", "stuff", "things", "more", "how", "what",
];

/// What the user is currently trying to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Research,
    Analyze,
    Plan,
    Create,
    Question,
    General,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Research => "research",
            Intent::Analyze => "analyze",
            Intent::Plan => "plan",
            Intent::Create => "create",
            Intent::Question => "question",
            Intent::General => "general",
        }
    }

    /// Pillar this intent usually belongs to.
    pub fn pillar_hint(self) -> Option<Pillar> {
        match self {
            Intent::Research => Some(Pillar::Discovery),
            Intent::Analyze => Some(Pillar::GapAnalysis),
            Intent::Plan => Some(Pillar::Strategy),
            Intent::Create => Some(Pillar::Production),
            Intent::Question | Intent::General => None,
        }
    }
}

/// Keyword patterns, checked in order.
fn intent_patterns() -> &'static [(Intent, Regex)] {
    static PATTERNS: OnceLock<Vec<(Intent, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                Intent::Create,
                r"\b(write|create|draft|generate|produce|publish|compose|rewrite)\b",
            ),
            (
                Intent::Plan,
                r"\b(plan|planning|strategy|strategi[sz]e|roadmap|outline|calendar|schedule|prioriti[sz]e)\b",
            ),
            (
                Intent::Analyze,
                r"\b(analy[sz]e|analysis|compare|comparison|gaps?|audit|competitors?|evaluate|benchmark)\b",
            ),
            (
                Intent::Research,
                r"\b(research|find|search|discover|explore|look up|learn about|investigate)\b",
            ),
            (
                Intent::Question,
                r"(\?\s*$|^(what|how|why|when|where|who|which|can|could|should|is|are|do|does)\b)",
            ),
        ]
        .into_iter()
        .filter_map(|(intent, pattern)| Regex::new(pattern).ok().map(|re| (intent, re)))
        .collect()
    })
}

fn quoted_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]{2,80})""#).ok()).as_ref()
}

fn phrase_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:about|on|regarding|for)\s+([a-z0-9][a-z0-9 '\-]*?)\s*(?:[.,;:!?]|\band\b|\bbut\b|\bso\b|$)")
            .ok()
    })
    .as_ref()
}

/// Classifies a single utterance.
pub fn detect_intent(text: &str) -> Intent {
    let text = text.trim().to_lowercase();
    intent_patterns()
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}

/// Intent of the latest user message in the window.
pub fn detect_current_intent(messages: &[ConversationMessage]) -> Intent {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| detect_intent(&m.content))
        .unwrap_or(Intent::General)
}

/// Strips stop words at both ends and caps the length.
fn clean_topic(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let start = words.iter().position(|w| !STOP_WORDS.contains(w))?;
    let end = words.iter().rposition(|w| !STOP_WORDS.contains(w))?;
    let kept = &words[start..=end];
    let topic = kept[..kept.len().min(MAX_TOPIC_WORDS)].join(" ");
    (topic.len() >= 2).then_some(topic)
}

/// Extracts up to `max` topics from the user messages of a window.
///
/// Messages are scanned newest first, so the first topic is the one the
/// user raised most recently. Quoted phrases come before "about X" style
/// phrases of the same message. Topics are lowercase and deduplicated.
pub fn extract_topics(messages: &[ConversationMessage], max: usize) -> Vec<String> {
    let (Some(quoted), Some(phrase)) = (quoted_regex(), phrase_regex()) else {
        return Vec::new();
    };

    let mut topics: Vec<String> = Vec::new();
    for message in messages.iter().rev().filter(|m| m.role == Role::User) {
        if topics.len() >= max {
            break;
        }
        let text = message.content.to_lowercase();

        let candidates = quoted
            .captures_iter(&text)
            .chain(phrase.captures_iter(&text))
            .filter_map(|caps| caps.get(1).and_then(|m| clean_topic(m.as_str())));

        for topic in candidates {
            if topics.len() >= max {
                break;
            }
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(text: &str) -> ConversationMessage {
        ConversationMessage {
            role: Role::User,
            content: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn assistant(text: &str) -> ConversationMessage {
        ConversationMessage {
            role: Role::Assistant,
            content: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_detect_intent_keywords() {
        assert_eq!(detect_intent("Write a blog post"), Intent::Create);
        assert_eq!(detect_intent("Help me plan next month"), Intent::Plan);
        assert_eq!(detect_intent("Compare my competitors"), Intent::Analyze);
        assert_eq!(detect_intent("Research vegan snacks"), Intent::Research);
        assert_eq!(detect_intent("Is this any good?"), Intent::Question);
        assert_eq!(detect_intent("hello there"), Intent::General);
    }

    #[test]
    fn test_current_intent_uses_latest_user_message() {
        let window = vec![
            user("Research indoor plants"),
            assistant("Sure, let me write that up"),
            user("Now outline a strategy"),
        ];
        assert_eq!(detect_current_intent(&window), Intent::Plan);
        assert_eq!(detect_current_intent(&[]), Intent::General);
        assert_eq!(Intent::Plan.pillar_hint(), Some(Pillar::Strategy));
    }

    #[test]
    fn test_extract_topics() {
        let window = vec![
            user("Tell me about sustainable fashion brands."),
            assistant("Here is something about \"assistant topics\""),
            user("Can you research \"Content Marketing\" for me?"),
        ];

        let topics = extract_topics(&window, 5);
        assert_eq!(topics, ["content marketing", "sustainable fashion brands"]);
    }

    #[test]
    fn test_extract_topics_dedup_and_cap() {
        let window = vec![
            user("ideas for the home office"),
            user("more on \"home office\" please"),
            user("thoughts on standing desks, and on lighting"),
        ];

        assert_eq!(
            extract_topics(&window, 5),
            ["standing desks", "lighting", "home office"]
        );
        assert_eq!(extract_topics(&window, 1), ["standing desks"]);
    }
}
