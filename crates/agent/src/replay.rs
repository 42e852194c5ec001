//! Content-addressed replay cache around the completion call.
//!
//! A conversation is fingerprinted as the SHA-1 of its canonical JSON with
//! ephemeral `localhost:<port>` occurrences normalized away, so a test can
//! record completions against a throwaway mock server and replay them on a
//! different port. Entries are kept in insertion order and the serialized
//! file is stable across record/replay cycles.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

use lowire_core::{AssistantMessage, Conversation};

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"localhost:\d+").unwrap())
}

/// The port-normalized SHA-1 over the serialized conversation.
pub fn fingerprint(conversation: &Conversation) -> String {
    let serialized =
        serde_json::to_string(conversation).expect("conversation serialization is infallible");
    let normalized = port_pattern().replace_all(&serialized, "localhost:PORT");

    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();

    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Insertion-ordered mapping from fingerprint to recorded assistant message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayCache {
    entries: Map<String, Value>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a cache file body. Missing or unparseable content is an empty
    /// cache, not an error.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(entries)) => Self { entries },
            _ => Self::default(),
        }
    }

    /// Pretty-printed (2-space indent) file body, entries in insertion order.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.entries).expect("cache serialization is infallible")
    }

    pub fn get(&self, key: &str) -> Option<AssistantMessage> {
        self.entries
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: String, message: &AssistantMessage) {
        let value =
            serde_json::to_value(message).expect("assistant message serialization is infallible");
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Load a cache file. A missing or unparseable file is an empty cache.
    pub fn load(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(_) => Self::default(),
        }
    }

    /// Write the cache file, but only when the serialized body differs from
    /// what is already on disk. Keeps recorded fixtures untouched across
    /// replay-only runs.
    pub fn save_if_changed(&self, path: &std::path::Path) -> std::io::Result<bool> {
        let body = self.to_pretty_json();
        if std::fs::read_to_string(path).is_ok_and(|existing| existing == body) {
            return Ok(false);
        }
        std::fs::write(path, body)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowire_core::{ContentPart, Message};

    fn conversation(endpoint: &str) -> Conversation {
        let mut conv = Conversation::new("sys");
        conv.push(Message::user(format!("fetch {endpoint} and report")));
        conv
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint(&conversation("http://localhost:3000"));
        let b = fingerprint(&conversation("http://localhost:3000"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_normalizes_localhost_ports() {
        let a = fingerprint(&conversation("http://localhost:49152"));
        let b = fingerprint(&conversation("http://localhost:60001"));
        assert_eq!(a, b);

        let c = fingerprint(&conversation("http://example.com:8080"));
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_differs_on_content() {
        let a = fingerprint(&conversation("http://localhost:3000"));
        let mut other = conversation("http://localhost:3000");
        other.push(Message::assistant(vec![ContentPart::text("done")]));
        assert_ne!(a, fingerprint(&other));
    }

    #[test]
    fn parse_tolerates_garbage() {
        assert!(ReplayCache::parse("").is_empty());
        assert!(ReplayCache::parse("not json at all").is_empty());
        assert!(ReplayCache::parse("[1,2,3]").is_empty());
    }

    #[test]
    fn round_trip_preserves_insertion_order() {
        let mut cache = ReplayCache::new();
        let msg = AssistantMessage {
            content: vec![ContentPart::text("hello")],
            ..AssistantMessage::default()
        };
        cache.insert("bbbb".into(), &msg);
        cache.insert("aaaa".into(), &msg);
        cache.insert("cccc".into(), &msg);

        let text = cache.to_pretty_json();
        let reloaded = ReplayCache::parse(&text);
        assert_eq!(
            reloaded.keys().collect::<Vec<_>>(),
            vec!["bbbb", "aaaa", "cccc"]
        );
        assert_eq!(reloaded.to_pretty_json(), text);
    }

    #[test]
    fn pretty_json_uses_two_space_indent() {
        let mut cache = ReplayCache::new();
        cache.insert(
            "abcd".into(),
            &AssistantMessage {
                content: vec![ContentPart::text("x")],
                ..AssistantMessage::default()
            },
        );
        let text = cache.to_pretty_json();
        assert!(text.starts_with("{\n  \"abcd\""));
    }

    #[test]
    fn file_io_is_tolerant_and_change_aware() {
        let path = std::env::temp_dir().join(format!(
            "lowire-replay-cache-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        // Missing file loads as empty.
        assert!(ReplayCache::load(&path).is_empty());

        let mut cache = ReplayCache::new();
        cache.insert(
            "abcd".into(),
            &AssistantMessage {
                content: vec![ContentPart::text("x")],
                ..AssistantMessage::default()
            },
        );

        assert!(cache.save_if_changed(&path).unwrap());
        assert_eq!(ReplayCache::load(&path), cache);
        // Unchanged content is not rewritten.
        assert!(!cache.save_if_changed(&path).unwrap());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn get_round_trips_messages() {
        let mut cache = ReplayCache::new();
        let msg = AssistantMessage {
            content: vec![ContentPart::tool_call(
                "c1",
                "push",
                serde_json::json!({"value": 1}),
            )],
            openai_id: Some("item_1".into()),
            ..AssistantMessage::default()
        };
        cache.insert("key".into(), &msg);
        assert_eq!(cache.get("key").unwrap(), msg);
        assert!(cache.get("missing").is_none());
    }
}
