//! Secret substitution — the `%NAME%` collaborator contract.
//!
//! Secrets appear in prompts and tool arguments as `%NAME%` tokens. The
//! dispatch shim replaces every occurrence inside the arguments tree with
//! the caller-supplied value just before the tool handler runs, so the model
//! only ever sees the placeholder. Values must never reach logs; the map is
//! wrapped in a type whose `Debug` output is redacted.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%([A-Za-z0-9_]+)%").unwrap())
}

/// Caller-supplied secrets, keyed by placeholder name.
#[derive(Clone, Default)]
pub struct SecretStore {
    values: HashMap<String, String>,
}

impl SecretStore {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("values", &format!("[{} redacted]", self.values.len()))
            .finish()
    }
}

/// Replace every `%NAME%` occurrence in every string of `value` with the
/// matching secret. Unknown names stay verbatim.
pub fn substitute_secrets(value: &Value, secrets: &SecretStore) -> Value {
    if secrets.is_empty() {
        return value.clone();
    }
    match value {
        Value::String(text) => {
            let replaced = token_pattern().replace_all(text, |caps: &regex::Captures<'_>| {
                match secrets.get(&caps[1]) {
                    Some(secret) => secret.to_string(),
                    None => caps[0].to_string(),
                }
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_secrets(item, secrets))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), substitute_secrets(item, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}
