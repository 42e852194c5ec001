//! Provider registry — selects the correct wire dialect by API tag.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::{
    AnthropicProvider, GoogleProvider, OpenAiChatProvider, OpenAiResponsesProvider, Provider,
};

/// The supported wire dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Api {
    #[default]
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
    Google,
}

impl Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            Api::OpenAiChat => "openai",
            Api::OpenAiResponses => "openai-responses",
            Api::Anthropic => "anthropic",
            Api::Google => "google",
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Api {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" | "openai-chat" => Ok(Api::OpenAiChat),
            "openai-responses" => Ok(Api::OpenAiResponses),
            "anthropic" => Ok(Api::Anthropic),
            "google" | "gemini" => Ok(Api::Google),
            other => Err(format!("Unknown API tag: {other}")),
        }
    }
}

/// Routes completion calls to the adapter registered for an API tag.
pub struct ProviderRegistry {
    providers: HashMap<Api, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// A registry with all four dialects wired up.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Api::OpenAiChat, Arc::new(OpenAiChatProvider::new()));
        registry.register(Api::OpenAiResponses, Arc::new(OpenAiResponsesProvider::new()));
        registry.register(Api::Anthropic, Arc::new(AnthropicProvider::new()));
        registry.register(Api::Google, Arc::new(GoogleProvider::new()));
        registry
    }

    /// Register an adapter. Replaces any existing one for the same tag.
    pub fn register(&mut self, api: Api, provider: Arc<dyn Provider>) {
        self.providers.insert(api, provider);
    }

    pub fn get(&self, api: Api) -> Option<Arc<dyn Provider>> {
        self.providers.get(&api).cloned()
    }

    pub fn list(&self) -> Vec<Api> {
        self.providers.keys().copied().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
