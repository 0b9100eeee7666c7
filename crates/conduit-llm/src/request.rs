use crate::config::{CallConfig, RESERVED_KEYS};
use conduit_core::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Keys that steer the orchestrator and must never reach a provider.
pub const INTERNAL_KEYS: &[&str] = &[
    "max_retries",
    "wait_seconds_on_retry",
    "parent_agent_id",
    "stream_id",
    "token_counter_model",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

/// The parameter set of one attempt, serialized as the chat-completions body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub stream_options: StreamOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Provider pass-through options (temperature, max_tokens, ...).
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl CompletionRequest {
    /// Assembles a streaming request with usage reporting on.
    ///
    /// `extra` holds per-call options and wins over `config.extra`. Null
    /// values and orchestration-only keys are dropped; keys the request owns
    /// itself are ignored with a warning. `tool_choice` is only attached
    /// together with tools.
    pub fn build(
        config: &CallConfig,
        messages: Vec<Message>,
        tools: &[Value],
        tool_choice: Option<&str>,
        extra: &Map<String, Value>,
    ) -> Self {
        let mut params = Map::new();
        for (key, value) in config.extra.iter().chain(extra.iter()) {
            if value.is_null() || INTERNAL_KEYS.contains(&key.as_str()) {
                continue;
            }
            if RESERVED_KEYS.contains(&key.as_str()) {
                warn!(key = %key, "Ignoring pass-through option that would override a request field");
                continue;
            }
            params.insert(key.clone(), value.clone());
        }

        Self {
            model: config.model.clone(),
            messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            tools: tools.to_vec(),
            tool_choice: if tools.is_empty() {
                None
            } else {
                tool_choice.map(str::to_string)
            },
            params,
        }
    }

    /// Plain value tree for event reporting. Falls back to the debug form
    /// if serialization fails.
    pub fn to_event_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(format!("{self:?}")))
    }
}
