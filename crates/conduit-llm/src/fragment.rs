//! Streamed response fragments in the OpenAI `chat.completion.chunk` shape.
//!
//! Every field is optional or defaulted: providers differ in what they send
//! and a missing field is treated as absent, never as an error.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reads an explicit `null` the same way as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Token usage as reported by the provider, usually on the final fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: u64,
    /// Provider-specific detail fields (cached tokens, reasoning tokens, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            extra: Map::new(),
        }
    }
}

/// Function part of a streamed tool-call delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    /// A slice of the JSON argument text; only meaningful once concatenated.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// One incremental piece of a tool call, addressed by `index`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

impl ToolCallDelta {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.function.get_or_insert_with(FunctionDelta::default).name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.function.get_or_insert_with(FunctionDelta::default).arguments =
            Some(arguments.into());
        self
    }
}

/// The incremental payload of one choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<String>,
    /// Chain-of-thought text, for providers that stream it separately.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One choice of a fragment. Only choice 0 is aggregated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub index: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// A single streamed chunk of a completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl Fragment {
    /// A fragment carrying a single content delta.
    pub fn content(text: impl Into<String>) -> Self {
        Self::from_delta(Delta {
            content: Some(text.into()),
            ..Delta::default()
        })
    }

    /// A fragment carrying a single reasoning delta.
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::from_delta(Delta {
            reasoning_content: Some(text.into()),
            ..Delta::default()
        })
    }

    /// A fragment carrying tool-call deltas.
    pub fn tool_calls(calls: Vec<ToolCallDelta>) -> Self {
        Self::from_delta(Delta {
            tool_calls: Some(calls),
            ..Delta::default()
        })
    }

    /// A usage-only fragment with no choices, as sent at the end of a stream.
    pub fn usage_only(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    pub fn from_delta(delta: Delta) -> Self {
        Self {
            choices: vec![Choice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        if let Some(choice) = self.choices.first_mut() {
            choice.finish_reason = Some(reason.into());
        }
        self
    }
}
