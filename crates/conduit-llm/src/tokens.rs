//! Approximate prompt-token counting.
//!
//! Counts are best-effort: anything that prevents counting (no model, a model
//! tiktoken does not know) yields `0` and a warning instead of an error.

use conduit_core::{ConduitError, ConduitResult, Message, Role};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Fixed overhead of every chat message (`<|start|>{role}\n ... <|end|>`).
const TOKENS_PER_MESSAGE: usize = 3;
/// Extra token when a message carries a `name`.
const TOKENS_PER_NAME: usize = 1;
/// Every reply is primed with `<|start|>assistant<|message|>`.
const REPLY_PRIMING_TOKENS: usize = 3;

/// Built encoders keyed by model name; building one parses a large BPE table.
static BPE_CACHE: OnceLock<Mutex<HashMap<String, Arc<CoreBPE>>>> = OnceLock::new();

fn bpe_for_model(model: &str) -> Result<Arc<CoreBPE>, String> {
    let cache = BPE_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(bpe) = cache.lock().get(model) {
        return Ok(bpe.clone());
    }
    let bpe = Arc::new(tiktoken_rs::get_bpe_from_model(model).map_err(|e| e.to_string())?);
    cache.lock().insert(model.to_string(), bpe.clone());
    Ok(bpe)
}

/// Strips a routing prefix such as `openai/` or `openrouter/openai/`.
fn base_model_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn count_messages(bpe: &CoreBPE, messages: &[Message]) -> usize {
    let count = |text: &str| bpe.encode_with_special_tokens(text).len();
    let body: usize = messages
        .iter()
        .map(|m| {
            let mut tokens = TOKENS_PER_MESSAGE
                + count(role_name(m.role))
                + count(&m.content.as_text());
            if let Some(name) = &m.name {
                tokens += TOKENS_PER_NAME + count(name);
            }
            tokens
        })
        .sum();
    body + REPLY_PRIMING_TOKENS
}

/// Estimates the prompt tokens for either a single `text` or a `messages` list.
///
/// `counter_model` (usually [`CallConfig::token_counter_model`](crate::CallConfig))
/// replaces `model` for counting only. `system_prompt`, when given, is counted
/// as a leading system message.
///
/// # Errors
///
/// Returns [`ConduitError::InvalidArgument`] if both `text` and `messages` are
/// supplied. Every other failure degrades to `Ok(0)`.
pub fn estimate_prompt_tokens(
    model: &str,
    text: Option<&str>,
    messages: Option<&[Message]>,
    system_prompt: Option<&str>,
    counter_model: Option<&str>,
) -> ConduitResult<usize> {
    let model_for_counting = match counter_model.filter(|m| !m.is_empty()) {
        Some(override_model) => {
            debug!(model_for_counting = override_model, "Token counting model override");
            override_model
        }
        None if model.is_empty() => {
            warn!("No model provided for token estimation, returning 0");
            return Ok(0);
        }
        None => model,
    };

    if text.is_some() && messages.is_some() {
        return Err(ConduitError::InvalidArgument(
            "provide either 'text' or 'messages' for token estimation, not both".into(),
        ));
    }

    let mut to_count: Vec<Message> = Vec::new();
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        to_count.push(Message::system(system));
    }
    if let Some(text) = text {
        to_count.push(Message::user(text));
    } else if let Some(messages) = messages {
        to_count.extend_from_slice(messages);
    }

    if to_count.is_empty() {
        return Ok(0);
    }

    match bpe_for_model(base_model_name(model_for_counting)) {
        Ok(bpe) => Ok(count_messages(&bpe, &to_count)),
        Err(error) => {
            warn!(
                model_for_counting,
                error = %error,
                "Token estimation failed, returning 0"
            );
            Ok(0)
        }
    }
}
