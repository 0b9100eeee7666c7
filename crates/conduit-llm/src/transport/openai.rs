use super::{FragmentStream, Transport, TransportError};
use crate::config::{LlmProvider, ProviderConfig};
use crate::fragment::Fragment;
use crate::request::CompletionRequest;
use async_trait::async_trait;
use conduit_core::{ConduitError, ConduitResult};
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{trace, warn};

/// Streaming transport for OpenAI-compatible chat completion endpoints.
///
/// Works with OpenAI, OpenRouter, Groq, and any other provider that
/// implements the chat completions API with server-sent events.
pub struct OpenAiTransport {
    config: ProviderConfig,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiTransport {
    pub fn new(config: ProviderConfig) -> ConduitResult<Self> {
        let api_key = config.resolve_api_key()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConduitError::Http(e.to_string()))?;
        Ok(Self {
            config,
            api_key,
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url().trim_end_matches('/')
        )
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
        .header("Accept", "text/event-stream");

        // OpenRouter attributes traffic by app title
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request.header("X-Title", "Conduit")
        } else {
            request
        }
    }
}

#[async_trait]
impl Transport for OpenAiTransport {
    async fn open_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, TransportError> {
        let resp = self
            .add_provider_headers(self.http.post(self.endpoint()))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(map_status(status.as_u16(), body));
        }

        let events = Box::pin(resp.bytes_stream().eventsource());
        let fragments = futures_util::stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            loop {
                let event = match events.next().await? {
                    Ok(event) => event,
                    Err(EventStreamError::Transport(e)) => {
                        return Some((Err(map_reqwest_error(e)), None));
                    }
                    Err(e) => {
                        return Some((
                            Err(TransportError::Api(format!("malformed SSE stream: {e}"))),
                            None,
                        ));
                    }
                };
                trace!(data = %event.data, "SSE event");
                match decode_event(&event.data) {
                    SseData::Done => return None,
                    SseData::Fragment(fragment) => return Some((Ok(*fragment), Some(events))),
                    SseData::Error(err) => return Some((Err(err), None)),
                    SseData::Skip => continue,
                }
            }
        });

        Ok(Box::pin(fragments))
    }
}

enum SseData {
    Done,
    Fragment(Box<Fragment>),
    Error(TransportError),
    Skip,
}

fn decode_event(data: &str) -> SseData {
    let data = data.trim();
    if data.is_empty() {
        return SseData::Skip;
    }
    if data == "[DONE]" {
        return SseData::Done;
    }

    let json: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, data, "Skipping undecodable SSE event");
            return SseData::Skip;
        }
    };

    if let Some(message) = extract_api_error_message(&json) {
        return SseData::Error(TransportError::Api(message));
    }

    match serde_json::from_value::<Fragment>(json) {
        Ok(fragment) => SseData::Fragment(Box::new(fragment)),
        Err(e) => {
            warn!(error = %e, data, "Skipping SSE event with unexpected shape");
            SseData::Skip
        }
    }
}

fn extract_api_error_message(json: &Value) -> Option<String> {
    let error = json.get("error")?;
    if error.is_null() {
        return None;
    }
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

fn context_overflow_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)context[_ ]length|context window|maximum context|context_length_exceeded|too many tokens",
            )
            .ok()
        })
        .as_ref()
}

fn is_context_overflow(body: &str) -> bool {
    context_overflow_pattern().is_some_and(|re| re.is_match(body))
}

/// Maps a non-success HTTP status to the transport error taxonomy.
fn map_status(status: u16, body: String) -> TransportError {
    let message = format!("HTTP {status}: {body}");
    match status {
        401 | 403 => TransportError::Authentication(message),
        413 => TransportError::ContextWindowExceeded(message),
        400 | 404 | 422 if is_context_overflow(&body) => {
            TransportError::ContextWindowExceeded(message)
        }
        400 | 404 | 422 => TransportError::BadRequest(message),
        429 => TransportError::RateLimit(message),
        408 | 504 => TransportError::Timeout(message),
        503 => TransportError::ServiceUnavailable(message),
        500..=599 => TransportError::InternalServer(message),
        _ => TransportError::Api(message),
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
