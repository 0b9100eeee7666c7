use crate::fragment::Usage;
use conduit_core::ToolCall;
use serde::{Deserialize, Serialize};

/// Everything one successful attempt produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub reasoning: String,
    pub content: String,
    /// Ordered by the provider's tool-call index.
    pub tool_calls: Vec<ToolCall>,
    /// Model reported by the stream, which may differ from the requested alias.
    pub model_id_used: Option<String>,
    /// Usage from the last fragment that carried any.
    pub actual_usage: Option<Usage>,
    pub finish_reason: Option<String>,
    /// Stream id of the attempt that produced this response.
    pub final_stream_id: String,
}

impl AggregatedResponse {
    /// A response with no text and no tool calls, which the orchestrator
    /// treats as a transient failure rather than a success.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// How a call ended up failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A failure retrying cannot fix (authentication, bad request, context overflow).
    Unrecoverable,
    /// Every attempt failed with a retryable error.
    Exhausted,
    /// A failure outside the known classes.
    Unexpected,
}

/// Structured failure, shaped like [`AggregatedResponse`] with its data
/// fields empty so both outcomes can be handled as one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    /// Human-readable description naming the failure and attempt.
    pub error: String,
    /// Name of the underlying failure, e.g. `RateLimitError`.
    pub error_type: String,
    pub kind: ErrorKind,
    /// 1-based number of the attempt the final failure happened on.
    pub attempt: u32,
    pub reasoning: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub model_id_used: Option<String>,
    pub actual_usage: Option<Usage>,
}

impl ErrorResult {
    pub fn new(
        kind: ErrorKind,
        error_type: impl Into<String>,
        error: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            error: error.into(),
            error_type: error_type.into(),
            kind,
            attempt,
            reasoning: None,
            content: None,
            tool_calls: Vec::new(),
            model_id_used: None,
            actual_usage: None,
        }
    }
}

/// Result of [`LlmOrchestrator::execute`](crate::LlmOrchestrator::execute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallOutcome {
    /// The call gave up; see [`ErrorResult::kind`].
    Failure(ErrorResult),
    /// A non-empty response from the last attempt.
    Success(AggregatedResponse),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(&self) -> Option<&AggregatedResponse> {
        match self {
            Self::Success(response) => Some(response),
            Self::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ErrorResult> {
        match self {
            Self::Failure(error) => Some(error),
            Self::Success(_) => None,
        }
    }

    pub fn into_result(self) -> Result<AggregatedResponse, ErrorResult> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Failure(error) => Err(error),
        }
    }
}

/// The call was cancelled by its caller. Never converted into an
/// [`ErrorResult`]: cancellation must unwind to whoever requested it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("LLM call cancelled during stream {stream_id}")]
pub struct CallCancelled {
    /// The attempt in flight (or last finished) when cancellation hit.
    pub stream_id: String,
}
