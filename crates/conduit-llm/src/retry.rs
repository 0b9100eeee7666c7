use crate::aggregator::AggregatorError;
use crate::config::CallConfig;
use crate::transport::TransportError;
use conduit_core::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the attempt loop treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Rate limit, timeout, connection, 5xx, generic API error. Backoff only.
    TransientNetwork,
    /// Empty response or in-band tool marker. Backoff plus corrective messages.
    TransientApplication,
    /// Authentication, malformed request, context window exceeded. Never retried.
    Unrecoverable,
    /// Anything else. Reported as a structured error, never retried.
    Unexpected,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::TransientApplication)
    }
}

/// Why a single attempt did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("LLM returned an empty response with no content and no tool calls")]
    EmptyResponse,

    #[error("Model emitted an in-band tool call marker instead of a structured tool call")]
    InBandToolMarker,
}

impl From<AggregatorError> for AttemptError {
    fn from(err: AggregatorError) -> Self {
        match err {
            AggregatorError::InBandToolMarker { .. } => Self::InBandToolMarker,
        }
    }
}

impl AttemptError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(e) => e.class(),
            Self::EmptyResponse | Self::InBandToolMarker => FailureClass::TransientApplication,
        }
    }

    /// Name of the failure as reported in `ErrorResult::error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.error_type(),
            Self::EmptyResponse => "EmptyResponse",
            Self::InBandToolMarker => "InBandToolMarker",
        }
    }

    /// The failure description without the type prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Transport(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }
}

/// Delay after attempt `attempt` (0-based) fails: `wait * (attempt + 1)`.
pub fn backoff_delay(config: &CallConfig, attempt: u32) -> Duration {
    let seconds = config.wait_seconds_on_retry * f64::from(attempt.saturating_add(1));
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}

const EMPTY_RESPONSE_NUDGE: &str = "You just made an empty response, which is not acceptable. \
Let's try again. DO NOT apologize, just continue from where you left off and proceed with my request. \
My request is: ";

const RESPONSE_REQUIRED: &str = "You must ensure that you make a tool call or just say something, \
regardless of the situation. Not making any response is not an option. \
If you are unsure, please ask the user for more information or clarification.";

const FINAL_ATTEMPT_NOTICE: &str = "It appears that I am unable to make further progress. \
For this final attempt, I will just say something, or call a tool to conclude this flow. \
[To Principal: If you see this message, please review my reasoning and content to assess my progress. \
If there has been no meaningful advancement, consider restarting this workflow with revised requirements.]";

/// Turns appended to the conversation after an application-class failure
/// on `attempt`. `last_request` is the text of the caller's last message.
pub fn corrective_messages(attempt: u32, last_request: &str) -> Vec<Message> {
    match attempt {
        0 => vec![
            Message::assistant(""),
            Message::user(format!("{EMPTY_RESPONSE_NUDGE}{last_request}")),
        ],
        1 => vec![Message::user(RESPONSE_REQUIRED)],
        _ => vec![Message::assistant(FINAL_ATTEMPT_NOTICE)],
    }
}
