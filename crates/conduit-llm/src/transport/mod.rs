pub mod openai;

use crate::fragment::Fragment;
use crate::request::CompletionRequest;
use crate::retry::FailureClass;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

pub use openai::OpenAiTransport;

/// Lazily produced fragments of one streamed completion.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, TransportError>> + Send>>;

/// Opens streamed completions against a provider.
///
/// Dropping the returned stream must abort the underlying request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_stream(&self, request: &CompletionRequest)
        -> Result<FragmentStream, TransportError>;
}

/// Provider failures, named after the error classes providers document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Rate limit error: {0}")]
    RateLimit(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    InternalServer(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Context window exceeded: {0}")]
    ContextWindowExceeded(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RateLimit(_) => "RateLimitError",
            Self::Timeout(_) => "Timeout",
            Self::Connection(_) => "APIConnectionError",
            Self::ServiceUnavailable(_) => "ServiceUnavailableError",
            Self::InternalServer(_) => "InternalServerError",
            Self::Api(_) => "APIError",
            Self::Authentication(_) => "AuthenticationError",
            Self::BadRequest(_) => "BadRequestError",
            Self::ContextWindowExceeded(_) => "ContextWindowExceededError",
            Self::Other(_) => "TransportError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::RateLimit(m)
            | Self::Timeout(m)
            | Self::Connection(m)
            | Self::ServiceUnavailable(m)
            | Self::InternalServer(m)
            | Self::Api(m)
            | Self::Authentication(m)
            | Self::BadRequest(m)
            | Self::ContextWindowExceeded(m)
            | Self::Other(m) => m,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimit(_)
            | Self::Timeout(_)
            | Self::Connection(_)
            | Self::ServiceUnavailable(_)
            | Self::InternalServer(_)
            | Self::Api(_) => FailureClass::TransientNetwork,
            Self::Authentication(_) | Self::BadRequest(_) | Self::ContextWindowExceeded(_) => {
                FailureClass::Unrecoverable
            }
            Self::Other(_) => FailureClass::Unexpected,
        }
    }
}
