//! Streaming LLM calls for Conduit.
//!
//! [`LlmOrchestrator`] drives one call: it opens a stream through a
//! [`Transport`], folds fragments with a [`StreamAggregator`], and retries
//! failed or empty completions. Progress is reported to an [`EventSink`] and
//! usage is accounted in [`RunStatistics`].

pub mod aggregator;
pub mod config;
pub mod events;
pub mod fragment;
pub mod orchestrator;
pub mod outcome;
pub mod repair;
pub mod request;
pub mod retry;
pub mod stats;
pub mod tokens;
pub mod transport;

pub use aggregator::{AggregatorError, StreamAggregator};
pub use config::{CallConfig, LlmProvider, ProviderConfig};
pub use events::{
    ChannelEventSink, ChunkKind, ContextualData, EventBinding, EventContext, EventSink, LlmEvent,
    MemoryEventSink,
};
pub use fragment::{Fragment, ToolCallDelta, Usage};
pub use orchestrator::{CallOptions, LlmOrchestrator};
pub use outcome::{AggregatedResponse, CallCancelled, CallOutcome, ErrorKind, ErrorResult};
pub use request::CompletionRequest;
pub use retry::{AttemptError, FailureClass};
pub use stats::{RunStatistics, TokenUsageStats};
pub use tokens::estimate_prompt_tokens;
pub use transport::{FragmentStream, OpenAiTransport, Transport, TransportError};
