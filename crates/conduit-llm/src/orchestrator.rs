use crate::aggregator::{AggregatorError, StreamAggregator};
use crate::config::CallConfig;
use crate::events::EventBinding;
use crate::outcome::{AggregatedResponse, CallCancelled, CallOutcome, ErrorKind, ErrorResult};
use crate::request::CompletionRequest;
use crate::retry::{backoff_delay, corrective_messages, AttemptError, FailureClass};
use crate::stats::RunStatistics;
use crate::transport::{Transport, TransportError};
use conduit_core::{Message, Role};
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Type alias for the injectable sleep function used in tests.
#[cfg(test)]
type SleepFn = Box<
    dyn Fn(Duration) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

const CANCELLED_REASON: &str = "Operation was cancelled by user request.";

/// Per-call inputs besides the conversation and the [`CallConfig`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Replaces a leading system message, or is inserted as one.
    pub system_prompt: Option<String>,
    /// Tool schemas in the provider's function-calling format.
    pub tools: Vec<Value>,
    /// Only sent together with `tools`.
    pub tool_choice: Option<String>,
    /// Stream id for the first attempt; later attempts always get a fresh one.
    pub stream_id: Option<String>,
    /// Where stream notifications go. No events are sent when unset.
    pub events: Option<EventBinding>,
    /// Run-scoped usage counters shared across calls.
    pub stats: Option<Arc<RunStatistics>>,
    /// Cancels the call at the next suspension point.
    pub cancel: Option<CancellationToken>,
    /// Per-call pass-through options; override `CallConfig::extra`.
    pub extra: Map<String, Value>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>, tool_choice: Option<String>) -> Self {
        self.tools = tools;
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn with_events(mut self, events: EventBinding) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_stats(mut self, stats: Arc<RunStatistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

enum AttemptFailure {
    Cancelled,
    Failed(AttemptError),
}

impl From<AttemptError> for AttemptFailure {
    fn from(err: AttemptError) -> Self {
        Self::Failed(err)
    }
}

impl From<TransportError> for AttemptFailure {
    fn from(err: TransportError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<AggregatorError> for AttemptFailure {
    fn from(err: AggregatorError) -> Self {
        Self::Failed(err.into())
    }
}

/// Runs `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Option<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        },
        None => Some(fut.await),
    }
}

/// Streams one LLM completion with a unified retry loop.
///
/// Every attempt gets its own stream id and a fresh [`StreamAggregator`].
/// Network-class failures are retried with backoff; application-class
/// failures (empty response, in-band tool marker) additionally append
/// corrective turns to the conversation before the next attempt.
pub struct LlmOrchestrator {
    transport: Arc<dyn Transport>,
    /// Injectable sleep function for testing (allows skipping real delays).
    #[cfg(test)]
    sleep_fn: Option<SleepFn>,
}

impl LlmOrchestrator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    async fn do_sleep(&self, delay: Duration) {
        #[cfg(test)]
        if let Some(ref f) = self.sleep_fn {
            f(delay).await;
            return;
        }
        tokio::time::sleep(delay).await;
    }

    /// Runs the call to completion.
    ///
    /// Failures are reported as [`CallOutcome::Failure`]; the only `Err` is
    /// [`CallCancelled`], returned when `options.cancel` fires.
    pub async fn execute(
        &self,
        messages: &[Message],
        config: &CallConfig,
        options: CallOptions,
    ) -> Result<CallOutcome, CallCancelled> {
        if let Err(e) = config.validate() {
            error!(error = %e, "Invalid call configuration");
            return Ok(CallOutcome::Failure(ErrorResult::new(
                ErrorKind::Unexpected,
                "ConfigError",
                format!("Unexpected error: {e}"),
                1,
            )));
        }

        let max_attempts = config.max_attempts();
        let model = config.model.as_str();
        let last_request = messages
            .last()
            .map(|m| m.content.as_text())
            .unwrap_or_default();
        let mut conversation = with_system_prompt(messages, options.system_prompt.as_deref());
        let mut last_error: Option<AttemptError> = None;
        let mut stream_id = String::new();

        for attempt in 0..max_attempts {
            stream_id = match options.stream_id.as_deref() {
                Some(id) if attempt == 0 && !id.is_empty() => id.to_string(),
                _ => Uuid::new_v4().to_string(),
            };

            let request = CompletionRequest::build(
                config,
                conversation.clone(),
                &options.tools,
                options.tool_choice.as_deref(),
                &options.extra,
            );

            if let Some(ev) = &options.events {
                ev.sink.stream_started(&ev.context, &stream_id, model).await;
                ev.sink
                    .request_params(&ev.context, &stream_id, model, request.to_event_value())
                    .await;
            }

            info!(
                attempt = attempt + 1,
                max_attempts,
                model,
                stream_id = %stream_id,
                "LLM call attempt"
            );

            let err = match self.run_attempt(&request, &stream_id, &options).await {
                Ok(response) => {
                    self.record_success(&response, &options).await;
                    if let Some(ev) = &options.events {
                        ev.sink.stream_ended(&ev.context, &stream_id).await;
                    }
                    info!(
                        attempt = attempt + 1,
                        stream_id = %stream_id,
                        tool_calls = response.tool_calls.len(),
                        "LLM call succeeded"
                    );
                    return Ok(CallOutcome::Success(response));
                }
                Err(AttemptFailure::Cancelled) => {
                    warn!(stream_id = %stream_id, attempt = attempt + 1, "LLM call cancelled");
                    self.notify_failed(&options, &stream_id, CANCELLED_REASON).await;
                    return Err(CallCancelled { stream_id });
                }
                Err(AttemptFailure::Failed(err)) => err,
            };

            let error_type = err.error_type();
            let message = err.message();

            match err.class() {
                FailureClass::Unrecoverable => {
                    error!(
                        stream_id = %stream_id,
                        attempt = attempt + 1,
                        error_type,
                        error = %message,
                        "Unrecoverable LLM error"
                    );
                    let reason = format!("Unrecoverable error: {error_type} - {message}");
                    self.notify_failed(&options, &stream_id, &reason).await;
                    return Ok(CallOutcome::Failure(ErrorResult::new(
                        ErrorKind::Unrecoverable,
                        error_type,
                        format!("{error_type}: {message}"),
                        attempt + 1,
                    )));
                }
                FailureClass::Unexpected => {
                    error!(
                        stream_id = %stream_id,
                        attempt = attempt + 1,
                        error_type,
                        error = %message,
                        "Unexpected error during LLM call"
                    );
                    let reason = format!("Unexpected error: {error_type} - {message}");
                    self.notify_failed(&options, &stream_id, &reason).await;
                    return Ok(CallOutcome::Failure(ErrorResult::new(
                        ErrorKind::Unexpected,
                        error_type,
                        format!("Unexpected error: {message}"),
                        attempt + 1,
                    )));
                }
                class @ (FailureClass::TransientNetwork | FailureClass::TransientApplication) => {
                    let is_app_error = class == FailureClass::TransientApplication;
                    warn!(
                        stream_id = %stream_id,
                        reason = %message,
                        error_type,
                        is_app_error,
                        attempt = attempt + 1,
                        max_attempts,
                        "LLM retry triggered"
                    );
                    self.record_failure(&options).await;
                    let reason = format!("Retrying due to: {error_type} - {message}");
                    self.notify_failed(&options, &stream_id, &reason).await;

                    if attempt + 1 >= max_attempts {
                        last_error = Some(err);
                        break;
                    }

                    if is_app_error {
                        conversation.extend(corrective_messages(attempt, &last_request));
                    }

                    let delay = backoff_delay(config, attempt);
                    let slept = until_cancelled(options.cancel.as_ref(), self.do_sleep(delay)).await;
                    if slept.is_none() {
                        warn!(stream_id = %stream_id, "LLM call cancelled during backoff");
                        return Err(CallCancelled { stream_id });
                    }
                    last_error = Some(err);
                }
            }
        }

        let (error_type, message) = last_error
            .as_ref()
            .map(|e| (e.error_type(), e.message()))
            .unwrap_or(("UnknownError", "no attempt was made".to_string()));
        let final_message =
            format!("LLM call failed after all retries. Last error: {error_type} - {message}");
        error!(
            max_attempts,
            stream_id = %stream_id,
            error = %final_message,
            "LLM retries exhausted"
        );
        Ok(CallOutcome::Failure(ErrorResult::new(
            ErrorKind::Exhausted,
            error_type,
            final_message,
            max_attempts,
        )))
    }

    async fn run_attempt(
        &self,
        request: &CompletionRequest,
        stream_id: &str,
        options: &CallOptions,
    ) -> Result<AggregatedResponse, AttemptFailure> {
        let cancel = options.cancel.as_ref();
        let mut stream = until_cancelled(cancel, self.transport.open_stream(request))
            .await
            .ok_or(AttemptFailure::Cancelled)??;

        let mut aggregator = StreamAggregator::new(stream_id, &request.model, options.events.clone());
        while let Some(fragment) = until_cancelled(cancel, stream.next())
            .await
            .ok_or(AttemptFailure::Cancelled)?
        {
            aggregator.consume(fragment?).await?;
        }

        let response = aggregator.finalize();
        if response.is_empty() {
            return Err(AttemptError::EmptyResponse.into());
        }
        Ok(response)
    }

    async fn record_success(&self, response: &AggregatedResponse, options: &CallOptions) {
        let (Some(stats), Some(usage)) = (&options.stats, &response.actual_usage) else {
            return;
        };
        stats.record_success(usage);
        self.broadcast_usage(options, stats).await;
    }

    async fn record_failure(&self, options: &CallOptions) {
        if let Some(stats) = &options.stats {
            stats.record_failure();
            self.broadcast_usage(options, stats).await;
        }
    }

    async fn broadcast_usage(&self, options: &CallOptions, stats: &RunStatistics) {
        if let Some(ev) = &options.events {
            ev.sink
                .send(
                    &ev.context.run_id,
                    json!({"type": "token_usage_update", "data": stats.snapshot()}),
                )
                .await;
        }
    }

    async fn notify_failed(&self, options: &CallOptions, stream_id: &str, reason: &str) {
        if let Some(ev) = &options.events {
            ev.sink.stream_failed(&ev.context, stream_id, reason).await;
        }
    }
}

fn with_system_prompt(messages: &[Message], system_prompt: Option<&str>) -> Vec<Message> {
    let mut conversation = messages.to_vec();
    if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
        if conversation.first().is_some_and(|m| m.role == Role::System) {
            conversation[0].content = prompt.into();
        } else {
            conversation.insert(0, Message::system(prompt));
        }
    }
    conversation
}
