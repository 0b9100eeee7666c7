#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests for the call orchestrator over a scripted transport.

use async_trait::async_trait;
use conduit_core::{Message, Role};
use conduit_llm::{
    CallConfig, CallOptions, CompletionRequest, ErrorKind, EventBinding, EventContext, Fragment,
    FragmentStream, LlmEvent, LlmOrchestrator, MemoryEventSink, RunStatistics, ToolCallDelta,
    Transport, TransportError, Usage,
};
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

type Attempt = Result<Vec<Result<Fragment, TransportError>>, TransportError>;

/// Replays one scripted result per `open_stream` call and keeps every request.
struct ScriptedTransport {
    attempts: tokio::sync::Mutex<VecDeque<Attempt>>,
    requests: tokio::sync::Mutex<Vec<CompletionRequest>>,
    call_count: AtomicU32,
}

impl ScriptedTransport {
    fn new(attempts: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            attempts: tokio::sync::Mutex::new(attempts.into()),
            requests: tokio::sync::Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        })
    }

    /// The same stream for every call, however many there are.
    fn repeating(fragments: Vec<Fragment>, times: usize) -> Arc<Self> {
        Self::new(
            (0..times)
                .map(|_| Ok(fragments.iter().cloned().map(Ok).collect()))
                .collect(),
        )
    }

    fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<FragmentStream, TransportError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());
        let next = self
            .attempts
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("no scripted attempt left".into())));
        let fragments = next?;
        Ok(Box::pin(tokio_stream::iter(fragments)))
    }
}

fn config(max_retries: u32) -> CallConfig {
    CallConfig::new("m")
        .unwrap()
        .with_max_retries(max_retries)
        .with_wait_seconds(0.0)
}

fn events() -> (Arc<MemoryEventSink>, EventBinding) {
    let sink = Arc::new(MemoryEventSink::new());
    let binding = EventBinding::new(sink.clone(), EventContext::new("run-1", "agent-1"));
    (sink, binding)
}

// --- Scenarios ---

#[tokio::test]
async fn test_plain_content_response() {
    let transport = ScriptedTransport::new(vec![Ok(vec![Ok(Fragment::content("hello"))])]);
    let orchestrator = LlmOrchestrator::new(transport.clone());
    let stats = Arc::new(RunStatistics::new());

    let outcome = orchestrator
        .execute(
            &[Message::user("hi")],
            &config(0),
            CallOptions::new().with_stats(stats.clone()),
        )
        .await
        .unwrap();

    let response = outcome.into_result().unwrap();
    assert_eq!(response.content, "hello");
    assert!(response.tool_calls.is_empty());
    assert_eq!(stats.snapshot().total_successful_calls, 0);
    assert_eq!(stats.snapshot().total_prompt_tokens, 0);
}

#[tokio::test]
async fn test_in_band_marker_is_retried() {
    let transport = ScriptedTransport::new(vec![
        Ok(vec![Ok(Fragment::content("<tool_call>{\"name\":\"ls\"}"))]),
        Ok(vec![Ok(Fragment::tool_calls(vec![ToolCallDelta::new(0)
            .with_id("call_1")
            .with_name("ls")
            .with_arguments("{}")]))]),
    ]);
    let orchestrator = LlmOrchestrator::new(transport.clone());
    let (sink, binding) = events();

    let outcome = orchestrator
        .execute(
            &[Message::user("list files")],
            &config(1),
            CallOptions::new().with_events(binding),
        )
        .await
        .unwrap();

    let response = outcome.success().unwrap();
    assert!(!response.content.contains("<tool_call>"));
    assert_eq!(response.tool_calls[0].name, "ls");
    assert_eq!(transport.calls(), 2);

    let reasons: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            LlmEvent::StreamFailed { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("Retrying due to: InBandToolMarker"));
}

#[tokio::test]
async fn test_split_tool_arguments_are_joined() {
    let transport = ScriptedTransport::new(vec![Ok(vec![
        Ok(Fragment::tool_calls(vec![ToolCallDelta::new(0)
            .with_id("call_a")
            .with_name("set")
            .with_arguments(r#"{"a":"#)])),
        Ok(Fragment::tool_calls(vec![
            ToolCallDelta::new(0).with_arguments("1}"),
        ])),
    ])]);
    let orchestrator = LlmOrchestrator::new(transport);

    let outcome = orchestrator
        .execute(&[Message::user("set a")], &config(0), CallOptions::new())
        .await
        .unwrap();

    let call = &outcome.success().unwrap().tool_calls[0];
    assert_eq!(call.parsed_arguments().unwrap(), json!({"a": 1}));
}

// --- Retry properties ---

#[tokio::test]
async fn test_empty_response_adds_two_turns_then_succeeds() {
    let transport = ScriptedTransport::new(vec![
        Ok(vec![Ok(Fragment::content("   "))]),
        Ok(vec![Ok(Fragment::content("done"))]),
    ]);
    let orchestrator = LlmOrchestrator::new(transport.clone());
    let original = vec![Message::system("sys"), Message::user("summarize")];

    let outcome = orchestrator
        .execute(&original, &config(2), CallOptions::new())
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(transport.calls(), 2);
    let requests = transport.requests().await;
    assert_eq!(requests[1].messages.len(), original.len() + 2);
    assert_eq!(requests[1].messages[2].role, Role::Assistant);
    assert_eq!(requests[1].messages[3].role, Role::User);
}

#[tokio::test]
async fn test_auth_failure_never_retries() {
    let transport = ScriptedTransport::new(vec![Err(TransportError::Authentication(
        "HTTP 401: invalid api key".into(),
    ))]);
    let orchestrator = LlmOrchestrator::new(transport.clone());
    let (sink, binding) = events();

    let outcome = orchestrator
        .execute(
            &[Message::user("hi")],
            &config(5),
            CallOptions::new().with_events(binding),
        )
        .await
        .unwrap();

    assert_eq!(transport.calls(), 1);
    let err = outcome.failure().unwrap();
    assert_eq!(err.kind, ErrorKind::Unrecoverable);
    assert_eq!(err.error_type, "AuthenticationError");
    let events = sink.events();
    assert!(!events.iter().any(|e| matches!(e, LlmEvent::StreamEnded { .. })));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, LlmEvent::StreamFailed { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_transient_failures_exhaust_budget() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Timeout("first".into())),
        Err(TransportError::ServiceUnavailable("second".into())),
        Err(TransportError::RateLimit("third".into())),
    ]);
    let orchestrator = LlmOrchestrator::new(transport.clone());
    let stats = Arc::new(RunStatistics::new());

    let outcome = orchestrator
        .execute(
            &[Message::user("hi")],
            &config(2),
            CallOptions::new().with_stats(stats.clone()),
        )
        .await
        .unwrap();

    assert_eq!(transport.calls(), 3);
    let err = outcome.failure().unwrap();
    assert_eq!(err.kind, ErrorKind::Exhausted);
    assert_eq!(err.attempt, 3);
    assert_eq!(err.error_type, "RateLimitError");
    assert_eq!(
        err.error,
        "LLM call failed after all retries. Last error: RateLimitError - third"
    );
    assert_eq!(stats.snapshot().total_failed_calls, 3);
    // Network failures never touch the conversation.
    assert!(transport
        .requests()
        .await
        .iter()
        .all(|r| r.messages.len() == 1));
}

#[tokio::test]
async fn test_each_attempt_has_its_own_stream_id() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Connection("reset".into())),
        Ok(vec![]),
        Ok(vec![Ok(Fragment::content("ok"))]),
    ]);
    let orchestrator = LlmOrchestrator::new(transport);
    let (sink, binding) = events();

    let outcome = orchestrator
        .execute(
            &[Message::user("hi")],
            &config(2),
            CallOptions::new()
                .with_stream_id("pre-supplied")
                .with_events(binding),
        )
        .await
        .unwrap();

    let started: Vec<String> = sink
        .events()
        .iter()
        .filter(|e| matches!(e, LlmEvent::StreamStarted { .. }))
        .filter_map(|e| e.stream_id().map(str::to_string))
        .collect();
    assert_eq!(started.len(), 3);
    assert_eq!(started[0], "pre-supplied");
    assert_eq!(started.iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(outcome.success().unwrap().final_stream_id, started[2]);
}

// --- Requests & events ---

#[tokio::test]
async fn test_orchestration_keys_never_reach_transport() {
    let transport = ScriptedTransport::new(vec![Ok(vec![Ok(Fragment::content("ok"))])]);
    let orchestrator = LlmOrchestrator::new(transport.clone());
    let cfg = config(0).with_option("temperature", json!(0.1));
    let (sink, binding) = events();

    orchestrator
        .execute(
            &[Message::user("hi")],
            &cfg,
            CallOptions::new()
                .with_events(binding)
                .with_tools(
                    vec![json!({"type": "function", "function": {"name": "ls"}})],
                    Some("auto".into()),
                )
                .with_option("parent_agent_id", json!("principal"))
                .with_option("stream_id", json!("sneaky"))
                .with_option("max_retries", json!(10))
                .with_option("wait_seconds_on_retry", json!(9)),
        )
        .await
        .unwrap();

    let request = transport.requests().await.remove(0);
    let body = request.to_event_value();
    for key in ["parent_agent_id", "stream_id", "max_retries", "wait_seconds_on_retry"] {
        assert!(body.get(key).is_none(), "{key} reached the transport");
    }
    assert_eq!(body["temperature"], 0.1);
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["stream_options"]["include_usage"], true);

    let params = sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            LlmEvent::RequestParams { params, .. } => Some(params),
            _ => None,
        })
        .unwrap();
    assert_eq!(params, body);
}

#[tokio::test]
async fn test_event_order_for_one_attempt() {
    let transport = ScriptedTransport::new(vec![Ok(vec![
        Ok(Fragment::reasoning("hmm")),
        Ok(Fragment::content("answer")),
        Ok(Fragment::usage_only(Usage::new(12, 3))),
    ])]);
    let orchestrator = LlmOrchestrator::new(transport);
    let (sink, binding) = events();
    let stats = Arc::new(RunStatistics::new());

    orchestrator
        .execute(
            &[Message::user("q")],
            &config(0),
            CallOptions::new().with_events(binding).with_stats(stats),
        )
        .await
        .unwrap();

    let kinds: Vec<&'static str> = sink
        .events()
        .iter()
        .map(|e| match e {
            LlmEvent::StreamStarted { .. } => "started",
            LlmEvent::RequestParams { .. } => "params",
            LlmEvent::Chunk { .. } => "chunk",
            LlmEvent::Broadcast { .. } => "broadcast",
            LlmEvent::StreamEnded { .. } => "ended",
            LlmEvent::StreamFailed { .. } => "failed",
        })
        .collect();
    assert_eq!(
        kinds,
        ["started", "params", "chunk", "chunk", "broadcast", "ended"]
    );
}

// --- Concurrency ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_statistics() {
    let transport = ScriptedTransport::repeating(
        vec![
            Fragment::content("ok"),
            Fragment::usage_only(Usage::new(100, 10)),
        ],
        32,
    );
    let orchestrator = Arc::new(LlmOrchestrator::new(transport));
    let stats = Arc::new(RunStatistics::new());
    let (sink, _) = events();

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            let stats = stats.clone();
            let binding = EventBinding::new(
                sink.clone(),
                EventContext::new("run-1", format!("agent-{i}")),
            );
            tokio::spawn(async move {
                orchestrator
                    .execute(
                        &[Message::user("hi")],
                        &config(0),
                        CallOptions::new().with_stats(stats).with_events(binding),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_success());
    }

    let snap = stats.snapshot();
    assert_eq!(snap.total_successful_calls, 32);
    assert_eq!(snap.total_prompt_tokens, 3200);
    assert_eq!(snap.total_completion_tokens, 320);
    assert_eq!(snap.max_context_window, 110);
    assert_eq!(
        sink.events()
            .iter()
            .filter(|e| matches!(e, LlmEvent::StreamEnded { .. }))
            .count(),
        32
    );
}
