use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Kind of incremental text carried by a [`LlmEvent::Chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    ReasoningContent,
    Content,
    ToolName,
    ToolArgs,
}

/// Caller-defined correlation data attached to every event of a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextualData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_task_nums: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_id: Option<String>,
}

/// Identity of the agent a call is made for. Attempts of one call share it;
/// consumers correlate retries by `run_id` + `agent_id`, not by stream id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub run_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub parent_agent_id: Option<String>,
    #[serde(default)]
    pub contextual: ContextualData,
}

impl EventContext {
    pub fn new(run_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }
}

/// Fields common to every per-stream event.
#[derive(Debug, Clone, Serialize)]
pub struct EventMeta {
    pub run_id: String,
    pub agent_id: String,
    pub parent_agent_id: Option<String>,
    pub stream_id: String,
    #[serde(flatten)]
    pub contextual: ContextualData,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    fn new(ctx: &EventContext, stream_id: &str) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            agent_id: ctx.agent_id.clone(),
            parent_agent_id: ctx.parent_agent_id.clone(),
            stream_id: stream_id.to_string(),
            contextual: ctx.contextual.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Notifications emitted while a call streams.
///
/// For one attempt, `StreamStarted` comes first and exactly one of
/// `StreamEnded` / `StreamFailed` comes last.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmEvent {
    /// An attempt opened its stream.
    StreamStarted {
        #[serde(flatten)]
        meta: EventMeta,
        llm_id: String,
    },
    /// The exact parameters sent to the transport for this attempt.
    RequestParams {
        #[serde(flatten)]
        meta: EventMeta,
        llm_id: String,
        params: Value,
    },
    /// Incremental text; carries only the new slice, never the whole buffer.
    Chunk {
        #[serde(flatten)]
        meta: EventMeta,
        llm_id: String,
        chunk_type: ChunkKind,
        content: String,
    },
    /// The attempt finished with a usable response.
    StreamEnded {
        #[serde(flatten)]
        meta: EventMeta,
    },
    /// The attempt failed or was cancelled; `reason` says which.
    StreamFailed {
        #[serde(flatten)]
        meta: EventMeta,
        reason: String,
    },
    /// Run-level message such as a `token_usage_update`.
    Broadcast {
        run_id: String,
        message: Value,
        timestamp: DateTime<Utc>,
    },
}

impl LlmEvent {
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            Self::StreamStarted { meta, .. }
            | Self::RequestParams { meta, .. }
            | Self::Chunk { meta, .. }
            | Self::StreamEnded { meta }
            | Self::StreamFailed { meta, .. } => Some(&meta.stream_id),
            Self::Broadcast { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnded { .. } | Self::StreamFailed { .. })
    }
}

/// Receiver of call progress notifications.
///
/// Implementors only provide [`emit`](Self::emit); the named notifications
/// build the event. Calls are fire-and-forget, and a sink shared between
/// concurrent calls must serialize internally.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: LlmEvent);

    async fn stream_started(&self, ctx: &EventContext, stream_id: &str, llm_id: &str) {
        self.emit(LlmEvent::StreamStarted {
            meta: EventMeta::new(ctx, stream_id),
            llm_id: llm_id.to_string(),
        })
        .await;
    }

    async fn request_params(&self, ctx: &EventContext, stream_id: &str, llm_id: &str, params: Value) {
        self.emit(LlmEvent::RequestParams {
            meta: EventMeta::new(ctx, stream_id),
            llm_id: llm_id.to_string(),
            params,
        })
        .await;
    }

    async fn chunk(
        &self,
        ctx: &EventContext,
        stream_id: &str,
        llm_id: &str,
        kind: ChunkKind,
        content: &str,
    ) {
        self.emit(LlmEvent::Chunk {
            meta: EventMeta::new(ctx, stream_id),
            llm_id: llm_id.to_string(),
            chunk_type: kind,
            content: content.to_string(),
        })
        .await;
    }

    async fn stream_ended(&self, ctx: &EventContext, stream_id: &str) {
        self.emit(LlmEvent::StreamEnded {
            meta: EventMeta::new(ctx, stream_id),
        })
        .await;
    }

    async fn stream_failed(&self, ctx: &EventContext, stream_id: &str, reason: &str) {
        self.emit(LlmEvent::StreamFailed {
            meta: EventMeta::new(ctx, stream_id),
            reason: reason.to_string(),
        })
        .await;
    }

    async fn send(&self, run_id: &str, message: Value) {
        self.emit(LlmEvent::Broadcast {
            run_id: run_id.to_string(),
            message,
            timestamp: Utc::now(),
        })
        .await;
    }
}

/// A sink together with the identity its events are reported under.
#[derive(Clone)]
pub struct EventBinding {
    pub sink: Arc<dyn EventSink>,
    pub context: EventContext,
}

impl EventBinding {
    pub fn new(sink: Arc<dyn EventSink>, context: EventContext) -> Self {
        Self { sink, context }
    }
}

impl std::fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBinding")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Forwards events into an unbounded channel, e.g. towards a WebSocket writer.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<LlmEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LlmEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: LlmEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<LlmEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LlmEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: LlmEvent) {
        self.events.lock().push(event);
    }
}
