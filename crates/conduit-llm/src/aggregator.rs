//! Assembles streamed fragments into one [`AggregatedResponse`].

use crate::events::{ChunkKind, EventBinding};
use crate::fragment::{Fragment, ToolCallDelta, Usage};
use crate::outcome::AggregatedResponse;
use crate::repair::repair_json;
use conduit_core::ToolCall;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Text a model emits when it writes a tool call as plain content instead of
/// using the structured tool-call channel.
pub const IN_BAND_TOOL_MARKERS: &[&str] = &["<tool_call>", "<tool_code>"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    #[error("in-band tool call marker '{marker}' found in streamed content")]
    InBandToolMarker { marker: &'static str },
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Accumulates the fragments of one attempt.
///
/// Fragments must be fed in receipt order; a new aggregator is built for
/// every attempt and consumed by [`finalize`](Self::finalize).
#[derive(Debug)]
pub struct StreamAggregator {
    stream_id: String,
    llm_id: String,
    events: Option<EventBinding>,
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u32, PendingToolCall>,
    usage: Option<Usage>,
    model_id: Option<String>,
    finish_reason: Option<String>,
    raw_fragments: Vec<Fragment>,
}

impl StreamAggregator {
    pub fn new(
        stream_id: impl Into<String>,
        llm_id: impl Into<String>,
        events: Option<EventBinding>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            llm_id: llm_id.into(),
            events,
            content: String::new(),
            reasoning: String::new(),
            tool_calls: BTreeMap::new(),
            usage: None,
            model_id: None,
            finish_reason: None,
            raw_fragments: Vec::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Every fragment consumed so far, for diagnostics.
    pub fn raw_fragments(&self) -> &[Fragment] {
        &self.raw_fragments
    }

    /// Folds one fragment into the running state.
    ///
    /// # Errors
    ///
    /// [`AggregatorError::InBandToolMarker`] once the accumulated content
    /// contains a tool marker. The content increment that completed the
    /// marker is not reported to the event sink.
    pub async fn consume(&mut self, fragment: Fragment) -> Result<(), AggregatorError> {
        trace!(stream_id = %self.stream_id, fragment = ?fragment, "Stream fragment");
        self.raw_fragments.push(fragment.clone());

        if let Some(usage) = fragment.usage {
            debug!(stream_id = %self.stream_id, ?usage, "Usage captured");
            self.usage = Some(usage);
        }

        let Some(choice) = fragment.choices.into_iter().next() else {
            return Ok(());
        };

        if self.model_id.is_none() {
            if let Some(model) = fragment.model.filter(|m| !m.is_empty()) {
                debug!(stream_id = %self.stream_id, model = %model, "Model id captured");
                self.model_id = Some(model);
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        let delta = choice.delta;

        if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
            self.reasoning.push_str(&reasoning);
            self.notify(ChunkKind::ReasoningContent, &reasoning).await;
        }

        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            self.content.push_str(&content);
            if let Some(marker) = IN_BAND_TOOL_MARKERS
                .iter()
                .copied()
                .find(|m| self.content.contains(m))
            {
                warn!(stream_id = %self.stream_id, marker, "In-band tool call marker in content");
                return Err(AggregatorError::InBandToolMarker { marker });
            }
            self.notify(ChunkKind::Content, &content).await;
        }

        for call in delta.tool_calls.unwrap_or_default() {
            self.consume_tool_call(call).await;
        }

        Ok(())
    }

    async fn consume_tool_call(&mut self, delta: ToolCallDelta) {
        let pending = self.tool_calls.entry(delta.index).or_default();
        if pending.id.is_none() {
            pending.id = delta.id.filter(|id| !id.is_empty());
        }

        let Some(function) = delta.function else {
            return;
        };
        if let Some(name) = function.name.filter(|n| !n.is_empty()) {
            pending.name.push_str(&name);
            self.notify(ChunkKind::ToolName, &name).await;
        }
        if let Some(args) = function.arguments.filter(|a| !a.is_empty()) {
            if let Some(pending) = self.tool_calls.get_mut(&delta.index) {
                pending.arguments.push_str(&args);
            }
            self.notify(ChunkKind::ToolArgs, &args).await;
        }
    }

    async fn notify(&self, kind: ChunkKind, content: &str) {
        if let Some(binding) = &self.events {
            binding
                .sink
                .chunk(&binding.context, &self.stream_id, &self.llm_id, kind, content)
                .await;
        }
    }

    /// Produces the response, repairing argument JSON where possible.
    /// Tool calls come out in ascending index order.
    pub fn finalize(self) -> AggregatedResponse {
        let stream_id = self.stream_id;
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|(index, pending)| {
                let arguments = match repair_json(&pending.arguments) {
                    Some(repaired) => repaired,
                    None => {
                        warn!(
                            stream_id = %stream_id,
                            index,
                            tool = %pending.name,
                            "Could not repair tool arguments, keeping them as streamed"
                        );
                        pending.arguments
                    }
                };
                ToolCall {
                    id: pending.id.unwrap_or_default(),
                    name: pending.name,
                    arguments,
                }
            })
            .collect();

        AggregatedResponse {
            reasoning: self.reasoning,
            content: self.content,
            tool_calls,
            model_id_used: self.model_id,
            actual_usage: self.usage,
            finish_reason: self.finish_reason,
            final_stream_id: stream_id,
        }
    }
}
