//! Outbound stream events and the per-session channel that carries them from
//! the Flow Resolver to a channel adapter (or any other subscriber).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use memoh_core::model::{StreamSession, StreamSessionState};

const STREAM_CHANNEL_CAPACITY: usize = 256;

/// A named phase within a step loop (e.g. "reasoning", "acting"). Carried by
/// `Delta`/`PhaseStart`/`PhaseEnd` events so adapters can group output.
pub type Phase = String;

/// One event in the outbound stream for a single turn. Adapters see these
/// in a fixed order: one `Started`, zero or more deltas/tool/phase/reasoning
/// events, exactly one of `Final`/`Error`, then the stream is dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "delta")]
    Delta {
        delta: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        phase: Option<Phase>,
    },
    #[serde(rename = "tool_call_start")]
    ToolCallStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    #[serde(rename = "tool_call_end")]
    ToolCallEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        result: Value,
    },
    #[serde(rename = "phase_start")]
    PhaseStart { phase: Phase },
    #[serde(rename = "phase_end")]
    PhaseEnd { phase: Phase },
    #[serde(rename = "reasoning_start")]
    ReasoningStart,
    #[serde(rename = "reasoning_delta")]
    ReasoningDelta { delta: String },
    #[serde(rename = "reasoning_end")]
    ReasoningEnd,
    #[serde(rename = "attachment_delta")]
    AttachmentDelta { path: String },
    #[serde(rename = "final")]
    Final {
        #[serde(rename = "final")]
        message: String,
    },
    #[serde(rename = "error")]
    Error { error: String },
}

/// Sending half of a session's outbound stream. Owned by the Flow Resolver
/// for the life of one turn; enforces the session's state machine so an
/// adapter never sees an event out of order.
pub struct StreamPublisher {
    session: StreamSession,
    sender: mpsc::Sender<StreamEvent>,
}

impl StreamPublisher {
    pub fn new(session: StreamSession) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (sender, receiver) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        (Self { session, sender }, receiver)
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session.id
    }

    pub fn state(&self) -> StreamSessionState {
        self.session.state
    }

    fn transition(&mut self, next: StreamSessionState) -> anyhow::Result<()> {
        if !self.session.state.can_transition_to(next) {
            anyhow::bail!("illegal stream session transition: {:?} -> {:?}", self.session.state, next);
        }
        self.session.state = next;
        Ok(())
    }

    async fn publish(&self, event: StreamEvent) {
        if self.sender.send(event).await.is_err() {
            warn!(session = %self.session.id, "outbound stream receiver dropped");
        }
    }

    pub async fn started(&mut self) -> anyhow::Result<()> {
        self.transition(StreamSessionState::Started)?;
        self.publish(StreamEvent::Started).await;
        Ok(())
    }

    pub async fn delta(&mut self, delta: impl Into<String>, phase: Option<Phase>) -> anyhow::Result<()> {
        self.transition(StreamSessionState::Streaming)?;
        self.publish(StreamEvent::Delta { delta: delta.into(), phase }).await;
        Ok(())
    }

    pub async fn tool_call_start(&self, tool_call_id: impl Into<String>, tool_name: impl Into<String>, input: Value) {
        self.publish(StreamEvent::ToolCallStart { tool_call_id: tool_call_id.into(), tool_name: tool_name.into(), input }).await;
    }

    pub async fn tool_call_end(&self, tool_call_id: impl Into<String>, tool_name: impl Into<String>, result: Value) {
        self.publish(StreamEvent::ToolCallEnd { tool_call_id: tool_call_id.into(), tool_name: tool_name.into(), result }).await;
    }

    pub async fn phase_start(&self, phase: impl Into<String>) {
        self.publish(StreamEvent::PhaseStart { phase: phase.into() }).await;
    }

    pub async fn phase_end(&self, phase: impl Into<String>) {
        self.publish(StreamEvent::PhaseEnd { phase: phase.into() }).await;
    }

    pub async fn reasoning_start(&self) {
        self.publish(StreamEvent::ReasoningStart).await;
    }

    pub async fn reasoning_delta(&self, delta: impl Into<String>) {
        self.publish(StreamEvent::ReasoningDelta { delta: delta.into() }).await;
    }

    pub async fn reasoning_end(&self) {
        self.publish(StreamEvent::ReasoningEnd).await;
    }

    pub async fn attachment_delta(&self, path: impl Into<String>) {
        self.publish(StreamEvent::AttachmentDelta { path: path.into() }).await;
    }

    pub async fn finalize(&mut self, message: impl Into<String>) -> anyhow::Result<()> {
        self.transition(StreamSessionState::Finalizing)?;
        self.publish(StreamEvent::Final { message: message.into() }).await;
        self.transition(StreamSessionState::Closed)?;
        Ok(())
    }

    pub async fn error(&mut self, message: impl Into<String>) -> anyhow::Result<()> {
        self.transition(StreamSessionState::Errored)?;
        self.publish(StreamEvent::Error { error: message.into() }).await;
        Ok(())
    }
}
