//! Outbound frame protocol.
//!
//! Every turn produces an ordered frame sequence for its caller. Sinks are
//! fire-and-forget: a consumer that walks away mid-turn must not fail the
//! turn, so `ChannelSink` drops frames silently once the receiver is gone.

use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::approval::ApprovalPayload;
use crate::state::EscalationReason;

/// One frame of the outbound turn protocol.
///
/// Ordering guarantees per turn: `tool_end` follows its `tool_start`, at most
/// one `escalation`, `done` appears exactly once and last. An `error` frame is
/// emitted only when the turn produced no responder output at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Incremental responder text
    Token { text: String },
    /// A capability invocation is starting
    ToolStart { name: String },
    /// The invocation finished, successfully or not
    ToolEnd {
        name: String,
        duration_ms: u64,
        is_error: bool,
    },
    /// The turn is suspended awaiting an out-of-band decision
    ApprovalRequired { actions: ApprovalPayload },
    /// Escalation triggered during this turn
    Escalation { reason: EscalationReason },
    /// The turn failed before producing any output
    Error { message: String },
    /// Terminal frame, always last
    Done,
}

/// Where a turn's frames go.
///
/// Implementations must be cheap and must never block the scheduler.
pub trait FrameSink: Send + Sync {
    fn emit(&self, frame: StreamFrame);
}

/// Sink that forwards frames over an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamFrame>,
}

impl ChannelSink {
    /// Create a sink/stream pair for one turn.
    pub fn pair() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventStream { rx })
    }
}

impl FrameSink for ChannelSink {
    fn emit(&self, frame: StreamFrame) {
        // The receiver may be dropped mid-turn; the turn still runs to
        // completion and commits its checkpoint.
        if self.tx.send(frame).is_err() {
            debug!("Frame receiver dropped, discarding frame");
        }
    }
}

/// Sink that collects frames in memory, for tests and replay.
#[derive(Default)]
pub struct BufferingSink {
    frames: Mutex<Vec<StreamFrame>>,
}

impl BufferingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<StreamFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

impl FrameSink for BufferingSink {
    fn emit(&self, frame: StreamFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

/// Discards everything. Used where a caller does not consume frames.
pub struct NullSink;

impl FrameSink for NullSink {
    fn emit(&self, _frame: StreamFrame) {}
}

/// Consumer side of a turn's frame sequence.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamFrame>,
}

impl EventStream {
    /// Drain all remaining frames. Completes when the sink is dropped.
    pub async fn collect_frames(mut self) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.rx.recv().await {
            frames.push(frame);
        }
        frames
    }
}

impl Stream for EventStream {
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
