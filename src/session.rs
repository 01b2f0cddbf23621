//! Session surface: create, message, approve/reject, info.
//!
//! The manager owns the per-session locks. A turn holds its session's lock
//! from checkpoint read through final commit; a second caller arriving
//! mid-turn observes `SessionBusy` instead of interleaving. Frame streams
//! carry exactly one trailing `done`, and an `error` frame appears only when
//! the turn produced no output at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::core::errors::{Result, SwitchboardError};
use crate::events::{ChannelSink, EventStream, FrameSink, StreamFrame};
use crate::graph::{Engine, TurnInput};
use crate::state::{CustomerContext, SessionState};
use crate::transcript::TranscriptEntry;

/// Supplies a verified customer identity at session start.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a credential into a customer context; `None` means the
    /// session runs unauthenticated.
    async fn resolve(&self, credential: Option<&str>) -> Result<Option<CustomerContext>>;
}

/// Fixed-identity provider for development and tests.
#[derive(Default)]
pub struct StaticIdentityProvider {
    customer: Option<CustomerContext>,
}

impl StaticIdentityProvider {
    pub fn new(customer: CustomerContext) -> Self {
        Self {
            customer: Some(customer),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, _credential: Option<&str>) -> Result<Option<CustomerContext>> {
        Ok(self.customer.clone())
    }
}

/// Result of creating a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
    pub welcome: String,
}

/// Read-only session summary.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub turn_count: u32,
    pub is_escalated: bool,
    pub escalation_reason: Option<String>,
    pub is_suspended: bool,
    pub message_count: usize,
    pub started_at: DateTime<Utc>,
}

/// Sink wrapper that remembers whether the turn produced any output.
struct TrackingSink {
    inner: ChannelSink,
    produced: AtomicBool,
}

impl FrameSink for TrackingSink {
    fn emit(&self, frame: StreamFrame) {
        self.produced.store(true, Ordering::Relaxed);
        self.inner.emit(frame);
    }
}

/// The inbound surface over the engine.
pub struct SessionManager {
    engine: Arc<Engine>,
    identity: Arc<dyn IdentityProvider>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(engine: Arc<Engine>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            engine,
            identity,
            locks: DashMap::new(),
        }
    }

    /// Create a session, returning its id and a welcome message.
    pub async fn create_session(&self, credential: Option<&str>) -> Result<SessionCreated> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let customer = self.identity.resolve(credential).await?;

        let welcome = match &customer {
            Some(c) => format!(
                "Hello {}! I'm your support assistant. I can help you with orders, \
                 returns, warranty questions, troubleshooting, and more. How can I \
                 assist you today?",
                c.name
            ),
            None => "Hello! I'm your support assistant. I can help you with orders, \
                     products, warranty, and technical support. How can I help you \
                     today?"
                .to_string(),
        };

        let state = match customer {
            Some(c) => SessionState::with_customer(&session_id, c),
            None => SessionState::new(&session_id),
        };
        self.engine.register(state).await?;
        info!(session_id = %session_id, "Session created");

        Ok(SessionCreated {
            session_id,
            welcome,
        })
    }

    /// Send a human message, streaming the turn's frames.
    pub async fn send_message(&self, session_id: &str, text: &str) -> Result<EventStream> {
        self.start_turn(session_id, TurnInput::Message(text.to_string()))
            .await
    }

    /// Approve the pending batch of a suspended session.
    pub async fn approve(&self, session_id: &str) -> Result<EventStream> {
        self.start_turn(session_id, TurnInput::Resume { approved: true })
            .await
    }

    /// Reject the pending batch of a suspended session.
    pub async fn reject(&self, session_id: &str) -> Result<EventStream> {
        self.start_turn(session_id, TurnInput::Resume { approved: false })
            .await
    }

    async fn start_turn(&self, session_id: &str, input: TurnInput) -> Result<EventStream> {
        if !self.engine.store().contains(session_id).await? {
            return Err(SwitchboardError::session_not_found(session_id));
        }

        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock
            .try_lock_owned()
            .map_err(|_| SwitchboardError::session_busy(session_id))?;

        let (inner, stream) = ChannelSink::pair();
        let sink = TrackingSink {
            inner,
            produced: AtomicBool::new(false),
        };
        let engine = Arc::clone(&self.engine);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = engine.advance(&session_id, input, &sink).await {
                error!(
                    session_id = %session_id,
                    category = e.category(),
                    error = %e,
                    "Turn failed"
                );
                // Committed progress survives; only a turn with no output at
                // all reports the failure in-stream.
                if !sink.produced.load(Ordering::Relaxed) {
                    sink.emit(StreamFrame::Error {
                        message: e.to_string(),
                    });
                }
            }
            sink.emit(StreamFrame::Done);
        });

        Ok(stream)
    }

    /// Summarize a session from its checkpoint.
    pub async fn session_info(&self, session_id: &str) -> Result<SessionInfo> {
        let checkpoint = self
            .engine
            .store()
            .load(session_id)
            .await?
            .ok_or_else(|| SwitchboardError::session_not_found(session_id))?;
        let state = &checkpoint.state;
        let message_count = state
            .transcript
            .entries()
            .iter()
            .filter(|e| matches!(e, TranscriptEntry::Human { .. }))
            .count();
        Ok(SessionInfo {
            session_id: state.session_id.clone(),
            turn_count: state.turn_count,
            is_escalated: state.needs_escalation,
            escalation_reason: state.escalation_reason.map(|r| r.as_str().to_string()),
            is_suspended: checkpoint.position.is_suspended(),
            message_count,
            started_at: state.started_at,
        })
    }

    /// Drop a session's checkpoint and lock. An in-flight turn holds the
    /// session lock, so ending the session mid-turn reports `SessionBusy`
    /// instead of yanking the checkpoint out from under it.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let lock = self.locks.get(session_id).map(|entry| entry.clone());
        let _guard = match lock {
            Some(lock) => Some(
                lock.try_lock_owned()
                    .map_err(|_| SwitchboardError::session_busy(session_id))?,
            ),
            None => None,
        };
        self.engine.store().remove(session_id).await?;
        self.locks.remove(session_id);
        info!(session_id = %session_id, "Session ended");
        Ok(())
    }
}
