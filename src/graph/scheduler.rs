//! The graph scheduler.
//!
//! `advance` drives one turn of the conversation graph: it loads the
//! session's checkpoint, runs nodes until the routing table reaches a
//! terminal edge or the approval gate suspends, and commits a checkpoint
//! after every node. A failure between commits leaves the previous
//! checkpoint intact, so the caller can retry the turn.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::approval::{self, ApprovalPayload, GateDecision};
use crate::capability::{execute_batch, CapabilityCatalog};
use crate::checkpoint::{Checkpoint, CheckpointStore, Position};
use crate::classify::Classifier;
use crate::core::config::EngineConfig;
use crate::core::errors::{Result, SwitchboardError};
use crate::escalation;
use crate::events::{FrameSink, StreamFrame};
use crate::graph::routing::{
    RoutingTable, Target, ENTRY_NODE, NODE_APPROVE, NODE_CLASSIFY, NODE_EXECUTE, NODE_RESPOND,
};
use crate::responder::{Responder, SystemContext};
use crate::state::SessionState;
use crate::transcript::TranscriptEntry;

/// Input to one `advance` call.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    /// An inbound human message, opening a new turn
    Message(String),
    /// The decision for a suspended approval
    Resume { approved: bool },
}

/// How the turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The graph reached a terminal edge
    Completed,
    /// The approval gate suspended the graph
    Suspended(ApprovalPayload),
}

/// Drives the conversation graph for all sessions.
///
/// Holds no per-session state itself; everything session-scoped lives in the
/// checkpoint store. Callers must serialize `advance` calls per session (see
/// the session manager).
pub struct Engine {
    responder: Arc<dyn Responder>,
    catalog: Arc<CapabilityCatalog>,
    store: Arc<dyn CheckpointStore>,
    classifier: Arc<dyn Classifier>,
    routing: RoutingTable,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        responder: Arc<dyn Responder>,
        catalog: Arc<CapabilityCatalog>,
        store: Arc<dyn CheckpointStore>,
        classifier: Arc<dyn Classifier>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let routing = RoutingTable::default();
        routing.validate()?;
        Ok(Self {
            responder,
            catalog,
            store,
            classifier,
            routing,
            config,
        })
    }

    /// Replace the default routing table, e.g. with one loaded from YAML.
    pub fn with_routing(mut self, routing: RoutingTable) -> Result<Self> {
        routing.validate()?;
        self.routing = routing;
        Ok(self)
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a brand-new session with an initial checkpoint.
    pub async fn register(&self, state: SessionState) -> Result<()> {
        let checkpoint = Checkpoint::new(
            state,
            Position::Next {
                node: ENTRY_NODE.to_string(),
            },
        );
        self.store.save(&checkpoint).await
    }

    /// Drive one turn for `session_id`, emitting frames into `sink`.
    pub async fn advance(
        &self,
        session_id: &str,
        input: TurnInput,
        sink: &dyn FrameSink,
    ) -> Result<TurnOutcome> {
        let checkpoint = self
            .store
            .load(session_id)
            .await?
            .ok_or_else(|| SwitchboardError::session_not_found(session_id))?;

        let (mut state, start_node) = match (checkpoint.position, input) {
            (Position::Next { node }, TurnInput::Message(text)) => {
                let mut state = checkpoint.state;
                state.begin_turn(text);
                (state, node)
            }
            (Position::Next { .. }, TurnInput::Resume { .. }) => {
                return Err(SwitchboardError::invalid_resume(
                    session_id,
                    "session is not suspended",
                ));
            }
            (Position::Suspended { .. }, TurnInput::Message(_)) => {
                return Err(SwitchboardError::invalid_resume(
                    session_id,
                    "session is awaiting an approval decision",
                ));
            }
            (Position::Suspended { .. }, TurnInput::Resume { approved }) => {
                let mut state = checkpoint.state;
                if !approved {
                    approval::inject_rejection(&mut state)?;
                }
                // The gate already decided; routing from the gate node picks
                // the resume edge without re-running the review.
                let target = self.routing.next(NODE_APPROVE, &state)?.clone();
                match target {
                    Target::Node(node) => {
                        // The rejection edge is consumed here; without this a
                        // later high-risk batch in the same turn would loop.
                        state.approval_rejected = false;
                        self.commit(&state, &node).await?;
                        (state, node)
                    }
                    Target::Terminal => {
                        return self.finish(state, sink).await;
                    }
                }
            }
        };

        self.run_from(state, start_node, sink).await
    }

    async fn run_from(
        &self,
        mut state: SessionState,
        mut current: String,
        sink: &dyn FrameSink,
    ) -> Result<TurnOutcome> {
        let mut steps = 0u32;
        loop {
            steps += 1;
            if steps > self.config.max_loops_per_turn {
                warn!(
                    session_id = %state.session_id,
                    steps,
                    "Turn exceeded loop cap"
                );
                return Err(SwitchboardError::internal(format!(
                    "turn exceeded {} node executions",
                    self.config.max_loops_per_turn
                )));
            }

            debug!(session_id = %state.session_id, node = %current, "Running node");
            match current.as_str() {
                NODE_CLASSIFY => self.run_classify(&mut state).await?,
                NODE_RESPOND => self.run_respond(&mut state, sink).await?,
                NODE_APPROVE => {
                    if let GateDecision::Suspend(payload) = approval::review(&state) {
                        sink.emit(StreamFrame::ApprovalRequired {
                            actions: payload.clone(),
                        });
                        let checkpoint = Checkpoint::new(
                            state,
                            Position::Suspended {
                                node: NODE_APPROVE.to_string(),
                                payload: payload.clone(),
                            },
                        );
                        self.store.save(&checkpoint).await?;
                        return Ok(TurnOutcome::Suspended(payload));
                    }
                }
                NODE_EXECUTE => {
                    execute_batch(&mut state, &self.catalog, sink, &self.config).await?
                }
                other => {
                    return Err(SwitchboardError::routing(format!(
                        "unknown node '{}'",
                        other
                    )));
                }
            }

            match self.routing.next(&current, &state)?.clone() {
                Target::Terminal => return self.finish(state, sink).await,
                Target::Node(node) => {
                    self.commit(&state, &node).await?;
                    current = node;
                }
            }
        }
    }

    async fn run_classify(&self, state: &mut SessionState) -> Result<()> {
        let utterance = state
            .transcript
            .latest_human_text()
            .unwrap_or_default()
            .to_string();
        let category = self.classifier.classify(&utterance).await?;
        debug!(
            session_id = %state.session_id,
            category = ?category,
            "Classified inbound message"
        );
        state.current_category = Some(category);
        Ok(())
    }

    async fn run_respond(&self, state: &mut SessionState, sink: &dyn FrameSink) -> Result<()> {
        let was_escalated = state.needs_escalation;
        escalation::apply(state, &self.config);
        if !was_escalated && state.needs_escalation {
            if let Some(reason) = state.escalation_reason {
                sink.emit(StreamFrame::Escalation { reason });
            }
        }

        let context = SystemContext::build(state);
        let reply = self
            .responder
            .generate(&context, &state.transcript)
            .await?;

        if let Some(text) = &reply.text {
            sink.emit(StreamFrame::Token { text: text.clone() });
        }
        state.pending_requests = reply.requests.clone();
        state.transcript.push(TranscriptEntry::Responder {
            text: reply.text,
            requests: reply.requests,
        })?;
        state.note_responder_pass();
        Ok(())
    }

    async fn commit(&self, state: &SessionState, next_node: &str) -> Result<()> {
        let checkpoint = Checkpoint::new(
            state.clone(),
            Position::Next {
                node: next_node.to_string(),
            },
        );
        self.store.save(&checkpoint).await
    }

    async fn finish(&self, state: SessionState, _sink: &dyn FrameSink) -> Result<TurnOutcome> {
        info!(
            session_id = %state.session_id,
            turn = state.turn_count,
            escalated = state.needs_escalation,
            "Turn complete"
        );
        self.commit(&state, ENTRY_NODE).await?;
        Ok(TurnOutcome::Completed)
    }
}
