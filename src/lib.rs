// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

// Conversation engine modules
pub mod approval;
pub mod capability;
pub mod checkpoint;
pub mod classify;
pub mod escalation;
pub mod events;
pub mod graph; // routing table + scheduler
pub mod responder;
pub mod session;
pub mod state;
pub mod transcript;

// Re-exports for convenience
pub use core::config::EngineConfig;
pub use core::errors::{Result, SwitchboardError};

pub use approval::{ApprovalPayload, GateDecision, PendingAction};
pub use capability::{CapabilityCatalog, CapabilityGateway, CapabilitySpec};
pub use checkpoint::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, Position, SledCheckpointStore,
};
pub use classify::{Classifier, KeywordClassifier};
pub use events::{BufferingSink, ChannelSink, EventStream, FrameSink, StreamFrame};
pub use graph::{Engine, RoutingTable, TurnInput, TurnOutcome};
pub use responder::{Responder, ResponderReply, SystemContext};
pub use session::{IdentityProvider, SessionManager, StaticIdentityProvider};
pub use state::{
    CustomerContext, CustomerTier, EscalationReason, IntentCategory, SessionState,
};
pub use transcript::{CapabilityOutcome, CapabilityRequest, Transcript, TranscriptEntry};
