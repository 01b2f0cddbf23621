//! Session state threaded through every scheduler step.
//!
//! `SessionState` owns the transcript exclusively; nodes mutate it only
//! while the scheduler holds the per-session lock, and ownership passes to
//! the checkpoint store at every suspension boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transcript::{CapabilityRequest, Transcript};

/// Customer loyalty tier levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerTier {
    Standard,
    Plus,
    Premier,
}

impl Default for CustomerTier {
    fn default() -> Self {
        CustomerTier::Standard
    }
}

/// High-level intent categories produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// Order status, tracking, modifications
    Order,
    /// Returns and exchanges
    Return,
    /// Warranty and repairs
    Warranty,
    /// Technical issues
    Troubleshoot,
    /// Account management
    Account,
    /// Product questions
    Product,
    /// General inquiries
    General,
    /// Needs human agent
    Escalate,
}

/// Reasons for escalating to a human agent.
///
/// Closed set; at most one active reason per suspension cycle, first rule to
/// match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    CustomerRequest,
    HighValueRefund,
    BillingDispute,
    SafetyIssue,
    RepeatedFailure,
    PolicyException,
    AccountSecurity,
    UnresolvedIssue,
    OrderTooOld,
    DisputedCharge,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerRequest => "customer_request",
            Self::HighValueRefund => "high_value_refund",
            Self::BillingDispute => "billing_dispute",
            Self::SafetyIssue => "safety_issue",
            Self::RepeatedFailure => "repeated_failure",
            Self::PolicyException => "policy_exception",
            Self::AccountSecurity => "account_security",
            Self::UnresolvedIssue => "unresolved_issue",
            Self::OrderTooOld => "order_too_old",
            Self::DisputedCharge => "disputed_charge",
        }
    }
}

/// Verified customer identity and profile snippet, supplied at session start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerContext {
    pub customer_id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub tier: CustomerTier,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub recent_orders: Vec<Value>,
    #[serde(default)]
    pub registered_devices: Vec<Value>,
}

/// The mutable record threaded through every scheduler step for one
/// conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Opaque, globally unique session identifier
    pub session_id: String,
    /// The conversation log; exclusively owned by this state
    pub transcript: Transcript,
    /// Customer context, populated at session start
    pub customer: Option<CustomerContext>,
    /// Monotone counter, +1 per inbound human message
    pub turn_count: u32,
    /// Category assigned by the classifier for the current turn
    pub current_category: Option<IntentCategory>,
    /// Set once escalation triggers; cleared only by explicit reset
    pub needs_escalation: bool,
    pub escalation_reason: Option<EscalationReason>,
    /// Last-known capability outputs keyed by arbitrary string, read by the
    /// escalation rules (e.g. `refund_amount`, `order_too_old`)
    #[serde(default)]
    pub scratch: HashMap<String, Value>,
    pub is_authenticated: bool,
    /// True when the most recent approval decision declined the batch
    pub approval_rejected: bool,
    /// Capability requests awaiting approval/execution in this cycle
    #[serde(default)]
    pub pending_requests: Vec<CapabilityRequest>,
    /// True between an inbound human message and the first responder pass of
    /// that turn; consuming it is what increments `turn_count`, so internal
    /// loops and approval resumes never double-count
    #[serde(default)]
    pub turn_pending: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            transcript: Transcript::new(),
            customer: None,
            turn_count: 0,
            current_category: None,
            needs_escalation: false,
            escalation_reason: None,
            scratch: HashMap::new(),
            is_authenticated: false,
            approval_rejected: false,
            pending_requests: Vec::new(),
            turn_pending: false,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn with_customer(session_id: impl Into<String>, customer: CustomerContext) -> Self {
        let mut state = Self::new(session_id);
        state.is_authenticated = true;
        state.customer = Some(customer);
        state
    }

    /// Ingest an inbound human message, opening a new turn.
    pub fn begin_turn(&mut self, text: impl Into<String>) {
        self.transcript.push_human(text);
        self.turn_pending = true;
        self.approval_rejected = false;
    }

    /// Consume the pending-turn marker, incrementing the counter exactly
    /// once per inbound message.
    pub fn note_responder_pass(&mut self) {
        if self.turn_pending {
            self.turn_count += 1;
            self.turn_pending = false;
        }
    }

    /// Record an escalation reason; a reason already set this cycle wins.
    pub fn escalate(&mut self, reason: EscalationReason) {
        if !self.needs_escalation {
            self.needs_escalation = true;
            self.escalation_reason = Some(reason);
        }
    }

    /// Explicit external reset, e.g. after human takeover resolves the issue.
    pub fn clear_escalation(&mut self) {
        self.needs_escalation = false;
        self.escalation_reason = None;
    }

    /// Numeric scratch lookup helper for the escalation rules.
    pub fn scratch_f64(&self, key: &str) -> Option<f64> {
        self.scratch.get(key).and_then(Value::as_f64)
    }

    pub fn scratch_bool(&self, key: &str) -> Option<bool> {
        self.scratch.get(key).and_then(Value::as_bool)
    }
}
