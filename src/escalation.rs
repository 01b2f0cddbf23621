//! Escalation rule evaluator.
//!
//! A pure function over session state, run once per pass through the
//! responder node. Rules are checked in fixed precedence and the first match
//! wins; every pass re-evaluates from scratch, so no rule remembers a prior
//! near-miss. Once a reason is set, routing halts and only an explicit
//! external reset reopens automated handling.

use tracing::info;

use crate::core::config::EngineConfig;
use crate::state::{EscalationReason, SessionState};

const HANDOFF_KEYWORDS: &[&str] = &[
    "human",
    "agent",
    "representative",
    "speak to someone",
    "manager",
];

const DISPUTE_KEYWORDS: &[&str] = &[
    "charged twice",
    "double charged",
    "unauthorized charge",
    "fraud",
    "didn't authorize",
    "dispute",
    "billing error",
];

/// Evaluate the escalation rules against the current state.
///
/// Returns the matched reason without mutating the state; the respond node
/// applies it via [`SessionState::escalate`], which keeps a reason already
/// set this cycle. Evaluating twice on unchanged state yields the same
/// result.
pub fn evaluate(state: &SessionState, config: &EngineConfig) -> Option<EscalationReason> {
    if state.needs_escalation {
        return state.escalation_reason;
    }

    let latest = state
        .transcript
        .latest_human_text()
        .map(str::to_lowercase)
        .unwrap_or_default();

    if HANDOFF_KEYWORDS.iter().any(|kw| latest.contains(kw)) {
        return Some(EscalationReason::CustomerRequest);
    }

    if let Some(amount) = state.scratch_f64("refund_amount") {
        if amount > config.max_refund_amount {
            return Some(EscalationReason::HighValueRefund);
        }
    }

    if DISPUTE_KEYWORDS.iter().any(|kw| latest.contains(kw)) {
        return Some(EscalationReason::DisputedCharge);
    }

    if state.scratch_bool("order_too_old").unwrap_or(false) {
        return Some(EscalationReason::OrderTooOld);
    }

    if state.transcript.trailing_error_results() >= config.repeated_failure_threshold {
        return Some(EscalationReason::RepeatedFailure);
    }

    None
}

/// Apply the rules, recording the reason on the state when one matches.
pub fn apply(state: &mut SessionState, config: &EngineConfig) -> Option<EscalationReason> {
    let reason = evaluate(state, config)?;
    if !state.needs_escalation {
        info!(
            session_id = %state.session_id,
            reason = reason.as_str(),
            "Escalation triggered"
        );
    }
    state.escalate(reason);
    state.escalation_reason
}

/// Operator-handoff briefing for the responder when escalation triggers.
///
/// The responder receives this alongside the system context so its final
/// message explains the handoff instead of continuing the task.
pub fn handoff_instructions(reason: EscalationReason) -> &'static str {
    match reason {
        EscalationReason::HighValueRefund => {
            "This refund exceeds the self-service ceiling. Tell the customer a \
             senior support specialist must authorize and process it, and that \
             you are transferring them now."
        }
        EscalationReason::DisputedCharge | EscalationReason::BillingDispute => {
            "The customer is disputing a charge. Billing disputes require the \
             specialized team to investigate; tell the customer you are \
             connecting them with a billing specialist."
        }
        EscalationReason::OrderTooOld => {
            "The order is outside the return window. Returns and refunds for \
             orders this old require special approval; tell the customer you \
             are connecting them with a team member who can review the case."
        }
        EscalationReason::CustomerRequest => {
            "The customer asked for a human. Confirm you are connecting them \
             with a human agent right away and that the conversation context \
             will be shared."
        }
        EscalationReason::RepeatedFailure => {
            "Several consecutive lookups failed. Apologize, stop retrying, and \
             tell the customer a specialist will pick this up with full \
             context."
        }
        _ => {
            "Let the customer know you want them to get the best help possible \
             and that you are connecting them with a specialist who can assist \
             further."
        }
    }
}
