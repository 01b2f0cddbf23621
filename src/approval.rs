//! Approval gate for high-risk capability requests.
//!
//! State-changing capabilities must not execute without an out-of-band human
//! decision. The gate classifies each pending request against a static set,
//! builds a deterministic human-readable description per request (resolving
//! referenced entities from earlier transcript results), and suspends the
//! graph until the decision arrives. A rejected request is never executed;
//! an approved batch executes in full.

use std::collections::HashSet;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::core::errors::Result;
use crate::state::SessionState;
use crate::transcript::{CapabilityOutcome, CapabilityRequest, Transcript, TranscriptEntry};

lazy_static! {
    /// Capabilities that modify state and require human approval.
    pub static ref HIGH_RISK_CAPABILITIES: HashSet<&'static str> = {
        let mut set = HashSet::new();
        set.insert("order-management_cancelOrder");
        set.insert("order-management_createReturn");
        set.insert("product-support_scheduleRepair");
        set
    };
}

/// Payload fixed into the synthetic result when the user declines a batch.
pub const REJECTION_MESSAGE: &str = "Action was rejected by the customer. Do not retry this \
     action. Acknowledge the rejection and ask how else you can help.";

/// One pending high-risk action presented to the approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub request_id: String,
    pub capability: String,
    /// Display title, e.g. `Cancel Order`
    pub title: String,
    /// Human-readable description lines; empty when nothing could be resolved
    pub description: Vec<String>,
}

/// What the gate exposes while the graph is suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub actions: Vec<PendingAction>,
}

/// Outcome of reviewing the pending batch.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// No high-risk request present; execute unchanged
    PassThrough,
    /// Suspend awaiting an external decision
    Suspend(ApprovalPayload),
}

/// Review the pending requests on the state.
pub fn review(state: &SessionState) -> GateDecision {
    let high_risk: Vec<&CapabilityRequest> = state
        .pending_requests
        .iter()
        .filter(|r| HIGH_RISK_CAPABILITIES.contains(r.name.as_str()))
        .collect();

    if high_risk.is_empty() {
        return GateDecision::PassThrough;
    }

    let actions = high_risk
        .iter()
        .map(|request| PendingAction {
            request_id: request.id.clone(),
            capability: request.name.clone(),
            title: format_title(&request.name),
            description: describe(request, &state.transcript),
        })
        .collect();

    info!(
        session_id = %state.session_id,
        count = state.pending_requests.len(),
        "Approval required, suspending graph"
    );

    GateDecision::Suspend(ApprovalPayload { actions })
}

/// Inject one synthetic rejection result per pending request of the batch
/// and mark the state rejected, so routing returns to the responder.
pub fn inject_rejection(state: &mut SessionState) -> Result<()> {
    let pending = std::mem::take(&mut state.pending_requests);
    for request in &pending {
        state
            .transcript
            .push(TranscriptEntry::CapabilityResult(CapabilityOutcome {
                request_id: request.id.clone(),
                payload: json!({ "status": "rejected", "message": REJECTION_MESSAGE }),
                is_error: false,
            }))?;
    }
    state.approval_rejected = true;
    info!(
        session_id = %state.session_id,
        rejected = pending.len(),
        "Batch rejected by user"
    );
    Ok(())
}

/// `order-management_cancelOrder` → `Cancel Order`
pub fn format_title(name: &str) -> String {
    let action = name.rsplit('_').next().unwrap_or(name);
    let mut out = String::new();
    for (i, c) in action.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_uppercase());
        } else {
            if c.is_uppercase() {
                out.push(' ');
            }
            out.push(c);
        }
    }
    out
}

/// Display name without the service prefix: `shipping_trackShipment` → `trackShipment`
pub fn display_name(name: &str) -> &str {
    name.split_once('_').map(|(_, rest)| rest).unwrap_or(name)
}

fn format_money(amount: f64, currency: &str) -> String {
    // Round to total cents first so fractions like .995 carry into the
    // whole part instead of printing a third cent digit.
    let total_cents = (amount * 100.0).round() as i64;
    let sign = if total_cents < 0 { "-" } else { "" };
    let whole = total_cents.abs() / 100;
    let cents = total_cents.abs() % 100;
    let mut grouped = String::new();
    let digits = whole.to_string();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if currency == "USD" {
        format!("{}${}.{:02}", sign, grouped, cents)
    } else {
        format!("{}{}.{:02} {}", sign, grouped, cents, currency)
    }
}

/// Path/query/body argument envelopes are flattened before description.
fn flatten_arguments(arguments: &Value) -> Map<String, Value> {
    let mut flat = Map::new();
    if let Some(obj) = arguments.as_object() {
        for key in ["path", "query", "body"] {
            if let Some(Value::Object(inner)) = obj.get(key) {
                flat.extend(inner.clone());
            }
        }
        for (k, v) in obj {
            if !matches!(k.as_str(), "path" | "query" | "body") {
                flat.insert(k.clone(), v.clone());
            }
        }
    }
    flat
}

/// Resolve an order object from earlier transcript results by id.
fn find_order(order_id: &str, transcript: &Transcript) -> Option<Value> {
    let payload = transcript.find_result_containing(order_id)?;
    if let Some(obj) = payload.as_object() {
        let matches_id = |o: &Map<String, Value>| {
            o.get("id").and_then(Value::as_str) == Some(order_id)
                || o.get("orderNumber").and_then(Value::as_str) == Some(order_id)
        };
        if matches_id(obj) {
            return Some(payload.clone());
        }
        // List endpoints nest orders inside {"orders": [...]}.
        if let Some(orders) = obj.get("orders").and_then(Value::as_array) {
            for order in orders {
                if order.as_object().map(&matches_id).unwrap_or(false) {
                    return Some(order.clone());
                }
            }
        }
    }
    None
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn humanize(raw: &str) -> String {
    raw.replace('_', " ")
}

fn describe_create_return(args: &Map<String, Value>, transcript: &Transcript) -> Vec<String> {
    let order_id = str_arg(args, "orderId").unwrap_or("Unknown");
    let refund_method = humanize(str_arg(args, "refundMethod").unwrap_or("original_payment"));
    let order = find_order(order_id, transcript);

    let mut order_items: Map<String, Value> = Map::new();
    if let Some(items) = order
        .as_ref()
        .and_then(|o| o.get("items"))
        .and_then(Value::as_array)
    {
        for item in items {
            if let Some(id) = item.get("id").and_then(Value::as_str) {
                order_items.insert(id.to_string(), item.clone());
            }
        }
    }

    let mut lines = Vec::new();
    let mut total_refund = 0.0;
    let mut currency = "USD".to_string();

    let requested = args
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for item in &requested {
        let item_id = item.get("itemId").and_then(Value::as_str).unwrap_or("");
        let qty = item.get("quantity").and_then(Value::as_u64).unwrap_or(1);
        let reason = humanize(item.get("reason").and_then(Value::as_str).unwrap_or(""));

        let resolved = order_items.get(item_id);
        let name = resolved
            .and_then(|o| o.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(item_id);
        let unit_price = resolved.and_then(|o| o.get("unitPrice"));
        let price = unit_price
            .and_then(|p| p.get("amount"))
            .and_then(Value::as_f64);
        if let Some(c) = unit_price
            .and_then(|p| p.get("currency"))
            .and_then(Value::as_str)
        {
            currency = c.to_string();
        }

        let mut line = name.to_string();
        if qty > 1 {
            line.push_str(&format!(" (×{})", qty));
        }
        if let Some(price) = price {
            let item_total = price * qty as f64;
            total_refund += item_total;
            line.push_str(&format!(" — {}", format_money(item_total, &currency)));
        }
        lines.push(line);
        if !reason.is_empty() {
            lines.push(format!("Reason: {}", reason));
        }
    }

    // Payment description resolved from the order when possible.
    let mut payment_desc = refund_method;
    if let Some(payment) = order.as_ref().and_then(|o| o.get("payment")) {
        let brand = payment.get("brand").and_then(Value::as_str).unwrap_or("");
        let last4 = payment.get("last4").and_then(Value::as_str).unwrap_or("");
        if !brand.is_empty() && !last4.is_empty() {
            payment_desc = format!("{} ending in {}", brand, last4);
        } else if !brand.is_empty() {
            payment_desc = brand.to_string();
        }
    }

    if total_refund > 0.0 {
        lines.push(format!(
            "Refund of {} to {}",
            format_money(total_refund, &currency),
            payment_desc
        ));
    } else {
        lines.push(format!("Refund to {}", payment_desc));
    }
    lines
}

fn describe_cancel_order(args: &Map<String, Value>, transcript: &Transcript) -> Vec<String> {
    let order_id = str_arg(args, "orderId").unwrap_or("Unknown");
    let reason = humanize(str_arg(args, "reason").unwrap_or(""));

    let mut lines = Vec::new();
    if !reason.is_empty() {
        lines.push(format!("Reason: {}", reason));
    }

    if let Some(order) = find_order(order_id, transcript) {
        if let Some(total) = order.get("pricing").and_then(|p| p.get("total")) {
            if let Some(amount) = total.get("amount").and_then(Value::as_f64) {
                let currency = total
                    .get("currency")
                    .and_then(Value::as_str)
                    .unwrap_or("USD");
                lines.push(format!("Order total: {}", format_money(amount, currency)));
            }
        }
        if let Some(items) = order.get("items").and_then(Value::as_array) {
            if !items.is_empty() {
                let names: Vec<&str> = items
                    .iter()
                    .take(3)
                    .map(|it| it.get("name").and_then(Value::as_str).unwrap_or("item"))
                    .collect();
                let mut summary = names.join(", ");
                if items.len() > 3 {
                    summary.push_str(&format!(", and {} more", items.len() - 3));
                }
                lines.push(summary);
            }
        }
    }
    lines
}

fn describe_schedule_repair(args: &Map<String, Value>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(device) = str_arg(args, "deviceId").or_else(|| str_arg(args, "serialNumber")) {
        lines.push(format!("Device: {}", device));
    }
    if let Some(issue) = str_arg(args, "issueType") {
        lines.push(format!("Issue: {}", humanize(issue)));
    }
    if let Some(location) = str_arg(args, "location").or_else(|| str_arg(args, "storeId")) {
        lines.push(format!("Location: {}", location));
    }
    if let Some(date) = str_arg(args, "date") {
        lines.push(format!("Date: {}", date));
    }
    lines
}

/// Build description lines for a high-risk request. Unknown capabilities
/// fall back to their raw arguments.
pub fn describe(request: &CapabilityRequest, transcript: &Transcript) -> Vec<String> {
    let args = flatten_arguments(&request.arguments);
    match request.name.as_str() {
        "order-management_createReturn" => describe_create_return(&args, transcript),
        "order-management_cancelOrder" => describe_cancel_order(&args, transcript),
        "product-support_scheduleRepair" => describe_schedule_repair(&args),
        _ => args
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect(),
    }
}
