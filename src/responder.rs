//! Responder seam.
//!
//! The reasoning collaborator lives behind a trait; the engine hands it a
//! rendered system context plus the transcript and gets back text and/or
//! capability requests. The engine treats the reply as opaque content.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::errors::Result;
use crate::escalation;
use crate::state::SessionState;
use crate::transcript::{CapabilityRequest, Transcript};

const BASE_INSTRUCTIONS: &str = "\
You are a customer support assistant. Help customers with orders, returns, \
warranty, repairs, troubleshooting and account questions.

When calling capabilities that take path parameters, nest them inside a \
\"path\" object; query parameters go inside a \"query\" object.

Always look information up with the available capabilities instead of \
guessing, and offer to connect the customer with a specialist when you \
cannot resolve an issue.";

/// Rendered system context for one responder pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemContext {
    pub instructions: String,
}

impl SystemContext {
    /// Assemble base instructions, the customer snippet, and any active
    /// handoff briefing.
    pub fn build(state: &SessionState) -> Self {
        let mut parts = vec![BASE_INSTRUCTIONS.to_string()];

        if let Some(customer) = &state.customer {
            let mut snippet = format!(
                "\nCustomer Context:\n- Name: {}\n- Customer ID: {}\n- Tier: {:?}\n- Email: {}",
                customer.name, customer.customer_id, customer.tier, customer.email
            );
            if !customer.recent_orders.is_empty() {
                let orders: Vec<&str> = customer
                    .recent_orders
                    .iter()
                    .take(3)
                    .map(|o| o.get("id").and_then(Value::as_str).unwrap_or("Unknown"))
                    .collect();
                snippet.push_str(&format!("\n- Recent Orders: {}", orders.join(", ")));
            }
            if !customer.registered_devices.is_empty() {
                let devices: Vec<String> = customer
                    .registered_devices
                    .iter()
                    .take(3)
                    .map(|d| {
                        format!(
                            "{} (Product: {})",
                            d.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
                            d.get("productId").and_then(Value::as_str).unwrap_or("N/A")
                        )
                    })
                    .collect();
                snippet.push_str(&format!("\n- Devices: {}", devices.join(", ")));
            }
            parts.push(snippet);
        }

        if let Some(reason) = state.escalation_reason.filter(|_| state.needs_escalation) {
            parts.push(format!(
                "\nHandoff in progress: {}",
                escalation::handoff_instructions(reason)
            ));
        }

        Self {
            instructions: parts.join("\n"),
        }
    }
}

/// One responder pass: text, capability requests, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponderReply {
    pub text: Option<String>,
    pub requests: Vec<CapabilityRequest>,
}

impl ResponderReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            requests: Vec::new(),
        }
    }

    pub fn requests(requests: Vec<CapabilityRequest>) -> Self {
        Self {
            text: None,
            requests,
        }
    }
}

/// The external reasoning collaborator.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn generate(&self, context: &SystemContext, transcript: &Transcript)
        -> Result<ResponderReply>;
}
