//! Capability catalog and batch executor.
//!
//! Capabilities live behind a gateway trait; the engine never knows the
//! transport. The catalog caches the discovered specs once per process and
//! filters them to the essential allow-list so responders see a bounded
//! surface. The executor turns an approved batch into transcript results,
//! absorbing every per-invocation failure into an error-tagged result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::approval::display_name;
use crate::core::config::EngineConfig;
use crate::core::errors::Result;
use crate::events::{FrameSink, StreamFrame};
use crate::state::{IntentCategory, SessionState};
use crate::transcript::{CapabilityOutcome, TranscriptEntry};

lazy_static! {
    /// Allow-list of capabilities exposed to the responder.
    ///
    /// The full gateway surface is much larger; responders only ever see
    /// this bounded set.
    pub static ref ESSENTIAL_CAPABILITIES: HashSet<&'static str> = {
        let names = [
            // Order management
            "order-management_getOrder",
            "order-management_listOrders",
            "order-management_lookupOrder",
            "order-management_getOrderTracking",
            "order-management_checkReturnEligibility",
            "order-management_createReturn",
            "order-management_getReturn",
            "order-management_cancelOrder",
            // Shipping
            "shipping_getShipment",
            "shipping_trackShipment",
            "shipping_listShipments",
            // Product support
            "product-support_checkWarranty",
            "product-support_getArticle",
            "product-support_searchArticles",
            "product-support_listFAQs",
            "product-support_runDiagnostics",
            "product-support_scheduleRepair",
            // Customer accounts
            "customer-accounts_getProfile",
            "customer-accounts_listDevices",
            "customer-accounts_listAddresses",
            // Product catalog
            "product-catalog_getProduct",
            "product-catalog_listProducts",
        ];
        names.iter().copied().collect()
    };
}

/// Service prefixes relevant to an intent category. Categories without a
/// mapping see the whole catalog.
pub fn category_prefixes(category: IntentCategory) -> &'static [&'static str] {
    match category {
        IntentCategory::Order | IntentCategory::Return => &["order-management", "shipping"],
        IntentCategory::Warranty => &["product-support"],
        IntentCategory::Troubleshoot => &["product-support", "product-catalog"],
        IntentCategory::Account => &["customer-accounts"],
        IntentCategory::Product => &["product-catalog", "online-store"],
        IntentCategory::General | IntentCategory::Escalate => &[],
    }
}

/// A discovered capability: name, human description, declared input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the arguments; `null` when the service declares none
    #[serde(default)]
    pub input_schema: Value,
}

/// Transport seam to the capability services.
#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    /// Invoke one capability. A returned `Err` is a transport failure; the
    /// executor converts it into an error-tagged result.
    async fn invoke(&self, name: &str, arguments: &Value) -> anyhow::Result<Value>;

    /// Discover the full capability surface.
    async fn list_capabilities(&self) -> anyhow::Result<Vec<CapabilitySpec>>;
}

/// Cached view of the gateway's capability surface.
///
/// Discovery runs at most once per catalog; concurrent first callers share
/// the same in-flight discovery. A discovery failure is cached as an empty
/// surface rather than retried per call.
pub struct CapabilityCatalog {
    gateway: Arc<dyn CapabilityGateway>,
    filter_essential: bool,
    specs: OnceCell<Vec<CapabilitySpec>>,
}

impl CapabilityCatalog {
    pub fn new(gateway: Arc<dyn CapabilityGateway>, filter_essential: bool) -> Self {
        Self {
            gateway,
            filter_essential,
            specs: OnceCell::new(),
        }
    }

    pub fn from_config(gateway: Arc<dyn CapabilityGateway>, config: &EngineConfig) -> Self {
        Self::new(gateway, config.filter_essential_capabilities)
    }

    /// All known capabilities, filtered to the essential allow-list when
    /// configured.
    pub async fn specs(&self) -> &[CapabilitySpec] {
        self.specs
            .get_or_init(|| async {
                match self.gateway.list_capabilities().await {
                    Ok(all) => {
                        let total = all.len();
                        let specs: Vec<CapabilitySpec> = if self.filter_essential {
                            all.into_iter()
                                .filter(|s| ESSENTIAL_CAPABILITIES.contains(s.name.as_str()))
                                .collect()
                        } else {
                            all
                        };
                        info!(total, filtered = specs.len(), "Capability discovery complete");
                        specs
                    }
                    Err(e) => {
                        warn!(error = %e, "Capability discovery failed, surface is empty");
                        Vec::new()
                    }
                }
            })
            .await
    }

    pub async fn spec_for(&self, name: &str) -> Option<&CapabilitySpec> {
        self.specs().await.iter().find(|s| s.name == name)
    }

    /// Capabilities relevant to one intent category.
    pub async fn for_category(&self, category: IntentCategory) -> Vec<&CapabilitySpec> {
        let prefixes = category_prefixes(category);
        let specs = self.specs().await;
        if prefixes.is_empty() {
            return specs.iter().collect();
        }
        specs
            .iter()
            .filter(|s| prefixes.iter().any(|p| s.name.starts_with(p)))
            .collect()
    }
}

fn validate_arguments(spec: &CapabilitySpec, arguments: &Value) -> std::result::Result<(), String> {
    if spec.input_schema.is_null() {
        return Ok(());
    }
    let validator = jsonschema::validator_for(&spec.input_schema)
        .map_err(|e| format!("invalid schema for '{}': {}", spec.name, e))?;
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Pull escalation signals out of a successful result payload.
///
/// Services report refund estimates and return-window verdicts in their
/// payloads; the escalation rules read them from scratch on the next pass.
fn harvest_signals(state: &mut SessionState, payload: &Value) {
    let Some(obj) = payload.as_object() else {
        return;
    };
    for key in ["refundAmount", "refund_amount", "estimatedRefund"] {
        if let Some(amount) = obj.get(key).and_then(Value::as_f64) {
            state
                .scratch
                .insert("refund_amount".to_string(), Value::from(amount));
        }
    }
    let too_old = obj
        .get("orderTooOld")
        .or_else(|| obj.get("order_too_old"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || (obj.get("eligible") == Some(&Value::Bool(false))
            && obj
                .get("reason")
                .and_then(Value::as_str)
                .map(|r| r.contains("return window") || r.contains("too old"))
                .unwrap_or(false));
    if too_old {
        state
            .scratch
            .insert("order_too_old".to_string(), Value::Bool(true));
    }
}

/// Execute the approved pending batch in request order.
///
/// One result per request, always. Schema failures and transport errors
/// become error-tagged results; nothing is retried and a failure never
/// aborts the rest of the batch.
pub async fn execute_batch(
    state: &mut SessionState,
    catalog: &CapabilityCatalog,
    sink: &dyn FrameSink,
    config: &EngineConfig,
) -> Result<()> {
    let batch = std::mem::take(&mut state.pending_requests);
    info!(
        session_id = %state.session_id,
        count = batch.len(),
        "Executing capability batch"
    );

    for request in batch {
        let shown = display_name(&request.name).to_string();
        sink.emit(StreamFrame::ToolStart {
            name: shown.clone(),
        });
        let started = Instant::now();

        let outcome = run_one(state, catalog, &request.name, &request.arguments, config).await;
        let outcome = match outcome {
            Ok(payload) => {
                harvest_signals(state, &payload);
                CapabilityOutcome::success(request.id.clone(), payload)
            }
            Err(message) => {
                warn!(
                    session_id = %state.session_id,
                    capability = %request.name,
                    error = %message,
                    "Capability invocation failed"
                );
                CapabilityOutcome::error(request.id.clone(), message)
            }
        };

        sink.emit(StreamFrame::ToolEnd {
            name: shown,
            duration_ms: started.elapsed().as_millis() as u64,
            is_error: outcome.is_error,
        });
        state
            .transcript
            .push(TranscriptEntry::CapabilityResult(outcome))?;
    }
    Ok(())
}

async fn run_one(
    state: &SessionState,
    catalog: &CapabilityCatalog,
    name: &str,
    arguments: &Value,
    config: &EngineConfig,
) -> std::result::Result<Value, String> {
    if config.validate_capability_arguments {
        if let Some(spec) = catalog.spec_for(name).await {
            validate_arguments(spec, arguments)
                .map_err(|e| format!("Error: invalid arguments for {}: {}", name, e))?;
        } else {
            debug!(
                session_id = %state.session_id,
                capability = name,
                "No spec for capability, skipping validation"
            );
        }
    }
    catalog
        .gateway
        .invoke(name, arguments)
        .await
        .map_err(|e| format!("Error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BufferingSink;
    use crate::transcript::CapabilityRequest;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGateway {
        discovery_calls: AtomicUsize,
        fail: bool,
    }

    impl ScriptedGateway {
        fn new(fail: bool) -> Self {
            Self {
                discovery_calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl CapabilityGateway for ScriptedGateway {
        async fn invoke(&self, name: &str, _arguments: &Value) -> anyhow::Result<Value> {
            if self.fail {
                anyhow::bail!("service unavailable");
            }
            Ok(json!({ "capability": name, "status": "ok" }))
        }

        async fn list_capabilities(&self) -> anyhow::Result<Vec<CapabilitySpec>> {
            self.discovery_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                CapabilitySpec {
                    name: "shipping_trackShipment".to_string(),
                    description: "Track a shipment".to_string(),
                    input_schema: json!({
                        "type": "object",
                        "properties": { "trackingNumber": { "type": "string" } },
                        "required": ["trackingNumber"]
                    }),
                },
                CapabilitySpec {
                    name: "internal_debugDump".to_string(),
                    description: String::new(),
                    input_schema: Value::Null,
                },
            ])
        }
    }

    fn catalog(fail: bool) -> CapabilityCatalog {
        CapabilityCatalog::new(Arc::new(ScriptedGateway::new(fail)), true)
    }

    #[tokio::test]
    async fn test_discovery_runs_once_and_filters() {
        let gateway = Arc::new(ScriptedGateway::new(false));
        let catalog = CapabilityCatalog::new(gateway.clone(), true);

        let specs = catalog.specs().await;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "shipping_trackShipment");

        catalog.specs().await;
        assert_eq!(gateway.discovery_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_category_filtering() {
        let catalog = catalog(false);
        let order = catalog.for_category(IntentCategory::Order).await;
        assert_eq!(order.len(), 1);
        let account = catalog.for_category(IntentCategory::Account).await;
        assert!(account.is_empty());
        // Unmapped categories see everything.
        let general = catalog.for_category(IntentCategory::General).await;
        assert_eq!(general.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_success_emits_frames_and_results() {
        let catalog = catalog(false);
        let sink = BufferingSink::new();
        let config = EngineConfig::default();

        let mut state = SessionState::new("test");
        let request = CapabilityRequest::new(
            "shipping_trackShipment",
            json!({"trackingNumber": "TRK-1"}),
        );
        state
            .transcript
            .push(TranscriptEntry::Responder {
                text: None,
                requests: vec![request.clone()],
            })
            .unwrap();
        state.pending_requests = vec![request];

        execute_batch(&mut state, &catalog, &sink, &config)
            .await
            .unwrap();

        assert!(state.pending_requests.is_empty());
        let frames = sink.frames();
        assert!(matches!(&frames[0], StreamFrame::ToolStart { name } if name == "trackShipment"));
        assert!(
            matches!(&frames[1], StreamFrame::ToolEnd { is_error, .. } if !is_error)
        );
        assert_eq!(state.transcript.trailing_error_results(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error_result() {
        let catalog = catalog(true);
        let sink = BufferingSink::new();
        let config = EngineConfig::default();

        let mut state = SessionState::new("test");
        let request = CapabilityRequest::new(
            "shipping_trackShipment",
            json!({"trackingNumber": "TRK-1"}),
        );
        state
            .transcript
            .push(TranscriptEntry::Responder {
                text: None,
                requests: vec![request.clone()],
            })
            .unwrap();
        state.pending_requests = vec![request];

        // The batch itself succeeds; the failure lands in the transcript.
        execute_batch(&mut state, &catalog, &sink, &config)
            .await
            .unwrap();

        assert_eq!(state.transcript.trailing_error_results(), 1);
        let frames = sink.frames();
        assert!(matches!(&frames[1], StreamFrame::ToolEnd { is_error, .. } if *is_error));
    }

    #[tokio::test]
    async fn test_schema_validation_rejects_bad_arguments() {
        let catalog = catalog(false);
        let sink = BufferingSink::new();
        let config = EngineConfig::default();

        let mut state = SessionState::new("test");
        // trackingNumber is required by the declared schema.
        let request = CapabilityRequest::new("shipping_trackShipment", json!({}));
        state
            .transcript
            .push(TranscriptEntry::Responder {
                text: None,
                requests: vec![request.clone()],
            })
            .unwrap();
        state.pending_requests = vec![request];

        execute_batch(&mut state, &catalog, &sink, &config)
            .await
            .unwrap();
        assert_eq!(state.transcript.trailing_error_results(), 1);
    }

    #[test]
    fn test_harvest_signals() {
        let mut state = SessionState::new("test");
        harvest_signals(&mut state, &json!({"refundAmount": 750.0}));
        assert_eq!(state.scratch_f64("refund_amount"), Some(750.0));

        harvest_signals(
            &mut state,
            &json!({"eligible": false, "reason": "outside the return window"}),
        );
        assert_eq!(state.scratch_bool("order_too_old"), Some(true));
    }
}
