use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Notify;

use switchboard::{
    CapabilityCatalog, CapabilityGateway, CapabilityRequest, CapabilitySpec, CustomerContext,
    CustomerTier, Engine, EngineConfig, KeywordClassifier, MemoryCheckpointStore, Responder,
    ResponderReply, Result, SessionManager, StaticIdentityProvider, StreamFrame, SystemContext,
    Transcript,
};

struct OkGateway;

#[async_trait]
impl CapabilityGateway for OkGateway {
    async fn invoke(&self, name: &str, _arguments: &Value) -> anyhow::Result<Value> {
        Ok(json!({ "capability": name, "status": "ok" }))
    }

    async fn list_capabilities(&self) -> anyhow::Result<Vec<CapabilitySpec>> {
        Ok(Vec::new())
    }
}

/// Replays scripted replies; optionally parks its first call on a notify,
/// to hold a turn open while another call races for the session lock.
struct ScriptedResponder {
    replies: Mutex<Vec<ResponderReply>>,
    gate: Option<Arc<Notify>>,
    gated_once: std::sync::atomic::AtomicBool,
}

impl ScriptedResponder {
    fn new(mut replies: Vec<ResponderReply>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            gate: None,
            gated_once: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn gated(replies: Vec<ResponderReply>, gate: Arc<Notify>) -> Self {
        let mut r = Self::new(replies);
        r.gate = Some(gate);
        r
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn generate(
        &self,
        _context: &SystemContext,
        _transcript: &Transcript,
    ) -> Result<ResponderReply> {
        if let Some(gate) = &self.gate {
            if !self
                .gated_once
                .swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                gate.notified().await;
            }
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| ResponderReply::text("how else can I help?")))
    }
}

fn manager(responder: ScriptedResponder, customer: Option<CustomerContext>) -> SessionManager {
    let catalog = CapabilityCatalog::new(Arc::new(OkGateway), true);
    let engine = Engine::new(
        Arc::new(responder),
        Arc::new(catalog),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(KeywordClassifier),
        EngineConfig::default(),
    )
    .unwrap();
    let identity: Arc<dyn switchboard::IdentityProvider> = match customer {
        Some(c) => Arc::new(StaticIdentityProvider::new(c)),
        None => Arc::new(StaticIdentityProvider::anonymous()),
    };
    SessionManager::new(Arc::new(engine), identity)
}

fn test_customer() -> CustomerContext {
    CustomerContext {
        customer_id: "CUST-001".to_string(),
        email: "test@example.com".to_string(),
        name: "Test Customer".to_string(),
        tier: CustomerTier::Plus,
        roles: vec!["customer".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_session_personalizes_welcome() {
    let mgr = manager(ScriptedResponder::new(vec![]), Some(test_customer()));
    let created = mgr.create_session(None).await.unwrap();
    assert!(created.welcome.contains("Hello Test Customer"));

    let info = mgr.session_info(&created.session_id).await.unwrap();
    assert_eq!(info.turn_count, 0);
    assert_eq!(info.message_count, 0);
    assert!(!info.is_escalated);
    assert!(!info.is_suspended);
}

#[tokio::test]
async fn test_anonymous_welcome() {
    let mgr = manager(ScriptedResponder::new(vec![]), None);
    let created = mgr.create_session(None).await.unwrap();
    assert!(created.welcome.starts_with("Hello! I'm your support assistant"));
}

#[tokio::test]
async fn test_stream_ends_with_single_done() {
    let mgr = manager(
        ScriptedResponder::new(vec![ResponderReply::text("Happy to help!")]),
        None,
    );
    let created = mgr.create_session(None).await.unwrap();

    let stream = mgr.send_message(&created.session_id, "hello").await.unwrap();
    let frames = stream.collect_frames().await;

    let done_count = frames
        .iter()
        .filter(|f| matches!(f, StreamFrame::Done))
        .count();
    assert_eq!(done_count, 1);
    assert_eq!(frames.last(), Some(&StreamFrame::Done));
    assert!(frames.contains(&StreamFrame::Token {
        text: "Happy to help!".to_string()
    }));
}

#[tokio::test]
async fn test_approval_flow_over_session_surface() {
    let mgr = manager(
        ScriptedResponder::new(vec![
            ResponderReply::requests(vec![CapabilityRequest::new(
                "order-management_cancelOrder",
                json!({"path": {"orderId": "PO-7"}}),
            )]),
            ResponderReply::text("Your order is cancelled."),
        ]),
        Some(test_customer()),
    );
    let created = mgr.create_session(None).await.unwrap();

    let frames = mgr
        .send_message(&created.session_id, "please cancel my order")
        .await
        .unwrap()
        .collect_frames()
        .await;
    assert!(frames
        .iter()
        .any(|f| matches!(f, StreamFrame::ApprovalRequired { .. })));

    let info = mgr.session_info(&created.session_id).await.unwrap();
    assert!(info.is_suspended);

    let frames = mgr
        .approve(&created.session_id)
        .await
        .unwrap()
        .collect_frames()
        .await;
    assert!(frames
        .iter()
        .any(|f| matches!(f, StreamFrame::ToolEnd { is_error, .. } if !is_error)));
    assert_eq!(frames.last(), Some(&StreamFrame::Done));

    let info = mgr.session_info(&created.session_id).await.unwrap();
    assert!(!info.is_suspended);
    assert_eq!(info.turn_count, 1);
    assert_eq!(info.message_count, 1);
}

#[tokio::test]
async fn test_second_turn_observes_session_busy() {
    let gate = Arc::new(Notify::new());
    let mgr = manager(
        ScriptedResponder::gated(vec![ResponderReply::text("done waiting")], gate.clone()),
        None,
    );
    let created = mgr.create_session(None).await.unwrap();

    let stream = mgr
        .send_message(&created.session_id, "first")
        .await
        .unwrap();

    let err = mgr
        .send_message(&created.session_id, "second")
        .await
        .unwrap_err();
    assert_eq!(err.category(), "session_busy");

    gate.notify_one();
    let frames = stream.collect_frames().await;
    assert_eq!(frames.last(), Some(&StreamFrame::Done));

    // The lock is free again once the first turn finishes.
    let frames = mgr
        .send_message(&created.session_id, "third")
        .await
        .unwrap()
        .collect_frames()
        .await;
    assert_eq!(frames.last(), Some(&StreamFrame::Done));
}

#[tokio::test]
async fn test_unknown_session_rejected_synchronously() {
    let mgr = manager(ScriptedResponder::new(vec![]), None);
    let err = mgr.send_message("no-such-session", "hi").await.unwrap_err();
    assert_eq!(err.category(), "session_not_found");
    assert!(mgr.session_info("no-such-session").await.is_err());
}

#[tokio::test]
async fn test_resume_without_suspension_reports_error_frame() {
    let mgr = manager(ScriptedResponder::new(vec![]), None);
    let created = mgr.create_session(None).await.unwrap();

    // The protocol violation surfaces in-stream as a single error frame
    // followed by done, since the turn produced no output.
    let frames = mgr
        .approve(&created.session_id)
        .await
        .unwrap()
        .collect_frames()
        .await;
    assert!(matches!(frames[0], StreamFrame::Error { .. }));
    assert_eq!(frames.last(), Some(&StreamFrame::Done));

    // The session is untouched and still accepts messages.
    let frames = mgr
        .send_message(&created.session_id, "hello")
        .await
        .unwrap()
        .collect_frames()
        .await;
    assert_eq!(frames.last(), Some(&StreamFrame::Done));
}

#[tokio::test]
async fn test_end_session_removes_checkpoint() {
    let mgr = manager(ScriptedResponder::new(vec![]), None);
    let created = mgr.create_session(None).await.unwrap();
    mgr.end_session(&created.session_id).await.unwrap();
    assert!(mgr.session_info(&created.session_id).await.is_err());
}

#[tokio::test]
async fn test_end_session_waits_for_in_flight_turn() {
    let gate = Arc::new(Notify::new());
    let mgr = manager(
        ScriptedResponder::gated(vec![ResponderReply::text("done")], gate.clone()),
        None,
    );
    let created = mgr.create_session(None).await.unwrap();

    let stream = mgr
        .send_message(&created.session_id, "first")
        .await
        .unwrap();

    // The turn still holds the session lock.
    let err = mgr.end_session(&created.session_id).await.unwrap_err();
    assert_eq!(err.category(), "session_busy");

    gate.notify_one();
    let frames = stream.collect_frames().await;
    assert_eq!(frames.last(), Some(&StreamFrame::Done));

    mgr.end_session(&created.session_id).await.unwrap();
    assert!(mgr.session_info(&created.session_id).await.is_err());
}
