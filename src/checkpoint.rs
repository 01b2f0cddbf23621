//! Durable checkpoints.
//!
//! The scheduler commits a checkpoint after every node, so a crash replays
//! from the last committed node instead of the start of the turn. A
//! suspension is just a checkpoint whose position carries the approval
//! payload; resuming loads it like any other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::approval::ApprovalPayload;
use crate::core::errors::{Result, SwitchboardError};
use crate::state::SessionState;

/// Where the graph resumes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    /// Next node to run when input arrives
    Next { node: String },
    /// Awaiting an out-of-band approval decision at `node`
    Suspended {
        node: String,
        payload: ApprovalPayload,
    },
}

impl Position {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Position::Suspended { .. })
    }
}

/// One committed snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: SessionState,
    pub position: Position,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(state: SessionState, position: Position) -> Self {
        Self {
            state,
            position,
            updated_at: Utc::now(),
        }
    }
}

/// Pluggable checkpoint persistence.
///
/// `save` replaces the whole checkpoint atomically per session; partial
/// writes must never be observable.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>>;
    async fn remove(&self, session_id: &str) -> Result<()>;
    async fn contains(&self, session_id: &str) -> Result<bool>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: DashMap<String, Checkpoint>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .insert(checkpoint.state.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.get(session_id).map(|c| c.clone()))
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.checkpoints.remove(session_id);
        Ok(())
    }

    async fn contains(&self, session_id: &str) -> Result<bool> {
        Ok(self.checkpoints.contains_key(session_id))
    }
}

/// Durable store backed by a sled tree.
///
/// Values are JSON-encoded checkpoints keyed by session id; JSON because the
/// state embeds `serde_json::Value` payloads. Suspension checkpoints flush
/// to disk before the turn returns, since those are the ones a restart must
/// not lose while a human decision is pending.
pub struct SledCheckpointStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree("checkpoints")?;
        Ok(Self { db, tree })
    }

    fn encode(checkpoint: &Checkpoint) -> Result<Vec<u8>> {
        serde_json::to_vec(checkpoint).map_err(|e| SwitchboardError::serialization("json", e))
    }

    fn decode(bytes: &[u8]) -> Result<Checkpoint> {
        serde_json::from_slice(bytes).map_err(|e| SwitchboardError::serialization("json", e))
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = Self::encode(checkpoint)?;
        self.tree
            .insert(checkpoint.state.session_id.as_bytes(), bytes)?;
        if checkpoint.position.is_suspended() {
            self.db
                .flush_async()
                .await
                .map_err(|e| SwitchboardError::checkpoint("flush", e))?;
            debug!(
                session_id = %checkpoint.state.session_id,
                "Suspension checkpoint flushed"
            );
        }
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        match self.tree.get(session_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.tree.remove(session_id.as_bytes())?;
        Ok(())
    }

    async fn contains(&self, session_id: &str) -> Result<bool> {
        Ok(self.tree.contains_key(session_id.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::PendingAction;
    use pretty_assertions::assert_eq;

    fn sample(session_id: &str, position: Position) -> Checkpoint {
        Checkpoint::new(SessionState::new(session_id), position)
    }

    fn suspended_position() -> Position {
        Position::Suspended {
            node: "approve".to_string(),
            payload: ApprovalPayload {
                actions: vec![PendingAction {
                    request_id: "r1".to_string(),
                    capability: "order-management_cancelOrder".to_string(),
                    title: "Cancel Order".to_string(),
                    description: vec!["Order total: $10.00".to_string()],
                }],
            },
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryCheckpointStore::new();
        let checkpoint = sample(
            "s-1",
            Position::Next {
                node: "respond".to_string(),
            },
        );
        store.save(&checkpoint).await.unwrap();

        assert!(store.contains("s-1").await.unwrap());
        let loaded = store.load("s-1").await.unwrap().unwrap();
        // Whole-value comparison, state included.
        assert_eq!(loaded, checkpoint);

        store.remove("s-1").await.unwrap();
        assert!(!store.contains("s-1").await.unwrap());
        assert!(store.load("s-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sled_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!("switchboard-ckpt-{}", cuid2::create_id()));

        {
            let store = SledCheckpointStore::open(&path).unwrap();
            store
                .save(&sample("s-2", suspended_position()))
                .await
                .unwrap();
        }

        let store = SledCheckpointStore::open(&path).unwrap();
        let loaded = store.load("s-2").await.unwrap().unwrap();
        assert!(loaded.position.is_suspended());
        if let Position::Suspended { node, payload } = loaded.position {
            assert_eq!(node, "approve");
            assert_eq!(payload.actions[0].title, "Cancel Order");
        }

        std::fs::remove_dir_all(&path).ok();
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let store = MemoryCheckpointStore::new();
        store
            .save(&sample(
                "s-3",
                Position::Next {
                    node: "classify".to_string(),
                },
            ))
            .await
            .unwrap();
        store.save(&sample("s-3", suspended_position())).await.unwrap();

        let loaded = store.load("s-3").await.unwrap().unwrap();
        assert!(loaded.position.is_suspended());
    }
}
