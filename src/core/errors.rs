use std::collections::HashMap;
use thiserror::Error;

/// Unified error type for the switchboard engine.
///
/// Capability-level failures never surface here — they are absorbed into
/// error-tagged transcript entries so the escalation rules can observe them.
/// Only structural protocol violations (unknown session, resuming the wrong
/// state, a busy session) and infrastructure faults reach callers.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    /// A node failed while the scheduler was driving the graph
    #[error("Node '{node}' failed: {message}")]
    Node {
        node: String,
        message: String,
        context: HashMap<String, String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No checkpoint exists for the given session identifier
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// A turn is already in flight for this session
    #[error("Session busy: {session_id}")]
    SessionBusy { session_id: String },

    /// Resume called on a session that is not suspended, or a message
    /// sent to a session that is awaiting an approval decision
    #[error("Invalid resume for session {session_id}: {message}")]
    InvalidResume { session_id: String, message: String },

    /// A transcript append would violate the request/result ordering invariant
    #[error("Transcript invariant violated: {message}")]
    Transcript { message: String },

    /// Routing table problems (unknown node, unreachable node, bad edge)
    #[error("Invalid routing table: {message}")]
    Routing { message: String },

    /// Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Checkpoint store failures
    #[error("Checkpoint operation failed: {operation}")]
    Checkpoint {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The external reasoning collaborator failed before producing output
    #[error("Responder failed: {message}")]
    Responder {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Network/IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SwitchboardError {
    /// Create a node error with context
    pub fn node<N: Into<String>, M: Into<String>>(node: N, message: M) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
            context: HashMap::new(),
            source: None,
        }
    }

    /// Create a node error with source
    pub fn node_with_source<N: Into<String>, M: Into<String>>(
        node: N,
        message: M,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
            context: HashMap::new(),
            source: Some(Box::new(source)),
        }
    }

    /// Add context to a node error
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let Self::Node {
            ref mut context, ..
        } = self
        {
            context.insert(key.into(), value.into());
        }
        self
    }

    pub fn session_not_found<S: Into<String>>(session_id: S) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn session_busy<S: Into<String>>(session_id: S) -> Self {
        Self::SessionBusy {
            session_id: session_id.into(),
        }
    }

    pub fn invalid_resume<S: Into<String>, M: Into<String>>(session_id: S, message: M) -> Self {
        Self::InvalidResume {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    pub fn transcript<M: Into<String>>(message: M) -> Self {
        Self::Transcript {
            message: message.into(),
        }
    }

    pub fn routing<M: Into<String>>(message: M) -> Self {
        Self::Routing {
            message: message.into(),
        }
    }

    pub fn validation<M: Into<String>>(message: M) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field<M: Into<String>, F: Into<String>>(message: M, field: F) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn configuration<M: Into<String>>(message: M) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn checkpoint<O: Into<String>>(
        operation: O,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Checkpoint {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn responder<M: Into<String>>(message: M) -> Self {
        Self::Responder {
            message: message.into(),
            source: None,
        }
    }

    pub fn serialization<F: Into<String>>(
        format: F,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            format: format.into(),
            source: Box::new(source),
        }
    }

    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the session remains usable after this error
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. } | Self::Transcript { .. } | Self::Checkpoint { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Node { .. } => "node",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::SessionBusy { .. } => "session_busy",
            Self::InvalidResume { .. } => "invalid_resume",
            Self::Transcript { .. } => "transcript",
            Self::Routing { .. } => "routing",
            Self::Validation { .. } => "validation",
            Self::Configuration { .. } => "configuration",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Responder { .. } => "responder",
            Self::Serialization { .. } => "serialization",
            Self::Io { .. } => "io",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SwitchboardError>;

impl From<std::io::Error> for SwitchboardError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "io_operation".to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for SwitchboardError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for SwitchboardError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization("yaml", err)
    }
}

impl From<sled::Error> for SwitchboardError {
    fn from(err: sled::Error) -> Self {
        Self::checkpoint("sled_operation", err)
    }
}

impl From<anyhow::Error> for SwitchboardError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
