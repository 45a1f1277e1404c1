//! The session backend capability trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error types for backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("session '{0}' already exists")]
    DuplicateSession(String),
    #[error("invalid session name: {0}")]
    InvalidSessionName(String),
    #[error("session '{0}' not found")]
    SessionNotFound(String),
    #[error("backend command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend result type
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// What to run inside a new session.
///
/// The command and args are persisted verbatim by the state layer and fed
/// back on restore, so nothing runtime-specific may be baked into them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Working directory for the session
    pub cwd: String,
    /// Command to execute (the shell, typically)
    pub command: String,
    /// Arguments for the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the session
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl SessionSpec {
    /// Convenience constructor for a plain shell session
    pub fn shell(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            command: "bash".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// Capability set of a terminal session backend.
///
/// At most one live process exists per name. Input injection must not block
/// longer than the backend's command ceiling; capture must complete in
/// bounded time regardless of process state and returns an empty string on
/// failure.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Spawn a new detached session. Fails with [`BackendError::DuplicateSession`]
    /// if a live process already owns the name.
    async fn create_session(&self, name: &str, spec: &SessionSpec) -> BackendResult<()>;

    /// Kill a session. Idempotent; absent sessions are not an error.
    async fn kill_session(&self, name: &str);

    /// Names of currently-live sessions owned by this backend.
    async fn list_sessions(&self) -> Vec<String>;

    /// Cheap liveness probe.
    async fn has_session(&self, name: &str) -> bool;

    /// Last `tail_lines` rendered lines of the pane, escape codes
    /// interpreted. Empty on any failure.
    async fn capture_pane(&self, name: &str, tail_lines: usize) -> String;

    /// Full scrollback including ANSI sequences, for detection heuristics.
    async fn get_raw_history(&self, name: &str) -> String;

    /// Inject a key chord (e.g. "Enter", "C-u") into the session input.
    async fn send_keys(&self, name: &str, keys: &str) -> BackendResult<()>;

    /// Inject literal text into the session input.
    async fn send_text(&self, name: &str, text: &str) -> BackendResult<()>;

    /// Press Enter.
    async fn send_enter(&self, name: &str) -> BackendResult<()>;

    /// Press Escape.
    async fn send_escape(&self, name: &str) -> BackendResult<()>;

    /// Clear whatever is typed on the current command line (Ctrl-U).
    async fn clear_current_command_line(&self, name: &str) -> BackendResult<()>;

    /// Tear down every session owned by this backend.
    async fn destroy(&self);
}

/// Validate a session name for use across backends.
///
/// tmux rejects ':' and '.' in session names, so the restriction applies
/// uniformly to keep specs portable between backends.
pub(crate) fn validate_session_name(name: &str) -> BackendResult<()> {
    if name.is_empty() {
        return Err(BackendError::InvalidSessionName(
            "session name cannot be empty".to_string(),
        ));
    }
    if name.contains(':') || name.contains('.') {
        return Err(BackendError::InvalidSessionName(
            "session name cannot contain ':' or '.' characters".to_string(),
        ));
    }
    Ok(())
}
