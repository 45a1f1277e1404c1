//! In-memory scripted backend for tests
//!
//! No processes are spawned. Tests script the pane contents as a sequence
//! of frames; each `capture_pane` call advances to the next frame and the
//! last frame repeats. All injected input is recorded for assertions.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::backend::{
    validate_session_name, BackendError, BackendResult, SessionBackend, SessionSpec,
};

#[derive(Default)]
struct ScriptedSession {
    spec: SessionSpec,
    frames: Mutex<VecDeque<String>>,
    current: Mutex<String>,
    sent: Mutex<Vec<String>>,
    raw_history: Mutex<String>,
    fail_sends: Mutex<bool>,
}

impl ScriptedSession {
    fn record(&self, token: String) -> BackendResult<()> {
        if *self.fail_sends.lock().unwrap() {
            return Err(BackendError::CommandFailed("scripted send failure".to_string()));
        }
        self.raw_history.lock().unwrap().push_str(&token);
        self.raw_history.lock().unwrap().push('\n');
        self.sent.lock().unwrap().push(token);
        Ok(())
    }
}

/// Scripted backend holding no real processes
#[derive(Default)]
pub struct InMemoryBackend {
    sessions: DashMap<String, ScriptedSession>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pane frame for the named session
    pub fn push_frame(&self, name: &str, frame: impl Into<String>) {
        if let Some(session) = self.sessions.get(name) {
            session.frames.lock().unwrap().push_back(frame.into());
        }
    }

    /// Replace all scripted frames for the named session
    pub fn set_frames(&self, name: &str, frames: Vec<String>) {
        if let Some(session) = self.sessions.get(name) {
            *session.frames.lock().unwrap() = frames.into();
            session.current.lock().unwrap().clear();
        }
    }

    /// Everything injected into the session, in order
    pub fn sent_input(&self, name: &str) -> Vec<String> {
        self.sessions
            .get(name)
            .map(|session| session.sent.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Make subsequent send operations fail for the named session
    pub fn fail_sends(&self, name: &str, fail: bool) {
        if let Some(session) = self.sessions.get(name) {
            *session.fail_sends.lock().unwrap() = fail;
        }
    }

    /// Spec the session was created with
    pub fn session_spec(&self, name: &str) -> Option<SessionSpec> {
        self.sessions.get(name).map(|session| session.spec.clone())
    }
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn create_session(&self, name: &str, spec: &SessionSpec) -> BackendResult<()> {
        validate_session_name(name)?;
        if self.sessions.contains_key(name) {
            return Err(BackendError::DuplicateSession(name.to_string()));
        }
        self.sessions.insert(
            name.to_string(),
            ScriptedSession {
                spec: spec.clone(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn kill_session(&self, name: &str) {
        self.sessions.remove(name);
    }

    async fn list_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn has_session(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    async fn capture_pane(&self, name: &str, tail_lines: usize) -> String {
        let session = match self.sessions.get(name) {
            Some(session) => session,
            None => return String::new(),
        };
        {
            let mut frames = session.frames.lock().unwrap();
            if let Some(next) = frames.pop_front() {
                *session.current.lock().unwrap() = next;
            }
        }
        let current = session.current.lock().unwrap().clone();
        let lines: Vec<&str> = current.lines().collect();
        let start = lines.len().saturating_sub(tail_lines);
        lines[start..].join("\n")
    }

    async fn get_raw_history(&self, name: &str) -> String {
        self.sessions
            .get(name)
            .map(|session| session.raw_history.lock().unwrap().clone())
            .unwrap_or_default()
    }

    async fn send_keys(&self, name: &str, keys: &str) -> BackendResult<()> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| BackendError::SessionNotFound(name.to_string()))?;
        session.record(format!("<keys:{}>", keys))
    }

    async fn send_text(&self, name: &str, text: &str) -> BackendResult<()> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| BackendError::SessionNotFound(name.to_string()))?;
        session.record(text.to_string())
    }

    async fn send_enter(&self, name: &str) -> BackendResult<()> {
        self.send_keys(name, "Enter").await
    }

    async fn send_escape(&self, name: &str) -> BackendResult<()> {
        self.send_keys(name, "Escape").await
    }

    async fn clear_current_command_line(&self, name: &str) -> BackendResult<()> {
        self.send_keys(name, "C-u").await
    }

    async fn destroy(&self) {
        self.sessions.clear();
    }
}
