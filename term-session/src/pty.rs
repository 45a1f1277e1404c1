//! Direct pseudo-terminal session implementation
//!
//! Owns PTYs via `portable-pty` instead of delegating to a multiplexer.
//! A reader thread per session accumulates raw scrollback; `capture_pane`
//! renders the ANSI-stripped tail of that buffer.

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use regex::Regex;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use crate::backend::{
    validate_session_name, BackendError, BackendResult, SessionBackend, SessionSpec,
};

const DEFAULT_ROWS: u16 = 40;
const DEFAULT_COLS: u16 = 120;
const MAX_SCROLLBACK_BYTES: usize = 1024 * 1024;

static ANSI_RE: Lazy<Regex> = Lazy::new(|| {
    // CSI sequences, OSC sequences, charset designations, and stray ESC
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07|\x1b[()][A-Za-z0-9]|\x1b[@-_]")
        .expect("ANSI regex")
});

/// Strip escape sequences and resolve carriage-return overwrites so the
/// result approximates the rendered pane.
fn render_plain(raw: &str) -> String {
    let stripped = ANSI_RE.replace_all(raw, "");
    stripped
        .split('\n')
        .map(|line| {
            let line = line.trim_end_matches('\r');
            match line.rfind('\r') {
                Some(idx) => &line[idx + 1..],
                None => line,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct PtySessionHandle {
    spec: SessionSpec,
    child: Mutex<Box<dyn Child + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    history: Arc<Mutex<String>>,
    // Dropping the master closes the PTY, so it lives with the session.
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl PtySessionHandle {
    fn is_alive(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }

    fn write_bytes(&self, data: &[u8]) -> BackendResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| BackendError::CommandFailed("pty writer poisoned".to_string()))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }
}

/// Session backend that owns pseudo-terminals directly.
pub struct PtyBackend {
    sessions: DashMap<String, Arc<PtySessionHandle>>,
    size: PtySize,
}

impl Default for PtyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyBackend {
    /// Create a backend with the default pane size
    pub fn new() -> Self {
        Self::with_size(DEFAULT_ROWS, DEFAULT_COLS)
    }

    /// Create a backend with a specific pane size
    pub fn with_size(rows: u16, cols: u16) -> Self {
        Self {
            sessions: DashMap::new(),
            size: PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            },
        }
    }

    fn get(&self, name: &str) -> BackendResult<Arc<PtySessionHandle>> {
        self.sessions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackendError::SessionNotFound(name.to_string()))
    }
}

#[async_trait]
impl SessionBackend for PtyBackend {
    async fn create_session(&self, name: &str, spec: &SessionSpec) -> BackendResult<()> {
        validate_session_name(name)?;

        if let Some(existing) = self.sessions.get(name) {
            if existing.is_alive() {
                return Err(BackendError::DuplicateSession(name.to_string()));
            }
        }
        self.sessions.remove(name);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(self.size)
            .map_err(|e| BackendError::CommandFailed(format!("openpty failed: {}", e)))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        if !spec.cwd.is_empty() {
            cmd.cwd(&spec.cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| BackendError::CommandFailed(format!("spawn failed: {}", e)))?;

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| BackendError::CommandFailed(format!("reader unavailable: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| BackendError::CommandFailed(format!("writer unavailable: {}", e)))?;

        let history = Arc::new(Mutex::new(String::new()));
        let history_writer = Arc::clone(&history);
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                        if let Ok(mut history) = history_writer.lock() {
                            history.push_str(&chunk);
                            if history.len() > MAX_SCROLLBACK_BYTES {
                                let cut = history.len() - MAX_SCROLLBACK_BYTES / 2;
                                // Cut on a char boundary
                                let cut = (cut..history.len())
                                    .find(|i| history.is_char_boundary(*i))
                                    .unwrap_or(0);
                                history.drain(..cut);
                            }
                        }
                    }
                }
            }
        });

        let handle = PtySessionHandle {
            spec: spec.clone(),
            child: Mutex::new(child),
            writer: Mutex::new(writer),
            history,
            _master: Mutex::new(pair.master),
        };
        self.sessions.insert(name.to_string(), Arc::new(handle));

        tracing::debug!(session = name, command = %spec.command, "spawned pty session");
        Ok(())
    }

    async fn kill_session(&self, name: &str) {
        if let Some((_, handle)) = self.sessions.remove(name) {
            if let Ok(mut child) = handle.child.lock() {
                let _ = child.kill();
            }
        }
    }

    async fn list_sessions(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn has_session(&self, name: &str) -> bool {
        self.sessions
            .get(name)
            .map(|entry| entry.value().is_alive())
            .unwrap_or(false)
    }

    async fn capture_pane(&self, name: &str, tail_lines: usize) -> String {
        let handle = match self.get(name) {
            Ok(handle) => handle,
            Err(_) => return String::new(),
        };
        let raw = match handle.history.lock() {
            Ok(history) => history.clone(),
            Err(_) => return String::new(),
        };
        let plain = render_plain(&raw);
        let lines: Vec<&str> = plain.lines().collect();
        let start = lines.len().saturating_sub(tail_lines);
        lines[start..].join("\n")
    }

    async fn get_raw_history(&self, name: &str) -> String {
        match self.get(name) {
            Ok(handle) => handle
                .history
                .lock()
                .map(|history| history.clone())
                .unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    async fn send_keys(&self, name: &str, keys: &str) -> BackendResult<()> {
        let handle = self.get(name)?;
        // Interpret the tmux-style key tokens our callers use.
        let mut bytes = Vec::new();
        for token in keys.split_whitespace() {
            match token {
                "Enter" => bytes.push(b'\r'),
                "Escape" => bytes.push(0x1b),
                "C-u" => bytes.push(0x15),
                "C-c" => bytes.push(0x03),
                "Tab" => bytes.push(b'\t'),
                other => bytes.extend_from_slice(other.as_bytes()),
            }
        }
        handle.write_bytes(&bytes)
    }

    async fn send_text(&self, name: &str, text: &str) -> BackendResult<()> {
        self.get(name)?.write_bytes(text.as_bytes())
    }

    async fn send_enter(&self, name: &str) -> BackendResult<()> {
        self.get(name)?.write_bytes(b"\r")
    }

    async fn send_escape(&self, name: &str) -> BackendResult<()> {
        self.get(name)?.write_bytes(&[0x1b])
    }

    async fn clear_current_command_line(&self, name: &str) -> BackendResult<()> {
        self.get(name)?.write_bytes(&[0x15])
    }

    async fn destroy(&self) {
        let names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.kill_session(&name).await;
        }
    }
}

impl PtyBackend {
    /// Spec the session was created with, if it exists
    pub fn session_spec(&self, name: &str) -> Option<SessionSpec> {
        self.sessions.get(name).map(|entry| entry.value().spec.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_strips_csi() {
        let raw = "\x1b[1;32mhello\x1b[0m world";
        assert_eq!(render_plain(raw), "hello world");
    }

    #[test]
    fn test_render_plain_carriage_return_overwrite() {
        let raw = "progress 10%\rprogress 99%";
        assert_eq!(render_plain(raw), "progress 99%");
    }

    #[test]
    fn test_render_plain_osc_title() {
        let raw = "\x1b]0;window title\x07prompt>";
        assert_eq!(render_plain(raw), "prompt>");
    }

    #[tokio::test]
    async fn test_capture_missing_session_is_empty() {
        let backend = PtyBackend::new();
        assert_eq!(backend.capture_pane("nope", 10).await, "");
        assert!(!backend.has_session("nope").await);
        // kill of a missing session is a no-op
        backend.kill_session("nope").await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_echo_and_capture() {
        let backend = PtyBackend::new();
        let spec = SessionSpec {
            cwd: "/tmp".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo pty-ready; sleep 5".to_string()],
            env: Default::default(),
        };
        backend.create_session("echo-test", &spec).await.unwrap();

        // Give the reader thread a moment to pick up the output
        let mut pane = String::new();
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            pane = backend.capture_pane("echo-test", 10).await;
            if pane.contains("pty-ready") {
                break;
            }
        }
        assert!(pane.contains("pty-ready"), "pane was: {pane:?}");

        assert!(backend.has_session("echo-test").await);
        backend.destroy().await;
        assert!(!backend.has_session("echo-test").await);
    }

    #[tokio::test]
    async fn test_duplicate_session_rejected() {
        let backend = PtyBackend::new();
        let spec = SessionSpec {
            cwd: "/tmp".to_string(),
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
            env: Default::default(),
        };
        backend.create_session("dup", &spec).await.unwrap();
        let err = backend.create_session("dup", &spec).await.unwrap_err();
        assert!(matches!(err, BackendError::DuplicateSession(_)));
        backend.destroy().await;
    }
}
