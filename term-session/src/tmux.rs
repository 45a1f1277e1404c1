//! tmux-backed session implementation
//!
//! Shells out to the host `tmux` server. Every invocation runs under a
//! bounded wall-clock ceiling so a wedged server cannot stall callers.

use async_trait::async_trait;
use dashmap::DashMap;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

use crate::backend::{
    validate_session_name, BackendError, BackendResult, SessionBackend, SessionSpec,
};

/// Configuration for the tmux backend
#[derive(Debug, Clone)]
pub struct TmuxBackendConfig {
    /// Ceiling for a single tmux invocation
    pub command_timeout: Duration,
    /// Lines of scrollback requested for raw history captures
    pub history_limit: usize,
}

impl Default for TmuxBackendConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            history_limit: 5000,
        }
    }
}

/// Session backend driving the host tmux server.
///
/// Sessions are created detached (`new-session -d`), so the hosted process
/// survives this one. The backend tracks which names it owns; `list_sessions`
/// reports the intersection of owned names and the server's live set.
pub struct TmuxBackend {
    config: TmuxBackendConfig,
    owned: DashMap<String, SessionSpec>,
}

impl TmuxBackend {
    /// Create a backend with default configuration.
    ///
    /// Fails if tmux is not installed.
    pub async fn new() -> BackendResult<Self> {
        Self::with_config(TmuxBackendConfig::default()).await
    }

    /// Create a backend with custom configuration
    pub async fn with_config(config: TmuxBackendConfig) -> BackendResult<Self> {
        let backend = Self {
            config,
            owned: DashMap::new(),
        };
        let out = backend.run(&["-V"]).await?;
        if !out.status.success() {
            return Err(BackendError::CommandFailed(
                "tmux not found or not installed".to_string(),
            ));
        }
        Ok(backend)
    }

    /// tmux server version string
    pub async fn version(&self) -> BackendResult<String> {
        let out = self.run_checked(&["-V"]).await?;
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Run a tmux command under the configured timeout. Non-zero exit is
    /// reported through the returned `Output`, not as an error.
    async fn run(&self, args: &[&str]) -> BackendResult<Output> {
        let fut = Command::new("tmux").args(args).output();
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => Err(BackendError::Io(e)),
            Err(_) => Err(BackendError::CommandFailed(format!(
                "tmux {} timed out after {:?}",
                args.first().unwrap_or(&""),
                self.config.command_timeout
            ))),
        }
    }

    /// Run a tmux command and require a zero exit status
    async fn run_checked(&self, args: &[&str]) -> BackendResult<Output> {
        let out = self.run(args).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(BackendError::CommandFailed(stderr.trim().to_string()));
        }
        Ok(out)
    }

    async fn server_has_session(&self, name: &str) -> bool {
        match self.run(&["has-session", "-t", name]).await {
            Ok(out) => out.status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    async fn create_session(&self, name: &str, spec: &SessionSpec) -> BackendResult<()> {
        validate_session_name(name)?;

        if self.server_has_session(name).await {
            return Err(BackendError::DuplicateSession(name.to_string()));
        }

        let mut args: Vec<String> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            name.into(),
            "-c".into(),
            spec.cwd.clone(),
        ];

        // Session environment rides in through env(1) so the initial
        // process sees it; set-environment only affects later panes.
        if !spec.env.is_empty() {
            args.push("env".into());
            for (key, value) in &spec.env {
                args.push(format!("{}={}", key, value));
            }
        }
        if !spec.command.is_empty() {
            args.push(spec.command.clone());
            args.extend(spec.args.iter().cloned());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&arg_refs).await?;
        self.owned.insert(name.to_string(), spec.clone());

        tracing::debug!(session = name, cwd = %spec.cwd, "created tmux session");
        Ok(())
    }

    async fn kill_session(&self, name: &str) {
        // Idempotent: a missing session or dead server is not an error.
        let _ = self.run(&["kill-session", "-t", name]).await;
        self.owned.remove(name);
    }

    async fn list_sessions(&self) -> Vec<String> {
        let out = match self.run(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(out) if out.status.success() => out,
            _ => return Vec::new(),
        };
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && self.owned.contains_key(*line))
            .map(str::to_string)
            .collect()
    }

    async fn has_session(&self, name: &str) -> bool {
        self.server_has_session(name).await
    }

    async fn capture_pane(&self, name: &str, tail_lines: usize) -> String {
        let out = match self.run(&["capture-pane", "-p", "-t", name]).await {
            Ok(out) if out.status.success() => out,
            _ => return String::new(),
        };
        let text = String::from_utf8_lossy(&out.stdout);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(tail_lines);
        lines[start..].join("\n")
    }

    async fn get_raw_history(&self, name: &str) -> String {
        let limit = format!("-{}", self.config.history_limit);
        let out = match self
            .run(&["capture-pane", "-p", "-e", "-S", &limit, "-t", name])
            .await
        {
            Ok(out) if out.status.success() => out,
            _ => return String::new(),
        };
        String::from_utf8_lossy(&out.stdout).to_string()
    }

    async fn send_keys(&self, name: &str, keys: &str) -> BackendResult<()> {
        self.run_checked(&["send-keys", "-t", name, keys]).await?;
        Ok(())
    }

    async fn send_text(&self, name: &str, text: &str) -> BackendResult<()> {
        // -l sends the text literally rather than interpreting key names
        self.run_checked(&["send-keys", "-t", name, "-l", text])
            .await?;
        Ok(())
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
        let names: Vec<String> = self.owned.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.kill_session(&name).await;
        }
    }
}
