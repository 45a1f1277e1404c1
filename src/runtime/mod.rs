//! Runtime adapters
//!
//! One adapter per supported CLI tool. An adapter knows how to launch its
//! tool inside an already-running shell session, how to tell whether the
//! tool is at a prompt (ready/idle), how to inject a prompt, and how to pick
//! the tool's reply out of the rendered pane.
//!
//! Detection is heuristic by nature, so errors during probing are treated
//! as "not ready" rather than surfaced.

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use term_session::SessionBackend;

pub mod claude_code;
pub mod codex_cli;
pub mod gemini_cli;
pub mod shell;

pub use claude_code::ClaudeCodeAdapter;
pub use codex_cli::CodexCliAdapter;
pub use gemini_cli::GeminiCliAdapter;
pub use shell::ShellAdapter;

/// Pane lines captured for detection heuristics
pub(crate) const CAPTURE_LINES: usize = 60;

/// Kind of CLI tool hosted in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeType {
    ClaudeCode,
    GeminiCli,
    CodexCli,
    Shell,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuntimeType::ClaudeCode => "claude-code",
            RuntimeType::GeminiCli => "gemini-cli",
            RuntimeType::CodexCli => "codex-cli",
            RuntimeType::Shell => "shell",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for RuntimeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude-code" => Ok(RuntimeType::ClaudeCode),
            "gemini-cli" => Ok(RuntimeType::GeminiCli),
            "codex-cli" => Ok(RuntimeType::CodexCli),
            "shell" => Ok(RuntimeType::Shell),
            other => Err(anyhow::anyhow!("unknown runtime type: {other}")),
        }
    }
}

/// Observed lifecycle of a runtime inside its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// Launch line sent, first prompt not yet observed
    Started,
    /// Working on a prompt
    Active,
    /// At a prompt, waiting for input
    Idle,
    /// An error or exit pattern matched
    Error,
}

static DEFAULT_EXIT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)process exited with code \d+").expect("exit regex"),
        Regex::new(r"\[exited\]").expect("exit regex"),
        Regex::new(r"(?i)session (ended|terminated)").expect("exit regex"),
    ]
});

/// Capability set of a runtime adapter.
///
/// Default method bodies implement the shared pattern-based detection;
/// variants override where their tool needs a real probe.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn runtime_type(&self) -> RuntimeType;

    /// Executable to launch, after environment overrides
    fn command(&self) -> String;

    /// Literal substrings that indicate the tool is at its prompt
    fn ready_patterns(&self) -> &[&'static str];

    /// Literal substrings that indicate a tool-level error
    fn error_patterns(&self) -> &[&'static str];

    /// Regexes that indicate the tool exited
    fn exit_patterns(&self) -> &[Regex] {
        &DEFAULT_EXIT_PATTERNS
    }

    /// Flags always passed at launch
    fn base_args(&self) -> Vec<String> {
        Vec::new()
    }

    /// Flags that resume a previous conversation. Empty when the tool
    /// cannot resume.
    fn resume_args(&self, _runtime_session_id: &str) -> Vec<String> {
        Vec::new()
    }

    /// Full shell line that starts the tool inside the session. The resume
    /// flag is composed here and only here; it never reaches the persisted
    /// session command.
    fn launch_command(&self, resume_session_id: Option<&str>) -> String {
        let mut parts = vec![self.command()];
        parts.extend(self.base_args());
        if let Some(id) = resume_session_id {
            parts.extend(self.resume_args(id));
        }
        parts.join(" ")
    }

    /// Hook run right after launch, before readiness is awaited. May write
    /// ancillary config into the project directory.
    async fn post_initialize(
        &self,
        _backend: &dyn SessionBackend,
        _session: &str,
        _project_dir: &Path,
    ) -> Result<()> {
        Ok(())
    }

    /// One-shot readiness check
    async fn detect_ready(&self, backend: &dyn SessionBackend, session: &str) -> bool {
        let pane = backend.capture_pane(session, CAPTURE_LINES).await;
        self.matches_ready(&pane)
    }

    /// Poll until the tool is back at its prompt, a deadline passes, or the
    /// token is cancelled. Ready counts once the same pattern holds across
    /// one full poll cycle.
    async fn detect_idle(
        &self,
        backend: &dyn SessionBackend,
        session: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut last_hit: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let pane = backend.capture_pane(session, CAPTURE_LINES).await;
            let hit = self
                .ready_patterns()
                .iter()
                .find(|p| pane.contains(**p))
                .map(|p| p.to_string());
            if let (Some(current), Some(previous)) = (&hit, &last_hit) {
                if current == previous {
                    return true;
                }
            }
            last_hit = hit;
            if Instant::now() >= deadline {
                return false;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    /// Type a prompt and submit it
    async fn inject_prompt(
        &self,
        backend: &dyn SessionBackend,
        session: &str,
        prompt: &str,
    ) -> Result<()> {
        backend.send_text(session, prompt).await?;
        backend.send_enter(session).await?;
        Ok(())
    }

    /// Extract the tool's reply from rendered pane text
    fn parse_response(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn matches_ready(&self, pane: &str) -> bool {
        self.ready_patterns().iter().any(|p| pane.contains(p))
    }

    fn matches_error(&self, pane: &str) -> bool {
        self.error_patterns().iter().any(|p| pane.contains(p))
            || self.exit_patterns().iter().any(|re| re.is_match(pane))
    }
}

/// The adapter for a runtime type, with default tuning
pub fn adapter_for(runtime_type: RuntimeType) -> Arc<dyn RuntimeAdapter> {
    match runtime_type {
        RuntimeType::ClaudeCode => Arc::new(ClaudeCodeAdapter::default()),
        RuntimeType::GeminiCli => Arc::new(GeminiCliAdapter::default()),
        RuntimeType::CodexCli => Arc::new(CodexCliAdapter::default()),
        RuntimeType::Shell => Arc::new(ShellAdapter::default()),
    }
}

/// Resolve an executable name, honoring a `*_CMD` override variable
pub(crate) fn command_from_env(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

/// True when the text can be typed into a shell line without quoting
pub(crate) fn shell_safe(text: &str) -> bool {
    !text.contains('\n')
        && !text.contains('\'')
        && !text.contains('"')
        && !text.contains('`')
        && !text.contains('$')
}

/// Type a command into a shell session and run it. Shell-hostile content is
/// wrapped in base64 so it survives the trip through the pty input stream.
pub(crate) async fn send_shell_command(
    backend: &dyn SessionBackend,
    session: &str,
    command: &str,
) -> Result<()> {
    if shell_safe(command) {
        backend.send_text(session, command).await?;
    } else {
        let encoded = BASE64.encode(command.as_bytes());
        backend
            .send_text(session, &format!("echo {} | base64 -d | bash", encoded))
            .await?;
    }
    backend.send_enter(session).await?;
    Ok(())
}
