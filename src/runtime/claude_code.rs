//! Claude Code adapter

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use term_session::SessionBackend;

use super::{command_from_env, RuntimeAdapter, RuntimeType, CAPTURE_LINES};

const READY_PATTERNS: &[&str] = &[
    "? for shortcuts",
    "Bypassing Permissions",
    "Welcome to Claude Code",
];

const ERROR_PATTERNS: &[&str] = &[
    "command not found: claude",
    "claude: command not found",
    "API Error",
    "OAuth token has expired",
    "rate limit",
];

/// Adapter for the `claude` CLI.
///
/// Readiness is probed actively: typing `/` into a ready CLI pops the slash
/// palette and visibly grows the pane. The palette is dismissed with Escape
/// followed by Ctrl-U — Ctrl-C would interrupt the CLI itself.
#[derive(Debug, Clone)]
pub struct ClaudeCodeAdapter {
    /// How long the slash palette gets to render
    pub probe_settle: Duration,
    /// Minimum pane growth (chars) that counts as a palette appearing
    pub probe_growth_threshold: usize,
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self {
            probe_settle: Duration::from_millis(800),
            probe_growth_threshold: 3,
        }
    }
}

#[async_trait]
impl RuntimeAdapter for ClaudeCodeAdapter {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::ClaudeCode
    }

    fn command(&self) -> String {
        command_from_env("CLAUDE_CMD", "claude")
    }

    fn ready_patterns(&self) -> &[&'static str] {
        READY_PATTERNS
    }

    fn error_patterns(&self) -> &[&'static str] {
        ERROR_PATTERNS
    }

    fn base_args(&self) -> Vec<String> {
        vec!["--dangerously-skip-permissions".to_string()]
    }

    fn resume_args(&self, runtime_session_id: &str) -> Vec<String> {
        vec!["--resume".to_string(), runtime_session_id.to_string()]
    }

    async fn post_initialize(
        &self,
        _backend: &dyn SessionBackend,
        session: &str,
        project_dir: &Path,
    ) -> Result<()> {
        // Provision the MCP descriptor the CLI picks up from the project
        // root. Existing descriptors are the user's; leave them alone.
        let descriptor = project_dir.join(".mcp.json");
        if descriptor.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(project_dir)?;
        let content = serde_json::json!({
            "mcpServers": {
                "crewly": {
                    "command": "crewly-mcp",
                    "args": ["--stdio"]
                }
            }
        });
        std::fs::write(&descriptor, serde_json::to_string_pretty(&content)?)?;
        tracing::debug!(session, path = %descriptor.display(), "wrote MCP descriptor");
        Ok(())
    }

    async fn detect_ready(&self, backend: &dyn SessionBackend, session: &str) -> bool {
        // Clear anything half-typed so the probe starts from a known state.
        if backend.clear_current_command_line(session).await.is_err() {
            return false;
        }
        let before = backend.capture_pane(session, CAPTURE_LINES).await;

        if backend.send_text(session, "/").await.is_err() {
            return false;
        }
        tokio::time::sleep(self.probe_settle).await;
        let after = backend.capture_pane(session, CAPTURE_LINES).await;

        // Dismiss the slash palette.
        let _ = backend.send_escape(session).await;
        let _ = backend.clear_current_command_line(session).await;

        let grew = after.len() > before.len() + self.probe_growth_threshold;
        grew || self.matches_ready(&after)
    }

    fn parse_response(&self, raw: &str) -> Option<String> {
        let body: Vec<&str> = raw
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                !trimmed.starts_with('╭')
                    && !trimmed.starts_with('│')
                    && !trimmed.starts_with('╰')
                    && !trimmed.starts_with("? for shortcuts")
                    && !trimmed.starts_with("> ")
            })
            .collect();
        let text = body.join("\n").trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
