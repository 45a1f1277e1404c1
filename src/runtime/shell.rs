//! Generic shell adapter
//!
//! The session command is already a shell, so there is nothing to launch.
//! Injected prompts are executed as commands; multi-line or quote-heavy
//! content rides through a heredoc so the shell sees it verbatim.

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use term_session::SessionBackend;

use super::{shell_safe, RuntimeAdapter, RuntimeType};

const READY_PATTERNS: &[&str] = &["$ ", "# ", "% "];

const ERROR_PATTERNS: &[&str] = &["command not found", "No such file or directory"];

#[derive(Debug, Clone, Default)]
pub struct ShellAdapter;

#[async_trait]
impl RuntimeAdapter for ShellAdapter {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Shell
    }

    fn command(&self) -> String {
        String::new()
    }

    fn ready_patterns(&self) -> &[&'static str] {
        READY_PATTERNS
    }

    fn error_patterns(&self) -> &[&'static str] {
        ERROR_PATTERNS
    }

    // The shell is already running; an empty launch line tells the
    // registrar to skip the launch step.
    fn launch_command(&self, _resume_session_id: Option<&str>) -> String {
        String::new()
    }

    async fn inject_prompt(
        &self,
        backend: &dyn SessionBackend,
        session: &str,
        prompt: &str,
    ) -> Result<()> {
        if prompt.contains('\n') {
            backend.send_text(session, "bash <<'CREWLY_EOF'").await?;
            backend.send_enter(session).await?;
            for line in prompt.lines() {
                backend.send_text(session, line).await?;
                backend.send_enter(session).await?;
            }
            backend.send_text(session, "CREWLY_EOF").await?;
            backend.send_enter(session).await?;
        } else if !shell_safe(prompt) {
            let encoded = BASE64.encode(prompt.as_bytes());
            backend
                .send_text(session, &format!("echo {} | base64 -d | bash", encoded))
                .await?;
            backend.send_enter(session).await?;
        } else {
            backend.send_text(session, prompt).await?;
            backend.send_enter(session).await?;
        }
        Ok(())
    }
}
