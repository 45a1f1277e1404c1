//! Codex CLI adapter

use async_trait::async_trait;

use super::{command_from_env, RuntimeAdapter, RuntimeType};

const READY_PATTERNS: &[&str] = &["Ask Codex", "ctrl+c to quit", "/status"];

const ERROR_PATTERNS: &[&str] = &[
    "command not found: codex",
    "codex: command not found",
    "Not logged in",
    "usage limit",
];

/// Adapter for the `codex` CLI.
#[derive(Debug, Clone, Default)]
pub struct CodexCliAdapter;

#[async_trait]
impl RuntimeAdapter for CodexCliAdapter {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::CodexCli
    }

    fn command(&self) -> String {
        command_from_env("CODEX_CMD", "codex")
    }

    fn ready_patterns(&self) -> &[&'static str] {
        READY_PATTERNS
    }

    fn error_patterns(&self) -> &[&'static str] {
        ERROR_PATTERNS
    }

    fn base_args(&self) -> Vec<String> {
        vec!["--full-auto".to_string()]
    }

    // Codex resumes through a subcommand, not a flag, so the launch line is
    // composed here instead of through `resume_args`.
    fn launch_command(&self, resume_session_id: Option<&str>) -> String {
        match resume_session_id {
            Some(id) => format!("{} resume {} --full-auto", self.command(), id),
            None => format!("{} --full-auto", self.command()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_command_uses_resume_subcommand() {
        let adapter = CodexCliAdapter;
        assert_eq!(adapter.launch_command(None), "codex --full-auto");
        assert_eq!(
            adapter.launch_command(Some("sess-9")),
            "codex resume sess-9 --full-auto"
        );
    }
}
