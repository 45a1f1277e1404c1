//! Gemini CLI adapter

use async_trait::async_trait;

use super::{command_from_env, RuntimeAdapter, RuntimeType};

const READY_PATTERNS: &[&str] = &["Type your message", "YOLO mode", "gemini >"];

const ERROR_PATTERNS: &[&str] = &[
    "command not found: gemini",
    "gemini: command not found",
    "Quota exceeded",
    "GOOGLE_API_KEY",
];

/// Adapter for the `gemini` CLI.
///
/// Gemini has no conversation-resume flag, so restored sessions
/// re-initialize from scratch.
#[derive(Debug, Clone, Default)]
pub struct GeminiCliAdapter;

#[async_trait]
impl RuntimeAdapter for GeminiCliAdapter {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::GeminiCli
    }

    fn command(&self) -> String {
        command_from_env("GEMINI_CMD", "gemini")
    }

    fn ready_patterns(&self) -> &[&'static str] {
        READY_PATTERNS
    }

    fn error_patterns(&self) -> &[&'static str] {
        ERROR_PATTERNS
    }

    fn base_args(&self) -> Vec<String> {
        vec!["--yolo".to_string()]
    }
}
