//! Core configuration: dispatch ceilings, queue limits, persistence paths

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Session name of the distinguished orchestrator agent
pub const ORCHESTRATOR_SESSION_NAME: &str = "agentmux-orc";

/// Schema version of the persisted session-state document
pub const SESSION_STATE_VERSION: u32 = 1;

/// Maximum messages allowed to sit in the pending queue
pub const MAX_QUEUE_SIZE: usize = 100;

/// Completed/failed entries retained in queue history
pub const MAX_HISTORY_SIZE: usize = 50;

/// Requeues allowed before a message is failed permanently
pub const MAX_REQUEUE_RETRIES: u32 = 3;

/// Per-section truncation ceiling for startup briefings
pub const MAX_SECTION_CHARS: usize = 4000;

/// Poll cadence while waiting for an agent to become ready
pub const AGENT_READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Pre-dispatch readiness ceiling
pub const AGENT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling for a fresh CLI launch to reach its first prompt
pub const AGENT_INIT_TIMEOUT: Duration = Duration::from_secs(90);

/// Ceiling for idle detection after a prompt is sent
pub const PROMPT_DETECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Window in which the orchestrator's reply completes a message
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Sleep between two processed messages
pub const INTER_MESSAGE_DELAY: Duration = Duration::from_millis(100);

/// Bounded, non-fatal idle wait after a response lands
pub const POST_IDLE_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Settle gap between consecutive auto-assignment executions
pub const AUTO_ASSIGN_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Filesystem roots for everything crewly persists.
///
/// The home root defaults to `~/.crewly` and can be redirected with the
/// `CREWLY_HOME` environment variable; project-scoped paths live under
/// `{project}/.crewly`.
#[derive(Debug, Clone)]
pub struct CrewlyPaths {
    home: PathBuf,
}

impl CrewlyPaths {
    /// Resolve the persistence root from the environment
    pub fn resolve() -> Result<Self> {
        if let Ok(root) = std::env::var("CREWLY_HOME") {
            return Ok(Self {
                home: PathBuf::from(root),
            });
        }
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(Self {
            home: home.join(".crewly"),
        })
    }

    /// Use an explicit root (tests point this at a temp dir)
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self { home: root.into() }
    }

    /// The persistence root itself
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// `session-state.json` snapshot written by the state store
    pub fn session_state_file(&self) -> PathBuf {
        self.home.join("session-state.json")
    }

    /// Scheduled-message store
    pub fn scheduled_messages_file(&self) -> PathBuf {
        self.home.join("scheduled-messages.json")
    }

    /// Root of all per-agent memory
    pub fn agents_dir(&self) -> PathBuf {
        self.home.join("agents")
    }

    /// Memory directory of one agent
    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.agents_dir().join(agent_id)
    }

    /// Session summaries of one agent
    pub fn agent_sessions_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("sessions")
    }

    /// Marketplace item directory (populated by the external installer)
    pub fn marketplace_dir(&self, kind: &str, item_id: &str) -> PathBuf {
        self.home.join("marketplace").join(kind).join(item_id)
    }
}

/// Project-scoped layout under `{project}/.crewly`
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(project: impl AsRef<Path>) -> Self {
        Self {
            root: project.as_ref().join(".crewly"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn agents_index_file(&self) -> PathBuf {
        self.root.join("agents-index.json")
    }

    pub fn daily_log_dir(&self) -> PathBuf {
        self.root.join("logs").join("daily")
    }

    pub fn goals_dir(&self) -> PathBuf {
        self.root.join("goals")
    }

    pub fn learning_dir(&self) -> PathBuf {
        self.root.join("learning")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn patterns_file(&self) -> PathBuf {
        self.root.join("patterns.md")
    }

    pub fn gotchas_file(&self) -> PathBuf {
        self.root.join("gotchas.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_from_root() {
        let paths = CrewlyPaths::from_root("/tmp/crewly-test");
        assert_eq!(
            paths.session_state_file(),
            PathBuf::from("/tmp/crewly-test/session-state.json")
        );
        assert_eq!(
            paths.agent_sessions_dir("orc"),
            PathBuf::from("/tmp/crewly-test/agents/orc/sessions")
        );
    }

    #[test]
    fn test_project_paths() {
        let paths = ProjectPaths::new("/work/proj");
        assert_eq!(
            paths.daily_log_dir(),
            PathBuf::from("/work/proj/.crewly/logs/daily")
        );
        assert_eq!(
            paths.agents_index_file(),
            PathBuf::from("/work/proj/.crewly/agents-index.json")
        );
    }
}
