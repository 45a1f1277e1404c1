//! Agent registration
//!
//! Brings a CLI agent up inside an already-created shell session, waits for
//! it to reach its first prompt, and delivers prompts with confirmation of
//! injection (not of response — response correlation is the processor's
//! job).
//!
//! Memory hooks live here: a freshly initialized agent receives its startup
//! briefing as the first prompt, and teardown writes the session summary.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use term_session::SessionBackend;

use crate::config::{AGENT_INIT_TIMEOUT, AGENT_READY_POLL_INTERVAL, PROMPT_DETECTION_TIMEOUT};
use crate::memory::MemoryServices;
use crate::runtime::{adapter_for, send_shell_command, RuntimeAdapter, RuntimeState, RuntimeType};
use crate::state::SessionStateStore;

/// Result of a prompt delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// The slice of registrar behavior the queue processor depends on.
/// Tests substitute a scripted implementation.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Wait until the agent in `session` is at its prompt, up to `timeout`
    async fn wait_for_agent_ready(
        &self,
        session: &str,
        timeout: Duration,
        runtime_type: RuntimeType,
    ) -> bool;

    /// Inject a prompt. Success means injection succeeded, nothing more.
    async fn send_message_to_agent(
        &self,
        session: &str,
        content: &str,
        runtime_type: RuntimeType,
    ) -> SendOutcome;
}

/// Timing knobs, shrunk by tests
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    pub init_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub prompt_detection_timeout: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            init_timeout: AGENT_INIT_TIMEOUT,
            ready_poll_interval: AGENT_READY_POLL_INTERVAL,
            prompt_detection_timeout: PROMPT_DETECTION_TIMEOUT,
        }
    }
}

/// Launches agents into sessions and tracks their runtime state
pub struct AgentRegistrar {
    backend: Arc<dyn SessionBackend>,
    store: Arc<SessionStateStore>,
    memory: Option<Arc<MemoryServices>>,
    adapters: HashMap<RuntimeType, Arc<dyn RuntimeAdapter>>,
    states: DashMap<String, RuntimeState>,
    config: RegistrarConfig,
    cancel: CancellationToken,
}

impl AgentRegistrar {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        store: Arc<SessionStateStore>,
        config: RegistrarConfig,
    ) -> Self {
        let mut adapters: HashMap<RuntimeType, Arc<dyn RuntimeAdapter>> = HashMap::new();
        for rt in [
            RuntimeType::ClaudeCode,
            RuntimeType::GeminiCli,
            RuntimeType::CodexCli,
            RuntimeType::Shell,
        ] {
            adapters.insert(rt, adapter_for(rt));
        }
        Self {
            backend,
            store,
            memory: None,
            adapters,
            states: DashMap::new(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire in the memory subsystem for briefing/summary hooks
    pub fn with_memory(mut self, memory: Arc<MemoryServices>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Substitute an adapter (tests tune probe timings this way)
    pub fn with_adapter(mut self, adapter: Arc<dyn RuntimeAdapter>) -> Self {
        self.adapters.insert(adapter.runtime_type(), adapter);
        self
    }

    fn adapter(&self, runtime_type: RuntimeType) -> Arc<dyn RuntimeAdapter> {
        self.adapters
            .get(&runtime_type)
            .cloned()
            .unwrap_or_else(|| adapter_for(runtime_type))
    }

    /// Observed runtime state of a session
    pub fn runtime_state(&self, session: &str) -> Option<RuntimeState> {
        self.states.get(session).map(|entry| *entry.value())
    }

    /// Launch the CLI tool inside the shell session and block until it is
    /// ready or the init deadline passes.
    ///
    /// When the session was restored from a snapshot and a resume handle is
    /// on record, the adapter's resume flag is added to the launch line; the
    /// persisted shell command itself is never touched.
    pub async fn initialize_agent(
        &self,
        session: &str,
        role: &str,
        runtime_type: RuntimeType,
        project_dir: &Path,
    ) -> Result<()> {
        let adapter = self.adapter(runtime_type);

        let resume_id = if self.store.is_restored(session) {
            self.store.runtime_session_id(session)
        } else {
            None
        };
        let launch = adapter.launch_command(resume_id.as_deref());
        if !launch.is_empty() {
            send_shell_command(self.backend.as_ref(), session, &launch)
                .await
                .with_context(|| format!("Failed to launch {} in '{}'", runtime_type, session))?;
        }
        self.states.insert(session.to_string(), RuntimeState::Started);

        adapter
            .post_initialize(self.backend.as_ref(), session, project_dir)
            .await
            .with_context(|| format!("post-initialize failed for '{}'", session))?;

        let deadline = Instant::now() + self.config.init_timeout;
        loop {
            if adapter.detect_ready(self.backend.as_ref(), session).await {
                break;
            }
            if Instant::now() >= deadline {
                self.states.insert(session.to_string(), RuntimeState::Error);
                bail!(
                    "agent in '{}' not ready after {:?}",
                    session,
                    self.config.init_timeout
                );
            }
            tokio::time::sleep(self.config.ready_poll_interval).await;
        }
        self.states.insert(session.to_string(), RuntimeState::Idle);
        tracing::info!(session, role, runtime = %runtime_type, "agent initialized");

        if let Some(memory) = &self.memory {
            memory.session.register_agent(project_dir, session, role)?;
            let briefing = memory.generate_startup_briefing(session, role, project_dir)?;
            if !briefing.is_empty() {
                adapter
                    .inject_prompt(self.backend.as_ref(), session, &briefing)
                    .await
                    .context("Failed to inject startup briefing")?;
            }
        }
        Ok(())
    }

    /// Write the session summary and mark the runtime gone. Called before
    /// the session itself is killed.
    pub fn finalize_agent(
        &self,
        session: &str,
        role: &str,
        project_dir: &Path,
        summary: &str,
    ) -> Result<()> {
        self.states.remove(session);
        if let Some(memory) = &self.memory {
            memory.session.write_summary(session, role, project_dir, summary)?;
        }
        Ok(())
    }

    /// Stop all in-flight idle waits
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl AgentGateway for AgentRegistrar {
    async fn wait_for_agent_ready(
        &self,
        session: &str,
        timeout: Duration,
        runtime_type: RuntimeType,
    ) -> bool {
        let adapter = self.adapter(runtime_type);
        let idle = adapter
            .detect_idle(
                self.backend.as_ref(),
                session,
                timeout,
                self.config.ready_poll_interval,
                &self.cancel,
            )
            .await;
        if idle {
            self.states.insert(session.to_string(), RuntimeState::Idle);
        }
        idle
    }

    async fn send_message_to_agent(
        &self,
        session: &str,
        content: &str,
        runtime_type: RuntimeType,
    ) -> SendOutcome {
        if !self.backend.has_session(session).await {
            return SendOutcome::failure("Session not found");
        }
        let adapter = self.adapter(runtime_type);
        match adapter
            .inject_prompt(self.backend.as_ref(), session, content)
            .await
        {
            Ok(()) => {
                self.states.insert(session.to_string(), RuntimeState::Active);
                SendOutcome::success()
            }
            Err(e) => SendOutcome::failure(e.to_string()),
        }
    }
}
