//! Root service container
//!
//! Wires the backend, state store, queue, chat bus, processor, scheduler,
//! and memory into one process-wide service with explicit init and
//! teardown. Embedders construct it through [`CrewlyBuilder`], substitute
//! their own boundary collaborators, and drive everything else through the
//! accessors.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use term_session::{SessionBackend, SessionSpec};

use crate::agent::{AgentGateway, AgentRegistrar, RegistrarConfig};
use crate::chat::ChatEventBus;
use crate::config::CrewlyPaths;
use crate::memory::MemoryServices;
use crate::processor::{
    AlwaysActive, ConversationGateway, NullConversationGateway, OrchestratorStatusSource,
    ProcessorConfig, QueueProcessor,
};
use crate::queue::{MessageQueue, NewMessage, QueueError, SourceMetadata};
use crate::router::{NullChatSink, ResponseRouter, SystemChatSink};
use crate::runtime::RuntimeType;
use crate::scheduler::{MessageScheduler, ScheduledMessageStore};
use crate::state::SessionStateStore;

/// Builder for the root container. Defaults every external collaborator to
/// a null implementation; the gateway process swaps in real ones.
pub struct CrewlyBuilder {
    backend: Arc<dyn SessionBackend>,
    paths: CrewlyPaths,
    processor_config: ProcessorConfig,
    registrar_config: RegistrarConfig,
    status: Arc<dyn OrchestratorStatusSource>,
    conversation_gateway: Arc<dyn ConversationGateway>,
    chat_sink: Arc<dyn SystemChatSink>,
}

impl CrewlyBuilder {
    pub fn new(backend: Arc<dyn SessionBackend>, paths: CrewlyPaths) -> Self {
        Self {
            backend,
            paths,
            processor_config: ProcessorConfig::default(),
            registrar_config: RegistrarConfig::default(),
            status: Arc::new(AlwaysActive),
            conversation_gateway: Arc::new(NullConversationGateway),
            chat_sink: Arc::new(NullChatSink),
        }
    }

    pub fn processor_config(mut self, config: ProcessorConfig) -> Self {
        self.processor_config = config;
        self
    }

    pub fn registrar_config(mut self, config: RegistrarConfig) -> Self {
        self.registrar_config = config;
        self
    }

    pub fn status_source(mut self, status: Arc<dyn OrchestratorStatusSource>) -> Self {
        self.status = status;
        self
    }

    pub fn conversation_gateway(mut self, gateway: Arc<dyn ConversationGateway>) -> Self {
        self.conversation_gateway = gateway;
        self
    }

    pub fn chat_sink(mut self, sink: Arc<dyn SystemChatSink>) -> Self {
        self.chat_sink = sink;
        self
    }

    /// Assemble the container. Must run inside a tokio runtime: the
    /// scheduler spawns its worker here.
    pub fn build(self) -> Result<Crewly> {
        let store = Arc::new(SessionStateStore::new(self.paths.session_state_file()));
        let memory = Arc::new(MemoryServices::new(self.paths.clone()));
        let registrar = Arc::new(
            AgentRegistrar::new(
                Arc::clone(&self.backend),
                Arc::clone(&store),
                self.registrar_config,
            )
            .with_memory(Arc::clone(&memory)),
        );
        let queue = Arc::new(MessageQueue::new());
        let bus = ChatEventBus::new();
        let router = Arc::new(ResponseRouter::new(self.chat_sink));
        let processor = QueueProcessor::new(
            Arc::clone(&queue),
            Arc::clone(&registrar) as Arc<dyn AgentGateway>,
            router,
            bus.clone(),
            self.status,
            self.conversation_gateway,
            self.processor_config,
        );
        let schedule_store = Arc::new(
            ScheduledMessageStore::new(self.paths.scheduled_messages_file())
                .context("Failed to open scheduled-message store")?,
        );
        let scheduler = MessageScheduler::new(Arc::clone(&queue), schedule_store);

        Ok(Crewly {
            backend: self.backend,
            paths: self.paths,
            store,
            memory,
            registrar,
            queue,
            bus,
            processor,
            scheduler,
        })
    }
}

/// The assembled orchestrator core
pub struct Crewly {
    backend: Arc<dyn SessionBackend>,
    paths: CrewlyPaths,
    store: Arc<SessionStateStore>,
    memory: Arc<MemoryServices>,
    registrar: Arc<AgentRegistrar>,
    queue: Arc<MessageQueue>,
    bus: ChatEventBus,
    processor: QueueProcessor,
    scheduler: MessageScheduler,
}

impl Crewly {
    pub fn builder(backend: Arc<dyn SessionBackend>, paths: CrewlyPaths) -> CrewlyBuilder {
        CrewlyBuilder::new(backend, paths)
    }

    /// Restore persisted sessions, re-arm schedules, start dispatching.
    /// Returns the number of sessions recreated.
    pub async fn start(&self) -> Result<usize> {
        let restored = self.store.restore_state(self.backend.as_ref()).await?;
        self.scheduler.reschedule_all_messages()?;
        self.processor.start();
        Ok(restored)
    }

    /// Stop dispatching, tear down timers, and batch-save session state.
    /// Sessions themselves are left running so they can be resumed.
    pub async fn shutdown(&self) -> Result<()> {
        self.processor.stop();
        self.scheduler.cleanup();
        self.registrar.shutdown();
        self.store.save_state()?;
        Ok(())
    }

    /// Create (or adopt, when restored) a session and bring its agent up.
    pub async fn register_agent(
        &self,
        name: &str,
        spec: &SessionSpec,
        runtime_type: RuntimeType,
        role: &str,
        team_id: Option<String>,
        member_id: Option<String>,
        project_dir: &Path,
    ) -> Result<()> {
        if !self.backend.has_session(name).await {
            self.backend.create_session(name, spec).await?;
        }
        // A restored session keeps its snapshot entry (and with it the
        // resume handle); only fresh sessions get registered here.
        if self.store.get(name).is_none() {
            self.store.register_session(
                name,
                spec,
                runtime_type,
                Some(role.to_string()),
                team_id,
                member_id,
            );
        }
        self.registrar
            .initialize_agent(name, role, runtime_type, project_dir)
            .await
    }

    /// Write the session summary, kill the session, drop its metadata.
    pub async fn unregister_agent(
        &self,
        name: &str,
        role: &str,
        project_dir: &Path,
        summary: &str,
    ) -> Result<()> {
        self.registrar.finalize_agent(name, role, project_dir, summary)?;
        self.backend.kill_session(name).await;
        self.store.unregister_session(name);
        Ok(())
    }

    /// Enqueue a web-chat message
    pub fn enqueue_chat_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Uuid, QueueError> {
        self.queue.enqueue(NewMessage {
            content: content.to_string(),
            conversation_id: conversation_id.to_string(),
            metadata: SourceMetadata::WebChat,
        })
    }

    /// Enqueue a system event
    pub fn enqueue_system_event(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Uuid, QueueError> {
        self.queue.enqueue(NewMessage {
            content: content.to_string(),
            conversation_id: conversation_id.to_string(),
            metadata: SourceMetadata::SystemEvent,
        })
    }

    /// Enqueue with explicit source metadata (messenger adapters)
    pub fn enqueue_message(&self, message: NewMessage) -> Result<Uuid, QueueError> {
        self.queue.enqueue(message)
    }

    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    pub fn paths(&self) -> &CrewlyPaths {
        &self.paths
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn chat_bus(&self) -> &ChatEventBus {
        &self.bus
    }

    pub fn memory(&self) -> &Arc<MemoryServices> {
        &self.memory
    }

    pub fn scheduler(&self) -> &MessageScheduler {
        &self.scheduler
    }

    pub fn state_store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    pub fn registrar(&self) -> &Arc<AgentRegistrar> {
        &self.registrar
    }

    pub fn is_processing_message(&self) -> bool {
        self.processor.is_processing_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use term_session::InMemoryBackend;

    fn quick_configs() -> (ProcessorConfig, RegistrarConfig) {
        let processor = ProcessorConfig {
            runtime_type: RuntimeType::Shell,
            agent_ready_timeout: Duration::from_millis(100),
            agent_ready_poll_interval: Duration::from_millis(10),
            message_timeout: Duration::from_millis(200),
            inter_message_delay: Duration::from_millis(5),
            post_idle_wait_timeout: Duration::from_millis(50),
            ..ProcessorConfig::default()
        };
        let registrar = RegistrarConfig {
            init_timeout: Duration::from_millis(200),
            ready_poll_interval: Duration::from_millis(5),
            prompt_detection_timeout: Duration::from_millis(100),
        };
        (processor, registrar)
    }

    #[tokio::test]
    async fn test_build_start_shutdown() {
        let home = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let (processor_config, registrar_config) = quick_configs();

        let crewly = Crewly::builder(
            backend,
            CrewlyPaths::from_root(home.path()),
        )
        .processor_config(processor_config)
        .registrar_config(registrar_config)
        .build()
        .unwrap();

        assert_eq!(crewly.start().await.unwrap(), 0);
        crewly.shutdown().await.unwrap();
        assert!(home.path().join("session-state.json").exists());
    }

    #[tokio::test]
    async fn test_register_agent_persists_and_initializes() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let (processor_config, registrar_config) = quick_configs();

        let crewly = Crewly::builder(
            Arc::clone(&backend) as Arc<dyn SessionBackend>,
            CrewlyPaths::from_root(home.path()),
        )
        .processor_config(processor_config)
        .registrar_config(registrar_config)
        .build()
        .unwrap();

        // The shell session reports a prompt right away.
        let spec = SessionSpec::shell(project.path().to_string_lossy());
        backend.create_session("worker-1", &spec).await.unwrap();
        backend.set_frames("worker-1", vec!["$ ".to_string()]);

        crewly
            .register_agent(
                "worker-1",
                &spec,
                RuntimeType::Shell,
                "developer",
                Some("team-a".to_string()),
                None,
                project.path(),
            )
            .await
            .unwrap();

        let info = crewly.state_store().get("worker-1").unwrap();
        assert_eq!(info.role.as_deref(), Some("developer"));
        assert_eq!(info.team_id.as_deref(), Some("team-a"));

        // The agents index recorded the registration.
        let index = crewly.memory().session.agents_index(project.path()).unwrap();
        assert_eq!(index.agents.len(), 1);
        assert_eq!(index.agents[0].agent_id, "worker-1");

        crewly
            .unregister_agent("worker-1", "developer", project.path(), "built the thing")
            .await
            .unwrap();
        assert!(!backend.has_session("worker-1").await);
        assert!(crewly.state_store().get("worker-1").is_none());
        assert!(crewly
            .memory()
            .session
            .latest_summary("worker-1")
            .unwrap()
            .contains("built the thing"));
    }
}
