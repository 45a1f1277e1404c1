//! crewly - agent lifecycle and message-dispatch engine
//!
//! Orchestrates long-lived CLI coding agents running inside terminal
//! sessions. External sources (web chat, messengers, system events, the
//! scheduler) enqueue messages; a single-consumer processor delivers them
//! to the orchestrator agent one at a time with readiness gating, retries,
//! and timeouts, then routes responses back to where they came from.
//!
//! The session layer itself lives in the `term-session` crate; everything
//! here builds on its `SessionBackend` trait, so tests run against an
//! in-memory backend and production runs against tmux or raw PTYs.

pub mod agent;
pub mod chat;
pub mod config;
pub mod memory;
pub mod orchestrator;
pub mod processor;
pub mod queue;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod tasks;
pub mod utils;

pub use agent::{AgentGateway, AgentRegistrar, RegistrarConfig, SendOutcome};
pub use chat::{ChatEvent, ChatEventBus, ChatMessage, ChatSender, SenderKind};
pub use config::{CrewlyPaths, ProjectPaths, ORCHESTRATOR_SESSION_NAME};
pub use memory::MemoryServices;
pub use orchestrator::{Crewly, CrewlyBuilder};
pub use processor::{
    AlwaysActive, ConversationGateway, NullConversationGateway, OrchestratorStatus,
    OrchestratorStatusSource, ProcessorConfig, QueueProcessor,
};
pub use queue::{
    CompletionCallback, Delivery, MessageQueue, MessageSource, MessageStatus, NewMessage,
    QueueError, QueueEvent, QueueStats, QueuedMessage, SourceMetadata,
};
pub use router::{NullChatSink, ResponseRouter, SystemChatSink};
pub use runtime::{adapter_for, RuntimeAdapter, RuntimeState, RuntimeType};
pub use scheduler::{
    DelayUnit, MessageScheduler, ScheduleKind, ScheduledMessage, ScheduledMessageStore,
};
pub use state::{PersistedSessionInfo, SessionStateStore};
pub use utils::init_tracing;
