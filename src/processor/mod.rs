//! Queue processor
//!
//! The single consumer that drains the message queue into the orchestrator
//! session. Owns the dispatch invariant: at most one message is in flight
//! at any time.
//!
//! Per-message path: gate on orchestrator status (a deferral, never a
//! retry), wait for agent readiness (requeue on failure, permanent fail
//! after the retry budget), bind the conversation, inject the framed
//! prompt, await the correlated response on the chat bus, route it, then
//! wait once more for idle before advancing. A delivery failure skips the
//! idle wait entirely so a broken session cannot stall the queue.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentGateway;
use crate::chat::{ChatEvent, ChatEventBus, SenderKind};
use crate::config::{
    AGENT_READY_POLL_INTERVAL, AGENT_READY_TIMEOUT, DEFAULT_MESSAGE_TIMEOUT, INTER_MESSAGE_DELAY,
    MAX_REQUEUE_RETRIES, ORCHESTRATOR_SESSION_NAME, POST_IDLE_WAIT_TIMEOUT,
};
use crate::queue::{MessageQueue, MessageSource, QueuedMessage};
use crate::router::ResponseRouter;
use crate::runtime::RuntimeType;

/// External orchestrator lifecycle status, owned by a collaborator outside
/// this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorStatus {
    Initializing,
    Active,
    Stopped,
}

/// Boundary contract: where the orchestrator's status comes from
#[async_trait]
pub trait OrchestratorStatusSource: Send + Sync {
    async fn orchestrator_status(&self) -> OrchestratorStatus;
}

/// A source that always reports active (single-process embedders)
pub struct AlwaysActive;

#[async_trait]
impl OrchestratorStatusSource for AlwaysActive {
    async fn orchestrator_status(&self) -> OrchestratorStatus {
        OrchestratorStatus::Active
    }
}

/// Boundary contract: the terminal gateway correlates streamed output with
/// the conversation told to it here, before each injection.
#[async_trait]
pub trait ConversationGateway: Send + Sync {
    async fn set_active_conversation(&self, conversation_id: &str);
}

/// Gateway for embedders without a streaming layer
pub struct NullConversationGateway;

#[async_trait]
impl ConversationGateway for NullConversationGateway {
    async fn set_active_conversation(&self, _conversation_id: &str) {}
}

/// Timing and identity knobs; tests shrink every duration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub orchestrator_session: String,
    pub runtime_type: RuntimeType,
    pub agent_ready_timeout: Duration,
    pub agent_ready_poll_interval: Duration,
    pub message_timeout: Duration,
    pub inter_message_delay: Duration,
    pub post_idle_wait_timeout: Duration,
    pub max_requeue_retries: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            orchestrator_session: ORCHESTRATOR_SESSION_NAME.to_string(),
            runtime_type: RuntimeType::ClaudeCode,
            agent_ready_timeout: AGENT_READY_TIMEOUT,
            agent_ready_poll_interval: AGENT_READY_POLL_INTERVAL,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            inter_message_delay: INTER_MESSAGE_DELAY,
            post_idle_wait_timeout: POST_IDLE_WAIT_TIMEOUT,
            max_requeue_retries: MAX_REQUEUE_RETRIES,
        }
    }
}

enum StepOutcome {
    /// A message reached a terminal state; peek again after the gap
    Processed,
    /// Gate or readiness said not yet; come back after the poll interval
    Deferred,
    /// Nothing pending
    Empty,
}

struct ProcessorInner {
    queue: Arc<MessageQueue>,
    gateway: Arc<dyn AgentGateway>,
    router: Arc<ResponseRouter>,
    bus: ChatEventBus,
    status: Arc<dyn OrchestratorStatusSource>,
    conversation_gateway: Arc<dyn ConversationGateway>,
    config: ProcessorConfig,
    cancel: CancellationToken,
    processing: AtomicBool,
}

/// The single-consumer dispatch loop
pub struct QueueProcessor {
    inner: Arc<ProcessorInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<MessageQueue>,
        gateway: Arc<dyn AgentGateway>,
        router: Arc<ResponseRouter>,
        bus: ChatEventBus,
        status: Arc<dyn OrchestratorStatusSource>,
        conversation_gateway: Arc<dyn ConversationGateway>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                queue,
                gateway,
                router,
                bus,
                status,
                conversation_gateway,
                config,
                cancel: CancellationToken::new(),
                processing: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the dispatch loop
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(async move {
            Self::run_loop(inner).await;
        }));
        tracing::info!("queue processor started");
    }

    /// Halt the loop at its next suspension point. The in-flight message,
    /// if any, is not aborted.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        tracing::info!("queue processor stopping");
    }

    /// Whether a message is currently in flight
    pub fn is_processing_message(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    async fn run_loop(inner: Arc<ProcessorInner>) {
        let mut queue_events = inner.queue.subscribe();
        loop {
            // Drain everything dispatchable right now.
            let mut deferred = false;
            loop {
                if inner.cancel.is_cancelled() {
                    return;
                }
                match Self::process_next(&inner).await {
                    StepOutcome::Processed => {
                        tokio::select! {
                            _ = inner.cancel.cancelled() => return,
                            _ = tokio::time::sleep(inner.config.inter_message_delay) => {}
                        }
                    }
                    StepOutcome::Deferred => {
                        deferred = true;
                        break;
                    }
                    StepOutcome::Empty => break,
                }
            }

            if deferred {
                // Deferral (gate closed or head requeued): the head stays
                // blocked no matter what arrives, so plain sleep.
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = tokio::time::sleep(inner.config.agent_ready_poll_interval) => {}
                }
                continue;
            }

            // Shed events produced by our own processing so they don't wake
            // the park below spuriously; anything enqueued in the gap is
            // caught by the peek.
            while queue_events.try_recv().is_ok() {}
            if inner.queue.peek().is_some() {
                continue;
            }
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(inner.config.agent_ready_poll_interval) => {}
                event = queue_events.recv() => {
                    if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                        // Queue dropped; nothing will ever arrive again.
                        return;
                    }
                }
            }
        }
    }

    async fn process_next(inner: &Arc<ProcessorInner>) -> StepOutcome {
        let message = match inner.queue.peek() {
            Some(message) => message,
            None => return StepOutcome::Empty,
        };

        // Orchestrator init gate: leave the message pending and come back.
        // Deliberately not a retry, so retry_count is untouched.
        if inner.status.orchestrator_status().await != OrchestratorStatus::Active {
            tracing::debug!(message = %message.id, "orchestrator not active, deferring");
            return StepOutcome::Deferred;
        }

        if let Err(e) = inner.queue.start_processing(message.id) {
            tracing::warn!(message = %message.id, error = %e, "could not claim message");
            return StepOutcome::Empty;
        }
        inner.processing.store(true, Ordering::SeqCst);
        let outcome = Self::dispatch(inner, &message).await;
        inner.processing.store(false, Ordering::SeqCst);
        outcome
    }

    async fn dispatch(inner: &Arc<ProcessorInner>, message: &QueuedMessage) -> StepOutcome {
        let config = &inner.config;
        let orchestrator = config.orchestrator_session.as_str();

        // Pre-dispatch readiness.
        let ready = inner
            .gateway
            .wait_for_agent_ready(orchestrator, config.agent_ready_timeout, config.runtime_type)
            .await;
        if !ready {
            if message.retry_count >= config.max_requeue_retries {
                let error = format!(
                    "Message delivery failed: agent not available after {} retries",
                    config.max_requeue_retries
                );
                tracing::error!(message = %message.id, "{error}");
                if let Err(e) = inner.queue.fail(message.id, error.clone()) {
                    tracing::warn!(message = %message.id, error = %e, "fail() rejected");
                }
                inner.router.route_error(message, &error).await;
                return StepOutcome::Processed;
            }
            tracing::debug!(
                message = %message.id,
                retry = message.retry_count + 1,
                "agent not ready, requeueing to head"
            );
            if let Err(e) = inner.queue.requeue(message.id) {
                tracing::warn!(message = %message.id, error = %e, "requeue() rejected");
            }
            return StepOutcome::Deferred;
        }

        // Tell the terminal gateway which conversation streams next.
        inner
            .conversation_gateway
            .set_active_conversation(&message.conversation_id)
            .await;

        // Subscribe before injecting so a fast reply cannot slip past.
        let mut chat_events = inner.bus.subscribe();

        let framed = Self::frame_content(message);
        let outcome = inner
            .gateway
            .send_message_to_agent(orchestrator, &framed, config.runtime_type)
            .await;
        if !outcome.success {
            let error = outcome
                .error
                .unwrap_or_else(|| "prompt injection failed".to_string());
            tracing::error!(message = %message.id, error = %error, "delivery failed");
            if let Err(e) = inner.queue.fail(message.id, error.clone()) {
                tracing::warn!(message = %message.id, error = %e, "fail() rejected");
            }
            inner.router.route_error(message, &error).await;
            // No idle wait on delivery failure: the failed path must not
            // stall the queue behind a broken session.
            return StepOutcome::Processed;
        }

        match Self::await_response(inner, &mut chat_events, &message.conversation_id).await {
            Some(response) => {
                let _ = inner.queue.complete(message.id, Some(response.clone()));
                inner.router.route_response(message, &response).await;
            }
            None => {
                // Timeout still counts as processed.
                let marker = format!(
                    "[TIMEOUT] no orchestrator response within {:?}",
                    config.message_timeout
                );
                tracing::warn!(message = %message.id, "{marker}");
                let _ = inner.queue.complete(message.id, Some(marker.clone()));
                inner.router.route_response(message, &marker).await;
            }
        }

        // Post-completion idle wait: bounded and non-fatal. A timeout here
        // means advance, never requeue.
        let idle = inner
            .gateway
            .wait_for_agent_ready(
                orchestrator,
                config.post_idle_wait_timeout,
                config.runtime_type,
            )
            .await;
        if !idle {
            tracing::warn!(message = %message.id, "orchestrator still rendering after response, advancing");
        }
        StepOutcome::Processed
    }

    /// First chat event matching the conversation and originating from the
    /// orchestrator, within the message timeout.
    async fn await_response(
        inner: &Arc<ProcessorInner>,
        chat_events: &mut broadcast::Receiver<ChatEvent>,
        conversation_id: &str,
    ) -> Option<String> {
        let deadline = Instant::now() + inner.config.message_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match tokio::time::timeout_at(deadline, chat_events.recv()).await {
                Ok(Ok(ChatEvent::Message(message))) => {
                    if message.conversation_id == conversation_id
                        && message.from.kind == SenderKind::Orchestrator
                    {
                        return Some(message.content);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "chat bus lagged while awaiting response");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }

    /// The prefix must survive a round trip through terminal output so the
    /// conversation id is recoverable from the orchestrator's reply.
    fn frame_content(message: &QueuedMessage) -> String {
        match message.source {
            MessageSource::SystemEvent => {
                format!("[SYSTEM:{}] {}", message.conversation_id, message.content)
            }
            _ => format!("[CHAT:{}] {}", message.conversation_id, message.content),
        }
    }
}

impl Drop for QueueProcessor {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
