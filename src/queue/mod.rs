//! Message queue
//!
//! In-process FIFO feeding the queue processor. Bounded pending size,
//! bounded history, head-requeue for retries, and a broadcast event stream
//! so listeners can observe status transitions without touching queue
//! internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::{MAX_HISTORY_SIZE, MAX_QUEUE_SIZE};

/// Where a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    WebChat,
    SystemEvent,
    Slack,
    Whatsapp,
    Discord,
}

/// What happened to a delivered message, handed to source callbacks
#[derive(Debug, Clone)]
pub enum Delivery {
    Response(String),
    Error(String),
}

/// Completion callback carried by messenger-sourced messages
#[derive(Clone)]
pub struct CompletionCallback(Arc<dyn Fn(Delivery) + Send + Sync>);

impl CompletionCallback {
    pub fn new(f: impl Fn(Delivery) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, delivery: Delivery) {
        (self.0)(delivery);
    }
}

impl fmt::Debug for CompletionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompletionCallback")
    }
}

/// Source-specific payload. Unknown sources are unrepresentable.
#[derive(Debug, Clone)]
pub enum SourceMetadata {
    WebChat,
    SystemEvent,
    Slack {
        callback: CompletionCallback,
    },
    Whatsapp {
        chat_id: String,
        callback: CompletionCallback,
    },
    Discord {
        channel_id: String,
        callback: CompletionCallback,
    },
}

impl SourceMetadata {
    /// The callback, for sources that carry one
    pub fn callback(&self) -> Option<&CompletionCallback> {
        match self {
            SourceMetadata::Slack { callback }
            | SourceMetadata::Whatsapp { callback, .. }
            | SourceMetadata::Discord { callback, .. } => Some(callback),
            SourceMetadata::WebChat | SourceMetadata::SystemEvent => None,
        }
    }

    pub fn source(&self) -> MessageSource {
        match self {
            SourceMetadata::WebChat => MessageSource::WebChat,
            SourceMetadata::SystemEvent => MessageSource::SystemEvent,
            SourceMetadata::Slack { .. } => MessageSource::Slack,
            SourceMetadata::Whatsapp { .. } => MessageSource::Whatsapp,
            SourceMetadata::Discord { .. } => MessageSource::Discord,
        }
    }
}

/// Lifecycle of a queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Failed | MessageStatus::Cancelled
        )
    }
}

/// Input for `enqueue`
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: String,
    pub conversation_id: String,
    pub metadata: SourceMetadata,
}

/// A message owned by the queue
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub content: String,
    pub conversation_id: String,
    pub source: MessageSource,
    pub source_metadata: SourceMetadata,
    pub enqueued_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub retry_count: u32,
    /// Response text recorded on completion
    pub response: Option<String>,
    /// Error text recorded on failure
    pub error: Option<String>,
}

/// Error types for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue full: {0} messages pending")]
    QueueFull(usize),
    #[error("message not found: {0}")]
    NotFound(Uuid),
    #[error("another message is already processing: {0}")]
    AlreadyProcessing(Uuid),
}

/// Status transitions observable by listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    Enqueued { id: Uuid },
    ProcessingStarted { id: Uuid },
    Completed { id: Uuid },
    Failed { id: Uuid, error: String },
    Cancelled { id: Uuid },
    StatusUpdate { id: Uuid, status: MessageStatus },
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
}

struct QueueInner {
    pending: VecDeque<QueuedMessage>,
    processing: Option<QueuedMessage>,
    history: VecDeque<QueuedMessage>,
    stats: QueueStats,
}

/// The queue. Single processing slot; everything else is pending FIFO or
/// bounded history.
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    events: broadcast::Sender<QueueEvent>,
    max_pending: usize,
    max_history: usize,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_limits(MAX_QUEUE_SIZE, MAX_HISTORY_SIZE)
    }

    pub fn with_limits(max_pending: usize, max_history: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                processing: None,
                history: VecDeque::new(),
                stats: QueueStats::default(),
            }),
            events,
            max_pending,
            max_history,
        }
    }

    /// Observe queue events from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    /// Add a message to the tail of the pending queue
    pub fn enqueue(&self, new: NewMessage) -> Result<Uuid, QueueError> {
        let id = {
            let mut inner = self.inner.lock().unwrap();
            if inner.pending.len() >= self.max_pending {
                return Err(QueueError::QueueFull(inner.pending.len()));
            }
            let message = QueuedMessage {
                id: Uuid::new_v4(),
                content: new.content,
                conversation_id: new.conversation_id,
                source: new.metadata.source(),
                source_metadata: new.metadata,
                enqueued_at: Utc::now(),
                status: MessageStatus::Pending,
                retry_count: 0,
                response: None,
                error: None,
            };
            let id = message.id;
            inner.pending.push_back(message);
            id
        };
        self.emit(QueueEvent::Enqueued { id });
        Ok(id)
    }

    /// Oldest pending message, if any
    pub fn peek(&self) -> Option<QueuedMessage> {
        self.inner.lock().unwrap().pending.front().cloned()
    }

    /// Move a pending message into the processing slot
    pub fn start_processing(&self, id: Uuid) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(current) = &inner.processing {
                return Err(QueueError::AlreadyProcessing(current.id));
            }
            let idx = inner
                .pending
                .iter()
                .position(|m| m.id == id)
                .ok_or(QueueError::NotFound(id))?;
            let mut message = inner.pending.remove(idx).expect("index valid");
            message.status = MessageStatus::Processing;
            inner.processing = Some(message);
        }
        self.emit(QueueEvent::ProcessingStarted { id });
        Ok(())
    }

    fn take_processing(&self, id: Uuid) -> Result<QueuedMessage, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.processing {
            Some(current) if current.id == id => Ok(inner.processing.take().expect("checked")),
            _ => Err(QueueError::NotFound(id)),
        }
    }

    fn archive(&self, message: QueuedMessage) {
        let mut inner = self.inner.lock().unwrap();
        inner.history.push_back(message);
        while inner.history.len() > self.max_history {
            inner.history.pop_front();
        }
    }

    /// Mark the in-flight message completed
    pub fn complete(&self, id: Uuid, response: Option<String>) -> Result<(), QueueError> {
        let mut message = self.take_processing(id)?;
        message.status = MessageStatus::Completed;
        message.response = response;
        self.archive(message);
        self.inner.lock().unwrap().stats.total_processed += 1;
        self.emit(QueueEvent::Completed { id });
        self.emit(QueueEvent::StatusUpdate {
            id,
            status: MessageStatus::Completed,
        });
        Ok(())
    }

    /// Mark the in-flight message failed
    pub fn fail(&self, id: Uuid, error: impl Into<String>) -> Result<(), QueueError> {
        let error = error.into();
        let mut message = self.take_processing(id)?;
        message.status = MessageStatus::Failed;
        message.error = Some(error.clone());
        self.archive(message);
        self.inner.lock().unwrap().stats.total_failed += 1;
        self.emit(QueueEvent::Failed { id, error });
        self.emit(QueueEvent::StatusUpdate {
            id,
            status: MessageStatus::Failed,
        });
        Ok(())
    }

    /// Return the in-flight message to the HEAD of the pending queue so its
    /// position relative to later arrivals is preserved.
    pub fn requeue(&self, id: Uuid) -> Result<(), QueueError> {
        let mut message = self.take_processing(id)?;
        message.status = MessageStatus::Pending;
        message.retry_count += 1;
        self.inner.lock().unwrap().pending.push_front(message);
        self.emit(QueueEvent::StatusUpdate {
            id,
            status: MessageStatus::Pending,
        });
        Ok(())
    }

    /// Cancel a non-terminal message
    pub fn cancel(&self, id: Uuid) -> Result<(), QueueError> {
        let message = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(idx) = inner.pending.iter().position(|m| m.id == id) {
                inner.pending.remove(idx)
            } else {
                match &inner.processing {
                    Some(current) if current.id == id => inner.processing.take(),
                    _ => None,
                }
            }
        };
        let mut message = message.ok_or(QueueError::NotFound(id))?;
        message.status = MessageStatus::Cancelled;
        self.archive(message);
        self.inner.lock().unwrap().stats.total_cancelled += 1;
        self.emit(QueueEvent::Cancelled { id });
        self.emit(QueueEvent::StatusUpdate {
            id,
            status: MessageStatus::Cancelled,
        });
        Ok(())
    }

    /// Look a message up anywhere: in flight, pending, or history
    pub fn get_message(&self, id: Uuid) -> Option<QueuedMessage> {
        let inner = self.inner.lock().unwrap();
        if let Some(current) = &inner.processing {
            if current.id == id {
                return Some(current.clone());
            }
        }
        inner
            .pending
            .iter()
            .chain(inner.history.iter())
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn history(&self) -> Vec<QueuedMessage> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().unwrap().stats
    }

    /// Id of the message currently in the processing slot
    pub fn current_message_id(&self) -> Option<Uuid> {
        self.inner.lock().unwrap().processing.as_ref().map(|m| m.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chat_message(content: &str, conversation: &str) -> NewMessage {
        NewMessage {
            content: content.to_string(),
            conversation_id: conversation.to_string(),
            metadata: SourceMetadata::WebChat,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new();
        let a = queue.enqueue(chat_message("a", "c1")).unwrap();
        let _b = queue.enqueue(chat_message("b", "c1")).unwrap();

        assert_eq!(queue.peek().unwrap().id, a);
        queue.start_processing(a).unwrap();
        queue.complete(a, None).unwrap();
        assert_eq!(queue.peek().unwrap().content, "b");
    }

    #[test]
    fn test_queue_full() {
        let queue = MessageQueue::with_limits(2, 10);
        queue.enqueue(chat_message("a", "c")).unwrap();
        queue.enqueue(chat_message("b", "c")).unwrap();
        assert!(matches!(
            queue.enqueue(chat_message("c", "c")),
            Err(QueueError::QueueFull(2))
        ));
    }

    #[test]
    fn test_requeue_goes_to_head_and_increments_retry() {
        let queue = MessageQueue::new();
        let a = queue.enqueue(chat_message("a", "c")).unwrap();
        let b = queue.enqueue(chat_message("b", "c")).unwrap();

        queue.start_processing(a).unwrap();
        queue.requeue(a).unwrap();

        let head = queue.peek().unwrap();
        assert_eq!(head.id, a, "requeued message returns to head, before {b}");
        assert_eq!(head.retry_count, 1);
        assert_eq!(head.status, MessageStatus::Pending);
    }

    #[test]
    fn test_single_processing_slot() {
        let queue = MessageQueue::new();
        let a = queue.enqueue(chat_message("a", "c")).unwrap();
        let b = queue.enqueue(chat_message("b", "c")).unwrap();

        queue.start_processing(a).unwrap();
        assert!(matches!(
            queue.start_processing(b),
            Err(QueueError::AlreadyProcessing(_))
        ));
    }

    #[test]
    fn test_complete_updates_stats_and_history() {
        let queue = MessageQueue::new();
        let a = queue.enqueue(chat_message("a", "c")).unwrap();
        queue.start_processing(a).unwrap();
        queue.complete(a, Some("done".to_string())).unwrap();

        assert_eq!(queue.stats().total_processed, 1);
        let history = queue.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, MessageStatus::Completed);
        assert_eq!(history[0].response.as_deref(), Some("done"));
    }

    #[test]
    fn test_history_is_bounded() {
        let queue = MessageQueue::with_limits(100, 3);
        for i in 0..5 {
            let id = queue.enqueue(chat_message(&format!("m{i}"), "c")).unwrap();
            queue.start_processing(id).unwrap();
            queue.complete(id, None).unwrap();
        }
        let history = queue.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m2");
    }

    #[test]
    fn test_cancel_pending_and_processing() {
        let queue = MessageQueue::new();
        let a = queue.enqueue(chat_message("a", "c")).unwrap();
        let b = queue.enqueue(chat_message("b", "c")).unwrap();

        queue.cancel(b).unwrap();
        assert_eq!(queue.pending_len(), 1);

        queue.start_processing(a).unwrap();
        queue.cancel(a).unwrap();
        assert!(queue.current_message_id().is_none());
        assert_eq!(queue.stats().total_cancelled, 2);
    }

    #[test]
    fn test_not_found() {
        let queue = MessageQueue::new();
        let ghost = Uuid::new_v4();
        assert!(matches!(queue.cancel(ghost), Err(QueueError::NotFound(_))));
        assert!(matches!(
            queue.complete(ghost, None),
            Err(QueueError::NotFound(_))
        ));
        assert!(matches!(
            queue.start_processing(ghost),
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let queue = MessageQueue::new();
        let mut rx = queue.subscribe();
        let id = queue.enqueue(chat_message("a", "c")).unwrap();
        queue.start_processing(id).unwrap();
        queue.complete(id, None).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), QueueEvent::Enqueued { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            QueueEvent::ProcessingStarted { .. }
        ));
        assert!(matches!(rx.recv().await.unwrap(), QueueEvent::Completed { .. }));
    }

    #[test]
    fn test_callback_metadata() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let hits_clone = Arc::clone(&hits);
        let callback = CompletionCallback::new(move |delivery| {
            if let Delivery::Response(text) = delivery {
                hits_clone.lock().unwrap().push(text);
            }
        });
        let metadata = SourceMetadata::Slack { callback };
        metadata
            .callback()
            .unwrap()
            .invoke(Delivery::Response("ok".to_string()));
        assert_eq!(hits.lock().unwrap().as_slice(), ["ok"]);
    }
}
