//! Chat event bus
//!
//! Typed pub/sub carrying `message` events between the gateway layer, the
//! queue processor, and anything else that wants to observe conversation
//! traffic. Publishing never blocks; every subscriber owns an independent
//! receiver and slow subscribers lag rather than stalling the publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const BUS_CAPACITY: usize = 256;

/// Who produced a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    User,
    Orchestrator,
    Agent,
    System,
}

/// Message originator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSender {
    #[serde(rename = "type")]
    pub kind: SenderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatSender {
    pub fn orchestrator() -> Self {
        Self {
            kind: SenderKind::Orchestrator,
            name: None,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SenderKind::User,
            name: Some(name.into()),
        }
    }

    pub fn system() -> Self {
        Self {
            kind: SenderKind::System,
            name: None,
        }
    }
}

/// A message flowing through a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: String,
    pub from: ChatSender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(conversation_id: impl Into<String>, from: ChatSender, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            from,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Events published on the bus. Subscribers match on the variants they
/// handle; unknown variants are impossible by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatEvent {
    /// A chat message was produced somewhere in the system
    Message(ChatMessage),
}

/// The bus itself. Cheap to clone; all clones share one channel.
#[derive(Clone)]
pub struct ChatEventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl Default for ChatEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }

    /// Convenience wrapper for the common case
    pub fn publish_message(&self, message: ChatMessage) {
        self.publish(ChatEvent::Message(message));
    }

    /// New independent subscription; only events published after this call
    /// are observed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = ChatEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish_message(ChatMessage::new("c1", ChatSender::orchestrator(), "hi"));

        let ChatEvent::Message(msg) = rx.recv().await.unwrap();
        assert_eq!(msg.conversation_id, "c1");
        assert_eq!(msg.from.kind, SenderKind::Orchestrator);
        assert_eq!(msg.content, "hi");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = ChatEventBus::new();
        bus.publish_message(ChatMessage::new("c1", ChatSender::system(), "dropped"));
    }

    #[tokio::test]
    async fn test_subscribers_are_independent() {
        let bus = ChatEventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish_message(ChatMessage::new("c1", ChatSender::user("amy"), "x"));

        let ChatEvent::Message(m1) = rx1.recv().await.unwrap();
        let ChatEvent::Message(m2) = rx2.recv().await.unwrap();
        assert_eq!(m1.id, m2.id);
    }

    #[test]
    fn test_sender_serialization_shape() {
        let json = serde_json::to_value(ChatSender::orchestrator()).unwrap();
        assert_eq!(json["type"], "orchestrator");
    }
}
