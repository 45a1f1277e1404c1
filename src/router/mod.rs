//! Response router
//!
//! Takes a completed (or failed) message and delivers its outcome back to
//! wherever the message came from. Web chat needs nothing — the chat event
//! bus already carried the response to the websocket layer. Messenger
//! sources get their completion callback invoked. System events are logged.

use async_trait::async_trait;
use std::sync::Arc;

use crate::queue::{Delivery, QueuedMessage, SourceMetadata};

/// Boundary contract to the external chat-conversation store. The core
/// only ever pushes system messages through it.
#[async_trait]
pub trait SystemChatSink: Send + Sync {
    async fn push_system_message(&self, conversation_id: &str, content: &str);
}

/// Sink for embedders without a chat store
pub struct NullChatSink;

#[async_trait]
impl SystemChatSink for NullChatSink {
    async fn push_system_message(&self, conversation_id: &str, content: &str) {
        tracing::debug!(conversation_id, content, "system chat message dropped (no sink)");
    }
}

pub struct ResponseRouter {
    system_chat: Arc<dyn SystemChatSink>,
}

impl ResponseRouter {
    pub fn new(system_chat: Arc<dyn SystemChatSink>) -> Self {
        Self { system_chat }
    }

    /// Route a response to the message's originating source
    pub async fn route_response(&self, message: &QueuedMessage, response: &str) {
        match &message.source_metadata {
            SourceMetadata::WebChat => {
                // Already delivered through the chat event bus
            }
            SourceMetadata::SystemEvent => {
                tracing::info!(
                    conversation = %message.conversation_id,
                    response_len = response.len(),
                    "system event processed"
                );
            }
            metadata => {
                if let Some(callback) = metadata.callback() {
                    callback.invoke(Delivery::Response(response.to_string()));
                }
            }
        }
    }

    /// Route a delivery error: post a system message into the conversation
    /// and fire the source's callback with the error.
    pub async fn route_error(&self, message: &QueuedMessage, error: &str) {
        self.system_chat
            .push_system_message(&message.conversation_id, error)
            .await;
        if let Some(callback) = message.source_metadata.callback() {
            callback.invoke(Delivery::Error(error.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CompletionCallback, MessageQueue, NewMessage};
    use std::sync::Mutex;

    pub(crate) struct RecordingChatSink {
        pub messages: Mutex<Vec<(String, String)>>,
    }

    impl RecordingChatSink {
        pub fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SystemChatSink for RecordingChatSink {
        async fn push_system_message(&self, conversation_id: &str, content: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), content.to_string()));
        }
    }

    fn message_with(metadata: SourceMetadata) -> QueuedMessage {
        let queue = MessageQueue::new();
        let id = queue
            .enqueue(NewMessage {
                content: "hello".to_string(),
                conversation_id: "c1".to_string(),
                metadata,
            })
            .unwrap();
        queue.get_message(id).unwrap()
    }

    #[tokio::test]
    async fn test_messenger_response_fires_callback() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let delivered_clone = Arc::clone(&delivered);
        let message = message_with(SourceMetadata::Discord {
            channel_id: "ch-9".to_string(),
            callback: CompletionCallback::new(move |delivery| {
                if let Delivery::Response(text) = delivery {
                    delivered_clone.lock().unwrap().push(text);
                }
            }),
        });

        let router = ResponseRouter::new(Arc::new(NullChatSink));
        router.route_response(&message, "the answer").await;
        assert_eq!(delivered.lock().unwrap().as_slice(), ["the answer"]);
    }

    #[tokio::test]
    async fn test_web_chat_response_is_noop() {
        let sink = Arc::new(RecordingChatSink::new());
        let router = ResponseRouter::new(Arc::clone(&sink) as Arc<dyn SystemChatSink>);
        let message = message_with(SourceMetadata::WebChat);
        router.route_response(&message, "already delivered").await;
        assert!(sink.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_error_posts_system_message_and_fires_callback() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);
        let message = message_with(SourceMetadata::Slack {
            callback: CompletionCallback::new(move |delivery| {
                if let Delivery::Error(text) = delivery {
                    errors_clone.lock().unwrap().push(text);
                }
            }),
        });

        let sink = Arc::new(RecordingChatSink::new());
        let router = ResponseRouter::new(Arc::clone(&sink) as Arc<dyn SystemChatSink>);
        router.route_error(&message, "Message delivery failed").await;

        let posted = sink.messages.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "c1");
        assert!(posted[0].1.contains("delivery failed"));
        assert_eq!(errors.lock().unwrap().as_slice(), ["Message delivery failed"]);
    }
}
