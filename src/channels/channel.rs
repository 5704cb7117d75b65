//! Channel trait and the message types that flow through it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;

/// A message received from a chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Platform message id (Slack `ts`); replies thread under it.
    pub id: String,
    /// Channel that produced the message ("slack", "cli").
    pub channel: String,
    /// Chat workspace (Slack team id).
    pub workspace_id: String,
    pub user_id: String,
    /// Display name, when the platform provides one.
    pub user_name: Option<String>,
    pub content: String,
    /// Parent message id when this is a thread reply.
    pub thread_id: Option<String>,
    /// Platform subtype (edits, joins, bot posts). `None` for plain
    /// human-authored messages.
    pub subtype: Option<String>,
    /// Platform-specific routing data (e.g. the Slack conversation id).
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            user_name: None,
            content: content.into(),
            thread_id: None,
            subtype: None,
            metadata: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Name to credit in ticket footers.
    pub fn author(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.user_id)
    }
}

/// A reply to send back through the originating channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingResponse {
    pub content: String,
    /// Message id to thread the reply under.
    pub thread_id: Option<String>,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thread_id: None,
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Stream of inbound messages from a channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A chat platform connection.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving messages. Call once.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send `response` in reply to `msg`.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_is_top_level() {
        let msg = IncomingMessage::new("slack", "T1", "U1", "hello");
        assert!(msg.thread_id.is_none());
        assert!(msg.subtype.is_none());
        assert!(!msg.id.is_empty());
        assert_eq!(msg.author(), "U1");
    }

    #[test]
    fn builders_set_fields() {
        let msg = IncomingMessage::new("slack", "T1", "U1", "hi")
            .with_id("1700000000.000100")
            .with_thread("1699999999.000001")
            .with_subtype("message_changed")
            .with_user_name("Jane")
            .with_metadata(serde_json::json!({"channel": "C1"}));

        assert_eq!(msg.id, "1700000000.000100");
        assert_eq!(msg.thread_id.as_deref(), Some("1699999999.000001"));
        assert_eq!(msg.subtype.as_deref(), Some("message_changed"));
        assert_eq!(msg.author(), "Jane");
        assert_eq!(msg.metadata["channel"], "C1");
    }

    #[test]
    fn outgoing_in_thread() {
        let reply = OutgoingResponse::text("ok").in_thread("123.456");
        assert_eq!(reply.thread_id.as_deref(), Some("123.456"));
    }
}
