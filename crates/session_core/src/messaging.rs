use std::{fmt, sync::Arc};

use reqwest::Method;
use shared::{
    domain::{ConversationId, RoomId},
    protocol::{MessageRecord, SendMessageRequest, SentMessageResponse, UpdateLastReadRequest},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    request_queue::HttpRequest,
    session::{Registration, Session},
    transport::service_url,
};

/// Where a message goes: a room or a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatTarget {
    Room(RoomId),
    Conversation(ConversationId),
}

impl ChatTarget {
    fn path(&self) -> String {
        match self {
            ChatTarget::Room(id) => format!("rooms/{id}"),
            ChatTarget::Conversation(id) => format!("conversations/{id}"),
        }
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

pub fn send_message_request(
    registration: &Registration,
    target: &ChatTarget,
    content: &str,
) -> Result<HttpRequest> {
    let url = service_url(
        &registration.endpoints.messaging,
        &format!("{}/messages", target.path()),
        &[],
    )?;
    HttpRequest::new(Method::POST, url).with_json(&SendMessageRequest {
        content: content.to_string(),
        client_request_token: Uuid::new_v4().to_string(),
    })
}

pub fn update_last_read_request(
    registration: &Registration,
    target: &ChatTarget,
    message_id: &str,
) -> Result<HttpRequest> {
    let url = service_url(&registration.endpoints.messaging, &target.path(), &[])?;
    HttpRequest::new(Method::POST, url).with_json(&UpdateLastReadRequest {
        last_read_message_id: message_id.to_string(),
    })
}

impl Session {
    /// Posts `content` and returns the message as the service stored it.
    pub async fn send_message(&self, target: &ChatTarget, content: &str) -> Result<MessageRecord> {
        let registration = self.require_registration().await?;
        let response: SentMessageResponse = self
            .requests()
            .send(send_message_request(&registration, target, content)?)
            .await?
            .require_success("Failed to send message")?
            .parse("Failed to send message")?;
        debug!(%target, message = %response.message.message_id, "messaging: sent");
        Ok(response.message)
    }

    /// Moves the read marker to `message_id`, then refetches the target so
    /// its `last_read` (and with it the unread state) follows.
    pub async fn update_last_read(
        self: &Arc<Self>,
        target: &ChatTarget,
        message_id: &str,
    ) -> Result<()> {
        let registration = self.require_registration().await?;
        self.requests()
            .send(update_last_read_request(&registration, target, message_id)?)
            .await?
            .require_success("Failed to set LastReadMessageID")?;

        let refetched = match target {
            ChatTarget::Room(id) => self.fetch_room(id).await.map(|_| ()),
            ChatTarget::Conversation(id) => self.fetch_conversation(id).await.map(|_| ()),
        };
        if let Err(err) = refetched {
            warn!(%target, %err, "messaging: refetch after read marker failed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/messaging_tests.rs"]
mod tests;
