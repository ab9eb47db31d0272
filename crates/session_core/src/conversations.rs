use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use shared::{
    domain::{ConversationId, NotifyPref, ProfileId, Subsystem, Visibility},
    protocol::{
        ConversationEnvelope, ConversationRecord, ConversationsPage, CreateConversationRequest,
    },
};
use tracing::{debug, warn};

use crate::{
    channel_mux::{ChannelMessage, SubscriberKey},
    collection::{update_field, Entity, EntityHandle, SynchronizedCollection},
    contacts::Contact,
    error::{Result, SessionError},
    request_queue::HttpRequest,
    session::{Domain, Registration, Session, Synced},
    transport::{service_url, ServiceResponse},
};

pub const CONVERSATION_KLASS: &str = "Conversation";
const CONVERSATIONS_OWNER: &str = "conversations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: String,
    pub visibility: Visibility,
    pub channel: String,
    pub last_sent: Option<DateTime<Utc>>,
    pub last_read: Option<DateTime<Utc>>,
    pub created_on: Option<DateTime<Utc>>,
    pub desktop_notification: NotifyPref,
    pub mobile_notification: NotifyPref,
    /// Each member is held in the contacts collection for as long as the
    /// conversation lists it.
    pub members: Vec<EntityHandle<Contact>>,
}

impl Conversation {
    pub fn has_unread(&self) -> bool {
        match (self.last_sent, self.last_read) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(sent), Some(read)) => sent > read,
        }
    }
}

pub struct ConversationUpdate {
    pub name: String,
    pub record: ConversationRecord,
    pub members: Vec<EntityHandle<Contact>>,
}

impl Entity for Conversation {
    type Id = ConversationId;
    type Update = ConversationUpdate;

    fn create(id: ConversationId, update: ConversationUpdate) -> Self {
        let record = update.record;
        let prefs = record.preferences.notification_preferences;
        Self {
            id,
            name: update.name,
            visibility: record.visibility,
            channel: record.channel,
            last_sent: record.last_sent,
            last_read: record.last_read,
            created_on: record.created_on,
            desktop_notification: prefs.desktop_notification_preferences,
            mobile_notification: prefs.mobile_notification_preferences,
            members: update.members,
        }
    }

    fn apply(&mut self, update: ConversationUpdate) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let record = update.record;
        let prefs = record.preferences.notification_preferences;
        self.name = update.name;
        update_field!(changed, self.visibility, record.visibility, "visibility");
        update_field!(changed, self.channel, record.channel, "channel");
        update_field!(changed, self.last_sent, record.last_sent, "last_sent");
        update_field!(changed, self.last_read, record.last_read, "last_read");
        update_field!(changed, self.created_on, record.created_on, "created_on");
        update_field!(
            changed,
            self.desktop_notification,
            prefs.desktop_notification_preferences,
            "desktop_notification"
        );
        update_field!(
            changed,
            self.mobile_notification,
            prefs.mobile_notification_preferences,
            "mobile_notification"
        );
        update_field!(changed, self.members, update.members, "members");
        changed
    }
}

pub fn parse_conversation(record: Value) -> Result<ConversationRecord> {
    serde_json::from_value(record).map_err(|err| {
        SessionError::bad_response(format!("Failed to parse Conversation node: {err}"))
    })
}

/// Name for an unnamed conversation: the other members' display names.
pub fn generated_name(
    contacts: &SynchronizedCollection<Contact>,
    members: &[EntityHandle<Contact>],
    self_id: &ProfileId,
) -> String {
    members
        .iter()
        .filter_map(|member| contacts.get(*member))
        .filter(|contact| &contact.id != self_id)
        .map(|contact| contact.display_name.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Upserts a conversation, taking holds on its members and releasing the
/// holds of the membership it replaces.
pub fn upsert_conversation(
    domain: &mut Domain,
    self_id: &ProfileId,
    record: ConversationRecord,
) -> EntityHandle<Conversation> {
    let members: Vec<EntityHandle<Contact>> = record
        .members
        .iter()
        .cloned()
        .map(|member| {
            let id = member.profile_id.clone();
            let email = member.email.clone();
            domain.contacts.reference(id, &email, member.into())
        })
        .collect();
    let previous: Vec<EntityHandle<Contact>> = domain
        .conversations
        .any_by_id(&record.conversation_id)
        .map(|conversation| conversation.members.clone())
        .unwrap_or_default();

    let name = if record.name.is_empty() {
        generated_name(&domain.contacts, &members, self_id)
    } else {
        record.name.clone()
    };
    let id = record.conversation_id.clone();
    let handle = domain.conversations.upsert(
        id,
        &name,
        ConversationUpdate {
            name: name.clone(),
            record,
            members,
        },
    );

    for member in previous {
        domain.contacts.release(member);
    }
    handle
}

fn is_conversation_push(message: &ChannelMessage) -> bool {
    message.record.is_some()
}

impl Synced for Conversation {
    const SUBSYSTEM: Subsystem = Subsystem::Conversations;

    fn collection(domain: &mut Domain) -> &mut SynchronizedCollection<Self> {
        &mut domain.conversations
    }

    fn page_request(
        registration: &Registration,
        page_size: u32,
        next: Option<&str>,
    ) -> Result<HttpRequest> {
        let page_size = page_size.to_string();
        let mut query = vec![("max-results", page_size.as_str())];
        if let Some(next) = next {
            query.push(("next-token", next));
        }
        Ok(HttpRequest::get(service_url(
            &registration.endpoints.messaging,
            "conversations",
            &query,
        )?))
    }

    fn apply_page(
        domain: &mut Domain,
        registration: &Registration,
        response: ServiceResponse,
    ) -> Result<Option<String>> {
        let page: ConversationsPage = response
            .require_success("Failed to fetch conversations")?
            .parse("Failed to find Conversations node in response")?;
        for record in page.conversations {
            match parse_conversation(record) {
                Ok(record) => {
                    upsert_conversation(domain, &registration.profile_id, record);
                }
                Err(err) => warn!(%err, "conversations: skipping malformed conversation"),
            }
        }
        Ok(page.next_token)
    }
}

impl Session {
    pub(crate) async fn start_conversations(
        self: &Arc<Self>,
        episode: u64,
        registration: &Registration,
    ) {
        self.subscribe_channel(
            episode,
            &registration.device_channel,
            SubscriberKey::new(CONVERSATIONS_OWNER, Some(CONVERSATION_KLASS)),
            self.push_handler(Subsystem::Conversations, is_conversation_push),
        )
        .await;
        self.refresh::<Conversation>().await;
    }

    pub async fn refresh_conversations(self: &Arc<Self>) {
        self.refresh::<Conversation>().await;
    }

    pub async fn conversation_by_id(&self, id: &ConversationId) -> Option<Conversation> {
        self.domain.lock().await.conversations.by_id(id).cloned()
    }

    pub async fn conversation_by_name(&self, name: &str) -> Option<Conversation> {
        self.domain.lock().await.conversations.by_name(name).cloned()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.domain
            .lock()
            .await
            .conversations
            .iter_live()
            .cloned()
            .collect()
    }

    /// Resolves a conversation's members, tombstones included.
    pub async fn conversation_members(&self, id: &ConversationId) -> Vec<Contact> {
        let domain = self.domain.lock().await;
        domain
            .conversations
            .any_by_id(id)
            .map(|conversation| {
                conversation
                    .members
                    .iter()
                    .filter_map(|member| domain.contacts.get(*member).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fetches one conversation and merges it into the collection.
    pub async fn fetch_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let registration = self.require_registration().await?;
        let url = service_url(
            &registration.endpoints.messaging,
            &format!("conversations/{id}"),
            &[],
        )?;
        let envelope: ConversationEnvelope = self
            .requests()
            .send(HttpRequest::get(url))
            .await?
            .require_success("Failed to fetch conversation")?
            .parse("Failed to fetch conversation")?;
        self.merge_conversation(&registration, envelope.conversation, "Failed to fetch conversation")
            .await
    }

    /// Starts a conversation with `members` (the caller is added by the
    /// service) and merges it into the collection.
    pub async fn create_conversation(&self, members: &[ProfileId]) -> Result<Conversation> {
        let registration = self.require_registration().await?;
        let url = service_url(&registration.endpoints.messaging, "conversations", &[])?;
        let request = HttpRequest::new(Method::POST, url).with_json(&CreateConversationRequest {
            profile_ids: members.to_vec(),
        })?;
        let envelope: ConversationEnvelope = self
            .requests()
            .send(request)
            .await?
            .require_success("Failed to create conversation")?
            .parse("Failed to create conversation")?;
        debug!(members = members.len(), "conversations: created");
        self.merge_conversation(&registration, envelope.conversation, "Failed to create conversation")
            .await
    }

    /// Looks up the existing conversation with exactly `members`. Anything
    /// other than a single match is an error.
    pub async fn find_conversation(&self, members: &[ProfileId]) -> Result<Conversation> {
        let registration = self.require_registration().await?;
        let ids = members
            .iter()
            .map(ProfileId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let url = service_url(
            &registration.endpoints.messaging,
            "conversations",
            &[("profile-ids", ids.as_str())],
        )?;
        let page: ConversationsPage = self
            .requests()
            .send(HttpRequest::get(url))
            .await?
            .require_success("Failed to find conversation")?
            .parse("Failed to find conversation")?;
        let [record] = <[Value; 1]>::try_from(page.conversations).map_err(|found| {
            SessionError::network(format!(
                "Failed to find conversation: {} matches",
                found.len()
            ))
        })?;
        self.merge_conversation(&registration, record, "Failed to find conversation")
            .await
    }

    async fn merge_conversation(
        &self,
        registration: &Registration,
        record: Value,
        what: &str,
    ) -> Result<Conversation> {
        let record = parse_conversation(record)?;
        let mut domain = self.domain.lock().await;
        let handle = upsert_conversation(&mut domain, &registration.profile_id, record);
        domain.settle();
        domain
            .conversations
            .get(handle)
            .cloned()
            .ok_or_else(|| SessionError::bad_response(what.to_string()))
    }

    pub(crate) async fn conversations_push(&self, message: &ChannelMessage) -> Result<()> {
        let registration = self.require_registration().await?;
        let record = parse_conversation(message.record.clone().unwrap_or(Value::Null))?;
        let mut domain = self.domain.lock().await;
        upsert_conversation(&mut domain, &registration.profile_id, record);
        domain.settle();
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/conversations_tests.rs"]
mod tests;
