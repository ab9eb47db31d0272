use std::{collections::HashMap, sync::Arc};

use reqwest::Method;
use serde_json::Value;
use shared::{
    domain::{Availability, ProfileId, Subsystem},
    protocol::{
        ContactRecord, DeviceStatusRequest, InviteContactRequest, InviteProfile, MemberRecord,
        PresenceListResponse, PresenceRecord, PresenceSettingsRequest, CONTACTS_NEXT_TOKEN_HEADER,
    },
};
use tracing::{debug, info, warn};

use crate::{
    channel_mux::{ChannelMessage, SubscriberKey, SubscriptionId},
    collection::{Entity, SynchronizedCollection},
    error::{Result, SessionError},
    request_queue::HttpRequest,
    session::{Domain, Registration, Session, Synced},
    transport::{service_url, ServiceResponse},
};

pub const PRESENCE_KLASS: &str = "Presence";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ProfileId,
    pub email: String,
    pub full_name: String,
    pub display_name: String,
    pub presence_channel: Option<String>,
    pub profile_channel: Option<String>,
    pub availability: Availability,
    /// Revision of the last presence applied; 0 until the first one.
    pub revision: i64,
}

impl Contact {
    /// Applies a presence record unless an equal or newer revision was
    /// already seen.
    pub fn apply_presence(&mut self, record: &PresenceRecord) -> Vec<&'static str> {
        if record.revision < self.revision {
            return Vec::new();
        }
        self.revision = record.revision;
        if self.availability == record.availability {
            return Vec::new();
        }
        self.availability = record.availability;
        vec!["availability"]
    }
}

#[derive(Debug, Clone)]
pub struct ContactUpdate {
    pub email: String,
    pub full_name: String,
    pub display_name: String,
    pub presence_channel: Option<String>,
    pub profile_channel: Option<String>,
}

impl From<ContactRecord> for ContactUpdate {
    fn from(record: ContactRecord) -> Self {
        Self {
            email: record.email,
            full_name: record.full_name,
            display_name: record.display_name,
            presence_channel: record.presence_channel,
            profile_channel: record.profile_channel,
        }
    }
}

impl From<MemberRecord> for ContactUpdate {
    fn from(record: MemberRecord) -> Self {
        Self {
            email: record.email,
            full_name: record.full_name,
            display_name: record.display_name,
            presence_channel: Some(record.presence_channel),
            profile_channel: None,
        }
    }
}

impl Entity for Contact {
    type Id = ProfileId;
    type Update = ContactUpdate;

    fn create(id: ProfileId, update: ContactUpdate) -> Self {
        Self {
            id,
            email: update.email,
            full_name: update.full_name,
            display_name: update.display_name,
            presence_channel: update.presence_channel,
            profile_channel: update.profile_channel,
            availability: Availability::Unknown,
            revision: 0,
        }
    }

    // The email is the collection name, so a change is reported as "name".
    fn apply(&mut self, update: ContactUpdate) -> Vec<&'static str> {
        let mut changed = Vec::new();
        self.email = update.email;
        if self.full_name != update.full_name {
            self.full_name = update.full_name;
            changed.push("full_name");
        }
        if self.display_name != update.display_name {
            self.display_name = update.display_name;
            changed.push("display_name");
        }
        if self.presence_channel.is_none() && update.presence_channel.is_some() {
            self.presence_channel = update.presence_channel;
            changed.push("presence_channel");
        }
        if self.profile_channel.is_none() && update.profile_channel.is_some() {
            self.profile_channel = update.profile_channel;
            changed.push("profile_channel");
        }
        changed
    }
}

/// Upserts a contact from the contacts list.
pub fn upsert_contact(contacts: &mut SynchronizedCollection<Contact>, record: ContactRecord) {
    let id = record.id.clone();
    let email = record.email.clone();
    contacts.upsert(id, &email, record.into());
}

/// Applies a presence record to a known contact.
pub fn apply_presence(
    contacts: &mut SynchronizedCollection<Contact>,
    record: &PresenceRecord,
) -> Result<()> {
    let found = contacts.modify(&record.profile_id, |contact| contact.apply_presence(record));
    if found {
        Ok(())
    } else {
        Err(SessionError::bad_response(format!(
            "Contact {} not found; cannot update presence",
            record.profile_id
        )))
    }
}

/// Presence channel subscriptions held for contacts in the list.
#[derive(Debug, Default)]
pub(crate) struct PresenceSubscriptions {
    by_contact: HashMap<ProfileId, SubscriptionId>,
}

fn presence_key(id: &ProfileId) -> SubscriberKey {
    SubscriberKey::new(format!("contacts/{id}"), Some(PRESENCE_KLASS))
}

fn is_presence_push(message: &ChannelMessage) -> bool {
    message.record.is_some()
}

impl Synced for Contact {
    const SUBSYSTEM: Subsystem = Subsystem::Contacts;

    fn collection(domain: &mut Domain) -> &mut SynchronizedCollection<Self> {
        &mut domain.contacts
    }

    fn page_request(
        registration: &Registration,
        _page_size: u32,
        next: Option<&str>,
    ) -> Result<HttpRequest> {
        let query: Vec<(&str, &str)> = next.map(|token| ("next_token", token)).into_iter().collect();
        Ok(HttpRequest::get(service_url(
            &registration.endpoints.contacts,
            "contacts",
            &query,
        )?))
    }

    fn apply_page(
        domain: &mut Domain,
        _registration: &Registration,
        response: ServiceResponse,
    ) -> Result<Option<String>> {
        let response = response.require_success("Failed to fetch contacts")?;
        let records: Vec<Value> = response.parse("Failed to parse contacts")?;
        for record in records {
            match serde_json::from_value::<ContactRecord>(record) {
                Ok(record) => upsert_contact(&mut domain.contacts, record),
                Err(err) => warn!(%err, "contacts: skipping malformed contact"),
            }
        }
        Ok(response
            .header(CONTACTS_NEXT_TOKEN_HEADER)
            .map(str::to_string))
    }
}

impl Session {
    pub(crate) async fn start_contacts(self: &Arc<Self>) {
        self.refresh::<Contact>().await;
    }

    pub async fn refresh_contacts(self: &Arc<Self>) {
        self.refresh::<Contact>().await;
    }

    pub async fn contact_by_id(&self, id: &ProfileId) -> Option<Contact> {
        self.domain.lock().await.contacts.by_id(id).cloned()
    }

    pub async fn contact_by_email(&self, email: &str) -> Option<Contact> {
        self.domain.lock().await.contacts.by_name(email).cloned()
    }

    /// Contacts currently in the list.
    pub async fn contacts(&self) -> Vec<Contact> {
        self.domain
            .lock()
            .await
            .contacts
            .iter_live()
            .cloned()
            .collect()
    }

    /// Sends an invite, then refetches the list since the reply carries no
    /// contact details.
    pub async fn invite_contact(self: &Arc<Self>, email: &str) -> Result<()> {
        let registration = self.require_registration().await?;
        let url = service_url(&registration.endpoints.contacts, "invites", &[])?;
        let request = HttpRequest::new(Method::POST, url).with_json(&InviteContactRequest {
            profile: InviteProfile {
                email: email.to_string(),
            },
        })?;
        self.requests()
            .send(request)
            .await?
            .require_success("Failed to add/invite contact")?;
        info!(email, "contacts: invited");
        self.refresh::<Contact>().await;
        Ok(())
    }

    /// Drops the contact locally right away; a failed delete refetches the
    /// list to put it back.
    pub async fn remove_contact(self: &Arc<Self>, email: &str) -> Result<()> {
        let registration = self.require_registration().await?;
        let id = {
            let mut domain = self.domain.lock().await;
            let Some(id) = domain.contacts.by_name(email).map(|contact| contact.id.clone()) else {
                return Err(SessionError::network(format!(
                    "Failed to remove unknown contact {email}"
                )));
            };
            domain.contacts.kill(&id);
            domain.settle();
            id
        };
        self.sync_presence_subscriptions().await;

        let url = service_url(
            &registration.endpoints.contacts,
            &format!("contacts/{id}"),
            &[],
        )?;
        let outcome = match self
            .requests()
            .send(HttpRequest::new(Method::DELETE, url))
            .await
        {
            Ok(response) => response
                .require_success("Failed to remove contact")
                .map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(email, %err, "contacts: remove failed, refetching");
            self.refresh::<Contact>().await;
        }
        outcome
    }

    pub async fn set_device_status(&self, status: &str) -> Result<()> {
        let registration = self.require_registration().await?;
        let url = service_url(&registration.endpoints.presence, "devicestatus", &[])?;
        let request = HttpRequest::new(Method::PUT, url).with_json(&DeviceStatusRequest {
            status: status.to_string(),
        })?;
        self.requests()
            .send(request)
            .await?
            .require_success("Failed to set device status")?;
        Ok(())
    }

    pub async fn set_presence(
        &self,
        availability: Option<&str>,
        visibility: Option<&str>,
    ) -> Result<()> {
        let registration = self.require_registration().await?;
        let url = service_url(&registration.endpoints.presence, "presencesettings", &[])?;
        let request = HttpRequest::new(Method::POST, url).with_json(&PresenceSettingsRequest {
            manual_availability: availability.map(str::to_string),
            presence_visibility: visibility.map(str::to_string),
        })?;
        self.requests()
            .send(request)
            .await?
            .require_success("Failed to set presence")?;
        Ok(())
    }

    pub(crate) async fn contacts_push(&self, message: &ChannelMessage) -> Result<()> {
        let record = message.record.clone().ok_or_else(|| {
            SessionError::bad_response("Required fields in presence update not found")
        })?;
        let record: PresenceRecord = serde_json::from_value(record).map_err(|err| {
            SessionError::bad_response(format!(
                "Required fields in presence update not found: {err}"
            ))
        })?;
        apply_presence(&mut self.domain.lock().await.contacts, &record)
    }

    /// Subscribes the presence channel of every contact in the list, drops
    /// subscriptions of contacts that left it, and fetches initial presence
    /// for the new ones.
    pub(crate) async fn sync_presence_subscriptions(self: &Arc<Self>) {
        let Some((episode, _)) = self.active().await else {
            return;
        };
        let (wanted, stale) = {
            let domain = self.domain.lock().await;
            let wanted: Vec<(ProfileId, String)> = domain
                .contacts
                .iter_live()
                .filter(|contact| !domain.presence.by_contact.contains_key(&contact.id))
                .filter_map(|contact| {
                    contact
                        .presence_channel
                        .clone()
                        .map(|channel| (contact.id.clone(), channel))
                })
                .collect();
            let stale: Vec<(ProfileId, SubscriptionId)> = domain
                .presence
                .by_contact
                .iter()
                .filter(|(id, _)| domain.contacts.by_id(id).is_none())
                .map(|(id, subscription)| (id.clone(), *subscription))
                .collect();
            (wanted, stale)
        };

        for (_, subscription) in &stale {
            self.channels().unsubscribe(*subscription).await;
        }
        let mut subscribed = Vec::with_capacity(wanted.len());
        for (id, channel) in wanted {
            let Some(subscription) = self
                .subscribe_channel(
                    episode,
                    &channel,
                    presence_key(&id),
                    self.push_handler(Subsystem::Contacts, is_presence_push),
                )
                .await
            else {
                return;
            };
            subscribed.push((id, subscription));
        }

        let needs_presence: Vec<ProfileId> = {
            let mut domain = self.domain.lock().await;
            for (id, _) in &stale {
                domain.presence.by_contact.remove(id);
            }
            let mut needs = Vec::new();
            for (id, subscription) in subscribed {
                if domain
                    .contacts
                    .by_id(&id)
                    .is_some_and(|contact| contact.revision == 0)
                {
                    needs.push(id.clone());
                }
                domain.presence.by_contact.insert(id, subscription);
            }
            needs
        };
        if !needs_presence.is_empty() {
            self.fetch_presences(&needs_presence).await;
        }
    }

    async fn fetch_presences(&self, ids: &[ProfileId]) {
        let Ok(registration) = self.require_registration().await else {
            return;
        };
        let joined = ids
            .iter()
            .map(ProfileId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let outcome = async {
            let url = service_url(
                &registration.endpoints.presence,
                "presence",
                &[("profile-ids", joined.as_str())],
            )?;
            let response = self
                .requests()
                .send(HttpRequest::get(url))
                .await?
                .require_success("Failed to fetch presence")?;
            response.parse::<PresenceListResponse>("Failed to parse presence")
        }
        .await;

        match outcome {
            Ok(list) => {
                let mut domain = self.domain.lock().await;
                for record in &list.presences {
                    if let Err(err) = apply_presence(&mut domain.contacts, record) {
                        debug!(%err, "contacts: presence ignored");
                    }
                }
            }
            Err(err) => warn!(%err, "contacts: presence fetch failed"),
        }
    }
}

#[cfg(test)]
#[path = "tests/contacts_tests.rs"]
mod tests;
