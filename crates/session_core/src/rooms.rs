use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{
    domain::{NotifyPref, Privacy, RoomId, RoomType, Subsystem, Visibility},
    protocol::{RoomEnvelope, RoomRecord, RoomsPage},
};
use tracing::{debug, warn};

use crate::{
    channel_mux::{ChannelMessage, SubscriberKey},
    collection::{update_field, Entity, EntityHandle, SynchronizedCollection},
    error::{Result, SessionError},
    request_queue::HttpRequest,
    session::{Domain, Registration, Session, Synced},
    transport::{service_url, ServiceResponse},
};

pub const VISIBLE_ROOMS_KLASS: &str = "VisibleRooms";
pub const ROOM_KLASS: &str = "Room";
const ROOMS_OWNER: &str = "rooms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub privacy: Privacy,
    pub room_type: RoomType,
    pub visibility: Visibility,
    pub channel: String,
    pub last_sent: Option<DateTime<Utc>>,
    pub last_read: Option<DateTime<Utc>>,
    pub last_mentioned: Option<DateTime<Utc>>,
    pub created_on: Option<DateTime<Utc>>,
    pub desktop_notification: NotifyPref,
    pub mobile_notification: NotifyPref,
}

/// An event time counts as unread when nothing has been read yet or it is
/// strictly newer than the last read.
fn is_after(event: Option<DateTime<Utc>>, read: Option<DateTime<Utc>>) -> bool {
    match (event, read) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(event), Some(read)) => event > read,
    }
}

impl Room {
    pub fn has_unread(&self) -> bool {
        is_after(self.last_sent, self.last_read)
    }

    pub fn has_mention(&self) -> bool {
        is_after(self.last_mentioned, self.last_read)
    }
}

impl Entity for Room {
    type Id = RoomId;
    type Update = RoomRecord;

    fn create(id: RoomId, record: RoomRecord) -> Self {
        let prefs = record.preferences.notification_preferences;
        Self {
            id,
            name: record.name,
            privacy: record.privacy,
            room_type: record.room_type,
            visibility: record.visibility,
            channel: record.channel,
            last_sent: record.last_sent,
            last_read: record.last_read,
            last_mentioned: record.last_mentioned,
            created_on: record.created_on,
            desktop_notification: prefs.desktop_notification_preferences,
            mobile_notification: prefs.mobile_notification_preferences,
        }
    }

    fn apply(&mut self, record: RoomRecord) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let prefs = record.preferences.notification_preferences;
        self.name = record.name;
        update_field!(changed, self.privacy, record.privacy, "privacy");
        update_field!(changed, self.room_type, record.room_type, "room_type");
        update_field!(changed, self.visibility, record.visibility, "visibility");
        update_field!(changed, self.channel, record.channel, "channel");
        update_field!(changed, self.last_sent, record.last_sent, "last_sent");
        update_field!(changed, self.last_read, record.last_read, "last_read");
        update_field!(changed, self.last_mentioned, record.last_mentioned, "last_mentioned");
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
        changed
    }
}

pub fn parse_room(record: Value) -> Result<RoomRecord> {
    serde_json::from_value(record)
        .map_err(|err| SessionError::bad_response(format!("Failed to parse Room node: {err}")))
}

pub fn upsert_room(rooms: &mut SynchronizedCollection<Room>, record: RoomRecord) -> EntityHandle<Room> {
    let id = record.room_id.clone();
    let name = record.name.clone();
    rooms.upsert(id, &name, record)
}

fn is_room_update(message: &ChannelMessage) -> bool {
    message.kind.as_deref() == Some("update") && message.record.is_some()
}

fn any_push(_: &ChannelMessage) -> bool {
    true
}

impl Synced for Room {
    const SUBSYSTEM: Subsystem = Subsystem::Rooms;

    fn collection(domain: &mut Domain) -> &mut SynchronizedCollection<Self> {
        &mut domain.rooms
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
            "rooms",
            &query,
        )?))
    }

    fn apply_page(
        domain: &mut Domain,
        _registration: &Registration,
        response: ServiceResponse,
    ) -> Result<Option<String>> {
        let page: RoomsPage = response
            .require_success("Failed to fetch rooms")?
            .parse("Failed to find Rooms node in response")?;
        for record in page.rooms {
            match parse_room(record) {
                Ok(record) => {
                    upsert_room(&mut domain.rooms, record);
                }
                Err(err) => warn!(%err, "rooms: skipping malformed room"),
            }
        }
        Ok(page.next_token)
    }
}

impl Session {
    pub(crate) async fn start_rooms(self: &Arc<Self>, episode: u64, registration: &Registration) {
        self.subscribe_channel(
            episode,
            &registration.profile_channel,
            SubscriberKey::new(ROOMS_OWNER, Some(VISIBLE_ROOMS_KLASS)),
            self.push_handler(Subsystem::Rooms, any_push),
        )
        .await;
        self.subscribe_channel(
            episode,
            &registration.device_channel,
            SubscriberKey::new(ROOMS_OWNER, Some(ROOM_KLASS)),
            self.push_handler(Subsystem::Rooms, is_room_update),
        )
        .await;
        self.refresh::<Room>().await;
    }

    pub async fn refresh_rooms(self: &Arc<Self>) {
        self.refresh::<Room>().await;
    }

    pub async fn room_by_id(&self, id: &RoomId) -> Option<Room> {
        self.domain.lock().await.rooms.by_id(id).cloned()
    }

    pub async fn room_by_name(&self, name: &str) -> Option<Room> {
        self.domain.lock().await.rooms.by_name(name).cloned()
    }

    pub async fn rooms(&self) -> Vec<Room> {
        self.domain.lock().await.rooms.iter_live().cloned().collect()
    }

    /// Fetches one room and merges it into the collection.
    pub async fn fetch_room(&self, id: &RoomId) -> Result<Room> {
        let registration = self.require_registration().await?;
        let url = service_url(
            &registration.endpoints.messaging,
            &format!("rooms/{id}"),
            &[],
        )?;
        let envelope: RoomEnvelope = self
            .requests()
            .send(HttpRequest::get(url))
            .await?
            .require_success("Failed to fetch room details")?
            .parse("Failed to fetch room details")?;
        let record = parse_room(envelope.room)?;
        let mut domain = self.domain.lock().await;
        let handle = upsert_room(&mut domain.rooms, record);
        domain
            .rooms
            .get(handle)
            .cloned()
            .ok_or_else(|| SessionError::bad_response("Failed to fetch room details"))
    }

    pub(crate) async fn rooms_push(self: &Arc<Self>, message: &ChannelMessage) -> Result<()> {
        if message.klass == VISIBLE_ROOMS_KLASS {
            debug!("rooms: visible rooms changed, refreshing");
            self.refresh::<Room>().await;
            return Ok(());
        }

        let record = message.record.clone().unwrap_or(Value::Null);
        match parse_room(record.clone()) {
            Ok(record) => {
                upsert_room(&mut self.domain.lock().await.rooms, record);
                Ok(())
            }
            // Partial records name the room; fetch the whole thing.
            Err(err) => {
                let Some(id) = record.get("RoomId").and_then(Value::as_str) else {
                    return Err(err);
                };
                let id = RoomId::new(id);
                let session = Arc::clone(self);
                self.spawn_tracked(async move {
                    if let Err(err) = session.fetch_room(&id).await {
                        warn!(room = %id, %err, "rooms: fetch after push failed");
                    }
                })
                .await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/rooms_tests.rs"]
mod tests;
