use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use shared::{
    domain::{MeetingId, MeetingKind, ProfileId, RoomId, Subsystem},
    protocol::{
        JoinableMeetingsRecord, MeetingRecord, PinJoinRequest, PinJoinResponse, ScheduledMeeting,
    },
};
use tracing::{debug, warn};

use crate::{
    channel_mux::{ChannelMessage, SubscriberKey},
    collection::{update_field, Entity, EntityHandle, SynchronizedCollection},
    contacts::{Contact, ContactUpdate},
    error::{Result, SessionError},
    request_queue::HttpRequest,
    session::{Domain, Registration, Session, Synced},
    transport::{service_url, ServiceResponse},
};

pub const JOINABLE_MEETINGS_KLASS: &str = "JoinableMeetings";
const MEETINGS_OWNER: &str = "meetings";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub id: MeetingId,
    pub summary: String,
    pub kind: MeetingKind,
    pub chat_room_id: RoomId,
    /// Held in the contacts collection while the meeting exists.
    pub organiser: EntityHandle<Contact>,
    pub passcode: Option<String>,
}

pub struct MeetingUpdate {
    pub summary: String,
    pub kind: MeetingKind,
    pub chat_room_id: RoomId,
    pub organiser: EntityHandle<Contact>,
    pub passcode: Option<String>,
}

/// A passcode that is a shorter prefix of the stored one is the same code
/// with the personal suffix missing, so it is ignored. So is `None`.
pub fn merge_passcode(current: Option<&str>, incoming: Option<String>) -> Option<String> {
    match (current, incoming) {
        (current, None) => current.map(str::to_string),
        (Some(current), Some(incoming))
            if incoming.len() < current.len() && current.starts_with(&incoming) =>
        {
            Some(current.to_string())
        }
        (_, Some(incoming)) => Some(incoming),
    }
}

impl Entity for Meeting {
    type Id = MeetingId;
    type Update = MeetingUpdate;

    fn create(id: MeetingId, update: MeetingUpdate) -> Self {
        Self {
            id,
            summary: update.summary,
            kind: update.kind,
            chat_room_id: update.chat_room_id,
            organiser: update.organiser,
            passcode: update.passcode,
        }
    }

    fn apply(&mut self, update: MeetingUpdate) -> Vec<&'static str> {
        let mut changed = Vec::new();
        self.summary = update.summary;
        update_field!(changed, self.kind, update.kind, "kind");
        update_field!(changed, self.chat_room_id, update.chat_room_id, "chat_room_id");
        update_field!(changed, self.organiser, update.organiser, "organiser");
        let passcode = merge_passcode(self.passcode.as_deref(), update.passcode);
        update_field!(changed, self.passcode, passcode, "passcode");
        changed
    }
}

fn meeting_kind(klass: &str) -> Result<MeetingKind> {
    MeetingKind::ALL
        .into_iter()
        .find(|kind| kind.klass() == klass)
        .ok_or_else(|| SessionError::bad_response(format!("Unknown meeting kind {klass}")))
}

pub fn parse_meeting(record: Value) -> Result<MeetingRecord> {
    serde_json::from_value(record)
        .map_err(|err| SessionError::bad_response(format!("Failed to parse Meeting node: {err}")))
}

/// The caller's own attendance passcode, else the meeting-wide one.
fn personal_passcode(record: &MeetingRecord, self_id: &ProfileId) -> Option<String> {
    record
        .attendances
        .iter()
        .find(|attendance| attendance.profile_id.as_ref() == Some(self_id))
        .and_then(|attendance| attendance.passcode.clone())
        .or_else(|| record.passcode.clone())
}

/// Upserts a meeting, holding its organiser and releasing the organiser it
/// had before.
pub fn upsert_meeting(
    domain: &mut Domain,
    self_id: &ProfileId,
    record: MeetingRecord,
) -> Result<EntityHandle<Meeting>> {
    let kind = meeting_kind(&record.klass)?;
    let passcode = personal_passcode(&record, self_id);
    let organiser = {
        let contact = record.organizer;
        let id = contact.id.clone();
        let email = contact.email.clone();
        domain
            .contacts
            .reference(id, &email, ContactUpdate::from(contact))
    };
    let previous = domain
        .meetings
        .any_by_id(&record.id)
        .map(|meeting| meeting.organiser);

    let handle = domain.meetings.upsert(
        record.id,
        &record.summary,
        MeetingUpdate {
            summary: record.summary.clone(),
            kind,
            chat_room_id: record.meeting_chat_room.id,
            organiser,
            passcode,
        },
    );
    if let Some(previous) = previous {
        domain.contacts.release(previous);
    }
    Ok(handle)
}

fn schedule_info_path(profile_id: &ProfileId, onetime: bool) -> String {
    let kind = if onetime { "onetime" } else { "personal" };
    format!("schedule_meeting_support/{profile_id}/{kind}_pin_info")
}

fn upsert_all(domain: &mut Domain, self_id: &ProfileId, records: Vec<Value>) {
    for record in records {
        let outcome = parse_meeting(record).and_then(|record| upsert_meeting(domain, self_id, record));
        if let Err(err) = outcome {
            warn!(%err, "meetings: skipping malformed meeting");
        }
    }
}

fn is_meeting_push(message: &ChannelMessage) -> bool {
    message.record.is_some()
}

impl Synced for Meeting {
    const SUBSYSTEM: Subsystem = Subsystem::Meetings;

    fn collection(domain: &mut Domain) -> &mut SynchronizedCollection<Self> {
        &mut domain.meetings
    }

    fn page_request(
        registration: &Registration,
        _page_size: u32,
        _next: Option<&str>,
    ) -> Result<HttpRequest> {
        Ok(HttpRequest::get(service_url(
            &registration.endpoints.conference,
            "joinable_meetings",
            &[],
        )?))
    }

    fn apply_page(
        domain: &mut Domain,
        registration: &Registration,
        response: ServiceResponse,
    ) -> Result<Option<String>> {
        let records: Vec<Value> = response
            .require_success("Failed to fetch meetings")?
            .parse("Failed to parse meetings")?;
        upsert_all(domain, &registration.profile_id, records);
        Ok(None)
    }
}

impl Session {
    pub(crate) async fn start_meetings(self: &Arc<Self>, episode: u64, registration: &Registration) {
        let klasses = std::iter::once(JOINABLE_MEETINGS_KLASS)
            .chain(MeetingKind::ALL.into_iter().map(MeetingKind::klass));
        for klass in klasses {
            self.subscribe_channel(
                episode,
                &registration.device_channel,
                SubscriberKey::new(MEETINGS_OWNER, Some(klass)),
                self.push_handler(Subsystem::Meetings, is_meeting_push),
            )
            .await;
        }
        self.refresh::<Meeting>().await;
    }

    pub async fn refresh_meetings(self: &Arc<Self>) {
        self.refresh::<Meeting>().await;
    }

    pub async fn meeting_by_id(&self, id: &MeetingId) -> Option<Meeting> {
        self.domain.lock().await.meetings.by_id(id).cloned()
    }

    pub async fn meeting_by_summary(&self, summary: &str) -> Option<Meeting> {
        self.domain.lock().await.meetings.by_name(summary).cloned()
    }

    pub async fn meetings(&self) -> Vec<Meeting> {
        self.domain.lock().await.meetings.iter_live().cloned().collect()
    }

    /// The organiser of a meeting, even one no longer in the contact list.
    pub async fn meeting_organiser(&self, id: &MeetingId) -> Option<Contact> {
        let domain = self.domain.lock().await;
        let organiser = domain.meetings.any_by_id(id)?.organiser;
        domain.contacts.get(organiser).cloned()
    }

    /// Resolves a meeting PIN and merges the meeting into the collection.
    pub async fn lookup_meeting_by_pin(&self, pin: &str) -> Result<Meeting> {
        let registration = self.require_registration().await?;
        let url = service_url(&registration.endpoints.conference, "pin_joins", &[])?;
        let request = HttpRequest::new(Method::POST, url).with_json(&PinJoinRequest {
            pin: pin.to_string(),
        })?;
        let response: PinJoinResponse = self
            .requests()
            .send(request)
            .await?
            .require_success("Failed to obtain meeting details")?
            .parse("Failed to obtain meeting details")?;

        let record = parse_meeting(response.meeting)?;
        let mut domain = self.domain.lock().await;
        let handle = upsert_meeting(&mut domain, &registration.profile_id, record)?;
        domain.settle();
        domain
            .meetings
            .get(handle)
            .cloned()
            .ok_or_else(|| SessionError::bad_response("Failed to obtain meeting details"))
    }

    /// Dial-in details of the caller's personal bridge, or of a fresh
    /// one-time bridge when `onetime` is set.
    pub async fn meeting_schedule_info(&self, onetime: bool) -> Result<ScheduledMeeting> {
        let registration = self.require_registration().await?;
        let url = service_url(
            &registration.endpoints.conference,
            &schedule_info_path(&registration.profile_id, onetime),
            &[],
        )?;
        let method = if onetime { Method::POST } else { Method::GET };
        self.requests()
            .send(HttpRequest::new(method, url))
            .await?
            .require_success("Failed to obtain meeting PIN info")?
            .parse("Failed to parse scheduled meeting response")
    }

    pub(crate) async fn meetings_push(&self, message: &ChannelMessage) -> Result<()> {
        let registration = self.require_registration().await?;
        let record = message.record.clone().unwrap_or(Value::Null);
        let mut domain = self.domain.lock().await;

        if message.klass != JOINABLE_MEETINGS_KLASS {
            let record = parse_meeting(record)?;
            upsert_meeting(&mut domain, &registration.profile_id, record)?;
            domain.settle();
            return Ok(());
        }

        // A complete listing: run it as a refresh pass of its own. If an HTTP
        // pass is running it was just marked stale and will restart.
        let listing: JoinableMeetingsRecord = serde_json::from_value(record).map_err(|err| {
            SessionError::bad_response(format!("Failed to parse JoinableMeetings node: {err}"))
        })?;
        match domain.meetings.begin_refresh() {
            Ok(token) => {
                upsert_all(&mut domain, &registration.profile_id, listing.meetings);
                let outcome = domain.meetings.end_refresh(token);
                debug!(?outcome, "meetings: applied joinable meetings push");
                domain.meetings.expire_outdated();
            }
            Err(_) => {
                debug!("meetings: listing pushed during a refresh, merging");
                upsert_all(&mut domain, &registration.profile_id, listing.meetings);
            }
        }
        domain.settle();
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/meetings_tests.rs"]
mod tests;
