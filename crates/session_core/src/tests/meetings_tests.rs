use super::*;

use serde_json::json;
use tokio::sync::broadcast;

use crate::{session::SessionEvent, transport::RawResponse};

fn meeting_json(id: &str, klass: &str, organiser: &str) -> Value {
    json!({
        "id": id,
        "summary": format!("Meeting {id}"),
        "klass": klass,
        "meeting_chat_room": { "id": format!("room-{id}") },
        "organizer": {
            "id": organiser,
            "email": format!("{organiser}@example.com"),
            "full_name": "Organiser Example",
            "display_name": "Organiser"
        },
        "attendances": [
            { "profile_id": "someone-else", "passcode": "9999" },
            { "profile_id": "self", "passcode": "1234567890" }
        ],
        "passcode": "1234"
    })
}

fn meeting(value: Value) -> MeetingRecord {
    parse_meeting(value).expect("meeting")
}

fn me() -> ProfileId {
    ProfileId::new("self")
}

fn domain() -> (Domain, broadcast::Receiver<SessionEvent>) {
    let (events, rx) = broadcast::channel(64);
    (Domain::new(events), rx)
}

#[test]
fn shorter_prefix_never_overwrites_a_passcode() {
    assert_eq!(merge_passcode(None, Some("1234".into())), Some("1234".into()));
    assert_eq!(
        merge_passcode(Some("1234567890"), Some("1234".into())),
        Some("1234567890".into())
    );
    assert_eq!(
        merge_passcode(Some("1234"), Some("1234567890".into())),
        Some("1234567890".into())
    );
    assert_eq!(
        merge_passcode(Some("1234567890"), Some("5555".into())),
        Some("5555".into())
    );
    assert_eq!(merge_passcode(Some("1234"), None), Some("1234".into()));
}

#[test]
fn own_attendance_passcode_is_preferred() {
    let (mut domain, _rx) = domain();
    upsert_meeting(&mut domain, &me(), meeting(meeting_json("m1", "AdHocMeeting", "p2")))
        .expect("upsert");

    let stored = domain.meetings.by_id(&MeetingId::new("m1")).expect("meeting");
    assert_eq!(stored.passcode.as_deref(), Some("1234567890"));
    assert_eq!(stored.kind, MeetingKind::AdHocMeeting);
    assert_eq!(stored.chat_room_id, RoomId::new("room-m1"));

    let mut without_attendance = meeting_json("m1", "AdHocMeeting", "p2");
    without_attendance["attendances"] = json!([]);
    upsert_meeting(&mut domain, &me(), meeting(without_attendance)).expect("upsert");

    let stored = domain.meetings.by_id(&MeetingId::new("m1")).expect("meeting");
    assert_eq!(stored.passcode.as_deref(), Some("1234567890"));
}

#[test]
fn unknown_kind_is_a_bad_response() {
    let (mut domain, _rx) = domain();
    let err = upsert_meeting(&mut domain, &me(), meeting(meeting_json("m1", "Lunch", "p2")))
        .expect_err("unknown kind");
    assert_eq!(err.kind(), crate::ErrorKind::BadResponse);
    assert_eq!(domain.meetings.allocated(), 0);
}

#[test]
fn organiser_is_held_until_the_meeting_goes_away() {
    let (mut domain, mut rx) = domain();
    upsert_meeting(&mut domain, &me(), meeting(meeting_json("m1", "Webinar", "p2")))
        .expect("upsert");
    assert_eq!(
        rx.try_recv().ok(),
        Some(SessionEvent::NewMeeting(MeetingId::new("m1")))
    );
    assert_eq!(domain.contacts.live_len(), 0);
    assert_eq!(domain.contacts.allocated(), 1);

    // Same organiser again keeps exactly one hold.
    upsert_meeting(&mut domain, &me(), meeting(meeting_json("m1", "Webinar", "p2")))
        .expect("upsert");
    domain.settle();
    assert_eq!(domain.contacts.allocated(), 1);

    let token = domain.meetings.begin_refresh().expect("idle");
    domain.meetings.end_refresh(token);
    assert_eq!(domain.meetings.expire_outdated(), 1);
    domain.settle();

    assert_eq!(domain.meetings.allocated(), 0);
    assert_eq!(domain.contacts.allocated(), 0);
}

#[test]
fn new_organiser_releases_the_old_one() {
    let (mut domain, _rx) = domain();
    upsert_meeting(
        &mut domain,
        &me(),
        meeting(meeting_json("m1", "GoogleCalendarMeeting", "p2")),
    )
    .expect("upsert");
    upsert_meeting(
        &mut domain,
        &me(),
        meeting(meeting_json("m1", "GoogleCalendarMeeting", "p3")),
    )
    .expect("upsert");
    domain.settle();

    assert!(domain.contacts.any_by_id(&ProfileId::new("p2")).is_none());
    let organiser = domain.meetings.by_id(&MeetingId::new("m1")).expect("meeting").organiser;
    assert_eq!(
        domain.contacts.get(organiser).map(|contact| contact.id.clone()),
        Some(ProfileId::new("p3"))
    );
}

#[test]
fn joinable_listing_is_one_unpaged_request() {
    let registration = Registration::for_tests("self", "https://svc.example.test");
    let request = Meeting::page_request(&registration, 50, None).expect("request");
    assert_eq!(request.url.path(), "/joinable_meetings");
    assert_eq!(request.url.query(), None);

    let (mut domain, _rx) = domain();
    let body = json!([
        meeting_json("m1", "AdHocMeeting", "p2"),
        meeting_json("m2", "NotAMeeting", "p2"),
    ]);
    let next = Meeting::apply_page(
        &mut domain,
        &registration,
        ServiceResponse::from_raw(RawResponse::json(200, &body)),
    )
    .expect("page");
    assert!(next.is_none());
    assert_eq!(domain.meetings.live_len(), 1);
}
