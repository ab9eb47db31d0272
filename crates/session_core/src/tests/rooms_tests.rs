use super::*;

use serde_json::json;
use tokio::sync::broadcast;

use crate::{
    session::{EntityKind, SessionEvent},
    transport::RawResponse,
};

fn room_json(id: &str, name: &str) -> Value {
    json!({
        "RoomId": id,
        "Name": name,
        "Privacy": "private",
        "Type": "standard",
        "Visibility": "visible",
        "Channel": format!("room!{id}"),
        "Preferences": {
            "NotificationPreferences": {
                "DesktopNotificationPreferences": "always",
                "MobileNotificationPreferences": "directOnly"
            }
        }
    })
}

fn room_with_times(sent: Option<&str>, read: Option<&str>, mentioned: Option<&str>) -> Room {
    let mut record = room_json("r1", "General");
    record["LastSent"] = json!(sent);
    record["LastRead"] = json!(read);
    record["LastMentioned"] = json!(mentioned);
    let record = parse_room(record).expect("room");
    Room::create(record.room_id.clone(), record)
}

#[test]
fn unread_and_mention_compare_against_last_read() {
    let never_read = room_with_times(Some("2024-03-01T10:00:00Z"), None, None);
    assert!(never_read.has_unread());
    assert!(!never_read.has_mention());

    let caught_up = room_with_times(
        Some("2024-03-01T10:00:00Z"),
        Some("2024-03-01T10:00:00Z"),
        Some("2024-03-01T09:00:00Z"),
    );
    assert!(!caught_up.has_unread());
    assert!(!caught_up.has_mention());

    let behind = room_with_times(
        Some("2024-03-01T12:00:00Z"),
        Some("2024-03-01T10:00:00Z"),
        Some("2024-03-01T11:00:00Z"),
    );
    assert!(behind.has_unread());
    assert!(behind.has_mention());

    let silent = room_with_times(None, None, None);
    assert!(!silent.has_unread());
}

#[test]
fn record_fields_are_parsed() {
    let record = parse_room(room_json("r1", "General")).expect("room");
    let room = Room::create(record.room_id.clone(), record);
    assert_eq!(room.room_type, RoomType::Standard);
    assert_eq!(room.privacy, Privacy::Private);
    assert_eq!(room.mobile_notification, NotifyPref::DirectOnly);
    assert_eq!(room.channel, "room!r1");
}

#[test]
fn incomplete_record_is_a_bad_response() {
    let err = parse_room(json!({ "RoomId": "r1" })).expect_err("partial");
    assert_eq!(err.kind(), crate::ErrorKind::BadResponse);
}

#[test]
fn rename_and_read_marker_are_reported_per_field() {
    let (events, mut rx) = broadcast::channel(64);
    let mut domain = Domain::new(events);
    upsert_room(&mut domain.rooms, parse_room(room_json("r1", "General")).expect("room"));
    assert_eq!(rx.try_recv().ok(), Some(SessionEvent::NewRoom(RoomId::new("r1"))));

    let mut update = room_json("r1", "Lobby");
    update["LastRead"] = json!("2024-03-01T10:00:00Z");
    upsert_room(&mut domain.rooms, parse_room(update).expect("room"));

    let changed: Vec<&'static str> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|event| match event {
            SessionEvent::EntityChanged {
                kind: EntityKind::Room,
                field,
                ..
            } => field,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(changed, vec!["last_read", "name"]);
    assert!(domain.rooms.by_name("General").is_none());
    assert!(domain.rooms.by_name("Lobby").is_some());
}

#[test]
fn listing_pages_follow_next_token() {
    let registration = Registration::for_tests("self", "https://svc.example.test");
    let first = Room::page_request(&registration, 25, None).expect("request");
    assert_eq!(first.url.path(), "/rooms");
    assert_eq!(first.url.query(), Some("max-results=25"));

    let (events, _rx) = broadcast::channel(64);
    let mut domain = Domain::new(events);
    let body = json!({
        "Rooms": [room_json("r1", "General"), { "RoomId": "broken" }],
        "NextToken": "t2"
    });
    let next = Room::apply_page(
        &mut domain,
        &registration,
        ServiceResponse::from_raw(RawResponse::json(200, &body)),
    )
    .expect("page");
    assert_eq!(next.as_deref(), Some("t2"));
    assert_eq!(domain.rooms.live_len(), 1);

    let second = Room::page_request(&registration, 25, next.as_deref()).expect("request");
    assert_eq!(second.url.query(), Some("max-results=25&next-token=t2"));
}

#[test]
fn only_room_updates_with_a_record_are_accepted() {
    let update = ChannelMessage::decode(
        &json!({ "channel": "device!d1", "data": { "klass": "Room", "type": "update", "record": room_json("r1", "General") } })
            .to_string(),
    )
    .expect("decode");
    assert!(is_room_update(&update));

    let typing = ChannelMessage::decode(
        &json!({ "channel": "device!d1", "data": { "klass": "Room", "type": "typing" } })
            .to_string(),
    )
    .expect("decode");
    assert!(!is_room_update(&typing));
}
