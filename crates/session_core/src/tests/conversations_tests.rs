use super::*;

use serde_json::json;
use shared::protocol::ContactRecord;
use tokio::sync::broadcast;

use crate::{contacts::upsert_contact, session::SessionEvent, transport::RawResponse};

fn member(id: &str, display_name: &str) -> Value {
    json!({
        "ProfileId": id,
        "Email": format!("{id}@example.com"),
        "FullName": format!("{display_name} Example"),
        "DisplayName": display_name,
        "PresenceChannel": format!("presence!{id}")
    })
}

fn conversation_json(id: &str, name: &str, members: Vec<Value>) -> Value {
    json!({
        "ConversationId": id,
        "Name": name,
        "Visibility": "visible",
        "Channel": format!("conversation!{id}"),
        "Members": members,
        "Preferences": {
            "NotificationPreferences": {
                "DesktopNotificationPreferences": "always",
                "MobileNotificationPreferences": "never"
            }
        }
    })
}

fn conversation(id: &str, name: &str, members: Vec<Value>) -> ConversationRecord {
    parse_conversation(conversation_json(id, name, members)).expect("conversation")
}

fn domain() -> (Domain, broadcast::Receiver<SessionEvent>) {
    let (events, rx) = broadcast::channel(64);
    (Domain::new(events), rx)
}

fn me() -> ProfileId {
    ProfileId::new("self")
}

fn expire_conversations(domain: &mut Domain) {
    let token = domain.conversations.begin_refresh().expect("idle");
    domain.conversations.end_refresh(token);
    domain.conversations.expire_outdated();
    domain.settle();
}

#[test]
fn unnamed_conversation_is_named_after_the_other_members() {
    let (mut domain, _rx) = domain();
    upsert_conversation(
        &mut domain,
        &me(),
        conversation(
            "c1",
            "",
            vec![member("self", "Me"), member("p2", "Bob"), member("p3", "Carol")],
        ),
    );

    let chat = domain
        .conversations
        .by_id(&ConversationId::new("c1"))
        .expect("conversation");
    assert_eq!(chat.name, "Bob; Carol");
    assert_eq!(chat.members.len(), 3);
    assert!(domain.conversations.by_name("Bob; Carol").is_some());
}

#[test]
fn explicit_name_wins() {
    let (mut domain, _rx) = domain();
    upsert_conversation(
        &mut domain,
        &me(),
        conversation("c1", "Planning", vec![member("self", "Me"), member("p2", "Bob")]),
    );
    assert!(domain.conversations.by_name("Planning").is_some());
}

#[test]
fn members_are_held_without_joining_the_contact_list() {
    let (mut domain, mut rx) = domain();
    upsert_conversation(
        &mut domain,
        &me(),
        conversation("c1", "", vec![member("self", "Me"), member("p2", "Bob")]),
    );

    let events: Vec<SessionEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(
        events,
        vec![SessionEvent::NewConversation(ConversationId::new("c1"))]
    );
    assert_eq!(domain.contacts.live_len(), 0);
    assert!(domain.contacts.by_id(&ProfileId::new("p2")).is_none());
    assert_eq!(
        domain
            .contacts
            .any_by_id(&ProfileId::new("p2"))
            .map(|contact| contact.display_name.as_str()),
        Some("Bob")
    );
}

#[test]
fn expired_conversation_releases_its_members() {
    let (mut domain, _rx) = domain();
    upsert_contact(
        &mut domain.contacts,
        ContactRecord {
            id: ProfileId::new("p2"),
            email: "p2@example.com".into(),
            full_name: "Bob Example".into(),
            display_name: "Bob".into(),
            presence_channel: None,
            profile_channel: None,
        },
    );
    upsert_conversation(
        &mut domain,
        &me(),
        conversation("c1", "", vec![member("self", "Me"), member("p2", "Bob")]),
    );
    assert_eq!(domain.contacts.allocated(), 2);

    expire_conversations(&mut domain);

    assert_eq!(domain.conversations.allocated(), 0);
    // p2 is in the contact list in its own right; the self member was only
    // ever referenced.
    assert_eq!(domain.contacts.allocated(), 1);
    assert!(domain.contacts.by_id(&ProfileId::new("p2")).is_some());
}

#[test]
fn membership_change_releases_dropped_members() {
    let (mut domain, _rx) = domain();
    upsert_conversation(
        &mut domain,
        &me(),
        conversation("c1", "Team", vec![member("p2", "Bob"), member("p3", "Carol")]),
    );
    assert_eq!(domain.contacts.allocated(), 2);

    upsert_conversation(
        &mut domain,
        &me(),
        conversation("c1", "Team", vec![member("p2", "Bob")]),
    );
    domain.settle();

    assert_eq!(domain.contacts.allocated(), 1);
    assert!(domain.contacts.any_by_id(&ProfileId::new("p3")).is_none());
    assert!(domain.contacts.any_by_id(&ProfileId::new("p2")).is_some());
}

#[test]
fn listing_page_uses_messaging_endpoint() {
    let registration = Registration::for_tests("self", "https://svc.example.test");
    let request = Conversation::page_request(&registration, 10, Some("n1")).expect("request");
    assert_eq!(request.url.path(), "/conversations");
    assert_eq!(request.url.query(), Some("max-results=10&next-token=n1"));

    let (mut domain, _rx) = domain();
    let body = json!({
        "Conversations": [conversation_json("c1", "", vec![member("self", "Me"), member("p2", "Bob")])]
    });
    let next = Conversation::apply_page(
        &mut domain,
        &registration,
        ServiceResponse::from_raw(RawResponse::json(200, &body)),
    )
    .expect("page");
    assert!(next.is_none());
    assert!(domain.conversations.by_name("Bob").is_some());
}

#[test]
fn unread_follows_last_read() {
    let mut record = conversation_json("c1", "Team", vec![]);
    record["LastSent"] = json!("2024-05-01T08:00:00Z");
    record["LastRead"] = json!("2024-05-01T07:00:00Z");
    let record = parse_conversation(record).expect("conversation");
    let chat = Conversation::create(
        record.conversation_id.clone(),
        ConversationUpdate {
            name: record.name.clone(),
            record,
            members: Vec::new(),
        },
    );
    assert!(chat.has_unread());
}
