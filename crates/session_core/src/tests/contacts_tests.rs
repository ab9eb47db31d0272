use super::*;

use tokio::sync::broadcast;

use crate::session::{EntityKind, SessionEvent};

fn contact_record(id: &str, email: &str, display_name: &str) -> ContactRecord {
    ContactRecord {
        id: ProfileId::new(id),
        email: email.to_string(),
        full_name: format!("{display_name} Example"),
        display_name: display_name.to_string(),
        presence_channel: Some(format!("presence!{id}")),
        profile_channel: None,
    }
}

fn presence(id: &str, revision: i64, availability: Availability) -> PresenceRecord {
    PresenceRecord {
        profile_id: ProfileId::new(id),
        revision,
        availability,
    }
}

#[test]
fn presence_revisions_never_go_backwards() {
    let mut alice = Contact::create(
        ProfileId::new("p1"),
        contact_record("p1", "alice@example.com", "Alice").into(),
    );
    assert_eq!(alice.availability, Availability::Unknown);

    assert_eq!(
        alice.apply_presence(&presence("p1", 3, Availability::Away)),
        vec!["availability"]
    );
    // Same revision still applies.
    assert_eq!(
        alice.apply_presence(&presence("p1", 3, Availability::Busy)),
        vec!["availability"]
    );
    assert!(alice
        .apply_presence(&presence("p1", 2, Availability::Available))
        .is_empty());
    assert_eq!(alice.availability, Availability::Busy);
    assert_eq!(alice.revision, 3);
}

#[test]
fn presence_for_unknown_contact_is_rejected() {
    let mut contacts = SynchronizedCollection::<Contact>::new();
    upsert_contact(&mut contacts, contact_record("p1", "alice@example.com", "Alice"));

    let err = apply_presence(&mut contacts, &presence("p9", 1, Availability::Available))
        .expect_err("unknown contact");
    assert_eq!(err.kind(), crate::ErrorKind::BadResponse);
    assert!(err.to_string().contains("p9"));

    apply_presence(&mut contacts, &presence("p1", 1, Availability::Available)).expect("known");
    assert_eq!(
        contacts
            .by_id(&ProfileId::new("p1"))
            .map(|contact| contact.availability),
        Some(Availability::Available)
    );
}

#[test]
fn channels_are_filled_in_but_never_replaced() {
    let mut alice = Contact::create(
        ProfileId::new("p1"),
        contact_record("p1", "alice@example.com", "Alice").into(),
    );

    let mut update: ContactUpdate = contact_record("p1", "alice@example.com", "Alice").into();
    update.presence_channel = Some("presence!elsewhere".into());
    update.profile_channel = Some("profile!p1".into());

    assert_eq!(alice.apply(update), vec!["profile_channel"]);
    assert_eq!(alice.presence_channel.as_deref(), Some("presence!p1"));
    assert_eq!(alice.profile_channel.as_deref(), Some("profile!p1"));
}

#[test]
fn email_change_moves_the_name_index() {
    let (events, mut rx) = broadcast::channel(64);
    let mut domain = Domain::new(events);

    upsert_contact(&mut domain.contacts, contact_record("p1", "old@example.com", "Alice"));
    upsert_contact(&mut domain.contacts, contact_record("p1", "new@example.com", "Alice"));

    assert_eq!(
        rx.try_recv().ok(),
        Some(SessionEvent::NewContact(ProfileId::new("p1")))
    );
    assert_eq!(
        rx.try_recv().ok(),
        Some(SessionEvent::EntityChanged {
            kind: EntityKind::Contact,
            id: "p1".into(),
            field: "name",
        })
    );
    assert!(rx.try_recv().is_err());
    assert!(domain.contacts.by_name("old@example.com").is_none());
    assert_eq!(
        domain
            .contacts
            .by_name("new@example.com")
            .map(|contact| contact.email.as_str()),
        Some("new@example.com")
    );
}

#[test]
fn listing_skips_malformed_contacts_and_reads_next_token() {
    let (events, _rx) = broadcast::channel(64);
    let mut domain = Domain::new(events);
    let registration = Registration::for_tests("self", "https://svc.example.test");

    let body = serde_json::json!([
        { "id": "p1", "email": "alice@example.com", "full_name": "Alice A", "display_name": "Alice" },
        { "id": "p2" },
    ]);
    let response = ServiceResponse::from_raw(
        crate::transport::RawResponse::json(200, &body)
            .with_header(CONTACTS_NEXT_TOKEN_HEADER, "page-2"),
    );

    let next = Contact::apply_page(&mut domain, &registration, response).expect("page");
    assert_eq!(next.as_deref(), Some("page-2"));
    assert_eq!(domain.contacts.live_len(), 1);

    let request = Contact::page_request(&registration, 50, Some("page-2")).expect("request");
    assert_eq!(request.url.path(), "/contacts");
    assert_eq!(request.url.query(), Some("next_token=page-2"));
}

#[test]
fn failed_listing_is_a_network_error() {
    let (events, _rx) = broadcast::channel(64);
    let mut domain = Domain::new(events);
    let registration = Registration::for_tests("self", "https://svc.example.test");
    let response = ServiceResponse::from_raw(crate::transport::RawResponse::json(
        503,
        &serde_json::json!({ "error": "maintenance" }),
    ));

    let err = Contact::apply_page(&mut domain, &registration, response).expect_err("failure");
    assert_eq!(err.kind(), crate::ErrorKind::Network);
    assert!(err.to_string().contains("Failed to fetch contacts"));
}
