use super::*;

use serde_json::json;

const BASE: &str = "https://messaging.example.test";

#[test]
fn send_message_posts_content_with_a_fresh_request_token() {
    let registration = Registration::for_tests("self", BASE);
    let target = ChatTarget::Room(RoomId::new("r1"));

    let first = send_message_request(&registration, &target, "hello").expect("request");
    let second = send_message_request(&registration, &target, "hello").expect("request");

    assert_eq!(first.method, Method::POST);
    assert_eq!(first.url.as_str(), "https://messaging.example.test/rooms/r1/messages");
    let body = first.body.expect("body");
    assert_eq!(body["Content"], "hello");
    let token = body["ClientRequestToken"].as_str().expect("token");
    assert!(Uuid::parse_str(token).is_ok());
    assert_ne!(
        second.body.expect("body")["ClientRequestToken"],
        body["ClientRequestToken"]
    );
}

#[test]
fn conversation_messages_use_the_conversation_path() {
    let registration = Registration::for_tests("self", BASE);
    let target = ChatTarget::Conversation(ConversationId::new("c9"));

    let request = send_message_request(&registration, &target, "hi").expect("request");
    assert_eq!(request.url.path(), "/conversations/c9/messages");
    assert_eq!(target.to_string(), "conversations/c9");
}

#[test]
fn read_marker_is_posted_to_the_target_itself() {
    let registration = Registration::for_tests("self", BASE);
    let target = ChatTarget::Room(RoomId::new("r1"));

    let request = update_last_read_request(&registration, &target, "msg-7").expect("request");
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.url.path(), "/rooms/r1");
    assert_eq!(request.body, Some(json!({ "LastReadMessageId": "msg-7" })));
}
