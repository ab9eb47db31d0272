use super::*;

use shared::protocol::{ChannelControl, ChannelControlKind};

#[test]
fn bare_control_frames_are_recognised() {
    assert_eq!(Frame::parse("0::"), Frame::Disconnect);
    assert_eq!(Frame::parse("1::"), Frame::Connect);
    assert_eq!(Frame::parse("2::"), Frame::Heartbeat);
    assert_eq!(Frame::parse("2::").ack(), None);
}

#[test]
fn data_frame_keeps_colons_inside_payload() {
    let frame = Frame::parse(r#"3:17::{"channel":"a:b","data":{"klass":"Presence"}}"#);
    assert_eq!(frame.ack().as_deref(), Some("6:::17"));
    assert_eq!(
        frame.json_payload(),
        Some(r#"{"channel":"a:b","data":{"klass":"Presence"}}"#)
    );
}

#[test]
fn frames_without_sequence_are_not_acknowledged() {
    assert_eq!(Frame::parse("3:::{}").ack(), None);
    assert_eq!(Frame::parse("6:::42").ack(), None);
    assert_eq!(Frame::parse("6:::42").json_payload(), None);
    // a sequence with no endpoint field is not a complete data frame
    assert_eq!(Frame::parse("5:9").ack(), None);
}

#[test]
fn non_json_data_frames_are_acked_but_not_dispatched() {
    let frame = Frame::parse("5:3::event");
    assert_eq!(frame.ack().as_deref(), Some("6:::3"));
    assert_eq!(frame.json_payload(), None);
}

#[test]
fn control_frames_encode_subscription_json() {
    let frame = control_frame(ChannelControlKind::Subscribe, "profile!abc");
    let json = frame.strip_prefix("3:::").expect("json frame");
    let control: ChannelControl = serde_json::from_str(json).expect("control json");
    assert_eq!(
        control,
        ChannelControl {
            kind: ChannelControlKind::Subscribe,
            channel: "profile!abc".into(),
        }
    );
    assert!(control_frame(ChannelControlKind::Unsubscribe, "x").contains("\"unsubscribe\""));
}

#[test]
fn socket_params_take_key_from_first_field() {
    let params = SocketParams::parse("abc123:25:60:websocket,xhr-polling\n").expect("params");
    assert_eq!(params.key, "abc123");
    assert_eq!(params.heartbeat, "25");
    assert_eq!(params.transports, vec!["websocket", "xhr-polling"]);

    let url = params
        .socket_url("https://push.example.test/jugg", "sess-1")
        .expect("url");
    assert_eq!(
        url.as_str(),
        "wss://push.example.test/jugg/1/websocket/abc123?session_uuid=sess-1"
    );
}

#[test]
fn socket_params_reject_missing_websocket_transport() {
    let err = SocketParams::parse("abc:25:60:xhr-polling").expect_err("no websocket");
    assert_eq!(err.kind(), crate::ErrorKind::Network);
    assert!(SocketParams::parse("abc:25").is_err());
    assert!(SocketParams::parse(":25:60:websocket").is_err());
}

#[test]
fn discovery_url_carries_session_id() {
    let url = discovery_url("https://push.example.test/", "sess-1").expect("url");
    assert_eq!(url.as_str(), "https://push.example.test/1?session_uuid=sess-1");
}
