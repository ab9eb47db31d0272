//! Text framing used on the channel socket.
//!
//! Frames are `type:seq:endpoint:payload`, with a few bare control frames
//! (`0::`, `1::`, `2::`) that carry no sequence number.

use serde_json::json;
use shared::protocol::ChannelControlKind;
use url::Url;

use crate::{
    error::{Result, SessionError},
    transport::service_url,
};

pub const DISCONNECT_FRAME: &str = "0::";
pub const CONNECT_FRAME: &str = "1::";
pub const HEARTBEAT_FRAME: &str = "2::";

/// Frame type carrying a JSON push envelope.
pub const JSON_FRAME_TYPE: &str = "3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Disconnect,
    Connect,
    Heartbeat,
    Data {
        kind: String,
        seq: Option<String>,
        endpoint: Option<String>,
        payload: Option<String>,
    },
}

impl Frame {
    pub fn parse(text: &str) -> Self {
        match text {
            DISCONNECT_FRAME => Frame::Disconnect,
            CONNECT_FRAME => Frame::Connect,
            HEARTBEAT_FRAME => Frame::Heartbeat,
            _ => {
                let mut parts = text.splitn(4, ':');
                Frame::Data {
                    kind: parts.next().unwrap_or_default().to_string(),
                    seq: parts.next().map(str::to_string),
                    endpoint: parts.next().map(str::to_string),
                    payload: parts.next().map(str::to_string),
                }
            }
        }
    }

    /// The acknowledgement owed for this frame, if any.
    ///
    /// Owed whenever the sequence field is non-empty and an endpoint field
    /// follows, whether or not anyone consumes the payload.
    pub fn ack(&self) -> Option<String> {
        match self {
            Frame::Data {
                seq: Some(seq),
                endpoint: Some(_),
                ..
            } if !seq.is_empty() => Some(ack_frame(seq)),
            _ => None,
        }
    }

    /// The JSON payload of a push frame.
    pub fn json_payload(&self) -> Option<&str> {
        match self {
            Frame::Data {
                kind,
                payload: Some(payload),
                ..
            } if kind == JSON_FRAME_TYPE => Some(payload),
            _ => None,
        }
    }
}

pub fn ack_frame(seq: &str) -> String {
    format!("6:::{seq}")
}

pub fn control_frame(kind: ChannelControlKind, channel: &str) -> String {
    let control = json!({ "type": kind.as_str(), "channel": channel });
    format!("{JSON_FRAME_TYPE}:::{control}")
}

/// Parameters returned by the socket discovery call:
/// `key:heartbeat:close_timeout:transports`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketParams {
    pub key: String,
    pub heartbeat: String,
    pub close_timeout: String,
    pub transports: Vec<String>,
}

impl SocketParams {
    pub fn parse(body: &str) -> Result<Self> {
        let unexpected =
            || SessionError::network(format!("Unexpected response in WebSocket setup: '{body}'"));

        let fields: Vec<&str> = body.trim().splitn(4, ':').collect();
        let [key, heartbeat, close_timeout, transports] = fields.as_slice() else {
            return Err(unexpected());
        };
        let transports: Vec<String> = transports.split(',').map(str::to_string).collect();
        if key.is_empty() || !transports.iter().any(|transport| transport == "websocket") {
            return Err(unexpected());
        }

        Ok(Self {
            key: key.to_string(),
            heartbeat: heartbeat.to_string(),
            close_timeout: close_timeout.to_string(),
            transports,
        })
    }

    /// `{websocket_url}/1/websocket/{key}?session_uuid=..` on a ws scheme.
    pub fn socket_url(&self, websocket_url: &str, session_id: &str) -> Result<Url> {
        let mut url = service_url(
            websocket_url,
            &format!("1/websocket/{}", self.key),
            &[("session_uuid", session_id)],
        )?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => other,
        }
        .to_string();
        url.set_scheme(&scheme)
            .map_err(|_| SessionError::bad_response(format!("unsupported socket url: {url}")))?;
        Ok(url)
    }
}

pub fn discovery_url(websocket_url: &str, session_id: &str) -> Result<Url> {
    service_url(websocket_url, "1", &[("session_uuid", session_id)])
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
