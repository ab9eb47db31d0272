use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::protocol::{ChannelControlKind, ChannelEnvelope, PushData};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::COOKIE, HeaderName, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::SessionConfig,
    error::{Result, SessionError},
    frame::{self, control_frame, Frame, SocketParams, CONNECT_FRAME, DISCONNECT_FRAME, HEARTBEAT_FRAME},
    request_queue::{HttpRequest, RequestQueue},
    session::{LogLevel, SessionSignal},
    transport::{session_cookie, AUTH_TOKEN_HEADER},
};

type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Returns `true` when the message was consumed.
pub type ChannelHandler = Arc<dyn Fn(&ChannelMessage) -> bool + Send + Sync>;

/// A decoded push: the channel it arrived on plus its `data` object.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: String,
    pub klass: String,
    pub kind: Option<String>,
    pub record: Option<Value>,
    pub data: Value,
}

impl ChannelMessage {
    pub fn decode(payload: &str) -> Result<Self> {
        let envelope: ChannelEnvelope = serde_json::from_str(payload)
            .map_err(|err| SessionError::bad_response(format!("invalid push envelope: {err}")))?;
        let push: PushData = serde_json::from_value(envelope.data.clone())
            .map_err(|err| SessionError::bad_response(format!("invalid push data: {err}")))?;
        Ok(Self {
            channel: envelope.channel,
            klass: push.klass,
            kind: push.kind,
            record: push.record,
            data: envelope.data,
        })
    }
}

/// Subscription identity: subscribing twice with the same key is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberKey {
    pub owner: String,
    pub klass: Option<String>,
}

impl SubscriberKey {
    pub fn new(owner: impl Into<String>, klass: Option<&str>) -> Self {
        Self {
            owner: owner.into(),
            klass: klass.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

struct Subscription {
    id: SubscriptionId,
    key: SubscriberKey,
    handler: ChannelHandler,
}

impl Subscription {
    fn accepts(&self, message: &ChannelMessage) -> bool {
        self.key
            .klass
            .as_deref()
            .map_or(true, |klass| klass == message.klass)
    }
}

#[derive(Default)]
struct MuxState {
    channels: BTreeMap<String, Vec<Subscription>>,
    next_id: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
    /// Bumped per socket; a closing task from an older socket stays silent.
    generation: u64,
    /// The current socket has received the connect frame.
    connected: bool,
}

impl MuxState {
    fn send_text(&self, text: String) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(Message::Text(text));
        }
    }
}

pub struct ChannelMultiplexer {
    keepalive: Duration,
    signals: mpsc::UnboundedSender<SessionSignal>,
    state: Mutex<MuxState>,
}

impl ChannelMultiplexer {
    pub(crate) fn new(
        config: &SessionConfig,
        signals: mpsc::UnboundedSender<SessionSignal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            keepalive: config.keepalive_interval(),
            signals,
            state: Mutex::new(MuxState::default()),
        })
    }

    pub async fn subscribe(
        &self,
        channel: &str,
        key: SubscriberKey,
        handler: ChannelHandler,
    ) -> SubscriptionId {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .channels
            .get(channel)
            .and_then(|subs| subs.iter().find(|sub| sub.key == key))
        {
            return existing.id;
        }

        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        let first = !state.channels.contains_key(channel);
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscription { id, key, handler });
        if first {
            debug!(channel, "channel: subscribe");
            state.send_text(control_frame(ChannelControlKind::Subscribe, channel));
        }
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(channel) = state
            .channels
            .iter()
            .find(|(_, subs)| subs.iter().any(|sub| sub.id == id))
            .map(|(channel, _)| channel.clone())
        else {
            return false;
        };
        Self::remove_where(&mut state, &channel, |sub| sub.id == id);
        true
    }

    /// Drops every subscription held by `owner`, on any channel.
    pub async fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut state = self.state.lock().await;
        let channels: Vec<String> = state.channels.keys().cloned().collect();
        channels
            .iter()
            .map(|channel| Self::remove_where(&mut state, channel, |sub| sub.key.owner == owner))
            .sum()
    }

    fn remove_where(
        state: &mut MuxState,
        channel: &str,
        matches: impl Fn(&Subscription) -> bool,
    ) -> usize {
        let Some(subs) = state.channels.get_mut(channel) else {
            return 0;
        };
        let before = subs.len();
        subs.retain(|sub| !matches(sub));
        let removed = before - subs.len();
        if subs.is_empty() {
            state.channels.remove(channel);
            debug!(channel, "channel: unsubscribe");
            state.send_text(control_frame(ChannelControlKind::Unsubscribe, channel));
        }
        removed
    }

    pub async fn channels(&self) -> Vec<String> {
        self.state.lock().await.channels.keys().cloned().collect()
    }

    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.channels.values().map(Vec::len).sum()
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.outbound.is_some()
    }

    /// Delivers to every matching subscriber; one declining never stops its
    /// siblings. Handlers run outside the subscription lock.
    pub async fn dispatch(&self, message: &ChannelMessage) -> bool {
        let handlers: Vec<ChannelHandler> = {
            let state = self.state.lock().await;
            state
                .channels
                .get(&message.channel)
                .map(|subs| {
                    subs.iter()
                        .filter(|sub| sub.accepts(message))
                        .map(|sub| Arc::clone(&sub.handler))
                        .collect()
                })
                .unwrap_or_default()
        };
        handlers
            .iter()
            .fold(false, |handled, handler| handler(message) || handled)
    }

    pub async fn discover(
        queue: &Arc<RequestQueue>,
        websocket_url: &str,
        session_id: &str,
    ) -> Result<SocketParams> {
        let url = frame::discovery_url(websocket_url, session_id)?;
        let response = queue.send(HttpRequest::get(url).once()).await?;
        if response.status != 200 {
            return Err(SessionError::network(format!(
                "Websocket connection error ({}): {}",
                response.status, response.reason
            )));
        }
        SocketParams::parse(&response.text)
    }

    /// Opens a socket and re-sends every registered channel before any new
    /// subscription can reach it. Signals from the socket carry `episode`.
    pub async fn open(self: &Arc<Self>, url: Url, token: Option<&str>, episode: u64) -> Result<()> {
        let connect_failed =
            |err: String| SessionError::network(format!("Failed to establish WebSocket connection: {err}"));

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|err| connect_failed(err.to_string()))?;
        if let Some(token) = token {
            let cookie = HeaderValue::from_str(&session_cookie(token))
                .map_err(|err| connect_failed(err.to_string()))?;
            let auth_header = HeaderName::from_bytes(AUTH_TOKEN_HEADER.as_bytes())
                .map_err(|err| connect_failed(err.to_string()))?;
            request.headers_mut().insert(COOKIE, cookie.clone());
            request.headers_mut().insert(auth_header, cookie);
        }

        info!(url = %url, "channel: connecting socket");
        let (socket, _) = connect_async(request)
            .await
            .map_err(|err| connect_failed(err.to_string()))?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.connected = false;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        let _ = outbound.send(Message::Text(CONNECT_FRAME.to_string()));
        for channel in state.channels.keys() {
            let _ = outbound.send(Message::Text(control_frame(
                ChannelControlKind::Subscribe,
                channel,
            )));
        }
        state.outbound = Some(outbound);

        let generation = state.generation;
        let mux = Arc::clone(self);
        state.task = Some(tokio::spawn(async move {
            mux.run_socket(generation, episode, socket, outbound_rx).await;
        }));
        Ok(())
    }

    /// Unsubscribes every channel, says goodbye and closes the socket.
    /// All subscriptions are gone afterwards.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.connected = false;
        let channels = std::mem::take(&mut state.channels);
        if state.outbound.is_some() {
            for channel in channels.keys() {
                state.send_text(control_frame(ChannelControlKind::Unsubscribe, channel));
            }
            state.send_text(DISCONNECT_FRAME.to_string());
            info!(channels = channels.len(), "channel: socket shut down");
        }
        // Dropping the sender lets the socket task flush and close on its own.
        state.outbound = None;
        state.task = None;
    }

    async fn run_socket(
        self: Arc<Self>,
        generation: u64,
        episode: u64,
        socket: SocketStream,
        mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    ) {
        let (mut writer, mut reader) = socket.split();
        let mut keepalive = interval_at(Instant::now() + self.keepalive, self.keepalive);
        let mut last_inbound = Instant::now();
        let mut server_disconnect = false;

        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    let Some(message) = outbound else {
                        let _ = writer.send(Message::Close(None)).await;
                        break;
                    };
                    if let Err(err) = writer.send(message).await {
                        warn!(%err, "channel: socket send failed");
                        break;
                    }
                }
                inbound = reader.next() => {
                    let text = match inbound {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "channel: socket closed by peer");
                            break;
                        }
                        Some(Ok(_)) => {
                            last_inbound = Instant::now();
                            continue;
                        }
                        Some(Err(err)) => {
                            warn!(%err, "channel: socket receive failed");
                            break;
                        }
                        None => break,
                    };
                    last_inbound = Instant::now();

                    let frame = Frame::parse(&text);
                    match &frame {
                        Frame::Disconnect => {
                            server_disconnect = true;
                            break;
                        }
                        Frame::Connect => self.mark_connected(generation, episode).await,
                        Frame::Heartbeat => {
                            if writer.send(Message::Text(HEARTBEAT_FRAME.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Frame::Data { .. } => {
                            if let Some(ack) = frame.ack() {
                                if writer.send(Message::Text(ack)).await.is_err() {
                                    break;
                                }
                            }
                            if let Some(payload) = frame.json_payload() {
                                self.deliver(payload).await;
                            }
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if last_inbound.elapsed() >= self.keepalive * 3 {
                        warn!("channel: keepalive timeout");
                        break;
                    }
                    if writer.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.socket_closed(generation, episode, server_disconnect).await;
    }

    async fn mark_connected(&self, generation: u64, episode: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        state.connected = true;
        drop(state);
        info!("channel: socket connected");
        let _ = self.signals.send(SessionSignal::SocketReady { episode });
    }

    async fn deliver(&self, payload: &str) {
        let message = match ChannelMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "channel: undecodable push");
                let _ = self.signals.send(SessionSignal::Log {
                    level: LogLevel::Warning,
                    message: format!("Error parsing push message: {err}"),
                });
                return;
            }
        };

        if !self.dispatch(&message).await {
            warn!(
                channel = %message.channel,
                klass = %message.klass,
                "channel: unhandled push"
            );
            let _ = self.signals.send(SessionSignal::Log {
                level: LogLevel::Warning,
                message: format!(
                    "Unhandled push message on channel {} (klass {})",
                    message.channel, message.klass
                ),
            });
        }
    }

    async fn socket_closed(&self, generation: u64, episode: u64, server_disconnect: bool) {
        let was_connected = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.outbound = None;
            state.task = None;
            std::mem::take(&mut state.connected)
        };

        let signal = if server_disconnect {
            SessionSignal::EpisodeFailed {
                episode,
                error: SessionError::network("Push server closed connection"),
            }
        } else {
            SessionSignal::SocketClosed {
                episode,
                was_connected,
            }
        };
        let _ = self.signals.send(signal);
    }
}

#[cfg(test)]
#[path = "tests/channel_mux_tests.rs"]
mod tests;
