use std::{
    future::Future,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use reqwest::Method;
use shared::{
    domain::{ConversationId, DeviceId, MeetingId, ProfileId, RoomId, Subsystem},
    protocol::{DeviceRegistrationRequest, RegisteredSession, RegistrationResponse},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    channel_mux::{ChannelHandler, ChannelMessage, ChannelMultiplexer, SubscriberKey, SubscriptionId},
    collection::{CollectionEvent, Entity, RefreshOutcome, RefreshToken, SynchronizedCollection},
    config::SessionConfig,
    contacts::{Contact, PresenceSubscriptions},
    conversations::Conversation,
    error::{Result, SessionError},
    meetings::Meeting,
    request_queue::{HttpRequest, RequestHandle, RequestQueue},
    rooms::Room,
    transport::{service_url, HttpTransport, ReqwestTransport, ServiceResponse},
};

const SESSION_OWNER: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Contact,
    Room,
    Conversation,
    Meeting,
}

/// Everything a UI needs to follow the session, delivered over a broadcast
/// channel from [`Session::subscribe_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    /// Sent once per episode. `error` is set when the session failed.
    Disconnected { error: Option<SessionError> },
    AuthenticationRequired { server: String },
    Progress { percent: u8, message: String },
    Log { level: LogLevel, message: String },
    NewContact(ProfileId),
    NewRoom(RoomId),
    NewConversation(ConversationId),
    NewMeeting(MeetingId),
    EntityChanged {
        kind: EntityKind,
        id: String,
        field: &'static str,
    },
    EntityDied { kind: EntityKind, id: String },
    EntityRevived { kind: EntityKind, id: String },
}

/// Internal notifications funnelled into the session driver task, which is
/// the only place teardown runs.
pub(crate) enum SessionSignal {
    Fatal(SessionError),
    EpisodeFailed {
        episode: u64,
        error: SessionError,
    },
    Authenticated {
        episode: u64,
        token: String,
    },
    Registered {
        episode: u64,
        token: String,
        registration: Box<Registration>,
    },
    SocketReady {
        episode: u64,
    },
    SocketClosed {
        episode: u64,
        was_connected: bool,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Push {
        subsystem: Subsystem,
        message: ChannelMessage,
    },
    Ready {
        subsystem: Subsystem,
        episode: u64,
    },
    FetchFailed {
        subsystem: Subsystem,
        episode: u64,
        error: SessionError,
    },
}

/// Obtains a session token when `connect` finds none.
#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn obtain_token(&self, server: &str, account_email: &str) -> Result<String>;
}

pub struct MissingLoginProvider;

#[async_trait]
impl LoginProvider for MissingLoginProvider {
    async fn obtain_token(&self, _server: &str, _account_email: &str) -> Result<String> {
        Err(SessionError::auth("no login provider configured"))
    }
}

/// Service base URLs handed out at registration, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub presence: String,
    pub profile: String,
    pub contacts: String,
    pub messaging: String,
    pub conference: String,
    pub feature: String,
    pub express: String,
    pub reachability: String,
    pub websocket: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub session_id: String,
    pub profile_id: ProfileId,
    pub display_name: String,
    pub email: String,
    pub profile_channel: String,
    pub presence_channel: String,
    pub device_id: DeviceId,
    pub device_channel: String,
    pub endpoints: Endpoints,
}

impl Registration {
    fn from_session(session: RegisteredSession) -> Self {
        let services = session.service_config;
        let express = services.feature.rest_url.replacen("feature", "express", 1);
        Self {
            session_id: session.session_id,
            profile_id: session.profile.id,
            display_name: session.profile.display_name,
            email: session.profile.email,
            profile_channel: session.profile.profile_channel,
            presence_channel: session.profile.presence_channel,
            device_id: session.device.device_id,
            device_channel: session.device.channel,
            endpoints: Endpoints {
                presence: services.presence.rest_url,
                profile: services.profile.rest_url,
                contacts: services.contacts.rest_url,
                messaging: services.messaging.rest_url,
                conference: services.conference.rest_url,
                feature: services.feature.rest_url,
                express,
                reachability: services.push.reachability_url,
                websocket: services.push.websocket_url,
            },
        }
    }
}

#[cfg(test)]
impl Registration {
    /// A registration whose services all live under `base`.
    pub(crate) fn for_tests(profile_id: &str, base: &str) -> Self {
        let endpoints = Endpoints {
            presence: base.to_string(),
            profile: base.to_string(),
            contacts: base.to_string(),
            messaging: base.to_string(),
            conference: base.to_string(),
            feature: base.to_string(),
            express: base.to_string(),
            reachability: base.to_string(),
            websocket: base.to_string(),
        };
        Self {
            session_id: "sess-1".into(),
            profile_id: ProfileId::new(profile_id),
            display_name: "Me".into(),
            email: "me@example.com".into(),
            profile_channel: format!("profile!{profile_id}"),
            presence_channel: format!("presence!{profile_id}"),
            device_id: DeviceId::new("d1"),
            device_channel: "device!d1".into(),
            endpoints,
        }
    }
}

/// Builds the device registration call for `token`.
pub fn registration_request(config: &SessionConfig, token: &str) -> Result<HttpRequest> {
    let url = service_url(&config.server, "sessions", &[("Token", token)])?;
    Ok(HttpRequest::new(Method::POST, url)
        .with_json(&DeviceRegistrationRequest::new(
            &config.platform,
            &config.device_token,
        ))?
        .once())
}

/// Splits a registration response into the new session token and the
/// stored registration.
pub fn parse_registration(response: ServiceResponse) -> Result<(String, Registration)> {
    let response = response.require_success("Device registration failed")?;
    if response.json.is_none() {
        return Err(SessionError::network(
            "Device registration failed: no structured response",
        ));
    }
    let parsed: RegistrationResponse =
        response.parse("Failed to process registration response")?;
    let token = parsed.session.session_token.clone();
    if token.is_empty() {
        return Err(SessionError::bad_response(
            "Failed to process registration response: empty session token",
        ));
    }
    Ok((token, Registration::from_session(parsed.session)))
}

/// A domain entity kept in sync by a full listing plus pushes.
pub(crate) trait Synced: Entity {
    const SUBSYSTEM: Subsystem;

    fn collection(domain: &mut Domain) -> &mut SynchronizedCollection<Self>;

    fn page_request(
        registration: &Registration,
        page_size: u32,
        next: Option<&str>,
    ) -> Result<HttpRequest>;

    /// Applies one listing page and returns the next page token, if any.
    fn apply_page(
        domain: &mut Domain,
        registration: &Registration,
        response: ServiceResponse,
    ) -> Result<Option<String>>;
}

/// The four synchronized collections of one session.
pub struct Domain {
    pub contacts: SynchronizedCollection<Contact>,
    pub rooms: SynchronizedCollection<Room>,
    pub conversations: SynchronizedCollection<Conversation>,
    pub meetings: SynchronizedCollection<Meeting>,
    pub(crate) presence: PresenceSubscriptions,
}

impl Domain {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        let mut domain = Self {
            contacts: SynchronizedCollection::new(),
            rooms: SynchronizedCollection::new(),
            conversations: SynchronizedCollection::new(),
            meetings: SynchronizedCollection::new(),
            presence: PresenceSubscriptions::default(),
        };
        let sink = events.clone();
        domain.contacts.observe(move |event| {
            forward(&sink, EntityKind::Contact, event, |id| {
                SessionEvent::NewContact(id.clone())
            })
        });
        let sink = events.clone();
        domain.rooms.observe(move |event| {
            forward(&sink, EntityKind::Room, event, |id| {
                SessionEvent::NewRoom(id.clone())
            })
        });
        let sink = events.clone();
        domain.conversations.observe(move |event| {
            forward(&sink, EntityKind::Conversation, event, |id| {
                SessionEvent::NewConversation(id.clone())
            })
        });
        domain.meetings.observe(move |event| {
            forward(&events, EntityKind::Meeting, event, |id| {
                SessionEvent::NewMeeting(id.clone())
            })
        });
        domain
    }

    /// Releases the contact holds carried by freed conversations and
    /// meetings.
    pub fn settle(&mut self) {
        for conversation in self.conversations.take_freed() {
            for member in conversation.members {
                self.contacts.release(member);
            }
        }
        for meeting in self.meetings.take_freed() {
            self.contacts.release(meeting.organiser);
        }
        self.rooms.take_freed();
        self.contacts.take_freed();
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.meetings.clear();
        self.rooms.clear();
        self.contacts.clear();
        self.presence = PresenceSubscriptions::default();
    }
}

fn forward<Id: ToString>(
    events: &broadcast::Sender<SessionEvent>,
    kind: EntityKind,
    event: &CollectionEvent<Id>,
    added: impl Fn(&Id) -> SessionEvent,
) {
    let event = match event {
        CollectionEvent::Added(id) => added(id),
        CollectionEvent::Changed { id, field } => SessionEvent::EntityChanged {
            kind,
            id: id.to_string(),
            field: *field,
        },
        CollectionEvent::Died(id) => SessionEvent::EntityDied {
            kind,
            id: id.to_string(),
        },
        CollectionEvent::Revived(id) => SessionEvent::EntityRevived {
            kind,
            id: id.to_string(),
        },
    };
    let _ = events.send(event);
}

fn all_ready() -> u8 {
    Subsystem::ALL
        .iter()
        .fold(0, |bits, subsystem| bits | subsystem.bit())
}

#[derive(Default)]
struct SessionState {
    connection: ConnectionState,
    readiness: u8,
    /// Bumped by every connect and teardown; work from an older episode is
    /// ignored.
    episode: u64,
    registration: Option<Arc<Registration>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionState {
    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(task);
    }

    fn is_current(&self, episode: u64) -> bool {
        self.episode == episode && self.connection != ConnectionState::Disconnected
    }
}

/// One authenticated connection to the service.
pub struct Session {
    config: SessionConfig,
    requests: Arc<RequestQueue>,
    channels: Arc<ChannelMultiplexer>,
    login: Arc<dyn LoginProvider>,
    events: broadcast::Sender<SessionEvent>,
    signals: mpsc::UnboundedSender<SessionSignal>,
    state: Mutex<SessionState>,
    pub(crate) domain: Mutex<Domain>,
    driver: JoinHandle<()>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Arc<Self>> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new_with_dependencies(
            config,
            Arc::new(transport),
            Arc::new(MissingLoginProvider),
        ))
    }

    /// Must be called from within a tokio runtime.
    pub fn new_with_dependencies(
        config: SessionConfig,
        transport: Arc<dyn HttpTransport>,
        login: Arc<dyn LoginProvider>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (signals, signal_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak: &Weak<Session>| Self {
            requests: RequestQueue::new(transport, &config, signals.clone()),
            channels: ChannelMultiplexer::new(&config, signals.clone()),
            login,
            domain: Mutex::new(Domain::new(events.clone())),
            events,
            signals,
            state: Mutex::new(SessionState::default()),
            driver: tokio::spawn(Self::drive(weak.clone(), signal_rx)),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn requests(&self) -> &Arc<RequestQueue> {
        &self.requests
    }

    pub fn channels(&self) -> &Arc<ChannelMultiplexer> {
        &self.channels
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    pub async fn registration(&self) -> Option<Arc<Registration>> {
        self.state.lock().await.registration.clone()
    }

    pub async fn session_token(&self) -> Option<String> {
        self.requests.token().await
    }

    pub async fn set_session_token(&self, token: impl Into<String>) {
        self.requests.install_token(Some(token.into())).await;
    }

    pub async fn queue_http_request(&self, request: HttpRequest) -> RequestHandle {
        self.requests.queue(request).await
    }

    /// Starts connecting unless already connecting or connected. Progress and
    /// the outcome arrive as [`SessionEvent`]s.
    pub async fn connect(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.connection != ConnectionState::Disconnected {
            debug!(state = ?state.connection, "session: connect ignored");
            return;
        }
        state.connection = ConnectionState::Connecting;
        state.episode += 1;
        state.readiness = 0;
        let episode = state.episode;

        match self.requests.token().await {
            Some(token) => self.start_registration(&mut state, episode, token),
            None => {
                info!(server = %self.config.server, "session: no token, authentication required");
                self.emit(SessionEvent::AuthenticationRequired {
                    server: self.config.server.clone(),
                });
                let session = Arc::clone(self);
                state.track(tokio::spawn(async move {
                    session.authenticate(episode).await;
                }));
            }
        }
    }

    /// Clean shutdown: the `Disconnected` event carries no error.
    pub async fn disconnect(&self) {
        self.teardown(None).await;
    }

    /// Ends the session with `error`; never reconnects by itself.
    pub async fn fail(&self, error: SessionError) {
        self.teardown(Some(error)).await;
    }

    async fn teardown(&self, error: Option<SessionError>) {
        let (previous, tasks) = {
            let mut state = self.state.lock().await;
            let previous = std::mem::take(&mut state.connection);
            state.episode += 1;
            state.readiness = 0;
            state.registration = None;
            (previous, std::mem::take(&mut state.tasks))
        };
        for task in tasks {
            task.abort();
        }

        self.channels.shutdown().await;
        self.requests.cancel_all().await;
        self.requests.set_renewal_endpoint(None).await;
        self.domain.lock().await.clear();

        if previous == ConnectionState::Disconnected {
            return;
        }
        match &error {
            Some(err) => error!(%err, "session: failed"),
            None => info!("session: disconnected"),
        }
        self.emit(SessionEvent::Disconnected { error });
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(SessionEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn progress(&self, percent: u8, message: &str) {
        self.emit(SessionEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }

    /// The registration of the running episode, if registered.
    pub(crate) async fn active(&self) -> Option<(u64, Arc<Registration>)> {
        let state = self.state.lock().await;
        if state.connection == ConnectionState::Disconnected {
            return None;
        }
        state
            .registration
            .clone()
            .map(|registration| (state.episode, registration))
    }

    pub(crate) async fn require_registration(&self) -> Result<Arc<Registration>> {
        self.active()
            .await
            .map(|(_, registration)| registration)
            .ok_or_else(|| SessionError::network("Session is not connected"))
    }

    /// Subscribes `channel` on behalf of `episode`. Teardown bumps the episode
    /// before it clears the multiplexer, so a subscription made here either
    /// lands before that clear or is never made.
    pub(crate) async fn subscribe_channel(
        &self,
        episode: u64,
        channel: &str,
        key: SubscriberKey,
        handler: ChannelHandler,
    ) -> Option<SubscriptionId> {
        let state = self.state.lock().await;
        if !state.is_current(episode) {
            debug!(channel, episode, "session: stale subscription skipped");
            return None;
        }
        Some(self.channels.subscribe(channel, key, handler).await)
    }

    /// Runs `future` as part of the current episode; teardown aborts it.
    pub(crate) async fn spawn_tracked<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if state.connection == ConnectionState::Disconnected {
            return;
        }
        state.track(tokio::spawn(future));
    }

    /// A handler that forwards accepted pushes to the driver.
    pub(crate) fn push_handler(
        &self,
        subsystem: Subsystem,
        accepts: fn(&ChannelMessage) -> bool,
    ) -> ChannelHandler {
        let signals = self.signals.clone();
        Arc::new(move |message: &ChannelMessage| {
            if !accepts(message) {
                return false;
            }
            let _ = signals.send(SessionSignal::Push {
                subsystem,
                message: message.clone(),
            });
            true
        })
    }

    fn start_registration(self: &Arc<Self>, state: &mut SessionState, episode: u64, token: String) {
        self.progress(10, "Registering device");
        let session = Arc::clone(self);
        state.track(tokio::spawn(async move {
            session.register(episode, token).await;
        }));
    }

    async fn authenticate(self: Arc<Self>, episode: u64) {
        let signal = match self
            .login
            .obtain_token(&self.config.server, &self.config.account_email)
            .await
        {
            Ok(token) => SessionSignal::Authenticated { episode, token },
            Err(error) => SessionSignal::EpisodeFailed { episode, error },
        };
        let _ = self.signals.send(signal);
    }

    async fn register(self: Arc<Self>, episode: u64, token: String) {
        let outcome = match registration_request(&self.config, &token) {
            Ok(request) => self
                .requests
                .send(request)
                .await
                .and_then(parse_registration),
            Err(err) => Err(err),
        };
        let signal = match outcome {
            Ok((token, registration)) => SessionSignal::Registered {
                episode,
                token,
                registration: Box::new(registration),
            },
            Err(error) => SessionSignal::EpisodeFailed { episode, error },
        };
        let _ = self.signals.send(signal);
    }

    async fn registered(self: &Arc<Self>, episode: u64, token: String, registration: Registration) {
        let registration = Arc::new(registration);
        {
            // Held until the socket task is tracked so teardown cannot
            // interleave with the token, endpoint and channel setup.
            let mut state = self.state.lock().await;
            if !state.is_current(episode) {
                return;
            }
            state.registration = Some(Arc::clone(&registration));
            info!(
                session_id = %registration.session_id,
                profile = %registration.profile_id,
                "session: device registered"
            );
            self.requests.install_token(Some(token)).await;
            self.requests
                .set_renewal_endpoint(Some(registration.endpoints.profile.clone()))
                .await;

            for channel in [
                &registration.profile_channel,
                &registration.presence_channel,
                &registration.device_channel,
            ] {
                self.channels
                    .subscribe(
                        channel,
                        SubscriberKey::new(SESSION_OWNER, None),
                        Arc::new(|_: &ChannelMessage| false),
                    )
                    .await;
            }

            let session = Arc::clone(self);
            let socket_registration = Arc::clone(&registration);
            state.track(tokio::spawn(async move {
                session.connect_socket(episode, socket_registration).await;
            }));
        }

        self.start_contacts().await;
        self.start_rooms(episode, &registration).await;
        self.start_conversations(episode, &registration).await;
        self.start_meetings(episode, &registration).await;
    }

    async fn connect_socket(self: Arc<Self>, episode: u64, registration: Arc<Registration>) {
        let websocket_url = &registration.endpoints.websocket;
        let session_id = &registration.session_id;
        let outcome = async {
            self.progress(20, "Obtaining WebSocket params");
            let params =
                ChannelMultiplexer::discover(&self.requests, websocket_url, session_id).await?;
            self.progress(30, "Establishing WebSocket connection");
            let url = params.socket_url(websocket_url, session_id)?;
            let token = self.requests.token().await;
            self.channels.open(url, token.as_deref(), episode).await
        }
        .await;
        if let Err(error) = outcome {
            let _ = self.signals.send(SessionSignal::EpisodeFailed { episode, error });
        }
    }

    async fn reconnect_socket(self: &Arc<Self>) {
        let Some((episode, registration)) = self.active().await else {
            return;
        };
        warn!("session: channel socket lost, reconnecting");
        self.log(LogLevel::Warning, "Channel socket closed, reconnecting");
        let session = Arc::clone(self);
        self.spawn_tracked(async move {
            session.connect_socket(episode, registration).await;
        })
        .await;
    }

    /// Sets a readiness bit and goes online once every bit is set.
    async fn mark_ready(&self, subsystem: Subsystem, episode: u64) {
        let mut state = self.state.lock().await;
        if !state.is_current(episode) {
            return;
        }
        state.readiness |= subsystem.bit();
        debug!(?subsystem, readiness = state.readiness, "session: subsystem ready");
        if state.connection == ConnectionState::Connecting && state.readiness == all_ready() {
            state.connection = ConnectionState::Connected;
            drop(state);
            info!("session: connected");
            self.emit(SessionEvent::Connected);
        }
    }

    async fn is_ready(&self, subsystem: Subsystem) -> bool {
        self.state.lock().await.readiness & subsystem.bit() != 0
    }

    async fn is_current(&self, episode: u64) -> bool {
        self.state.lock().await.is_current(episode)
    }

    /// Starts a full refresh of `T` unless one is running, in which case
    /// the running pass restarts once it ends.
    pub(crate) async fn refresh<T: Synced>(self: &Arc<Self>) {
        let Some((episode, registration)) = self.active().await else {
            return;
        };
        let session = Arc::clone(self);
        self.spawn_tracked(async move {
            session.run_refresh::<T>(episode, registration).await;
        })
        .await;
    }

    async fn run_refresh<T: Synced>(self: Arc<Self>, episode: u64, registration: Arc<Registration>) {
        let begun = T::collection(&mut *self.domain.lock().await).begin_refresh();
        let Ok(mut token) = begun else {
            debug!(subsystem = ?T::SUBSYSTEM, "sync: refresh already running, marked stale");
            return;
        };

        loop {
            if let Err(error) = self.fetch_pages::<T>(&registration, &token).await {
                T::collection(&mut *self.domain.lock().await).abandon_refresh(token);
                warn!(subsystem = ?T::SUBSYSTEM, %error, "sync: refresh failed");
                let _ = self.signals.send(SessionSignal::FetchFailed {
                    subsystem: T::SUBSYSTEM,
                    episode,
                    error,
                });
                return;
            }

            let mut domain = self.domain.lock().await;
            let outcome = T::collection(&mut domain).end_refresh(token);
            match outcome {
                RefreshOutcome::Completed => {
                    let expired = T::collection(&mut domain).expire_outdated();
                    domain.settle();
                    drop(domain);
                    debug!(subsystem = ?T::SUBSYSTEM, expired, "sync: refresh complete");
                    self.after_refresh(T::SUBSYSTEM).await;
                    let _ = self.signals.send(SessionSignal::Ready {
                        subsystem: T::SUBSYSTEM,
                        episode,
                    });
                    return;
                }
                RefreshOutcome::Restart(next) => {
                    debug!(subsystem = ?T::SUBSYSTEM, "sync: invalidated mid-fetch, restarting");
                    token = next;
                }
                RefreshOutcome::Discarded => return,
            }
        }
    }

    async fn fetch_pages<T: Synced>(
        &self,
        registration: &Registration,
        token: &RefreshToken,
    ) -> Result<()> {
        let mut next: Option<String> = None;
        loop {
            let request = T::page_request(registration, self.config.page_size, next.as_deref())?;
            let response = self.requests.send(request).await?;

            let mut domain = self.domain.lock().await;
            if T::collection(&mut domain).is_stale(token) {
                return Ok(());
            }
            next = T::apply_page(&mut domain, registration, response)?;
            domain.settle();
            if next.is_none() {
                return Ok(());
            }
        }
    }

    async fn after_refresh(self: &Arc<Self>, subsystem: Subsystem) {
        if subsystem == Subsystem::Contacts {
            self.sync_presence_subscriptions().await;
        }
    }

    async fn drive(session: Weak<Session>, mut signals: mpsc::UnboundedReceiver<SessionSignal>) {
        while let Some(signal) = signals.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            session.handle_signal(signal).await;
        }
    }

    async fn handle_signal(self: &Arc<Self>, signal: SessionSignal) {
        match signal {
            SessionSignal::Fatal(error) => {
                if self.connection_state().await != ConnectionState::Disconnected {
                    self.fail(error).await;
                }
            }
            SessionSignal::EpisodeFailed { episode, error } => {
                if self.is_current(episode).await {
                    self.fail(error).await;
                }
            }
            SessionSignal::Authenticated { episode, token } => {
                let mut state = self.state.lock().await;
                if !state.is_current(episode) {
                    return;
                }
                self.requests.install_token(Some(token.clone())).await;
                self.start_registration(&mut state, episode, token);
            }
            SessionSignal::Registered {
                episode,
                token,
                registration,
            } => self.registered(episode, token, *registration).await,
            SessionSignal::SocketReady { episode } => {
                self.mark_ready(Subsystem::ChannelSocket, episode).await
            }
            SessionSignal::SocketClosed {
                episode,
                was_connected,
            } => {
                if !self.is_current(episode).await {
                    return;
                }
                if was_connected {
                    self.reconnect_socket().await;
                } else {
                    self.fail(SessionError::network("Failed to establish WebSocket connection"))
                        .await;
                }
            }
            SessionSignal::Log { level, message } => self.log(level, message),
            SessionSignal::Push { subsystem, message } => {
                if let Err(err) = self.apply_push(subsystem, &message).await {
                    warn!(channel = %message.channel, klass = %message.klass, %err, "session: push not applied");
                    self.log(
                        LogLevel::Warning,
                        format!("Failed to apply {} push: {err}", message.klass),
                    );
                }
            }
            SessionSignal::Ready { subsystem, episode } => {
                self.mark_ready(subsystem, episode).await
            }
            SessionSignal::FetchFailed {
                subsystem,
                episode,
                error,
            } => {
                if !self.is_current(episode).await {
                    return;
                }
                if self.is_ready(subsystem).await {
                    self.log(LogLevel::Warning, error.to_string());
                } else {
                    self.fail(error).await;
                }
            }
        }
    }

    async fn apply_push(self: &Arc<Self>, subsystem: Subsystem, message: &ChannelMessage) -> Result<()> {
        match subsystem {
            Subsystem::Contacts => self.contacts_push(message).await,
            Subsystem::Rooms => self.rooms_push(message).await,
            Subsystem::Conversations => self.conversations_push(message).await,
            Subsystem::Meetings => self.meetings_push(message).await,
            Subsystem::ChannelSocket => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
