use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::SessionConfig,
    error::{Result, SessionError},
    renewal::{self, RenewalCoordinator, RenewalPhase, UnauthorizedAction},
    session::{LogLevel, SessionSignal},
    transport::{session_cookie, HttpTransport, OutboundRequest, ServiceResponse, AUTH_TOKEN_HEADER},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// A 401 parks the request behind a token renewal and replays it.
    /// Parked requests replay one at a time, in the order they parked.
    Renewable,
    /// The response is delivered as-is, 401 included.
    Once,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<Value>,
    pub policy: RetryPolicy,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            policy: RetryPolicy::Renewable,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let body = serde_json::to_value(body)
            .map_err(|err| SessionError::bad_response(format!("failed to encode body: {err}")))?;
        self.body = Some(body);
        Ok(self)
    }

    pub fn once(mut self) -> Self {
        self.policy = RetryPolicy::Once;
        self
    }
}

/// A request owned by the queue: either running as a task or parked behind
/// a renewal, never both.
pub(crate) struct PendingRequest {
    pub id: RequestId,
    pub request: HttpRequest,
    pub epoch: u64,
    pub reply: oneshot::Sender<Result<ServiceResponse>>,
}

impl PendingRequest {
    pub fn complete(self, result: Result<ServiceResponse>) {
        let _ = self.reply.send(result);
    }
}

/// Resolves exactly once with the final outcome of a queued request.
///
/// A request dropped by [`RequestQueue::cancel_all`] resolves to
/// [`SessionError::Cancelled`].
pub struct RequestHandle {
    id: RequestId,
    reply: oneshot::Receiver<Result<ServiceResponse>>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for RequestHandle {
    type Output = Result<ServiceResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.reply).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SessionError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Default)]
struct QueueState {
    token: Option<String>,
    epoch: u64,
    next_id: u64,
    in_flight: HashMap<RequestId, JoinHandle<()>>,
    renewal: RenewalCoordinator,
    renewal_task: Option<JoinHandle<()>>,
    /// Parked requests not yet resolved by the replay task.
    replaying: HashSet<RequestId>,
    replay_tasks: Vec<JoinHandle<()>>,
}

impl QueueState {
    fn allocate_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }
}

pub struct RequestQueue {
    transport: Arc<dyn HttpTransport>,
    user_agent: String,
    log_wire_bodies: bool,
    signals: mpsc::UnboundedSender<SessionSignal>,
    state: Mutex<QueueState>,
}

impl RequestQueue {
    pub(crate) fn new(
        transport: Arc<dyn HttpTransport>,
        config: &SessionConfig,
        signals: mpsc::UnboundedSender<SessionSignal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            user_agent: config.user_agent.clone(),
            log_wire_bodies: config.log_wire_bodies,
            signals,
            state: Mutex::new(QueueState {
                token: config.session_token.clone(),
                ..QueueState::default()
            }),
        })
    }

    pub async fn queue(self: &Arc<Self>, request: HttpRequest) -> RequestHandle {
        let (reply, rx) = oneshot::channel();
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let pending = PendingRequest {
            id,
            request,
            epoch: state.epoch,
            reply,
        };

        let pending = if pending.request.policy == RetryPolicy::Renewable {
            state.renewal.park_if_renewing(pending)
        } else {
            Some(pending)
        };
        match pending {
            Some(pending) => self.spawn_locked(&mut state, pending),
            None => debug!(request_id = id.0, "renewal: request parked until renewal completes"),
        }

        RequestHandle { id, reply: rx }
    }

    /// Queues and waits in one step.
    pub async fn send(self: &Arc<Self>, request: HttpRequest) -> Result<ServiceResponse> {
        self.queue(request).await.await
    }

    /// The single place a session token is applied.
    pub async fn install_token(&self, token: Option<String>) {
        let mut state = self.state.lock().await;
        state.token = token.filter(|token| !token.is_empty());
        state.renewal.token_installed();
    }

    pub async fn token(&self) -> Option<String> {
        self.state.lock().await.token.clone()
    }

    /// Base URL of the profile service, known only after registration.
    pub async fn set_renewal_endpoint(&self, profile_url: Option<String>) {
        self.state.lock().await.renewal.set_endpoint(profile_url);
    }

    pub async fn renewal_phase(&self) -> RenewalPhase {
        self.state.lock().await.renewal.phase()
    }

    /// Requests either running or parked behind a renewal.
    pub async fn outstanding(&self) -> usize {
        let state = self.state.lock().await;
        state.in_flight.len() + state.replaying.len() + state.renewal.waiting_len()
    }

    /// Drops every outstanding request; each handle resolves to `Cancelled`.
    pub async fn cancel_all(&self) {
        let mut state = self.state.lock().await;
        state.epoch += 1;
        let cancelled =
            state.in_flight.len() + state.replaying.len() + state.renewal.waiting_len();
        for (_, task) in state.in_flight.drain() {
            task.abort();
        }
        state.replaying.clear();
        for task in state.replay_tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = state.renewal_task.take() {
            task.abort();
        }
        let waiting = state.renewal.reset();
        drop(state);

        for pending in waiting {
            pending.complete(Err(SessionError::Cancelled));
        }
        if cancelled > 0 {
            info!(cancelled, "http: cancelled outstanding requests");
        }
    }

    fn spawn_locked(self: &Arc<Self>, state: &mut QueueState, pending: PendingRequest) {
        let id = pending.id;
        let queue = Arc::clone(self);
        let task = tokio::spawn(async move { queue.run(pending).await });
        state.in_flight.insert(id, task);
    }

    /// Resends parked requests from a single task so they reach the
    /// transport in FIFO order on any runtime.
    fn replay_locked(self: &Arc<Self>, state: &mut QueueState, waiting: VecDeque<PendingRequest>) {
        if waiting.is_empty() {
            return;
        }
        state.replaying.extend(waiting.iter().map(|pending| pending.id));
        let queue = Arc::clone(self);
        state.replay_tasks.retain(|task| !task.is_finished());
        state.replay_tasks.push(tokio::spawn(async move {
            for pending in waiting {
                Arc::clone(&queue).run(pending).await;
            }
        }));
    }

    fn outbound(&self, request: &HttpRequest, token: Option<&str>) -> OutboundRequest {
        let mut headers = vec![
            ("Accept".to_string(), "*/*".to_string()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ];
        if let Some(token) = token {
            let cookie = session_cookie(token);
            headers.push(("Cookie".to_string(), cookie.clone()));
            headers.push((AUTH_TOKEN_HEADER.to_string(), cookie));
        }
        OutboundRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers,
            body: request.body.clone(),
        }
    }

    async fn execute(&self, request: &HttpRequest, token: Option<&str>) -> Result<ServiceResponse> {
        let outbound = self.outbound(request, token);
        if self.log_wire_bodies {
            debug!(
                method = %outbound.method,
                url = %outbound.url,
                body = ?outbound.body,
                "http: sending request"
            );
        }
        let raw = self.transport.execute(outbound).await?;
        let response = ServiceResponse::from_raw(raw);
        if self.log_wire_bodies {
            debug!(status = response.status, body = %response.text, "http: received response");
        }
        Ok(response)
    }

    async fn run(self: Arc<Self>, pending: PendingRequest) {
        let token = self.state.lock().await.token.clone();
        let result = self.execute(&pending.request, token.as_deref()).await;

        let mut state = self.state.lock().await;
        state.in_flight.remove(&pending.id);
        state.replaying.remove(&pending.id);
        if state.epoch != pending.epoch {
            return;
        }

        match result {
            Ok(response)
                if response.status == 401 && pending.request.policy == RetryPolicy::Renewable =>
            {
                self.handle_unauthorized(&mut state, pending, token);
            }
            Ok(response) => {
                drop(state);
                pending.complete(Ok(response));
            }
            Err(err) => {
                drop(state);
                warn!(url = %pending.request.url, %err, "http: request failed");
                pending.complete(Err(err));
            }
        }
    }

    fn handle_unauthorized(
        self: &Arc<Self>,
        state: &mut QueueState,
        pending: PendingRequest,
        token_used: Option<String>,
    ) {
        // Sent with a token that has since been replaced: just resend.
        if state.token.is_some() && state.token != token_used && !state.renewal.is_renewing() {
            self.spawn_locked(state, pending);
            return;
        }

        match state.renewal.on_unauthorized(pending, token_used.as_deref()) {
            UnauthorizedAction::Parked => {}
            UnauthorizedAction::StartRenewal { endpoint, token } => {
                info!("renewal: session token rejected, renewing");
                let _ = self.signals.send(SessionSignal::Log {
                    level: LogLevel::Info,
                    message: "Session token expired, renewing".to_string(),
                });
                let queue = Arc::clone(self);
                let epoch = state.epoch;
                state.renewal_task = Some(tokio::spawn(async move {
                    queue.renew(epoch, endpoint, token).await;
                }));
            }
            UnauthorizedAction::Reject(pending, err) => {
                warn!(url = %pending.request.url, %err, "http: unauthorized");
                pending.complete(Err(err));
            }
        }
    }

    async fn renew(self: Arc<Self>, epoch: u64, endpoint: String, token: String) {
        let outcome = match renewal::renewal_request(&endpoint, &token) {
            Ok(request) => self
                .execute(&request, Some(token.as_str()))
                .await
                .and_then(renewal::parse_renewed_token),
            Err(err) => Err(err),
        };

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            debug!("renewal: outcome discarded after cancellation");
            return;
        }
        state.renewal_task = None;

        match outcome {
            Ok(renewed) => {
                state.token = Some(renewed);
                let waiting = state.renewal.succeed();
                info!(replayed = waiting.len(), "renewal: session token renewed");
                self.replay_locked(&mut state, waiting);
            }
            Err(err) => {
                error!(%err, "renewal: failed");
                state.token = None;
                let waiting = state.renewal.fail();
                drop(state);

                let reason = SessionError::auth("Failed to renew session token");
                for pending in waiting {
                    pending.complete(Err(reason.clone()));
                }
                let _ = self.signals.send(SessionSignal::Fatal(reason));
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/request_queue_tests.rs"]
mod tests;
