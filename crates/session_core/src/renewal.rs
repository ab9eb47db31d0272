use std::collections::VecDeque;

use reqwest::Method;
use shared::protocol::{RenewTokenRequest, RenewTokenResponse};

use crate::{
    error::{Result, SessionError},
    request_queue::{HttpRequest, PendingRequest},
    transport::{service_url, ServiceResponse},
};

const RENEWAL_FAILED: &str = "Failed to renew session token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewalPhase {
    #[default]
    Normal,
    Renewing,
    /// Terminal until a fresh token is installed.
    Failed,
}

/// What the request queue must do with a request that came back 401.
pub(crate) enum UnauthorizedAction {
    Parked,
    /// The request is parked first in line; issue the renewal call.
    StartRenewal { endpoint: String, token: String },
    Reject(PendingRequest, SessionError),
}

/// Renewal state machine plus the FIFO of requests waiting on it.
///
/// Holds no I/O of its own; the request queue drives it under its lock.
#[derive(Default)]
pub(crate) struct RenewalCoordinator {
    phase: RenewalPhase,
    endpoint: Option<String>,
    waiting: VecDeque<PendingRequest>,
}

impl RenewalCoordinator {
    pub fn phase(&self) -> RenewalPhase {
        self.phase
    }

    pub fn is_renewing(&self) -> bool {
        self.phase == RenewalPhase::Renewing
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn set_endpoint(&mut self, endpoint: Option<String>) {
        self.endpoint = endpoint;
    }

    /// Hands the request back unless a renewal is in flight.
    pub fn park_if_renewing(&mut self, pending: PendingRequest) -> Option<PendingRequest> {
        if self.is_renewing() {
            self.waiting.push_back(pending);
            None
        } else {
            Some(pending)
        }
    }

    pub fn on_unauthorized(
        &mut self,
        pending: PendingRequest,
        token_used: Option<&str>,
    ) -> UnauthorizedAction {
        match self.phase {
            RenewalPhase::Renewing => {
                self.waiting.push_back(pending);
                UnauthorizedAction::Parked
            }
            RenewalPhase::Failed => {
                UnauthorizedAction::Reject(pending, SessionError::auth(RENEWAL_FAILED))
            }
            RenewalPhase::Normal => match (self.endpoint.clone(), token_used) {
                (Some(endpoint), Some(token)) => {
                    self.phase = RenewalPhase::Renewing;
                    self.waiting.push_back(pending);
                    UnauthorizedAction::StartRenewal {
                        endpoint,
                        token: token.to_string(),
                    }
                }
                _ => UnauthorizedAction::Reject(
                    pending,
                    SessionError::auth("session token rejected"),
                ),
            },
        }
    }

    pub fn token_installed(&mut self) {
        if self.phase == RenewalPhase::Failed {
            self.phase = RenewalPhase::Normal;
        }
    }

    pub fn succeed(&mut self) -> VecDeque<PendingRequest> {
        self.phase = RenewalPhase::Normal;
        std::mem::take(&mut self.waiting)
    }

    pub fn fail(&mut self) -> VecDeque<PendingRequest> {
        self.phase = RenewalPhase::Failed;
        std::mem::take(&mut self.waiting)
    }

    pub fn reset(&mut self) -> VecDeque<PendingRequest> {
        self.phase = RenewalPhase::Normal;
        std::mem::take(&mut self.waiting)
    }
}

pub(crate) fn renewal_request(profile_url: &str, token: &str) -> Result<HttpRequest> {
    let url = service_url(profile_url, "tokens", &[("Token", token)])?;
    HttpRequest::new(Method::POST, url)
        .with_json(&RenewTokenRequest {
            token: token.to_string(),
        })
        .map(HttpRequest::once)
}

pub(crate) fn parse_renewed_token(response: ServiceResponse) -> Result<String> {
    let response = response.require_success(RENEWAL_FAILED)?;
    let renewed: RenewTokenResponse = response.parse(RENEWAL_FAILED)?;
    if renewed.session_token.is_empty() {
        return Err(SessionError::bad_response(format!(
            "{RENEWAL_FAILED}: empty SessionToken"
        )));
    }
    Ok(renewed.session_token)
}

#[cfg(test)]
#[path = "tests/renewal_tests.rs"]
mod tests;
