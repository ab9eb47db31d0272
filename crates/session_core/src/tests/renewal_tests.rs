use super::*;

use reqwest::Method;
use serde_json::json;
use tokio::sync::oneshot;
use url::Url;

use crate::{
    request_queue::{RequestId, RetryPolicy},
    transport::RawResponse,
};

fn pending(id: u64) -> (PendingRequest, oneshot::Receiver<Result<ServiceResponse>>) {
    let (reply, rx) = oneshot::channel();
    let url = Url::parse(&format!("https://messaging.example.test/r{id}")).expect("url");
    (
        PendingRequest {
            id: RequestId(id),
            request: HttpRequest::get(url),
            epoch: 0,
            reply,
        },
        rx,
    )
}

#[test]
fn first_unauthorized_starts_single_renewal() {
    let mut coordinator = RenewalCoordinator::default();
    coordinator.set_endpoint(Some("https://profile.example.test".into()));

    let (first, _first_rx) = pending(1);
    let (second, _second_rx) = pending(2);

    match coordinator.on_unauthorized(first, Some("T1")) {
        UnauthorizedAction::StartRenewal { endpoint, token } => {
            assert_eq!(endpoint, "https://profile.example.test");
            assert_eq!(token, "T1");
        }
        _ => panic!("expected renewal to start"),
    }
    assert!(coordinator.is_renewing());
    assert!(matches!(
        coordinator.on_unauthorized(second, Some("T1")),
        UnauthorizedAction::Parked
    ));

    let replay: Vec<u64> = coordinator.succeed().into_iter().map(|p| p.id.0).collect();
    assert_eq!(replay, vec![1, 2]);
    assert_eq!(coordinator.phase(), RenewalPhase::Normal);
}

#[test]
fn unauthorized_without_endpoint_is_rejected() {
    let mut coordinator = RenewalCoordinator::default();
    let (request, _rx) = pending(1);

    match coordinator.on_unauthorized(request, Some("T1")) {
        UnauthorizedAction::Reject(_, err) => assert_eq!(err.kind(), crate::ErrorKind::Auth),
        _ => panic!("expected rejection"),
    }
    assert_eq!(coordinator.phase(), RenewalPhase::Normal);
}

#[test]
fn failed_phase_rejects_until_token_installed() {
    let mut coordinator = RenewalCoordinator::default();
    coordinator.set_endpoint(Some("https://profile.example.test".into()));
    let (request, _rx) = pending(1);
    let _ = coordinator.on_unauthorized(request, Some("T1"));
    assert_eq!(coordinator.fail().len(), 1);
    assert_eq!(coordinator.phase(), RenewalPhase::Failed);

    let (request, _rx) = pending(2);
    assert!(matches!(
        coordinator.on_unauthorized(request, Some("T1")),
        UnauthorizedAction::Reject(..)
    ));

    coordinator.token_installed();
    assert_eq!(coordinator.phase(), RenewalPhase::Normal);
}

#[test]
fn new_requests_park_only_while_renewing() {
    let mut coordinator = RenewalCoordinator::default();
    let (request, _rx) = pending(1);
    assert!(coordinator.park_if_renewing(request).is_some());

    coordinator.set_endpoint(Some("https://profile.example.test".into()));
    let (request, _rx) = pending(2);
    let _ = coordinator.on_unauthorized(request, Some("T1"));
    let (request, _rx) = pending(3);
    assert!(coordinator.park_if_renewing(request).is_none());
    assert_eq!(coordinator.waiting_len(), 2);
}

#[test]
fn renewal_request_targets_tokens_endpoint() {
    let request = renewal_request("https://profile.example.test/", "T1").expect("request");
    assert_eq!(request.method, Method::POST);
    assert_eq!(
        request.url.as_str(),
        "https://profile.example.test/tokens?Token=T1"
    );
    assert_eq!(request.body, Some(json!({ "Token": "T1" })));
    assert_eq!(request.policy, RetryPolicy::Once);
}

#[test]
fn renewed_token_requires_structured_session_token() {
    let ok = ServiceResponse::from_raw(RawResponse::json(200, &json!({ "SessionToken": "T2" })));
    assert_eq!(parse_renewed_token(ok).expect("token"), "T2");

    let missing = ServiceResponse::from_raw(RawResponse::json(200, &json!({ "Other": 1 })));
    assert_eq!(
        parse_renewed_token(missing).expect_err("missing").kind(),
        crate::ErrorKind::BadResponse
    );

    let rejected = ServiceResponse::from_raw(RawResponse::json(401, &json!({ "error": "expired" })));
    let err = parse_renewed_token(rejected).expect_err("rejected");
    assert_eq!(err.kind(), crate::ErrorKind::Network);
    assert!(err.to_string().contains("expired"));
}
