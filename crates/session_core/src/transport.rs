use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::error::ServiceFailure;
use url::Url;

use crate::error::{Result, SessionError};

pub const SESSION_COOKIE_NAME: &str = "_aws_wt_session";
pub const AUTH_TOKEN_HEADER: &str = "X-Chime-Auth-Token";

/// Value sent in both the `Cookie` and the auth token header.
pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE_NAME}={token}")
}

/// Joins `path` onto a service base URL taken verbatim from registration.
pub fn service_url(base: &str, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    let mut url = Url::parse(&joined)?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response exactly as it came off the wire. Header names are lower-cased.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        let mut response = Self::new(status);
        response
            .headers
            .insert("content-type".into(), "application/json".into());
        response.body = body.to_string().into_bytes();
        response
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response
            .headers
            .insert("content-type".into(), "text/plain".into());
        response.body = body.into().into_bytes();
        response
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse>;
}

pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse> {
        let mut builder = self.http.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

/// What a request's caller receives: the status plus the parsed body when
/// the service answered with JSON.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub json: Option<Value>,
    pub text: String,
}

impl ServiceResponse {
    /// A body that fails to parse is reported as `json: None`, not an error.
    pub fn from_raw(raw: RawResponse) -> Self {
        let structured = raw
            .content_type()
            .and_then(|value| value.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
        let json = if structured && !raw.body.is_empty() {
            serde_json::from_slice(&raw.body).ok()
        } else {
            None
        };
        Self {
            status: raw.status,
            reason: raw.reason,
            headers: raw.headers,
            json,
            text: String::from_utf8_lossy(&raw.body).into_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn failure(&self) -> ServiceFailure {
        ServiceFailure::new(self.status, self.json.as_ref(), &self.reason)
    }

    /// Turns a non-2xx status into a network error prefixed with `what`.
    pub fn require_success(self, what: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SessionError::network(format!("{what} {}", self.failure())))
        }
    }

    pub fn parse<T: DeserializeOwned>(&self, what: &str) -> Result<T> {
        let json = self
            .json
            .clone()
            .ok_or_else(|| SessionError::bad_response(format!("{what}: no JSON body")))?;
        serde_json::from_value(json)
            .map_err(|err| SessionError::bad_response(format!("{what}: {err}")))
    }
}
