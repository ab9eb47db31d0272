use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_SIGNIN_SERVER: &str = "https://signin.id.ue1.app.chime.aws/";

/// Everything a [`crate::Session`] needs to know up front.
///
/// Values come from an optional TOML file overlaid with `SESSION__*`
/// environment variables, e.g. `SESSION__PAGE_SIZE=25`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub server: String,
    pub account_email: String,
    pub device_token: String,
    pub session_token: Option<String>,
    pub platform: String,
    pub user_agent: String,
    pub keepalive_interval_secs: u64,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub event_capacity: usize,
    pub log_wire_bodies: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SIGNIN_SERVER.into(),
            account_email: String::new(),
            device_token: String::new(),
            session_token: None,
            platform: "rust".into(),
            user_agent: format!("session-core/{}", env!("CARGO_PKG_VERSION")),
            keepalive_interval_secs: 30,
            page_size: 50,
            request_timeout_secs: 60,
            event_capacity: 1024,
            log_wire_bodies: false,
        }
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SESSION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read session config '{}'", path.display()))?;

        let mut loaded: SessionConfig = settings
            .try_deserialize()
            .context("invalid session config")?;
        loaded.normalize();
        Ok(loaded)
    }

    /// An empty token is the same as no token.
    fn normalize(&mut self) {
        if self.server.trim().is_empty() {
            self.server = DEFAULT_SIGNIN_SERVER.into();
        }
        if self
            .session_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            self.session_token = None;
        }
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self.normalize();
        self
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
