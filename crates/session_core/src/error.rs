use thiserror::Error;

/// The four failure kinds a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    BadResponse,
    Auth,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(String),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request cancelled by disconnect")]
    Cancelled,
}

impl SessionError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn bad_response(message: impl Into<String>) -> Self {
        Self::BadResponse(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Network(_) => ErrorKind::Network,
            SessionError::BadResponse(_) => ErrorKind::BadResponse,
            SessionError::Auth(_) => ErrorKind::Auth,
            SessionError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Network(err.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        SessionError::BadResponse(format!("invalid url: {err}"))
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
