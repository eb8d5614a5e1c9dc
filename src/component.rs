//! Uniform result envelope for external calls
//!
//! Recognition, generation, synthesis and playback all report back through
//! [`ComponentResult`], so the orchestrator handles every failure the same
//! way regardless of which backend produced it.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy shared by every component
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network blip or timeout; retried with backoff
    Transient,
    /// Auth, quota or malformed request; never retried
    PermanentExternal,
    /// Blank transcription or generation
    EmptyResult,
    /// Audio device or file problems; never retried
    LocalResource,
    /// Programming error: illegal transition, missing buffer
    InternalInvariant,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    /// Whether this failure should be answered with the spoken fallback
    pub fn wants_fallback(&self) -> bool {
        !matches!(self, ErrorClass::InternalInvariant)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::PermanentExternal => "permanent_external",
            ErrorClass::EmptyResult => "empty_result",
            ErrorClass::LocalResource => "local_resource",
            ErrorClass::InternalInvariant => "internal_invariant",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a backend implementation
///
/// Backends never leak their native error types; HTTP clients, stubs and
/// test doubles all translate into one of these variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("backend returned an empty result")]
    Empty,

    #[error("call cancelled")]
    Cancelled,
}

impl BackendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::Network(_) | BackendError::Timeout(_) | BackendError::Server { .. } => {
                ErrorClass::Transient
            }
            BackendError::Auth(_)
            | BackendError::Quota(_)
            | BackendError::InvalidRequest(_)
            | BackendError::Malformed(_)
            | BackendError::Cancelled => ErrorClass::PermanentExternal,
            BackendError::Empty => ErrorClass::EmptyResult,
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => BackendError::Auth(body),
            429 => BackendError::Quota(body),
            408 => BackendError::Network(format!("request timeout: {body}")),
            400..=499 => BackendError::InvalidRequest(format!("{status}: {body}")),
            _ => BackendError::Server { status, body },
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Network(format!("timed out: {e}"))
        } else if e.is_connect() || e.is_request() {
            BackendError::Network(e.to_string())
        } else if e.is_decode() {
            BackendError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::from_status(status.as_u16(), e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

/// Classified failure carried by a [`ComponentResult`]
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentError {
    pub class: ErrorClass,
    pub message: String,
}

impl ComponentError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn empty(what: &str) -> Self {
        Self::new(ErrorClass::EmptyResult, format!("{what} was empty"))
    }
}

impl From<BackendError> for ComponentError {
    fn from(e: BackendError) -> Self {
        Self::new(e.class(), e.to_string())
    }
}

impl From<crate::LyraError> for ComponentError {
    fn from(e: crate::LyraError) -> Self {
        Self::new(e.class(), e.to_string())
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.class, self.message)
    }
}

/// Success/failure, payload and timing for one wrapped call
#[derive(Clone, Debug)]
pub struct ComponentResult<T> {
    pub outcome: Result<T, ComponentError>,
    /// Wall time including retries and backoff
    pub elapsed: Duration,
    /// Number of backend invocations made
    pub attempts: u32,
    /// Backoff waits between attempts, in order
    pub backoff: Vec<Duration>,
}

impl<T> ComponentResult<T> {
    pub fn success(payload: T, elapsed: Duration) -> Self {
        Self {
            outcome: Ok(payload),
            elapsed,
            attempts: 1,
            backoff: Vec::new(),
        }
    }

    pub fn failure(error: ComponentError, elapsed: Duration) -> Self {
        Self {
            outcome: Err(error),
            elapsed,
            attempts: 1,
            backoff: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ComponentError> {
        self.outcome.as_ref().err()
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error().map(|e| e.class)
    }

    pub fn into_result(self) -> Result<T, ComponentError> {
        self.outcome
    }

    /// Transform the payload, keeping timing information
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ComponentResult<U> {
        ComponentResult {
            outcome: self.outcome.map(f),
            elapsed: self.elapsed,
            attempts: self.attempts,
            backoff: self.backoff,
        }
    }

    /// Reject a successful payload that fails `check`
    pub fn and_then_check(
        self,
        check: impl FnOnce(&T) -> Option<ComponentError>,
    ) -> ComponentResult<T> {
        let outcome = match self.outcome {
            Ok(payload) => match check(&payload) {
                Some(err) => Err(err),
                None => Ok(payload),
            },
            Err(e) => Err(e),
        };
        ComponentResult { outcome, ..self }
    }
}
