//! Error types for the OAuth 2.0 engine.
//!
//! Every engine entry point fails with a [`ProtocolError`]: a machine-readable
//! [`ErrorKind`] plus a human description. Collaborator failures arrive as
//! [`StoreError`] and are re-wrapped as `server_error` before they reach the wire.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

/// Machine-readable OAuth 2.0 error codes (RFC 6749 §4.1.2.1, §5.2; RFC 6750 §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No credentials were presented to a protected resource.
    ///
    /// Serializes to the empty string: RFC 6750 §3.1 asks for a bare
    /// `WWW-Authenticate: Bearer` challenge in this case.
    MissingCredentials,
    InvalidRequest,
    InvalidClient,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    UnsupportedGrantType,
    InvalidScope,
    InvalidGrant,
    InvalidToken,
    InsufficientScope,
    ServerError,
}

impl ErrorKind {
    /// Wire representation of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredentials => "",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
            Self::ServerError => "server_error",
        }
    }

    /// HTTP status used by the resource server (RFC 6750 §3.1).
    #[must_use]
    pub const fn resource_status(self) -> u16 {
        match self {
            Self::MissingCredentials | Self::InvalidToken => 401,
            Self::InsufficientScope => 403,
            Self::ServerError => 500,
            _ => 400,
        }
    }

    /// HTTP status used by the token endpoint (RFC 6749 §5.2).
    #[must_use]
    pub const fn token_status(self) -> u16 {
        match self {
            Self::InvalidClient | Self::UnauthorizedClient => 401,
            Self::ServerError => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A protocol-level failure, shared by the authorization, token and resource paths.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind}: {description}")]
pub struct ProtocolError {
    #[serde(rename = "error")]
    kind: ErrorKind,
    #[serde(rename = "error_description")]
    description: Cow<'static, str>,
}

impl ProtocolError {
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self { kind, description: description.into() }
    }

    /// The bare "no credentials" error of RFC 6750 §3.1.
    #[must_use]
    pub const fn missing_credentials() -> Self {
        Self { kind: ErrorKind::MissingCredentials, description: Cow::Borrowed("") }
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidRequest, description)
    }

    #[must_use]
    pub fn invalid_client(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidClient, description)
    }

    #[must_use]
    pub fn unauthorized_client(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::UnauthorizedClient, description)
    }

    #[must_use]
    pub fn access_denied(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::AccessDenied, description)
    }

    #[must_use]
    pub fn invalid_scope(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidScope, description)
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidGrant, description)
    }

    #[must_use]
    pub fn invalid_token(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidToken, description)
    }

    #[must_use]
    pub fn server_error(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::ServerError, description)
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// `{"error": kind, "error_description": description}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.kind.as_str(),
            "error_description": self.description,
        })
    }

    /// Error parameters for a redirect query or fragment.
    #[must_use]
    pub fn to_params(&self) -> [(&'static str, &str); 2] {
        [("error", self.kind.as_str()), ("error_description", self.description())]
    }
}

/// Errors raised by storage collaborators.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Backend unreachable or timed out.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Write rejected by the backend.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Any other backend failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Invalid engine configuration, detected once at construction.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("code_size must be between 32 and 128, got {0}")]
    CodeSize(usize),

    #[error("{field} must be greater than zero")]
    Lifetime { field: &'static str },

    #[error("scope allow-list is malformed: {0}")]
    Scopes(String),

    #[error("default scope {0:?} is not part of the supported scopes")]
    DefaultScope(String),

    #[error("invalid value for {name}: {message}")]
    Env { name: &'static str, message: String },
}

/// Convert a collaborator failure into `server_error`, logging the detail server-side only.
pub(crate) fn storage<T>(result: Result<T, StoreError>, operation: &'static str) -> ProtocolResult<T> {
    result.map_err(|e| {
        tracing::error!(operation, error = %e, "Storage collaborator failed");
        ProtocolError::server_error("The authorization server encountered a storage failure")
    })
}

/// Result type alias for engine operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type alias for storage port operations.
pub type StoreResult<T> = Result<T, StoreError>;
