//! Resource server: bearer token verification (RFC 6750).

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::GuardConfig;
use crate::crypto::token_key;
use crate::engine::{Params, is_expired};
use crate::error::{ErrorKind, ProtocolError, ProtocolResult, storage};
use crate::scope::{Scope, is_sufficient};
use crate::store::TokenStore;

static BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Bearer\s+(\S+)\s*$").expect("bearer pattern is valid"));

/// The parts of an inbound resource request the guard looks at.
#[derive(Clone, Default)]
pub struct ResourceRequest {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Form-encoded body parameters, for POST requests.
    pub body: Option<Params>,
    /// Query string parameters.
    pub query: Params,
}

impl ResourceRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Params) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: Params) -> Self {
        self.query = query;
        self
    }
}

impl std::fmt::Debug for ResourceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRequest")
            .field("has_authorization", &self.authorization.is_some())
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Identity behind a verified bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub token: String,
    /// `None` for client credentials tokens.
    pub user_id: Option<String>,
    pub client_id: String,
    pub scope: Scope,
}

impl std::fmt::Debug for VerifiedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedToken")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope.to_string())
            .finish()
    }
}

/// HTTP rendering of a guard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub status: u16,
    /// Value for the `WWW-Authenticate` header.
    pub www_authenticate: String,
}

impl BearerChallenge {
    /// Build the RFC 6750 §3 challenge for `error`.
    #[must_use]
    pub fn new(error: &ProtocolError, realm: Option<&str>) -> Self {
        let mut attributes = Vec::new();
        if let Some(realm) = realm.filter(|r| !r.is_empty()) {
            attributes.push(format!("realm=\"{}\"", quote(realm)));
        }
        if error.kind() != ErrorKind::MissingCredentials {
            attributes.push(format!("error=\"{}\"", error.kind()));
            if !error.description().is_empty() {
                attributes.push(format!("error_description=\"{}\"", quote(error.description())));
            }
        }

        let www_authenticate = if attributes.is_empty() {
            "Bearer".to_string()
        } else {
            format!("Bearer {}", attributes.join(", "))
        };
        Self { status: error.kind().resource_status(), www_authenticate }
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Verifies bearer tokens against a [`TokenStore`].
#[derive(Clone)]
pub struct ResourceGuard {
    tokens: Arc<dyn TokenStore>,
    config: GuardConfig,
}

impl ResourceGuard {
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenStore>, config: GuardConfig) -> Self {
        Self { tokens, config }
    }

    #[must_use]
    pub const fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Verify the request's token and check it grants `required_scope`.
    pub async fn verify_token(
        &self,
        required_scope: &str,
        request: &ResourceRequest,
    ) -> ProtocolResult<VerifiedToken> {
        self.verify_token_at(required_scope, request, Utc::now()).await
    }

    /// [`Self::verify_token`] with an explicit clock.
    #[tracing::instrument(skip_all, fields(required_scope = %required_scope))]
    pub async fn verify_token_at(
        &self,
        required_scope: &str,
        request: &ResourceRequest,
        now: DateTime<Utc>,
    ) -> ProtocolResult<VerifiedToken> {
        let token = self.extract_token(request)?;
        let key = token_key(&token);

        let Some(record) = storage(self.tokens.get_token(&key).await, "get_token")? else {
            return Err(ProtocolError::invalid_token("The token provided is invalid"));
        };
        if record.revoked {
            tracing::debug!(token_key = %key, "Revoked token presented");
            return Err(ProtocolError::invalid_token("The token provided is revoked"));
        }
        let Some(expires_at) = record.expires_at else {
            tracing::error!(token_key = %key, "Stored token has no expiry");
            return Err(ProtocolError::server_error("Token expire date is unavailable"));
        };
        if is_expired(expires_at, now) {
            return Err(ProtocolError::invalid_token("The token provided has expired"));
        }

        let granted = Scope::lenient(&record.scope);
        if !is_sufficient(&Scope::lenient(required_scope), &granted) {
            tracing::debug!(token_key = %key, granted = %granted, "Insufficient scope");
            return Err(ProtocolError::new(
                ErrorKind::InsufficientScope,
                "Requested resource requires privilege that is not granted by the owner",
            ));
        }

        Ok(VerifiedToken { token, user_id: record.user_id, client_id: record.client_id, scope: granted })
    }

    /// The challenge to send for `error`. The realm is the configured one,
    /// or the required scope when none is configured.
    #[must_use]
    pub fn challenge(&self, error: &ProtocolError, required_scope: &str) -> BearerChallenge {
        let realm = self.config.realm.as_deref().or_else(|| Some(required_scope.trim()));
        BearerChallenge::new(error, realm)
    }

    /// Header first, then form body, then query string.
    fn extract_token(&self, request: &ResourceRequest) -> ProtocolResult<String> {
        let token = if let Some(header) = &request.authorization {
            let captures = BEARER.captures(header.trim()).ok_or_else(ProtocolError::missing_credentials)?;
            captures[1].to_owned()
        } else if let Some(token) = request.body.as_ref().and_then(|body| body.get("access_token")) {
            if !self.config.accept_post_requests {
                return Err(ProtocolError::invalid_request(
                    "Server does not support HTTP POST auth requests",
                ));
            }
            token.clone()
        } else if let Some(token) = request.query.get("access_token") {
            if !self.config.accept_get_requests {
                return Err(ProtocolError::invalid_request(
                    "Server does not support HTTP GET auth requests",
                ));
            }
            token.clone()
        } else {
            return Err(ProtocolError::missing_credentials());
        };

        if token.is_empty() {
            return Err(ProtocolError::invalid_request("Required token parameter is missing"));
        }
        Ok(token)
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard").field("config", &self.config).finish()
    }
}
