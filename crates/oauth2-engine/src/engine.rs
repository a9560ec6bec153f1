//! The authorization server engine shared by the authorization and token endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::ServerConfig;
use crate::crypto::{Pbkdf2Hasher, SecretVerifier};
use crate::error::{ConfigError, ProtocolError, ProtocolResult, storage};
use crate::generator::CodeGenerator;
use crate::scope::Scope;
use crate::store::{Backend, Client};

/// Request parameters as extracted by the transport (query string or form body).
pub type Params = HashMap<String, String>;

/// A parameter value, treating empty values as absent.
pub(crate) fn param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

/// `now + seconds`, saturating at the largest representable instant.
pub(crate) fn expiry(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Expiry is exclusive: a record expiring exactly at `now` is already expired.
pub(crate) fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now
}

/// Which flows this engine instance serves.
///
/// Resolved once from the configured ports and config switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `response_type=code` and the `authorization_code` grant.
    pub codes: bool,
    /// `response_type=token`.
    pub implicit: bool,
    /// Refresh token issuance and the `refresh_token` grant.
    pub refresh_tokens: bool,
    /// The `password` grant.
    pub passwords: bool,
    /// The `client_credentials` grant.
    pub client_credentials: bool,
    /// Redirect URIs are resolved by a pluggable checker instead of exact matching.
    pub dynamic_redirect: bool,
}

impl Capabilities {
    fn resolve(config: &ServerConfig, backend: &Backend) -> Self {
        Self {
            codes: backend.codes.is_some(),
            implicit: config.allow_implicit,
            refresh_tokens: backend.refresh_tokens.is_some(),
            passwords: backend.users.is_some(),
            client_credentials: config.allow_client_credentials,
            dynamic_redirect: backend.redirects.is_some(),
        }
    }
}

/// OAuth 2.0 authorization server.
///
/// Stateless between calls: every operation reads configuration and goes
/// through the storage ports, so one instance can serve concurrent requests.
#[derive(Clone)]
pub struct OAuthServer {
    pub(crate) config: ServerConfig,
    pub(crate) backend: Backend,
    pub(crate) capabilities: Capabilities,
    pub(crate) generator: CodeGenerator,
    pub(crate) verifier: Arc<dyn SecretVerifier>,
    pub(crate) supported_scopes: Scope,
    pub(crate) default_scope: Option<Scope>,
}

impl OAuthServer {
    /// Create an engine over `backend`.
    ///
    /// # Errors
    ///
    /// Returns error if `config` fails validation.
    pub fn new(config: ServerConfig, backend: Backend) -> Result<Self, ConfigError> {
        config.validate()?;
        let supported_scopes = config.supported_scopes()?;
        let default_scope = config
            .default_scope
            .as_deref()
            .map(|raw| Scope::parse(raw).map_err(|_| ConfigError::DefaultScope(raw.to_owned())))
            .transpose()?;
        let capabilities = Capabilities::resolve(&config, &backend);

        if supported_scopes.is_empty() {
            tracing::warn!("No scopes configured; every authorization and token request will fail with invalid_scope");
        }
        tracing::debug!(?capabilities, "OAuth server configured");

        Ok(Self {
            generator: CodeGenerator::new(config.code_size),
            config,
            backend,
            capabilities,
            verifier: Arc::new(Pbkdf2Hasher::new()),
            supported_scopes,
            default_scope,
        })
    }

    /// Verify client secrets with `verifier` instead of the default PBKDF2 hasher.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn SecretVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[must_use]
    pub const fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Check a requested scope against the supported and default scopes.
    pub(crate) fn check_scope(&self, requested: Option<&str>, ceiling: Option<&Scope>) -> ProtocolResult<Scope> {
        crate::scope::check_requested(
            requested,
            &self.supported_scopes,
            self.default_scope.as_ref(),
            ceiling,
        )
    }

    /// Validate `client_id` and load the client.
    pub(crate) async fn check_client(&self, client_id: Option<&str>) -> ProtocolResult<Client> {
        let Some(client_id) = client_id else {
            return Err(ProtocolError::invalid_request("Required client ID parameter is missing"));
        };
        if !Client::is_valid_id(client_id) {
            return Err(ProtocolError::invalid_request("Client ID is malformed"));
        }
        let client = storage(self.backend.clients.get_client(client_id).await, "get_client")?;
        client.ok_or_else(|| {
            tracing::debug!(client_id, "Unknown client");
            ProtocolError::unauthorized_client("Client does not exist")
        })
    }
}

impl std::fmt::Debug for OAuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthServer")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
