//! Storage ports the engine calls through, and the records they exchange.
//!
//! Clients, codes, tokens and users are owned by an external backend. The
//! engine reads and writes them only through these traits and holds records
//! for the duration of a single request.

pub mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::StoreResult;

pub use memory::MemoryStore;

static CLIENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_0-9]{2,32}$").expect("client id pattern is valid"));

/// Client types (RFC 6749 §2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    /// Cannot keep a secret: browser and native apps.
    Public,
    /// Authenticates with `client_id` + `client_secret`.
    Confidential,
}

impl ClientType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Confidential => "confidential",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown client type {0:?}, expected public or confidential")]
pub struct UnknownClientType(pub String);

impl FromStr for ClientType {
    type Err = UnknownClientType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "confidential" => Ok(Self::Confidential),
            other => Err(UnknownClientType(other.to_owned())),
        }
    }
}

/// A registered client application.
#[derive(Clone, PartialEq, Eq)]
pub struct Client {
    pub client_id: String,
    pub client_type: ClientType,
    /// Registered redirection endpoint, or a prefix of it when a
    /// [`RedirectUriChecker`] is in use.
    pub redirect_uri: Option<String>,
    /// Hash of the client secret, as produced by a [`crate::SecretVerifier`].
    pub client_secret_hash: Option<String>,
}

impl Client {
    /// Does `client_id` have the accepted identifier shape?
    #[must_use]
    pub fn is_valid_id(client_id: &str) -> bool {
        CLIENT_ID.is_match(client_id)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id)
            .field("client_type", &self.client_type)
            .field("redirect_uri", &self.redirect_uri)
            .field("has_secret", &self.client_secret_hash.is_some())
            .finish()
    }
}

/// An authorization code issued on user consent.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    /// Redirect URI used at issuance; the token request must repeat it.
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("scope", &self.scope)
            .field("redirect_uri", &self.redirect_uri)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// An issued access token, keyed by [`crate::crypto::token_key`] of the raw value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token_key: String,
    pub client_id: String,
    /// `None` for client credentials grants (no resource owner).
    pub user_id: Option<String>,
    pub scope: String,
    /// `None` only for corrupt records; the guard treats it as a server error.
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    /// Authorization code the token descends from.
    pub code: Option<String>,
}

/// An issued refresh token, keyed like [`AccessToken`].
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub token_key: String,
    pub client_id: String,
    pub user_id: Option<String>,
    /// Scope originally granted: the ceiling for later narrowing.
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub code: Option<String>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_key", &self.token_key)
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("revoked", &self.revoked)
            .field("has_code", &self.code.is_some())
            .finish()
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("token_key", &self.token_key)
            .field("client_id", &self.client_id)
            .field("user_id", &self.user_id)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("revoked", &self.revoked)
            .field("has_code", &self.code.is_some())
            .finish()
    }
}

/// Client registry lookup.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_client(&self, client_id: &str) -> StoreResult<Option<Client>>;
}

/// Authorization code persistence. Presence enables `response_type=code`
/// and the `authorization_code` grant.
#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn save_auth_code(&self, code: AuthorizationCode) -> StoreResult<()>;

    async fn get_auth_code(&self, code: &str) -> StoreResult<Option<AuthorizationCode>>;

    /// Key of the access token already issued for `code`, if any.
    async fn get_token_issued_for_code(&self, code: &str) -> StoreResult<Option<String>>;

    /// Atomically claim `code` for redemption.
    ///
    /// Must return `true` for exactly one caller per code, even under
    /// concurrent requests; every later call returns `false` and marks the
    /// code as replayed.
    async fn consume_auth_code(&self, code: &str) -> StoreResult<bool>;

    /// Has a claim on `code` been refused since it was consumed?
    ///
    /// Checked by the winning redemption after its tokens are persisted, so a
    /// replay racing the issuance still revokes them.
    async fn is_code_replayed(&self, code: &str) -> StoreResult<bool>;
}

/// Access token persistence. Revocation updates the record and never deletes it.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_token(&self, token: AccessToken) -> StoreResult<()>;

    async fn get_token(&self, token_key: &str) -> StoreResult<Option<AccessToken>>;

    async fn revoke_token(&self, token_key: &str) -> StoreResult<()>;
}

/// Refresh token persistence. Presence enables refresh token issuance and the
/// `refresh_token` grant.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn save_refresh_token(&self, token: RefreshToken) -> StoreResult<()>;

    async fn get_refresh_token(&self, token_key: &str) -> StoreResult<Option<RefreshToken>>;

    async fn revoke_refresh_tokens_issued_for_code(&self, code: &str) -> StoreResult<()>;
}

/// Resource owner authentication. Presence enables the `password` grant.
#[async_trait]
pub trait UserCredentialStore: Send + Sync {
    /// The user id for valid credentials, `None` otherwise.
    async fn check_user_credentials(&self, username: &str, password: &str)
    -> StoreResult<Option<String>>;
}

/// Replaces exact redirect URI matching with deployment-specific rules
/// (RFC 6749 §3.1.2.3: partial registration, several URIs, none at all).
pub trait RedirectUriChecker: Send + Sync {
    /// The redirect URI to use, or `None` to reject the request.
    fn check_client_redirect_uri(&self, requested: Option<&str>, client: &Client) -> Option<String>;
}

/// Accepts any requested URI that starts with the registered one (ASCII
/// case-insensitive), and the registered URI itself when none is requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixRedirectChecker;

impl RedirectUriChecker for PrefixRedirectChecker {
    fn check_client_redirect_uri(&self, requested: Option<&str>, client: &Client) -> Option<String> {
        let registered = client.redirect_uri.as_deref()?;
        let Some(requested) = requested else {
            return Some(registered.to_owned());
        };
        let prefix = requested.get(..registered.len())?;
        prefix.eq_ignore_ascii_case(registered).then(|| requested.to_owned())
    }
}

/// The set of ports one engine instance runs against.
///
/// Optional ports switch grant types on and off; see [`crate::Capabilities`].
#[derive(Clone)]
pub struct Backend {
    pub(crate) clients: Arc<dyn ClientStore>,
    pub(crate) tokens: Arc<dyn TokenStore>,
    pub(crate) codes: Option<Arc<dyn CodeStore>>,
    pub(crate) refresh_tokens: Option<Arc<dyn RefreshTokenStore>>,
    pub(crate) users: Option<Arc<dyn UserCredentialStore>>,
    pub(crate) redirects: Option<Arc<dyn RedirectUriChecker>>,
}

impl Backend {
    /// The mandatory ports: client lookup and access token persistence.
    #[must_use]
    pub fn new(clients: Arc<dyn ClientStore>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { clients, tokens, codes: None, refresh_tokens: None, users: None, redirects: None }
    }

    /// Every port backed by one [`MemoryStore`], exact redirect matching.
    #[must_use]
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self::new(store.clone(), store.clone())
            .with_codes(store.clone())
            .with_refresh_tokens(store.clone())
            .with_users(store)
    }

    #[must_use]
    pub fn with_codes(mut self, codes: Arc<dyn CodeStore>) -> Self {
        self.codes = Some(codes);
        self
    }

    #[must_use]
    pub fn with_refresh_tokens(mut self, refresh_tokens: Arc<dyn RefreshTokenStore>) -> Self {
        self.refresh_tokens = Some(refresh_tokens);
        self
    }

    #[must_use]
    pub fn with_users(mut self, users: Arc<dyn UserCredentialStore>) -> Self {
        self.users = Some(users);
        self
    }

    #[must_use]
    pub fn with_redirect_checker(mut self, redirects: Arc<dyn RedirectUriChecker>) -> Self {
        self.redirects = Some(redirects);
        self
    }

    /// Token store, shared with a [`crate::ResourceGuard`].
    #[must_use]
    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.tokens)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("codes", &self.codes.is_some())
            .field("refresh_tokens", &self.refresh_tokens.is_some())
            .field("users", &self.users.is_some())
            .field("redirects", &self.redirects.is_some())
            .finish()
    }
}
