//! Configuration for the authorization server and the resource guard.
//!
//! Loaded once at startup; the engines never mutate it.

use std::str::FromStr;

use crate::error::ConfigError;
use crate::generator::{MAX_CODE_SIZE, MIN_CODE_SIZE};
use crate::scope::Scope;

/// Default values for every recognized option.
pub mod defaults {
    /// Length (chars) of generated codes and tokens.
    pub const CODE_SIZE: usize = 64;

    /// Authorization code lifetime in seconds.
    pub const CODE_EXPIRES_IN: u64 = 30;

    /// Access token lifetime in seconds (1 hour).
    pub const TOKEN_EXPIRES_IN: u64 = 3600;

    /// Refresh token lifetime in seconds (30 days).
    pub const REFRESH_TOKEN_EXPIRES_IN: u64 = 30 * 24 * 3600;

    /// Resource guard accepts `access_token` in form-encoded POST bodies.
    pub const ACCEPT_POST_REQUESTS: bool = true;

    /// Resource guard accepts `access_token` in the query string.
    pub const ACCEPT_GET_REQUESTS: bool = false;
}

/// Authorization server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Space-delimited allow-list of supported scopes.
    pub scopes: String,

    /// Scope used when a request omits one. `None` makes the scope mandatory.
    pub default_scope: Option<String>,

    /// Length of generated codes and tokens (32..=128).
    pub code_size: usize,

    /// Authorization code lifetime in seconds.
    pub code_expires_in: u64,

    /// Access token lifetime in seconds.
    pub token_expires_in: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_token_expires_in: u64,

    /// Enable the implicit grant (`response_type=token`).
    pub allow_implicit: bool,

    /// Enable the client credentials grant.
    pub allow_client_credentials: bool,

    /// Reject authorization requests without a `state` parameter.
    pub require_state: bool,
}

impl ServerConfig {
    /// Check option ranges and the scope allow-list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CODE_SIZE..=MAX_CODE_SIZE).contains(&self.code_size) {
            return Err(ConfigError::CodeSize(self.code_size));
        }
        for (field, value) in [
            ("code_expires_in", self.code_expires_in),
            ("token_expires_in", self.token_expires_in),
            ("refresh_token_expires_in", self.refresh_token_expires_in),
        ] {
            if value == 0 {
                return Err(ConfigError::Lifetime { field });
            }
        }
        let supported = self.supported_scopes()?;
        if let Some(default) = self.default_scope.as_deref() {
            let parsed =
                Scope::parse(default).map_err(|_| ConfigError::DefaultScope(default.to_owned()))?;
            if !parsed.is_subset_of(&supported) {
                return Err(ConfigError::DefaultScope(default.to_owned()));
            }
        }
        Ok(())
    }

    /// The parsed scope allow-list. An empty allow-list supports nothing.
    pub fn supported_scopes(&self) -> Result<Scope, ConfigError> {
        if self.scopes.trim().is_empty() {
            return Ok(Scope::default());
        }
        Scope::parse(&self.scopes).map_err(|e| ConfigError::Scopes(e.to_string()))
    }

    /// Settings used by the test suites.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            scopes: "basic extended superadmin".to_string(),
            default_scope: Some("basic".to_string()),
            code_size: 32,
            ..Self::default()
        }
    }

    /// Read configuration from `OAUTH2_*` environment variables.
    ///
    /// Values are only parsed here. Cross-field checks run in
    /// [`ServerConfig::validate`], once any command-line overrides are applied;
    /// `OAuthServer::new` calls it.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::from_lookup(|name| std::env::var(name).ok())?)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(scopes) = lookup("OAUTH2_SCOPES") {
            config.scopes = scopes;
        }
        if let Some(default_scope) = lookup("OAUTH2_DEFAULT_SCOPE") {
            config.default_scope = Some(default_scope).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_CODE_SIZE")? {
            config.code_size = v;
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_CODE_EXPIRES_IN")? {
            config.code_expires_in = v;
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_TOKEN_EXPIRES_IN")? {
            config.token_expires_in = v;
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_REFRESH_TOKEN_EXPIRES_IN")? {
            config.refresh_token_expires_in = v;
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_ALLOW_IMPLICIT")? {
            config.allow_implicit = v;
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_ALLOW_CLIENT_CREDENTIALS")? {
            config.allow_client_credentials = v;
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_REQUIRE_STATE")? {
            config.require_state = v;
        }
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            scopes: String::new(),
            default_scope: None,
            code_size: defaults::CODE_SIZE,
            code_expires_in: defaults::CODE_EXPIRES_IN,
            token_expires_in: defaults::TOKEN_EXPIRES_IN,
            refresh_token_expires_in: defaults::REFRESH_TOKEN_EXPIRES_IN,
            allow_implicit: true,
            allow_client_credentials: true,
            require_state: false,
        }
    }
}

/// Resource guard configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Accept `access_token` from a form-encoded request body.
    pub accept_post_requests: bool,

    /// Accept `access_token` from the query string.
    pub accept_get_requests: bool,

    /// `realm` reported in challenges. Falls back to the required scope.
    pub realm: Option<String>,
}

impl GuardConfig {
    /// Read configuration from `OAUTH2_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::from_lookup(|name| std::env::var(name).ok())?)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "OAUTH2_ACCEPT_POST_REQUESTS")? {
            config.accept_post_requests = v;
        }
        if let Some(v) = parse_var(&lookup, "OAUTH2_ACCEPT_GET_REQUESTS")? {
            config.accept_get_requests = v;
        }
        config.realm = lookup("OAUTH2_REALM").filter(|r| !r.is_empty());
        Ok(config)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            accept_post_requests: defaults::ACCEPT_POST_REQUESTS,
            accept_get_requests: defaults::ACCEPT_GET_REQUESTS,
            realm: None,
        }
    }
}

fn parse_var<T>(lookup: impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::Env { name, message: e.to_string() })
        })
        .transpose()
}
