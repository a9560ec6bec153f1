//! Token endpoint (RFC 6749 §4.1.3, §4.3, §4.4, §6).
//!
//! Every grant shares the same prefix (grant type and client authentication)
//! and the same suffix (access token and optional refresh token issuance).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crypto::token_key;
use crate::engine::{OAuthServer, Params, expiry, is_expired, param};
use crate::error::{ErrorKind, ProtocolError, ProtocolResult, storage};
use crate::scope::Scope;
use crate::store::{AccessToken, Client, ClientType, CodeStore, RefreshToken};

/// Response fields a caller-supplied extra can never replace.
const RESERVED_FIELDS: [&str; 5] = ["access_token", "token_type", "expires_in", "scope", "refresh_token"];

/// Grant types accepted at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    Password,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Password => "password",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "authorization_code" => Some(Self::AuthorizationCode),
            "password" => Some(Self::Password),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }

    const fn issues_refresh_token(self) -> bool {
        !matches!(self, Self::ClientCredentials | Self::RefreshToken)
    }
}

/// Client credentials as extracted by the transport, normally from HTTP Basic.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    #[must_use]
    pub fn basic(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self { client_id: Some(client_id.into()), client_secret: Some(client_secret.into()) }
    }

    /// No Basic credentials. The request body may still carry them.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("has_secret", &self.client_secret.is_some())
            .finish()
    }
}

/// Successful token response body (RFC 6749 §5.1).
#[derive(Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    /// Add a deployment-specific response field. Protocol fields always win.
    #[must_use]
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let name = name.into();
        if !RESERVED_FIELDS.contains(&name.as_str()) {
            self.extra.insert(name, value.into());
        }
        self
    }

    #[must_use]
    pub const fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// What a grant resolved to, before tokens are minted.
struct Grant {
    grant_type: GrantType,
    client_id: String,
    user_id: Option<String>,
    scope: Scope,
    code: Option<String>,
}

impl OAuthServer {
    /// Handle a token request.
    ///
    /// `credentials` come from HTTP Basic; when absent, `client_id` and
    /// `client_secret` body parameters are used (RFC 6749 §2.3.1).
    pub async fn issue_token(
        &self,
        params: &Params,
        credentials: &ClientCredentials,
    ) -> ProtocolResult<TokenResponse> {
        self.issue_token_at(params, credentials, Utc::now()).await
    }

    /// [`Self::issue_token`] with an explicit clock.
    #[tracing::instrument(skip_all, fields(grant_type = param(params, "grant_type")))]
    pub async fn issue_token_at(
        &self,
        params: &Params,
        credentials: &ClientCredentials,
        now: DateTime<Utc>,
    ) -> ProtocolResult<TokenResponse> {
        let grant_type = match param(params, "grant_type") {
            None => return Err(ProtocolError::invalid_request("Required grant type parameter is missing")),
            Some(raw) => GrantType::parse(raw).ok_or_else(|| {
                ProtocolError::new(ErrorKind::UnsupportedGrantType, "Invalid grant type")
            })?,
        };

        let client = self.authenticate_client(params, credentials).await?;

        let grant = match grant_type {
            GrantType::AuthorizationCode => self.authorization_code_grant(params, client, now).await?,
            GrantType::Password => self.password_grant(params, client).await?,
            GrantType::ClientCredentials => self.client_credentials_grant(params, client)?,
            GrantType::RefreshToken => self.refresh_token_grant(params, client, now).await?,
        };

        let redeemed_code = match grant.grant_type {
            GrantType::AuthorizationCode => grant.code.clone(),
            _ => None,
        };
        let response = self.issue(grant, now).await?;

        if let Some(code) = redeemed_code {
            self.confirm_single_redemption(&code).await?;
        }
        Ok(response)
    }

    /// A replay may have been refused while this redemption was still
    /// persisting its tokens; in that case nothing it issued may stay live.
    async fn confirm_single_redemption(&self, code: &str) -> ProtocolResult<()> {
        let Some(codes) = &self.backend.codes else {
            return Ok(());
        };
        if storage(codes.is_code_replayed(code).await, "is_code_replayed")? {
            return Err(self.revoke_code_descendants(&**codes, code).await);
        }
        Ok(())
    }

    async fn authenticate_client(
        &self,
        params: &Params,
        credentials: &ClientCredentials,
    ) -> ProtocolResult<Client> {
        let basic_id = credentials.client_id.as_deref().filter(|v| !v.is_empty());
        let (client_id, secret) = match basic_id {
            Some(id) => (Some(id), credentials.client_secret.as_deref().filter(|v| !v.is_empty())),
            None => (param(params, "client_id"), param(params, "client_secret")),
        };

        let client = self.check_client(client_id).await?;
        let authenticated = match (client.client_secret_hash.as_deref(), secret) {
            (Some(stored), Some(secret)) => self.verifier.verify(secret, stored),
            (None, None) => true,
            _ => false,
        };
        if !authenticated {
            tracing::warn!(client_id = %client.client_id, "Client authentication failed");
            return Err(ProtocolError::invalid_client("Wrong client credentials"));
        }
        Ok(client)
    }

    async fn authorization_code_grant(
        &self,
        params: &Params,
        client: Client,
        now: DateTime<Utc>,
    ) -> ProtocolResult<Grant> {
        let Some(codes) = &self.backend.codes else {
            return Err(ProtocolError::new(
                ErrorKind::UnsupportedGrantType,
                "Authorization code grant is unsupported",
            ));
        };

        let Some(code) = param(params, "code") else {
            return Err(ProtocolError::invalid_request("Required code parameter is missing"));
        };
        if !self.generator.matches(code) {
            return Err(ProtocolError::invalid_request("Code parameter is invalid"));
        }

        let Some(record) = storage(codes.get_auth_code(code).await, "get_auth_code")? else {
            return Err(ProtocolError::invalid_grant("Invalid code"));
        };
        if record.client_id != client.client_id {
            return Err(ProtocolError::invalid_grant("Client mismatch"));
        }
        if is_expired(record.expires_at, now) {
            return Err(ProtocolError::invalid_grant("Code expired"));
        }
        if param(params, "redirect_uri") != Some(record.redirect_uri.as_str()) {
            return Err(ProtocolError::invalid_grant("Redirect URI mismatch"));
        }

        let issued = storage(codes.get_token_issued_for_code(code).await, "get_token_issued_for_code")?;
        if issued.is_some() || !storage(codes.consume_auth_code(code).await, "consume_auth_code")? {
            return Err(self.revoke_code_descendants(&**codes, code).await);
        }

        Ok(Grant {
            grant_type: GrantType::AuthorizationCode,
            client_id: client.client_id,
            user_id: Some(record.user_id),
            scope: Scope::lenient(&record.scope),
            code: Some(record.code),
        })
    }

    /// A code was presented twice: revoke everything issued from it, then fail.
    async fn revoke_code_descendants(&self, codes: &dyn CodeStore, code: &str) -> ProtocolError {
        tracing::warn!(code_key = %token_key(code), "Authorization code reused, revoking issued tokens");

        if let Some(refresh_tokens) = &self.backend.refresh_tokens {
            let revoked = refresh_tokens.revoke_refresh_tokens_issued_for_code(code).await;
            if let Err(e) = storage(revoked, "revoke_refresh_tokens_issued_for_code") {
                return e;
            }
        }
        match storage(codes.get_token_issued_for_code(code).await, "get_token_issued_for_code") {
            Ok(Some(key)) => {
                if let Err(e) = storage(self.backend.tokens.revoke_token(&key).await, "revoke_token") {
                    return e;
                }
                tracing::info!(token_key = %key, "Revoked access token issued for reused code");
            }
            Ok(None) => {}
            Err(e) => return e,
        }
        ProtocolError::invalid_grant("Used authorization code")
    }

    async fn password_grant(&self, params: &Params, client: Client) -> ProtocolResult<Grant> {
        let Some(users) = &self.backend.users else {
            return Err(ProtocolError::new(
                ErrorKind::UnsupportedGrantType,
                "Resource owner password credentials grant is unsupported",
            ));
        };

        let scope = self.check_scope(param(params, "scope"), None)?;

        let Some(username) = param(params, "username") else {
            return Err(ProtocolError::invalid_request("Required username parameter is missing"));
        };
        let Some(password) = param(params, "password") else {
            return Err(ProtocolError::invalid_request("Required password parameter is missing"));
        };
        let user_id = storage(
            users.check_user_credentials(username, password).await,
            "check_user_credentials",
        )?;
        let Some(user_id) = user_id else {
            tracing::info!(client_id = %client.client_id, "Resource owner credentials rejected");
            return Err(ProtocolError::access_denied("Invalid resource owner password credentials"));
        };

        Ok(Grant {
            grant_type: GrantType::Password,
            client_id: client.client_id,
            user_id: Some(user_id),
            scope,
            code: None,
        })
    }

    fn client_credentials_grant(&self, params: &Params, client: Client) -> ProtocolResult<Grant> {
        if !self.capabilities.client_credentials {
            return Err(ProtocolError::new(
                ErrorKind::UnsupportedGrantType,
                "Client credentials grant is unsupported",
            ));
        }
        if client.client_type != ClientType::Confidential {
            return Err(ProtocolError::unauthorized_client(
                "Public clients cannot use the client credentials grant",
            ));
        }

        let scope = self.check_scope(param(params, "scope"), None)?;
        Ok(Grant {
            grant_type: GrantType::ClientCredentials,
            client_id: client.client_id,
            user_id: None,
            scope,
            code: None,
        })
    }

    async fn refresh_token_grant(
        &self,
        params: &Params,
        client: Client,
        now: DateTime<Utc>,
    ) -> ProtocolResult<Grant> {
        let Some(refresh_tokens) = &self.backend.refresh_tokens else {
            return Err(ProtocolError::new(
                ErrorKind::UnsupportedGrantType,
                "Refresh token grant is unsupported",
            ));
        };

        let Some(raw) = param(params, "refresh_token") else {
            return Err(ProtocolError::invalid_request("Required refresh token parameter is missing"));
        };
        let key = token_key(raw);
        let Some(record) = storage(refresh_tokens.get_refresh_token(&key).await, "get_refresh_token")?
        else {
            return Err(ProtocolError::invalid_grant("Refresh token is invalid"));
        };
        if record.revoked {
            return Err(ProtocolError::invalid_grant("Refresh token is revoked"));
        }
        if is_expired(record.expires_at, now) {
            return Err(ProtocolError::invalid_grant("Refresh token expired"));
        }
        if record.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, token_key = %key, "Refresh token presented by another client");
            return Err(ProtocolError::invalid_grant("Refresh token was issued to another client"));
        }

        let granted = Scope::lenient(&record.scope);
        let scope = match param(params, "scope") {
            None => granted,
            Some(requested) => self.check_scope(Some(requested), Some(&granted))?,
        };

        Ok(Grant {
            grant_type: GrantType::RefreshToken,
            client_id: client.client_id,
            user_id: record.user_id,
            scope,
            code: record.code,
        })
    }

    /// Mint and persist the access token, plus a refresh token where the grant allows one.
    async fn issue(&self, grant: Grant, now: DateTime<Utc>) -> ProtocolResult<TokenResponse> {
        let access_token = self.generator.generate();
        let scope = grant.scope.to_string();
        let record = AccessToken {
            token_key: token_key(&access_token),
            client_id: grant.client_id.clone(),
            user_id: grant.user_id.clone(),
            scope: scope.clone(),
            expires_at: Some(expiry(now, self.config.token_expires_in)),
            revoked: false,
            code: grant.code.clone(),
        };
        let key = record.token_key.clone();
        storage(self.backend.tokens.save_token(record).await, "save_token")?;

        let mut refresh_token = None;
        if let Some(store) = &self.backend.refresh_tokens {
            if grant.grant_type.issues_refresh_token() {
                let raw = self.generator.generate();
                let record = RefreshToken {
                    token_key: token_key(&raw),
                    client_id: grant.client_id.clone(),
                    user_id: grant.user_id,
                    scope: scope.clone(),
                    expires_at: expiry(now, self.config.refresh_token_expires_in),
                    revoked: false,
                    code: grant.code,
                };
                storage(store.save_refresh_token(record).await, "save_refresh_token")?;
                refresh_token = Some(raw);
            }
        }

        tracing::info!(
            client_id = %grant.client_id,
            grant_type = grant.grant_type.as_str(),
            token_key = %key,
            refresh = refresh_token.is_some(),
            "Issued access token"
        );

        Ok(TokenResponse {
            access_token,
            token_type: "bearer",
            expires_in: self.config.token_expires_in,
            scope: Some(scope).filter(|s| !s.is_empty()),
            refresh_token,
            extra: serde_json::Map::new(),
        })
    }
}
