//! Authorization endpoint (RFC 6749 §4.1.1, §4.2.1).
//!
//! Validation runs in a fixed order. Until the redirect URI is resolved, errors
//! are reported inline; afterwards they travel back to the client on the
//! redirect, in the query (code flow) or fragment (implicit flow).

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::crypto::token_key;
use crate::engine::{OAuthServer, Params, expiry, param};
use crate::error::{ErrorKind, ProtocolError, storage};
use crate::redirect::{Delivery, Redirect};
use crate::scope::Scope;
use crate::store::{AccessToken, AuthorizationCode, Client, ClientType};

/// `response_type` values this engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Authorization code grant.
    Code,
    /// Implicit grant.
    Token,
}

impl ResponseType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }

    #[must_use]
    pub const fn delivery(self) -> Delivery {
        match self {
            Self::Code => Delivery::Query,
            Self::Token => Delivery::Fragment,
        }
    }
}

/// An authorization request that passed validation, carried through consent.
#[derive(Clone, Serialize)]
pub struct ValidatedRequest {
    response_type: ResponseType,
    client_id: String,
    redirect_uri: String,
    scope: Scope,
    state: Option<String>,
    #[serde(skip)]
    target: Url,
}

impl ValidatedRequest {
    #[must_use]
    pub const fn response_type(&self) -> ResponseType {
        self.response_type
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The resolved redirect URI, as requested or as registered.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    fn redirect<'a>(&'a self, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Redirect {
        let state = self.state.as_deref().map(|s| ("state", s));
        Redirect::build(&self.target, self.response_type.delivery(), params.into_iter().chain(state))
    }
}

impl std::fmt::Debug for ValidatedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedRequest")
            .field("response_type", &self.response_type)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope.to_string())
            .field("has_state", &self.state.is_some())
            .finish()
    }
}

/// Failure of an authorization request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeError {
    /// No safe redirect target is known: render the error to the user.
    #[error("{0}")]
    Inline(ProtocolError),

    /// Send the user agent back to the client with the error attached.
    #[error("{error}")]
    Redirect { error: ProtocolError, redirect: Redirect },
}

impl AuthorizeError {
    #[must_use]
    pub const fn error(&self) -> &ProtocolError {
        match self {
            Self::Inline(error) | Self::Redirect { error, .. } => error,
        }
    }

    #[must_use]
    pub const fn redirect(&self) -> Option<&Redirect> {
        match self {
            Self::Inline(_) => None,
            Self::Redirect { redirect, .. } => Some(redirect),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.error().kind()
    }
}

impl From<ProtocolError> for AuthorizeError {
    fn from(error: ProtocolError) -> Self {
        Self::Inline(error)
    }
}

fn redirect_error(request: &ValidatedRequest, error: ProtocolError) -> AuthorizeError {
    let redirect = request.redirect(error.to_params());
    AuthorizeError::Redirect { error, redirect }
}

impl OAuthServer {
    /// Validate an authorization request.
    ///
    /// Read-only apart from the client lookup, which only happens once
    /// `response_type` has been accepted.
    #[tracing::instrument(skip_all)]
    pub async fn validate_authorization_request(
        &self,
        params: &Params,
    ) -> Result<ValidatedRequest, AuthorizeError> {
        let response_type = self.check_response_type(param(params, "response_type"))?;

        let client = self.check_client(param(params, "client_id")).await?;
        let requested = param(params, "redirect_uri");
        let redirect_uri = self.resolve_redirect_uri(&client, response_type, requested)?;
        let target = Url::parse(&redirect_uri).map_err(|e| {
            tracing::debug!(client_id = %client.client_id, error = %e, "Unparsable redirect URI");
            ProtocolError::invalid_request("Redirect URI is malformed")
        })?;

        // From here on errors are delivered on the redirect.
        let mut request = ValidatedRequest {
            response_type,
            client_id: client.client_id,
            redirect_uri,
            scope: Scope::default(),
            state: param(params, "state").map(str::to_owned),
            target,
        };

        match self.check_scope(param(params, "scope"), None) {
            Ok(scope) => request.scope = scope,
            Err(error) => return Err(redirect_error(&request, error)),
        }
        if self.config.require_state && request.state.is_none() {
            let error = ProtocolError::invalid_request("Required state parameter is missing");
            return Err(redirect_error(&request, error));
        }

        tracing::debug!(
            client_id = %request.client_id,
            response_type = response_type.as_str(),
            scope = %request.scope,
            "Authorization request validated"
        );
        Ok(request)
    }

    /// Resource owner approved the request: issue a code or an implicit token.
    pub async fn grant_access(
        &self,
        request: &ValidatedRequest,
        user_id: &str,
    ) -> Result<Redirect, AuthorizeError> {
        self.grant_access_at(request, user_id, Utc::now()).await
    }

    /// [`Self::grant_access`] with an explicit clock.
    #[tracing::instrument(skip_all, fields(client_id = %request.client_id))]
    pub async fn grant_access_at(
        &self,
        request: &ValidatedRequest,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Redirect, AuthorizeError> {
        match request.response_type {
            ResponseType::Code => {
                let Some(codes) = &self.backend.codes else {
                    let error = ProtocolError::new(
                        ErrorKind::UnsupportedResponseType,
                        "Authorization code grant type is not supported",
                    );
                    return Err(redirect_error(request, error));
                };
                let code = self.generator.generate();
                let record = AuthorizationCode {
                    code: code.clone(),
                    client_id: request.client_id.clone(),
                    user_id: user_id.to_owned(),
                    scope: request.scope.to_string(),
                    redirect_uri: request.redirect_uri.clone(),
                    expires_at: expiry(now, self.config.code_expires_in),
                };
                storage(codes.save_auth_code(record).await, "save_auth_code")
                    .map_err(|e| redirect_error(request, e))?;

                tracing::info!(code_key = %token_key(&code), "Issued authorization code");
                Ok(request.redirect([("code", code.as_str())]))
            }
            ResponseType::Token => {
                let token = self.generator.generate();
                let record = AccessToken {
                    token_key: token_key(&token),
                    client_id: request.client_id.clone(),
                    user_id: Some(user_id.to_owned()),
                    scope: request.scope.to_string(),
                    expires_at: Some(expiry(now, self.config.token_expires_in)),
                    revoked: false,
                    code: None,
                };
                let key = record.token_key.clone();
                storage(self.backend.tokens.save_token(record).await, "save_token")
                    .map_err(|e| redirect_error(request, e))?;

                tracing::info!(token_key = %key, "Issued implicit access token");
                let expires_in = self.config.token_expires_in.to_string();
                let scope = request.scope.to_string();
                Ok(request.redirect([
                    ("access_token", token.as_str()),
                    ("token_type", "bearer"),
                    ("expires_in", expires_in.as_str()),
                    ("scope", scope.as_str()),
                ]))
            }
        }
    }

    /// Resource owner refused the request.
    #[must_use]
    pub fn deny_access(&self, request: &ValidatedRequest) -> Redirect {
        tracing::info!(client_id = %request.client_id, "Resource owner denied access");
        let error = ProtocolError::access_denied("The user denied request");
        request.redirect(error.to_params())
    }

    fn check_response_type(&self, raw: Option<&str>) -> Result<ResponseType, ProtocolError> {
        let response_type = match raw {
            None => {
                return Err(ProtocolError::invalid_request(
                    "Required response type parameter is missing",
                ));
            }
            Some("code") => ResponseType::Code,
            Some("token") => ResponseType::Token,
            Some(_) => {
                return Err(ProtocolError::new(
                    ErrorKind::UnsupportedResponseType,
                    "Response type parameter is invalid or unsupported",
                ));
            }
        };
        match response_type {
            ResponseType::Code if !self.capabilities.codes => Err(ProtocolError::new(
                ErrorKind::UnsupportedResponseType,
                "Authorization code grant type is not supported",
            )),
            ResponseType::Token if !self.capabilities.implicit => Err(ProtocolError::new(
                ErrorKind::UnsupportedResponseType,
                "Implicit grant type is not supported",
            )),
            _ => Ok(response_type),
        }
    }

    /// RFC 6749 §3.1.2.2 and §3.1.2.3.
    fn resolve_redirect_uri(
        &self,
        client: &Client,
        response_type: ResponseType,
        requested: Option<&str>,
    ) -> Result<String, ProtocolError> {
        let registered = client.redirect_uri.as_deref().filter(|uri| !uri.is_empty());

        if client.client_type == ClientType::Public && registered.is_none() {
            return Err(ProtocolError::access_denied(
                "Public clients MUST register their redirection endpoints",
            ));
        }
        if client.client_type == ClientType::Confidential
            && response_type == ResponseType::Token
            && registered.is_none()
        {
            return Err(ProtocolError::access_denied(
                "Clients utilizing the implicit grant type MUST register their redirection endpoints",
            ));
        }

        if let Some(checker) = &self.backend.redirects {
            return checker.check_client_redirect_uri(requested, client).ok_or_else(|| {
                tracing::debug!(client_id = %client.client_id, "Dynamic redirect URI check failed");
                ProtocolError::access_denied("Dynamic configuration for redirect URI failed")
            });
        }

        match (requested, registered) {
            (Some(requested), Some(registered)) if requested != registered => {
                tracing::debug!(client_id = %client.client_id, "Redirect URI does not match registration");
                Err(ProtocolError::access_denied("Redirect URI does not match"))
            }
            (Some(uri), _) | (None, Some(uri)) => Ok(uri.to_owned()),
            (None, None) => Err(ProtocolError::invalid_request("Required redirect URI parameter is missing")),
        }
    }
}
