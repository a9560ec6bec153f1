//! OAuth 2.0 endpoint handlers.
//!
//! Thin adapters: extract parameters and credentials from the HTTP request,
//! call the engine, and render its result.

use std::sync::Arc;

use axum::{
    Form, Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};

use super::AppState;
use crate::authorize::AuthorizeError;
use crate::engine::Params;
use crate::error::{ErrorKind, ProtocolError, storage};
use crate::redirect::Redirect;
use crate::resource::ResourceRequest;
use crate::token::{ClientCredentials, TokenResponse};

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "oauth2-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /authorize`
///
/// Validate the request and return it as JSON for a consent front-end.
pub async fn handle_authorize_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Params>,
) -> Response {
    match state.server.validate_authorization_request(&params).await {
        Ok(request) => Json(request).into_response(),
        Err(e) => authorize_error(e),
    }
}

/// `POST /authorize`
///
/// The consent form posts the original request parameters back together
/// with `username`, `password` and `decision` (`allow` or `deny`).
pub async fn handle_authorize_post(
    State(state): State<Arc<AppState>>,
    Form(params): Form<Params>,
) -> Response {
    let request = match state.server.validate_authorization_request(&params).await {
        Ok(request) => request,
        Err(e) => return authorize_error(e),
    };

    if params.get("decision").map(String::as_str) != Some("allow") {
        return found(&state.server.deny_access(&request));
    }

    let user_id = match authenticate_user(&state, &params).await {
        Ok(user_id) => user_id,
        Err(e) => {
            let status = if e.kind() == ErrorKind::ServerError {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::UNAUTHORIZED
            };
            return (status, Json(e)).into_response();
        }
    };

    match state.server.grant_access(&request, &user_id).await {
        Ok(redirect) => found(&redirect),
        Err(e) => authorize_error(e),
    }
}

async fn authenticate_user(state: &AppState, params: &Params) -> Result<String, ProtocolError> {
    let Some(users) = &state.server.backend().users else {
        return Err(ProtocolError::access_denied("Resource owner login is unavailable"));
    };
    let username = params.get("username").map(String::as_str).unwrap_or_default();
    let password = params.get("password").map(String::as_str).unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err(ProtocolError::access_denied("Resource owner credentials are required"));
    }

    storage(users.check_user_credentials(username, password).await, "check_user_credentials")?
        .ok_or_else(|| ProtocolError::access_denied("Invalid resource owner credentials"))
}

fn authorize_error(error: AuthorizeError) -> Response {
    match error {
        AuthorizeError::Redirect { redirect, .. } => found(&redirect),
        AuthorizeError::Inline(e) => {
            let status = if e.kind() == ErrorKind::ServerError {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(e)).into_response()
        }
    }
}

fn found(redirect: &Redirect) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, redirect.location().to_owned())]).into_response()
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /token`
pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    basic: Option<TypedHeader<Authorization<Basic>>>,
    Form(params): Form<Params>,
) -> Response {
    let credentials = basic.map_or_else(ClientCredentials::none, |TypedHeader(auth)| {
        ClientCredentials::basic(auth.username(), auth.password())
    });

    match state.server.issue_token(&params, &credentials).await {
        Ok(response) => token_success(&response),
        Err(e) => token_error(&e),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(token: &TokenResponse) -> Response {
    let mut response = Json(token).into_response();
    no_store(&mut response);
    response
}

fn token_error(error: &ProtocolError) -> Response {
    let status = StatusCode::from_u16(error.kind().token_status())
        .unwrap_or(StatusCode::BAD_REQUEST);
    let mut response = (status, Json(error)).into_response();
    no_store(&mut response);
    if error.kind() == ErrorKind::InvalidClient {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"oauth2\""));
    }
    response
}

fn no_store(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

// ─── Protected Resource ──────────────────────────────────────────────────────

/// `GET|POST /resource`
pub async fn handle_resource(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<Params>,
    body: Bytes,
) -> Response {
    let mut request = ResourceRequest::new().with_query(query);
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        request = request.with_authorization(value);
    }
    if method == Method::POST && is_form(&headers) {
        request = request.with_body(url::form_urlencoded::parse(&body).into_owned().collect());
    }

    match state.guard.verify_token(&state.resource_scope, &request).await {
        Ok(verified) => Json(serde_json::json!({
            "client_id": verified.client_id,
            "user_id": verified.user_id,
            "scope": verified.scope,
        }))
        .into_response(),
        Err(e) => {
            let challenge = state.guard.challenge(&e, &state.resource_scope);
            let status = StatusCode::from_u16(challenge.status).unwrap_or(StatusCode::UNAUTHORIZED);
            let mut response = if e.kind() == ErrorKind::MissingCredentials {
                status.into_response()
            } else {
                (status, Json(&e)).into_response()
            };
            if let Ok(value) = HeaderValue::from_str(&challenge.www_authenticate) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
            response
        }
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}
