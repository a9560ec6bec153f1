//! Token endpoint: client authentication, every grant type, code replay and refresh narrowing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use oauth2_engine::{
    AccessToken, AuthorizationCode, Backend, ClientCredentials, ClientType, CodeStore, ErrorKind, MemoryStore,
    OAuthServer, Params, Pbkdf2Hasher, RefreshToken, RefreshTokenStore, ServerConfig, StoreError, StoreResult,
    TokenStore, crypto::token_key,
};

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn public() -> ClientCredentials {
    ClientCredentials { client_id: Some("test".into()), client_secret: None }
}

fn confidential() -> ClientCredentials {
    ClientCredentials::basic("backend", "s3cret")
}

async fn test_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::with_hasher(Arc::new(Pbkdf2Hasher::with_iterations(1_000))));
    store.register_client("test", ClientType::Public, Some("http://localhost"), None).await.unwrap();
    store.register_client("other", ClientType::Public, Some("http://localhost"), None).await.unwrap();
    store
        .register_client("backend", ClientType::Confidential, Some("https://app.example.com/cb"), Some("s3cret"))
        .await
        .unwrap();
    store.register_user("alice", "wonderland", "42").await.unwrap();
    store
}

async fn test_server() -> (Arc<MemoryStore>, OAuthServer) {
    let store = test_store().await;
    let server = OAuthServer::new(ServerConfig::for_testing(), Backend::from_memory(store.clone())).unwrap();
    (store, server)
}

/// Run the authorization step and return the issued code.
async fn issue_code(server: &OAuthServer, client_id: &str, scope: &str, user_id: &str) -> String {
    let request = server
        .validate_authorization_request(&params(&[
            ("response_type", "code"),
            ("client_id", client_id),
            ("scope", scope),
        ]))
        .await
        .unwrap();
    let redirect = server.grant_access_at(&request, user_id, now()).await.unwrap();
    redirect.param("code").expect("code issued")
}

// ─── Common prefix ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_grant_type_required_and_known() {
    let (_, server) = test_server().await;

    let err = server.issue_token(&params(&[]), &public()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(err.description(), "Required grant type parameter is missing");

    let err = server.issue_token(&params(&[("grant_type", "implicit")]), &public()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedGrantType);
}

#[tokio::test]
async fn test_client_authentication() {
    let (_, server) = test_server().await;
    let p = params(&[("grant_type", "client_credentials")]);

    assert!(server.issue_token_at(&p, &confidential(), now()).await.is_ok());

    let wrong = ClientCredentials::basic("backend", "guess");
    let err = server.issue_token_at(&p, &wrong, now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidClient);
    assert_eq!(err.description(), "Wrong client credentials");

    let missing_secret = ClientCredentials { client_id: Some("backend".into()), client_secret: None };
    assert_eq!(
        server.issue_token_at(&p, &missing_secret, now()).await.unwrap_err().kind(),
        ErrorKind::InvalidClient
    );

    // A public client presenting a secret is not who it claims to be
    let err = server
        .issue_token_at(&p, &ClientCredentials::basic("test", "anything"), now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidClient);

    let err = server.issue_token_at(&p, &ClientCredentials::basic("nobody", "x"), now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnauthorizedClient);

    let err = server.issue_token_at(&p, &ClientCredentials::none(), now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_body_credentials_when_basic_absent() {
    let (_, server) = test_server().await;
    let p = params(&[
        ("grant_type", "client_credentials"),
        ("client_id", "backend"),
        ("client_secret", "s3cret"),
    ]);
    let response = server.issue_token_at(&p, &ClientCredentials::none(), now()).await.unwrap();
    assert_eq!(response.scope.as_deref(), Some("basic"));
}

// ─── authorization_code ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_code_exchange() {
    let (store, server) = test_server().await;
    let code = issue_code(&server, "test", "basic", "u1").await;

    let response = server
        .issue_token_at(
            &params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]),
            &public(),
            now(),
        )
        .await
        .unwrap();

    assert_eq!(response.token_type, "bearer");
    assert_eq!(response.expires_in, 3600);
    assert_eq!(response.scope.as_deref(), Some("basic"));
    let refresh = response.refresh_token.clone().expect("refresh token issued for code grant");

    let token = store.get_token(&token_key(&response.access_token)).await.unwrap().unwrap();
    assert_eq!(token.user_id.as_deref(), Some("u1"));
    assert_eq!(token.scope, "basic");
    assert_eq!(token.code.as_deref(), Some(code.as_str()));
    assert_eq!(token.expires_at, Some(now() + TimeDelta::seconds(3600)));

    let stored_refresh = store.get_refresh_token(&token_key(&refresh)).await.unwrap().unwrap();
    assert_eq!(stored_refresh.code.as_deref(), Some(code.as_str()));
    assert_eq!(stored_refresh.expires_at, now() + TimeDelta::seconds(2_592_000));
}

#[tokio::test]
async fn test_code_replay_revokes_issued_tokens() {
    let (store, server) = test_server().await;
    let code = issue_code(&server, "test", "basic extended", "u1").await;
    let p = params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]);

    let first = server.issue_token_at(&p, &public(), now()).await.unwrap();
    let refresh = first.refresh_token.clone().unwrap();

    let err = server.issue_token_at(&p, &public(), now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidGrant);
    assert_eq!(err.description(), "Used authorization code");

    let token = store.get_token(&token_key(&first.access_token)).await.unwrap().unwrap();
    assert!(token.revoked);
    let refresh = store.get_refresh_token(&token_key(&refresh)).await.unwrap().unwrap();
    assert!(refresh.revoked);

    // The revoked refresh token can no longer be used
    let err = server
        .issue_token_at(
            &params(&[("grant_type", "refresh_token"), ("refresh_token", first.refresh_token.as_deref().unwrap())]),
            &public(),
            now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.description(), "Refresh token is revoked");
}

#[tokio::test]
async fn test_concurrent_redemption_leaves_nothing_live() {
    let (store, server) = test_server().await;
    let code = issue_code(&server, "test", "basic", "u1").await;
    let p = params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]);

    let creds = public();
    let (a, b) = tokio::join!(
        server.issue_token_at(&p, &creds, now()),
        server.issue_token_at(&p, &creds, now())
    );
    assert!(usize::from(a.is_ok()) + usize::from(b.is_ok()) <= 1);
    let loser = a.as_ref().err().or(b.as_ref().err()).unwrap();
    assert_eq!(loser.kind(), ErrorKind::InvalidGrant);

    // Whoever won, nothing issued from the code survives the second attempt
    if let Some(key) = store.get_token_issued_for_code(&code).await.unwrap() {
        assert!(store.get_token(&key).await.unwrap().unwrap().revoked);
    }
    let winner = a.ok().or(b.ok());
    if let Some(winner) = winner {
        let token = store.get_token(&token_key(&winner.access_token)).await.unwrap().unwrap();
        assert!(token.revoked);
        let refresh = winner.refresh_token.unwrap();
        assert!(store.get_refresh_token(&token_key(&refresh)).await.unwrap().unwrap().revoked);
    }
}

/// Delegates to a [`MemoryStore`], optionally slowing token writes or failing
/// named operations.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    save_delay: Option<Duration>,
    failing: Mutex<Vec<&'static str>>,
    refresh_keys: Mutex<Vec<String>>,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner, save_delay: None, failing: Mutex::new(Vec::new()), refresh_keys: Mutex::new(Vec::new()) }
    }

    fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().push(operation);
    }

    fn check(&self, operation: &'static str) -> StoreResult<()> {
        if self.failing.lock().unwrap().contains(&operation) {
            return Err(StoreError::unavailable(format!("{operation}: disk quota exceeded on /var/oauth")));
        }
        Ok(())
    }
}

#[async_trait]
impl CodeStore for FlakyStore {
    async fn save_auth_code(&self, code: AuthorizationCode) -> StoreResult<()> {
        self.check("save_auth_code")?;
        self.inner.save_auth_code(code).await
    }

    async fn get_auth_code(&self, code: &str) -> StoreResult<Option<AuthorizationCode>> {
        self.check("get_auth_code")?;
        self.inner.get_auth_code(code).await
    }

    async fn get_token_issued_for_code(&self, code: &str) -> StoreResult<Option<String>> {
        self.check("get_token_issued_for_code")?;
        self.inner.get_token_issued_for_code(code).await
    }

    async fn consume_auth_code(&self, code: &str) -> StoreResult<bool> {
        self.check("consume_auth_code")?;
        self.inner.consume_auth_code(code).await
    }

    async fn is_code_replayed(&self, code: &str) -> StoreResult<bool> {
        self.check("is_code_replayed")?;
        self.inner.is_code_replayed(code).await
    }
}

#[async_trait]
impl TokenStore for FlakyStore {
    async fn save_token(&self, token: AccessToken) -> StoreResult<()> {
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        self.check("save_token")?;
        self.inner.save_token(token).await
    }

    async fn get_token(&self, token_key: &str) -> StoreResult<Option<AccessToken>> {
        self.inner.get_token(token_key).await
    }

    async fn revoke_token(&self, token_key: &str) -> StoreResult<()> {
        self.check("revoke_token")?;
        self.inner.revoke_token(token_key).await
    }
}

#[async_trait]
impl RefreshTokenStore for FlakyStore {
    async fn save_refresh_token(&self, token: RefreshToken) -> StoreResult<()> {
        self.check("save_refresh_token")?;
        self.refresh_keys.lock().unwrap().push(token.token_key.clone());
        self.inner.save_refresh_token(token).await
    }

    async fn get_refresh_token(&self, token_key: &str) -> StoreResult<Option<RefreshToken>> {
        self.inner.get_refresh_token(token_key).await
    }

    async fn revoke_refresh_tokens_issued_for_code(&self, code: &str) -> StoreResult<()> {
        self.check("revoke_refresh_tokens_issued_for_code")?;
        self.inner.revoke_refresh_tokens_issued_for_code(code).await
    }
}

fn flaky_server(store: &Arc<MemoryStore>, flaky: &Arc<FlakyStore>) -> OAuthServer {
    let backend = Backend::new(store.clone(), flaky.clone())
        .with_codes(flaky.clone())
        .with_refresh_tokens(flaky.clone())
        .with_users(store.clone());
    OAuthServer::new(ServerConfig::for_testing(), backend).unwrap()
}

#[tokio::test]
async fn test_replay_during_slow_issuance_revokes_winner() {
    let store = test_store().await;
    let flaky = Arc::new(FlakyStore { save_delay: Some(Duration::from_millis(200)), ..FlakyStore::new(store.clone()) });
    let server = flaky_server(&store, &flaky);
    let code = issue_code(&server, "test", "basic", "u1").await;
    let p = params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]);

    let winner = {
        let (server, p) = (server.clone(), p.clone());
        tokio::spawn(async move { server.issue_token_at(&p, &public(), now()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The replay is refused while the winner is still writing its token
    let replay = server.issue_token_at(&p, &public(), now()).await.unwrap_err();
    assert_eq!(replay.description(), "Used authorization code");

    let winner = winner.await.unwrap().unwrap_err();
    assert_eq!(winner.kind(), ErrorKind::InvalidGrant);

    let key = store.get_token_issued_for_code(&code).await.unwrap().expect("winner persisted a token");
    assert!(store.get_token(&key).await.unwrap().unwrap().revoked);
    let refresh_keys = flaky.refresh_keys.lock().unwrap().clone();
    assert_eq!(refresh_keys.len(), 1);
    for key in refresh_keys {
        assert!(store.get_refresh_token(&key).await.unwrap().unwrap().revoked);
    }
}

const STORAGE_FAILURE: &str = "The authorization server encountered a storage failure";

async fn assert_storage_failure(server: &OAuthServer, p: &Params) {
    let err = server.issue_token_at(p, &public(), now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(err.description(), STORAGE_FAILURE);
    assert!(!err.to_string().contains("disk"));
}

#[tokio::test]
async fn test_code_lookup_failure_is_server_error() {
    let store = test_store().await;
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let server = flaky_server(&store, &flaky);
    let code = issue_code(&server, "test", "basic", "u1").await;

    flaky.fail("get_auth_code");
    let p = params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]);
    assert_storage_failure(&server, &p).await;
}

#[tokio::test]
async fn test_token_write_failures_are_server_errors() {
    let password = params(&[("grant_type", "password"), ("username", "alice"), ("password", "wonderland")]);

    for operation in ["save_token", "save_refresh_token"] {
        let store = test_store().await;
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let server = flaky_server(&store, &flaky);
        flaky.fail(operation);
        assert_storage_failure(&server, &password).await;
    }
}

#[tokio::test]
async fn test_revocation_failure_on_replay_is_server_error() {
    for operation in ["revoke_refresh_tokens_issued_for_code", "revoke_token"] {
        let store = test_store().await;
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let server = flaky_server(&store, &flaky);
        let code = issue_code(&server, "test", "basic", "u1").await;
        let p = params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]);

        assert!(server.issue_token_at(&p, &public(), now()).await.is_ok());
        flaky.fail(operation);
        assert_storage_failure(&server, &p).await;
    }
}

#[tokio::test]
async fn test_code_checks() {
    let (_, server) = test_server().await;
    let code = issue_code(&server, "test", "basic", "u1").await;

    let cases = [
        (vec![("grant_type", "authorization_code")], ErrorKind::InvalidRequest, "Required code parameter is missing"),
        (
            vec![("grant_type", "authorization_code"), ("code", "short")],
            ErrorKind::InvalidRequest,
            "Code parameter is invalid",
        ),
        (
            vec![("grant_type", "authorization_code"), ("code", "0123456789abcdef0123456789abcdef")],
            ErrorKind::InvalidGrant,
            "Invalid code",
        ),
        (
            vec![("grant_type", "authorization_code"), ("code", code.as_str())],
            ErrorKind::InvalidGrant,
            "Redirect URI mismatch",
        ),
        (
            vec![("grant_type", "authorization_code"), ("code", code.as_str()), ("redirect_uri", "http://localhost/")],
            ErrorKind::InvalidGrant,
            "Redirect URI mismatch",
        ),
    ];
    for (pairs, kind, description) in cases {
        let err = server.issue_token_at(&params(&pairs), &public(), now()).await.unwrap_err();
        assert_eq!((err.kind(), err.description()), (kind, description));
    }

    // Another client cannot redeem the code
    let other = ClientCredentials { client_id: Some("other".into()), client_secret: None };
    let err = server
        .issue_token_at(
            &params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]),
            &other,
            now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.description(), "Client mismatch");
}

#[tokio::test]
async fn test_code_expiry_is_exclusive() {
    let (_, server) = test_server().await;
    let code = issue_code(&server, "test", "basic", "u1").await;
    let p = params(&[("grant_type", "authorization_code"), ("code", &code), ("redirect_uri", "http://localhost")]);

    let at_expiry = now() + TimeDelta::seconds(30);
    let err = server.issue_token_at(&p, &public(), at_expiry).await.unwrap_err();
    assert_eq!(err.description(), "Code expired");

    let just_before = at_expiry - TimeDelta::seconds(1);
    assert!(server.issue_token_at(&p, &public(), just_before).await.is_ok());
}

#[tokio::test]
async fn test_request_scope_ignored_for_code_grant() {
    let (_, server) = test_server().await;
    let code = issue_code(&server, "test", "basic", "u1").await;
    let response = server
        .issue_token_at(
            &params(&[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "http://localhost"),
                ("scope", "superadmin"),
            ]),
            &public(),
            now(),
        )
        .await
        .unwrap();
    assert_eq!(response.scope.as_deref(), Some("basic"));
}

// ─── password ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_password_grant() {
    let (store, server) = test_server().await;
    let response = server
        .issue_token_at(
            &params(&[
                ("grant_type", "password"),
                ("username", "alice"),
                ("password", "wonderland"),
                ("scope", "extended"),
            ]),
            &public(),
            now(),
        )
        .await
        .unwrap();
    assert_eq!(response.scope.as_deref(), Some("extended"));
    assert!(response.refresh_token.is_some());

    let token = store.get_token(&token_key(&response.access_token)).await.unwrap().unwrap();
    assert_eq!(token.user_id.as_deref(), Some("42"));
    assert!(token.code.is_none());
}

#[tokio::test]
async fn test_password_grant_failures() {
    let (_, server) = test_server().await;

    let err = server
        .issue_token_at(
            &params(&[("grant_type", "password"), ("username", "alice"), ("password", "wrong")]),
            &public(),
            now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    let err = server
        .issue_token_at(&params(&[("grant_type", "password"), ("password", "x")]), &public(), now())
        .await
        .unwrap_err();
    assert_eq!(err.description(), "Required username parameter is missing");

    let err = server
        .issue_token_at(
            &params(&[("grant_type", "password"), ("username", "alice"), ("password", "wonderland"), ("scope", "root")]),
            &public(),
            now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidScope);
}

#[tokio::test]
async fn test_password_grant_requires_user_store() {
    let store = test_store().await;
    let server = OAuthServer::new(ServerConfig::for_testing(), Backend::new(store.clone(), store)).unwrap();
    let err = server
        .issue_token_at(
            &params(&[("grant_type", "password"), ("username", "alice"), ("password", "wonderland")]),
            &public(),
            now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedGrantType);
}

// ─── client_credentials ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_credentials_grant() {
    let (store, server) = test_server().await;
    let response = server
        .issue_token_at(
            &params(&[("grant_type", "client_credentials"), ("scope", "basic extended")]),
            &confidential(),
            now(),
        )
        .await
        .unwrap();
    assert!(response.refresh_token.is_none());

    let token = store.get_token(&token_key(&response.access_token)).await.unwrap().unwrap();
    assert!(token.user_id.is_none());
    assert_eq!(token.client_id, "backend");
}

#[tokio::test]
async fn test_client_credentials_rules() {
    let (_, server) = test_server().await;
    let err = server
        .issue_token_at(&params(&[("grant_type", "client_credentials")]), &public(), now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnauthorizedClient);

    let store = test_store().await;
    let config = ServerConfig { allow_client_credentials: false, ..ServerConfig::for_testing() };
    let server = OAuthServer::new(config, Backend::from_memory(store)).unwrap();
    let err = server
        .issue_token_at(&params(&[("grant_type", "client_credentials")]), &confidential(), now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedGrantType);
}

// ─── refresh_token ───────────────────────────────────────────────────────────

async fn refresh_token_with_scope(server: &OAuthServer, scope: &str) -> String {
    let response = server
        .issue_token_at(
            &params(&[
                ("grant_type", "password"),
                ("username", "alice"),
                ("password", "wonderland"),
                ("scope", scope),
            ]),
            &public(),
            now(),
        )
        .await
        .unwrap();
    response.refresh_token.unwrap()
}

#[tokio::test]
async fn test_refresh_narrowing() {
    let (store, server) = test_server().await;
    let refresh = refresh_token_with_scope(&server, "basic extended").await;

    let err = server
        .issue_token_at(
            &params(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh),
                ("scope", "extended superadmin"),
            ]),
            &public(),
            now(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidScope);

    let response = server
        .issue_token_at(
            &params(&[("grant_type", "refresh_token"), ("refresh_token", &refresh), ("scope", "basic")]),
            &public(),
            now(),
        )
        .await
        .unwrap();
    assert_eq!(response.scope.as_deref(), Some("basic"));
    assert!(response.refresh_token.is_none());

    let token = store.get_token(&token_key(&response.access_token)).await.unwrap().unwrap();
    assert_eq!(token.scope, "basic");
    assert_eq!(token.user_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_refresh_inherits_scope() {
    let (_, server) = test_server().await;
    let refresh = refresh_token_with_scope(&server, "extended basic").await;
    let response = server
        .issue_token_at(
            &params(&[("grant_type", "refresh_token"), ("refresh_token", &refresh)]),
            &public(),
            now(),
        )
        .await
        .unwrap();
    assert_eq!(response.scope.as_deref(), Some("extended basic"));
}

#[tokio::test]
async fn test_refresh_token_checks() {
    let (store, server) = test_server().await;
    let refresh = refresh_token_with_scope(&server, "basic").await;

    let err = server
        .issue_token_at(&params(&[("grant_type", "refresh_token")]), &public(), now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let err = server
        .issue_token_at(&params(&[("grant_type", "refresh_token"), ("refresh_token", "bogus")]), &public(), now())
        .await
        .unwrap_err();
    assert_eq!(err.description(), "Refresh token is invalid");

    let p = params(&[("grant_type", "refresh_token"), ("refresh_token", &refresh)]);
    let other = ClientCredentials { client_id: Some("other".into()), client_secret: None };
    let err = server.issue_token_at(&p, &other, now()).await.unwrap_err();
    assert_eq!(err.description(), "Refresh token was issued to another client");

    let expiry = store.get_refresh_token(&token_key(&refresh)).await.unwrap().unwrap().expires_at;
    let err = server.issue_token_at(&p, &public(), expiry).await.unwrap_err();
    assert_eq!(err.description(), "Refresh token expired");
}

#[tokio::test]
async fn test_refresh_grant_requires_refresh_store() {
    let store = test_store().await;
    let backend = Backend::new(store.clone(), store.clone()).with_codes(store.clone()).with_users(store);
    let server = OAuthServer::new(ServerConfig::for_testing(), backend).unwrap();

    // No refresh token alongside the access token either
    let response = server
        .issue_token_at(
            &params(&[("grant_type", "password"), ("username", "alice"), ("password", "wonderland")]),
            &public(),
            now(),
        )
        .await
        .unwrap();
    assert!(response.refresh_token.is_none());

    let err = server
        .issue_token_at(&params(&[("grant_type", "refresh_token"), ("refresh_token", "x")]), &public(), now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedGrantType);
}

#[tokio::test]
async fn test_extra_response_fields() {
    let (_, server) = test_server().await;
    let response = server
        .issue_token_at(&params(&[("grant_type", "client_credentials")]), &confidential(), now())
        .await
        .unwrap()
        .with_extra("tenant", "acme")
        .with_extra("token_type", "mac");

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["tenant"], "acme");
    assert_eq!(json["token_type"], "bearer");
}
