//! In-memory implementation of every storage port.
//!
//! Suitable for tests, demos and single-process deployments. Codes and tokens
//! live in separate `RwLock`-guarded maps. Claiming a code is atomic under the
//! code map's write lock; a refused claim marks the code as replayed so the
//! winner can revoke what it issued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    AccessToken, AuthorizationCode, Client, ClientStore, ClientType, CodeStore, RefreshToken,
    RefreshTokenStore, TokenStore, UserCredentialStore,
};
use crate::crypto::{Pbkdf2Hasher, SecretVerifier};
use crate::error::{StoreError, StoreResult};

/// Cleanup interval: 5 minutes.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

struct StoredCode {
    code: AuthorizationCode,
    consumed: bool,
    replayed: bool,
}

struct StoredUser {
    user_id: String,
    password_hash: String,
}

#[derive(Default)]
struct TokenTable {
    by_key: HashMap<String, AccessToken>,
    /// First token issued for each authorization code.
    by_code: HashMap<String, String>,
}

/// In-memory OAuth state store.
#[derive(Clone)]
pub struct MemoryStore {
    clients: Arc<RwLock<HashMap<String, Client>>>,
    codes: Arc<RwLock<HashMap<String, StoredCode>>>,
    tokens: Arc<RwLock<TokenTable>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
    users: Arc<RwLock<HashMap<String, StoredUser>>>,
    hasher: Arc<dyn SecretVerifier>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(Arc::new(Pbkdf2Hasher::new()))
    }

    /// Use `hasher` for client secrets and user passwords.
    #[must_use]
    pub fn with_hasher(hasher: Arc<dyn SecretVerifier>) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            codes: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(TokenTable::default())),
            refresh_tokens: Arc::new(RwLock::new(HashMap::new())),
            users: Arc::new(RwLock::new(HashMap::new())),
            hasher,
        }
    }

    /// Register a client, hashing its secret.
    ///
    /// Confidential clients must supply a secret; any registered redirect URI
    /// must be absolute.
    pub async fn register_client(
        &self,
        client_id: &str,
        client_type: ClientType,
        redirect_uri: Option<&str>,
        secret: Option<&str>,
    ) -> StoreResult<Client> {
        if !Client::is_valid_id(client_id) {
            return Err(StoreError::rejected(format!("client id {client_id:?} is malformed")));
        }
        if let Some(uri) = redirect_uri {
            url::Url::parse(uri)
                .map_err(|e| StoreError::rejected(format!("redirect uri is not absolute: {e}")))?;
        }
        let secret = secret.filter(|s| !s.is_empty());
        if client_type == ClientType::Confidential && secret.is_none() {
            return Err(StoreError::rejected("confidential clients require a secret"));
        }

        let client = Client {
            client_id: client_id.to_owned(),
            client_type,
            redirect_uri: redirect_uri.map(str::to_owned),
            client_secret_hash: secret.map(|s| self.hasher.hash(s)),
        };

        let mut clients = self.clients.write().await;
        if clients.contains_key(client_id) {
            return Err(StoreError::rejected(format!("client {client_id:?} already exists")));
        }
        clients.insert(client_id.to_owned(), client.clone());

        tracing::info!(client_id, client_type = %client_type, "Registered OAuth client");
        Ok(client)
    }

    /// Register a resource owner for the password grant.
    pub async fn register_user(&self, username: &str, password: &str, user_id: &str) -> StoreResult<()> {
        if username.is_empty() || password.is_empty() {
            return Err(StoreError::rejected("username and password are required"));
        }
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(StoreError::rejected(format!("user {username:?} already exists")));
        }
        users.insert(
            username.to_owned(),
            StoredUser { user_id: user_id.to_owned(), password_hash: self.hasher.hash(password) },
        );
        Ok(())
    }

    /// Drop expired codes and expired tokens. Revoked but unexpired tokens are kept.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        {
            let mut codes = self.codes.write().await;
            let before = codes.len();
            codes.retain(|_, stored| stored.code.expires_at > now);
            removed += before - codes.len();
        }
        {
            let mut table = self.tokens.write().await;
            let before = table.by_key.len();
            table.by_key.retain(|_, t| t.expires_at.is_none_or(|at| at > now));
            removed += before - table.by_key.len();
            let TokenTable { by_key, by_code } = &mut *table;
            by_code.retain(|_, key| by_key.contains_key(key));
        }
        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| t.expires_at > now);
            removed += before - tokens.len();
        }
        if removed > 0 {
            tracing::debug!(count = removed, "Purged expired OAuth records");
        }
        removed
    }

    /// Start background cleanup task for expired tokens and codes.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.purge_expired(Utc::now()).await;
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn get_client(&self, client_id: &str) -> StoreResult<Option<Client>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }
}

#[async_trait]
impl CodeStore for MemoryStore {
    async fn save_auth_code(&self, code: AuthorizationCode) -> StoreResult<()> {
        let mut codes = self.codes.write().await;
        if codes.contains_key(&code.code) {
            return Err(StoreError::rejected("duplicate authorization code"));
        }
        codes.insert(code.code.clone(), StoredCode { code, consumed: false, replayed: false });
        Ok(())
    }

    async fn get_auth_code(&self, code: &str) -> StoreResult<Option<AuthorizationCode>> {
        Ok(self.codes.read().await.get(code).map(|stored| stored.code.clone()))
    }

    async fn get_token_issued_for_code(&self, code: &str) -> StoreResult<Option<String>> {
        Ok(self.tokens.read().await.by_code.get(code).cloned())
    }

    async fn consume_auth_code(&self, code: &str) -> StoreResult<bool> {
        let mut codes = self.codes.write().await;
        let Some(stored) = codes.get_mut(code) else {
            return Ok(false);
        };
        if stored.consumed {
            stored.replayed = true;
            return Ok(false);
        }
        stored.consumed = true;
        Ok(true)
    }

    async fn is_code_replayed(&self, code: &str) -> StoreResult<bool> {
        Ok(self.codes.read().await.get(code).is_some_and(|stored| stored.replayed))
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn save_token(&self, token: AccessToken) -> StoreResult<()> {
        let mut table = self.tokens.write().await;
        if table.by_key.contains_key(&token.token_key) {
            return Err(StoreError::rejected("duplicate access token"));
        }
        if let Some(code) = token.code.clone() {
            table.by_code.entry(code).or_insert_with(|| token.token_key.clone());
        }
        table.by_key.insert(token.token_key.clone(), token);
        Ok(())
    }

    async fn get_token(&self, token_key: &str) -> StoreResult<Option<AccessToken>> {
        Ok(self.tokens.read().await.by_key.get(token_key).cloned())
    }

    async fn revoke_token(&self, token_key: &str) -> StoreResult<()> {
        if let Some(token) = self.tokens.write().await.by_key.get_mut(token_key) {
            token.revoked = true;
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn save_refresh_token(&self, token: RefreshToken) -> StoreResult<()> {
        let mut tokens = self.refresh_tokens.write().await;
        if tokens.contains_key(&token.token_key) {
            return Err(StoreError::rejected("duplicate refresh token"));
        }
        tokens.insert(token.token_key.clone(), token);
        Ok(())
    }

    async fn get_refresh_token(&self, token_key: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(self.refresh_tokens.read().await.get(token_key).cloned())
    }

    async fn revoke_refresh_tokens_issued_for_code(&self, code: &str) -> StoreResult<()> {
        let mut tokens = self.refresh_tokens.write().await;
        for token in tokens.values_mut().filter(|t| t.code.as_deref() == Some(code)) {
            token.revoked = true;
        }
        Ok(())
    }
}

#[async_trait]
impl UserCredentialStore for MemoryStore {
    async fn check_user_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> StoreResult<Option<String>> {
        let users = self.users.read().await;
        Ok(users
            .get(username)
            .filter(|user| self.hasher.verify(password, &user.password_hash))
            .map(|user| user.user_id.clone()))
    }
}
