//! OAuth 2.0 Engine
//!
//! An authorization server and resource server protocol engine for RFC 6749
//! and RFC 6750, independent of storage technology and HTTP framework.
//!
//! # Features
//!
//! - **Authorization endpoint**: authorization code and implicit grants, with
//!   redirect instructions for both outcomes
//! - **Token endpoint**: `authorization_code`, `password`, `client_credentials`
//!   and `refresh_token` grants; single-use codes with replay revocation
//! - **Resource guard**: bearer extraction, expiry, revocation and scope checks
//! - **Pluggable storage**: async port traits, with an in-memory implementation
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use oauth2_engine::{Backend, ClientType, MemoryStore, OAuthServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.register_client("test", ClientType::Public, Some("http://localhost"), None).await?;
//!
//!     let server = OAuthServer::new(ServerConfig::for_testing(), Backend::from_memory(store))?;
//!     let params: HashMap<String, String> = [
//!         ("response_type".to_string(), "code".to_string()),
//!         ("client_id".to_string(), "test".to_string()),
//!     ]
//!     .into_iter()
//!     .collect();
//!
//!     let request = server.validate_authorization_request(&params).await?;
//!     let redirect = server.grant_access(&request, "user-1").await?;
//!     println!("{}", redirect.location());
//!     Ok(())
//! }
//! ```

pub mod authorize;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod generator;
pub mod redirect;
pub mod resource;
pub mod scope;
pub mod server;
pub mod store;
pub mod token;

pub use authorize::{AuthorizeError, ResponseType, ValidatedRequest};
pub use config::{GuardConfig, ServerConfig};
pub use crypto::{Pbkdf2Hasher, SecretVerifier};
pub use engine::{Capabilities, OAuthServer, Params};
pub use error::{ConfigError, ErrorKind, ProtocolError, ProtocolResult, StoreError, StoreResult};
pub use redirect::{Delivery, Redirect};
pub use resource::{BearerChallenge, ResourceGuard, ResourceRequest, VerifiedToken};
pub use scope::Scope;
pub use store::{
    AccessToken, AuthorizationCode, Backend, Client, ClientStore, ClientType, CodeStore,
    MemoryStore, PrefixRedirectChecker, RedirectUriChecker, RefreshToken, RefreshTokenStore,
    TokenStore, UserCredentialStore,
};
pub use token::{ClientCredentials, GrantType, TokenResponse};
