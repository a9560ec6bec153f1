//! OAuth 2.0 reference server - Entry Point
//!
//! Serves the authorization, token and protected resource endpoints over HTTP,
//! backed by the in-memory store.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use oauth2_engine::{
    Backend, ClientType, GuardConfig, MemoryStore, OAuthServer, PrefixRedirectChecker, ResourceGuard,
    ServerConfig, server::AppState,
};

#[derive(Parser, Debug)]
#[command(name = "oauth2-engine")]
#[command(about = "OAuth 2.0 authorization and resource server")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Space-delimited supported scopes (overrides OAUTH2_SCOPES)
    #[arg(long)]
    scopes: Option<String>,

    /// Scope used when a request omits one (overrides OAUTH2_DEFAULT_SCOPE)
    #[arg(long)]
    default_scope: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long)]
    token_expires_in: Option<u64>,

    /// Reject authorization requests without a state parameter
    #[arg(long)]
    require_state: bool,

    /// Accept registered redirect URIs as prefixes of the requested one
    #[arg(long)]
    prefix_redirects: bool,

    /// Scope required by the /resource endpoint
    #[arg(long, default_value = "")]
    resource_scope: String,

    /// Register a client: `id,public|confidential,redirect_uri[,secret]`
    #[arg(long = "client", value_parser = parse_client)]
    clients: Vec<ClientSpec>,

    /// Register a resource owner: `username:user_id:password`
    #[arg(long = "user", value_parser = parse_user)]
    users: Vec<UserSpec>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone)]
struct ClientSpec {
    client_id: String,
    client_type: ClientType,
    redirect_uri: Option<String>,
    secret: Option<String>,
}

#[derive(Debug, Clone)]
struct UserSpec {
    username: String,
    user_id: String,
    password: String,
}

fn parse_client(raw: &str) -> Result<ClientSpec, String> {
    let mut parts = raw.splitn(4, ',');
    let client_id = parts.next().unwrap_or_default().to_owned();
    let client_type = parts
        .next()
        .ok_or("missing client type")?
        .parse::<ClientType>()
        .map_err(|e| e.to_string())?;
    let redirect_uri = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
    let secret = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
    Ok(ClientSpec { client_id, client_type, redirect_uri, secret })
}

fn parse_user(raw: &str) -> Result<UserSpec, String> {
    let mut parts = raw.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(username), Some(user_id), Some(password)) => Ok(UserSpec {
            username: username.to_owned(),
            user_id: user_id.to_owned(),
            password: password.to_owned(),
        }),
        _ => Err("expected username:user_id:password".to_string()),
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting OAuth 2.0 server");

    let mut config = ServerConfig::from_env()?;
    if let Some(scopes) = cli.scopes {
        config.scopes = scopes;
    }
    if let Some(default_scope) = cli.default_scope {
        config.default_scope = Some(default_scope).filter(|s| !s.is_empty());
    }
    if let Some(ttl) = cli.token_expires_in {
        config.token_expires_in = ttl;
    }
    config.require_state |= cli.require_state;

    let store = Arc::new(MemoryStore::new());
    for client in cli.clients {
        store
            .register_client(
                &client.client_id,
                client.client_type,
                client.redirect_uri.as_deref(),
                client.secret.as_deref(),
            )
            .await?;
    }
    for user in cli.users {
        store.register_user(&user.username, &user.password, &user.user_id).await?;
    }
    Arc::clone(&store).start_cleanup_task();

    let mut backend = Backend::from_memory(store);
    if cli.prefix_redirects {
        backend = backend.with_redirect_checker(Arc::new(PrefixRedirectChecker));
    }

    let guard = ResourceGuard::new(backend.token_store(), GuardConfig::from_env()?);
    let server = OAuthServer::new(config, backend)?;

    tracing::info!(capabilities = ?server.capabilities(), port = cli.port, "Running in HTTP mode");

    let state = AppState { server, guard, resource_scope: cli.resource_scope };
    oauth2_engine::server::run_http(state, cli.port).await
}
