//! OAuth login service
//!
//! Single-binary Rust service that:
//! 1. Sends browsers to a configured identity provider with a single-use state
//! 2. Exchanges and inspects the returned code on the shared callback
//! 3. Logs in linked users, or walks first-time users through a signed signup
//! 4. Serves `/health` and Prometheus `/metrics`

mod config;
mod error;
mod handoff;
mod metrics;
mod oauth;
mod register;
mod session;
mod views;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{FromRef, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_store::{AccountStore, MemoryStateStore};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::handoff::HandoffSigner;
use crate::oauth::OAuthHandler;
use crate::session::MemorySessionStore;

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    oauth: OAuthHandler,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

impl FromRef<AppState> for OAuthHandler {
    fn from_ref(state: &AppState) -> Self {
        state.oauth.clone()
    }
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(oauth::routes())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire providers, stores and the hand-off signer from configuration.
async fn build_state(config: &Config, prometheus: PrometheusHandle) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.request_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let providers = config
        .providers
        .iter()
        .map(|p| {
            oauth::build_provider(p, &http)
                .with_context(|| format!("failed to configure provider {}", p.name))
        })
        .collect::<Result<Vec<_>>>()?;

    let accounts = match &config.server.data_file {
        Some(path) => AccountStore::load(path.clone())
            .await
            .with_context(|| format!("failed to load accounts from {}", path.display()))?,
        None => {
            warn!("no data_file configured, accounts will not survive a restart");
            AccountStore::in_memory()
        }
    };

    let seed = config
        .server
        .hash_seed
        .clone()
        .context("hash_seed was not resolved")?;

    let oauth = OAuthHandler::new(
        providers,
        Arc::new(MemoryStateStore::new(Duration::from_secs(
            config.server.state_ttl_secs,
        ))),
        Arc::new(accounts),
        Arc::new(MemorySessionStore::new(
            Duration::from_secs(config.server.session_ttl_secs),
            config.server.secure_cookies(),
        )),
        HandoffSigner::new(seed),
    );

    Ok(AppState {
        oauth,
        started_at: Instant::now(),
        prometheus,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-login");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        host = %config.server.host,
        providers = config.providers.len(),
        "configuration loaded"
    );

    let app_state = build_state(&config, prometheus_handle).await?;
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Landing page: who is signed in, or links to each provider.
async fn home_handler(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = session::current_user(state.oauth.sessions(), &headers).await;
    views::home_page(user.as_ref(), &state.oauth.provider_names())
}

/// Health endpoint: JSON with status, configured providers and uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "providers": state.oauth.provider_names(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    /// Load a config with one generic provider (and a data file in `dir`).
    fn test_config(dir: &tempfile::TempDir) -> Config {
        let toml = format!(
            r#"
[server]
listen_addr = "127.0.0.1:0"
host = "http://localhost:8080"
hash_seed = "test-seed"
data_file = "{}"

[[provider]]
kind = "generic"
name = "acme"
client_id = "client-1"
client_secret = "shh"
auth_location = "https://acme.example/authorize"
token_location = "https://acme.example/token"
inspect_location = "https://acme.example/inspect"
"#,
            dir.path().join("accounts.json").display()
        );
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml).unwrap();
        Config::load(&path).unwrap()
    }

    async fn test_app(dir: &tempfile::TempDir, prometheus: PrometheusHandle) -> Router {
        let config = test_config(dir);
        let state = build_state(&config, prometheus).await.unwrap();
        build_router(state, config.server.max_connections)
    }

    async fn get(app: &Router, uri: &str) -> axum::response::Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn build_state_creates_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let _app = test_app(&dir, test_prometheus_handle()).await;
        assert!(dir.path().join("accounts.json").exists());
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, test_prometheus_handle()).await;

        let response = get(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["providers"], serde_json::json!(["acme"]));
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn home_page_links_providers_when_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, test_prometheus_handle()).await;

        let response = get(&app, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Not signed in."));
        assert!(body.contains("href=\"/oauth/acme\""));
    }

    #[tokio::test]
    async fn login_route_is_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, test_prometheus_handle()).await;

        let response = get(&app, "/oauth/acme").await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()["location"].to_str().unwrap();
        assert!(location.starts_with("https://acme.example/authorize?"));
        assert!(location.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Foauth%2Fcallback"));

        assert_eq!(get(&app, "/oauth/unknown").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, test_prometheus_handle()).await;

        let response = get(&app, "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(
            content_type.contains("text/plain"),
            "metrics endpoint must return text/plain Prometheus format"
        );
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_login_requests() {
        // current-thread test runtime: the local recorder sees handler metrics
        let (recorder, handle) = metrics::isolated_recorder();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, handle).await;

        get(&app, "/oauth/acme").await;
        get(&app, "/oauth/callback?code=x&state=forged").await;

        let rendered = body_text(get(&app, "/metrics").await).await;
        assert!(
            rendered.contains("oauth_requests_total"),
            "rendered:\n{rendered}"
        );
        assert!(rendered.contains("route=\"init\""));
        assert!(rendered.contains("route=\"callback\""));
        assert!(rendered.contains("status=\"500\""));
        assert!(rendered.contains("oauth_request_duration_seconds_bucket"));
    }
}
