//! Router, middleware stack and process lifecycle.
//!
//! Middleware, outermost first:
//!
//! ```text
//! security headers → panic recovery → tracing → CORS → timeout (408) → gzip → routes
//! ```

use crate::config::{ConfigError, GatewayConfig, ServerConfig};
use crate::fetch::{BoundedFetcher, FetchError, ReqwestUpstream};
use crate::handler::{self, AppState};
use crate::imaging::RustBackend;
use axum::Router;
use axum::http::header::{
    HeaderName, HeaderValue, InvalidHeaderValue, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
    X_XSS_PROTECTION,
};
use axum::http::Method;
use axum::routing::get;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] FetchError),
    #[error("invalid response.cache_control: {0}")]
    CacheControl(#[from] InvalidHeaderValue),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the application router with the full middleware stack.
pub fn create_app(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/img/url/*url", get(handler::transform))
        .route("/health", get(handler::health))
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(security_header(X_XSS_PROTECTION, "1; mode=block"))
        .layer(security_header(X_FRAME_OPTIONS, "DENY"))
        .layer(security_header(X_CONTENT_TYPE_OPTIONS, "nosniff"))
}

fn security_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

/// GET-only CORS. An empty origin list (or `"*"`) allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the production state: reqwest upstream behind the size bound.
pub fn production_state(config: &GatewayConfig) -> Result<AppState, ServeError> {
    let upstream = Arc::new(ReqwestUpstream::new(config.fetch.timeout())?);
    let fetcher = BoundedFetcher::new(upstream, config.fetch.max_bytes);
    let backend = RustBackend::with_limits(config.image.limits());
    Ok(AppState::new(
        fetcher,
        backend,
        &config.response.cache_control,
    )?)
}

/// Bind and serve until Ctrl-C / SIGTERM, then drain for at most the
/// configured grace period.
pub async fn serve(config: GatewayConfig) -> Result<(), ServeError> {
    let addr = config.listen_addr()?;
    let app = create_app(production_state(&config)?, &config.server);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, max_bytes = config.fetch.max_bytes, "imgate listening");

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signalled_tx.send(());
    });

    tokio::select! {
        result = server.into_future() => result?,
        _ = drain_deadline(signalled_rx, config.server.shutdown_grace()) => {
            warn!("shutdown grace period elapsed, dropping open connections");
        }
    }
    info!("imgate stopped");
    Ok(())
}

/// Resolves `grace` after the shutdown signal fires; never resolves otherwise.
async fn drain_deadline(signalled: oneshot::Receiver<()>, grace: Duration) {
    if signalled.await.is_ok() {
        info!(grace_secs = grace.as_secs(), "draining in-flight requests");
        tokio::time::sleep(grace).await;
    } else {
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
