//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the object handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Resolve paths through the mount table and dispatch them
//! - Record per-request metrics
//! - Drain in-flight requests on shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::lifecycle::shutdown;
use crate::net::UpstreamClient;
use crate::observability::metrics;
use crate::proxy::{maybe_upgrade, Dispatcher, DispatcherConfig, HttpRangeFactory, RangeSourceFactory};
use crate::security::rate_limit;
use crate::storage::{LinkResolver, MountTable};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<dyn LinkResolver>,
    pub factory: Arc<dyn RangeSourceFactory>,
}

/// HTTP server for the link proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Build the server and every subsystem it needs from `config`.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let client = UpstreamClient::new(&config.upstream, &config.timeouts)
            .map_err(|e| ProxyError::Config(format!("upstream client: {}", e)))?;
        let throttle = rate_limit::from_config(&config.rate_limit);
        let dispatcher = Dispatcher::new(DispatcherConfig::from_config(&config), client.clone(), throttle);
        let mounts = MountTable::from_config(&config, &client)?;
        if mounts.is_empty() {
            tracing::warn!("No mounts configured, every request will be 404");
        }

        let state = AppState {
            dispatcher: Arc::new(dispatcher),
            resolver: Arc::new(mounts),
            factory: Arc::new(HttpRangeFactory::new(client)),
        };
        Ok(Self::with_state(config, state))
    }

    /// Build the server around prepared state.
    pub fn with_state(config: ProxyConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(object_handler))
            .route("/", any(object_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// The router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain open requests.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Resolve the request path to a link and serve it.
async fn object_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let (parts, _body) = request.into_parts();
    let request_id = request_id(&parts.headers);
    let method = parts.method.clone();

    if method != Method::GET && method != Method::HEAD {
        metrics::record_request(method.as_str(), 405, "none", start_time);
        return ProxyError::MethodNotAllowed.into_response();
    }

    let path = match percent_decode_str(parts.uri.path()).decode_utf8() {
        Ok(path) => path.into_owned(),
        Err(_) => {
            metrics::record_request(method.as_str(), 404, "none", start_time);
            return ProxyError::NotFound(parts.uri.path().to_string()).into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Serving object"
    );

    let resolved = match state.resolver.resolve(&path).await {
        Ok(resolved) => resolved,
        Err(e) => {
            let response = e.into_response();
            tracing::warn!(request_id = %request_id, path = %path, status = %response.status(), "Resolution failed");
            metrics::record_request(method.as_str(), response.status().as_u16(), "none", start_time);
            return response;
        }
    };

    let link = if resolved.proxy_range {
        maybe_upgrade(resolved.link, resolved.file.size, state.factory.as_ref())
    } else {
        resolved.link
    };
    let strategy = link.strategy();

    let response = match state.dispatcher.serve(link, &resolved.file, &parts).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                path = %path,
                strategy = %strategy,
                error = %e,
                "Serving failed"
            );
            e.into_response()
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), strategy.as_str(), start_time);
    response
}
