//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, timeout, request ID, rate limit)
//! - Pick an endpoint per request and forward to it
//! - Feed request outcomes back into the endpoint's failure meter
//! - Drive the weight controller and apply config reloads while serving
//!
//! Config reloads update the endpoint set and the shared config snapshot
//! (read by the admin API). Listener address, timeouts and rate limiting
//! are fixed at startup.

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, Uri, Version},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{LbError, LbResult};
use crate::health::passive::is_failure;
use crate::http::request::{request_id, UuidRequestId, X_REQUEST_ID};
use crate::lifecycle::shutdown;
use crate::load_balancer::{ControllerDriver, EndpointPool};
use crate::observability::metrics;
use crate::security::{mapper, rate_limit_middleware, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<EndpointPool>,
    pub client: Client<HttpConnector, Body>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    pool: Arc<EndpointPool>,
    config: Arc<ArcSwap<ProxyConfig>>,
}

impl HttpServer {
    /// Create a new HTTP server forwarding to the endpoints in `pool`.
    pub fn new(config: ProxyConfig, pool: Arc<EndpointPool>) -> LbResult<Self> {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let limiter = if config.rate_limit.enabled {
            let mapper = mapper::from_config(&config.rate_limit.mapper).map_err(LbError::InvalidConfiguration)?;
            tracing::info!(
                mapper = mapper.name(),
                rps = config.rate_limit.requests_per_second,
                burst = config.rate_limit.burst_size,
                "Rate limiting enabled"
            );
            Some(Arc::new(RateLimiter::new(mapper, &config.rate_limit)))
        } else {
            None
        };

        let state = AppState {
            pool: pool.clone(),
            client,
        };

        let router = Self::build_router(&config, state, limiter);
        Ok(Self {
            router,
            pool,
            config: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState, limiter: Option<Arc<RateLimiter>>) -> Router {
        let mut router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state);

        if let Some(limiter) = limiter {
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// Current configuration snapshot, swapped on every accepted reload.
    pub fn shared_config(&self) -> Arc<ArcSwap<ProxyConfig>> {
        self.config.clone()
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, endpoints = self.pool.balancer().len(), "HTTP server starting");

        let interval = self.config.load().balancer.tick_interval();
        let driver = ControllerDriver::new(self.pool.balancer().clone(), interval);
        let driver_shutdown = shutdown.resubscribe();
        tokio::spawn(driver.run(driver_shutdown));

        let pool = self.pool.clone();
        let shared = self.config.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => apply_config(&pool, &shared, config),
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn apply_config(pool: &EndpointPool, shared: &ArcSwap<ProxyConfig>, config: ProxyConfig) {
    match pool.reconcile(&config.backends) {
        Ok(result) => {
            tracing::info!(added = result.added, removed = result.removed, "Configuration reloaded");
            shared.store(Arc::new(config));
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to apply reloaded configuration");
        }
    }
}

/// Main proxy handler.
/// Selects an endpoint, forwards the request and records the outcome.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(&request);
    let method = request.method().to_string();

    let endpoint = match state.pool.next() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "No endpoint available");
            metrics::record_request(&method, 503, "none", start_time);
            return (StatusCode::SERVICE_UNAVAILABLE, "No endpoints available").into_response();
        }
    };
    let target = endpoint.url().as_str();

    let (mut parts, body) = request.into_parts();
    parts.uri = match upstream_uri(endpoint.url(), &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, endpoint = %target, error = %e, "Cannot build upstream URI");
            metrics::record_request(&method, 502, target, start_time);
            return (StatusCode::BAD_GATEWAY, "Invalid upstream address").into_response();
        }
    };
    parts.version = Version::HTTP_11;

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        upstream = %parts.uri,
        weight = endpoint.effective_weight(),
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let status = response.status();
            endpoint.record(is_failure(status));
            metrics::record_request(&method, status.as_u16(), target, start_time);

            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, endpoint = %target, error = %e, "Upstream error");
            endpoint.record(true);
            metrics::record_request(&method, 502, target, start_time);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Rebase the request's path and query onto the endpoint URL.
fn upstream_uri(endpoint: &Url, original: &Uri) -> Result<Uri, axum::http::uri::InvalidUri> {
    let base = endpoint.as_str().trim_end_matches('/');
    let path_and_query = original.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{}{}", base, path_and_query).parse()
}
