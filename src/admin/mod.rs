//! Admin API.
//!
//! Runtime view of the endpoint set and controller, plus endpoint
//! membership changes. Every route requires `Authorization: Bearer <api_key>`.
//!
//! Endpoints added here are not written back to the config file; the next
//! config reload reconciles membership to the file's backend list.

pub mod auth;
pub mod handlers;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ProxyConfig;
use crate::load_balancer::EndpointPool;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub pool: Arc<EndpointPool>,
    pub config: Arc<ArcSwap<ProxyConfig>>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(pool: Arc<EndpointPool>, config: Arc<ArcSwap<ProxyConfig>>) -> Self {
        Self {
            pool,
            config,
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route(
            "/admin/endpoints",
            get(get_endpoints).post(add_endpoint).delete(remove_endpoint),
        )
        .route("/admin/controller", get(get_controller))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
