use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::admin::AdminState;
use crate::error::LbError;
use crate::load_balancer::{Endpoint, Phase};

#[derive(Serialize, Deserialize, Debug)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub endpoints: usize,
    pub phase: Phase,
    pub uptime_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct EndpointStatus {
    pub address: String,
    pub original_weight: u32,
    pub effective_weight: u32,
    pub fail_rate: f64,
}

impl From<&Endpoint> for EndpointStatus {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            address: endpoint.url().to_string(),
            original_weight: endpoint.original_weight(),
            effective_weight: endpoint.effective_weight(),
            fail_rate: endpoint.fail_rate(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ControllerStatus {
    pub phase: Phase,
    pub backoff_secs: u64,
    pub adjusted: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct AddEndpoint {
    pub address: String,
    pub weight: Option<u32>,
}

#[derive(Deserialize, Debug)]
pub struct RemoveEndpoint {
    pub address: String,
}

/// Error body returned by mutating admin routes.
#[derive(Debug)]
pub struct AdminError {
    status: StatusCode,
    message: String,
}

impl From<LbError> for AdminError {
    fn from(error: LbError) -> Self {
        let status = match error {
            LbError::NoEndpoints => StatusCode::SERVICE_UNAVAILABLE,
            LbError::DuplicateEndpoint(_) => StatusCode::CONFLICT,
            LbError::EndpointNotFound(_) => StatusCode::NOT_FOUND,
            LbError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

fn parse_address(address: &str) -> Result<Url, AdminError> {
    Url::parse(address).map_err(|e| AdminError {
        status: StatusCode::BAD_REQUEST,
        message: format!("invalid endpoint address {:?}: {}", address, e),
    })
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let balancer = state.pool.balancer();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        endpoints: balancer.len(),
        phase: balancer.phase(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn get_endpoints(State(state): State<AdminState>) -> Json<Vec<EndpointStatus>> {
    let statuses = state
        .pool
        .balancer()
        .endpoints()
        .iter()
        .map(|e| EndpointStatus::from(e.as_ref()))
        .collect();
    Json(statuses)
}

pub async fn get_controller(State(state): State<AdminState>) -> Json<ControllerStatus> {
    let balancer = state.pool.balancer();
    let adjusted = balancer
        .endpoints()
        .iter()
        .filter(|e| e.is_adjusted())
        .map(|e| e.url().to_string())
        .collect();
    Json(ControllerStatus {
        phase: balancer.phase(),
        backoff_secs: state.config.load().balancer.backoff_secs,
        adjusted,
    })
}

pub async fn add_endpoint(
    State(state): State<AdminState>,
    Json(body): Json<AddEndpoint>,
) -> Result<(StatusCode, Json<EndpointStatus>), AdminError> {
    let url = parse_address(&body.address)?;
    let endpoint = state.pool.add(url, body.weight.unwrap_or(1))?;
    Ok((StatusCode::CREATED, Json(EndpointStatus::from(endpoint.as_ref()))))
}

pub async fn remove_endpoint(
    State(state): State<AdminState>,
    Query(query): Query<RemoveEndpoint>,
) -> Result<StatusCode, AdminError> {
    let url = parse_address(&query.address)?;
    state.pool.remove(&url)?;
    Ok(StatusCode::NO_CONTENT)
}
