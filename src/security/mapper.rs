//! Request-to-token mapping for quota enforcement.
//!
//! A mapper decides which quota a request is charged against and how much it
//! costs. Three strategies exist: by client IP, by requested host, and by the
//! value of a named header.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderName, Request};
use std::fmt::Debug;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::MapperConfig;

/// The quota a request is charged against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub key: String,
    pub amount: u64,
}

impl Token {
    fn single(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            amount: 1,
        }
    }
}

/// Reasons a request could not be classified. The request is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("failed to determine client address")]
    MissingClientAddress,

    #[error("header {0} is not valid UTF-8")]
    InvalidHeader(String),
}

/// Classifies a request for quota purposes.
pub trait RequestMapper: Send + Sync + Debug {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    fn map(&self, req: &Request<Body>) -> Result<Token, MapError>;
}

/// Charges the connecting client's IP address.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientIp;

impl RequestMapper for ClientIp {
    fn name(&self) -> &'static str {
        "client_ip"
    }

    fn map(&self, req: &Request<Body>) -> Result<Token, MapError> {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Token::single(addr.ip().to_string()))
            .ok_or(MapError::MissingClientAddress)
    }
}

/// Charges the requested host.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestHost;

impl RequestMapper for RequestHost {
    fn name(&self) -> &'static str {
        "request_host"
    }

    fn map(&self, req: &Request<Body>) -> Result<Token, MapError> {
        let host = match req.headers().get(header::HOST) {
            Some(value) => value
                .to_str()
                .map_err(|_| MapError::InvalidHeader(header::HOST.to_string()))?
                .to_string(),
            None => req.uri().host().unwrap_or_default().to_string(),
        };
        Ok(Token::single(host))
    }
}

/// Charges the value of a header. A missing header maps to the empty key.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    header: HeaderName,
}

impl RequestHeader {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl RequestMapper for RequestHeader {
    fn name(&self) -> &'static str {
        "request_header"
    }

    fn map(&self, req: &Request<Body>) -> Result<Token, MapError> {
        match req.headers().get(&self.header) {
            Some(value) => value
                .to_str()
                .map(Token::single)
                .map_err(|_| MapError::InvalidHeader(self.header.to_string())),
            None => Ok(Token::single("")),
        }
    }
}

/// Build the mapper selected in configuration.
pub fn from_config(config: &MapperConfig) -> Result<Box<dyn RequestMapper>, String> {
    Ok(match config {
        MapperConfig::ClientIp => Box::new(ClientIp),
        MapperConfig::RequestHost => Box::new(RequestHost),
        MapperConfig::RequestHeader { header } => {
            let name = HeaderName::try_from(header.as_str())
                .map_err(|e| format!("invalid header name {:?}: {}", header, e))?;
            Box::new(RequestHeader::new(name))
        }
    })
}
