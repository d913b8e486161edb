//! Typed error taxonomy shared by the KV adapter, stores, validator, and HTTP surface.
//!
//! Wire-exposed kinds carry a stable `name` string and a human `message`,
//! matching the `{name, message}` JSON shape every endpoint returns on
//! failure. Internal kinds (`Conflict`, `KeyNotFound`, …) never reach the
//! wire directly; [`RegistryError::wire_kind`] maps them to the handful of
//! kinds callers are allowed to see.

use http::StatusCode;
use serde::Serialize;

use crate::body::TakoBody;
use crate::responder::Responder;
use crate::types::Response;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("malformed request body: {0}")]
    ProcessRequest(String),

    #[error("invalid route: {0}")]
    RouteInvalid(String),

    #[error("invalid route_service_url: {0}")]
    RouteServiceUrlInvalid(String),

    #[error("invalid tcp route mapping: {0}")]
    TcpRouteMappingInvalid(String),

    #[error("invalid router group: {0}")]
    RouterGroupInvalid(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("db communication error: {0}")]
    DbCommunication(String),

    /// CAS budget exhausted, or a concurrent delete was observed mid-upsert.
    /// Surfaced to API callers as [`RegistryError::DbCommunication`].
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    /// CAS precondition failed (the node's modification index changed).
    #[error("compare-and-swap test failed for {0}")]
    TestFailed(String),

    /// The watched store's event history has a gap; the watcher must
    /// transparently reopen from the current index. Never surfaced to API
    /// callers — handled entirely inside the route store's watch loop.
    #[error("watch index cleared")]
    IndexCleared,

    #[error("{field} must be unique: {message}")]
    UniqueField { field: String, message: String },

    #[error("{field} is immutable: {message}")]
    NonUpdatableField { field: String, message: String },
}

/// Stable wire error kind name plus the HTTP status it maps to.
#[derive(Serialize)]
pub struct WireError {
    pub name: &'static str,
    pub message: String,
}

impl RegistryError {
    /// Collapses internal kinds into the wire-exposed vocabulary from the
    /// error handling design: `Conflict` becomes `DBCommunicationError`;
    /// `UniqueField`/`NonUpdatableField` surface through whichever
    /// validation kind the caller already used to report them.
    pub fn http_status(&self) -> StatusCode {
        match self {
            RegistryError::ProcessRequest(_) => StatusCode::BAD_REQUEST,
            RegistryError::RouteInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::RouteServiceUrlInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::TcpRouteMappingInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::RouterGroupInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::DbCommunication(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::Conflict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::KeyExists(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::TestFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::IndexCleared => StatusCode::INTERNAL_SERVER_ERROR,
            RegistryError::UniqueField { .. } => StatusCode::BAD_REQUEST,
            RegistryError::NonUpdatableField { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            RegistryError::ProcessRequest(_) => "ProcessRequestError",
            RegistryError::RouteInvalid(_) => "RouteInvalidError",
            RegistryError::RouteServiceUrlInvalid(_) => "RouteServiceUrlInvalidError",
            RegistryError::TcpRouteMappingInvalid(_) => "TcpRouteMappingInvalidError",
            RegistryError::RouterGroupInvalid(_)
            | RegistryError::UniqueField { .. }
            | RegistryError::NonUpdatableField { .. } => "RouterGroupInvalidError",
            RegistryError::Unauthorized => "UnauthorizedError",
            RegistryError::DbCommunication(_)
            | RegistryError::Conflict(_)
            | RegistryError::KeyExists(_)
            | RegistryError::TestFailed(_)
            | RegistryError::IndexCleared => "DBCommunicationError",
            RegistryError::KeyNotFound(_) => "KeyNotFoundError",
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError {
            name: self.wire_name(),
            message: self.to_string(),
        }
    }
}

impl Responder for RegistryError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = serde_json::to_vec(&self.to_wire()).unwrap_or_default();
        let mut res = Response::new(TakoBody::from(bytes::Bytes::from(body)));
        *res.status_mut() = status;
        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        res
    }
}
