use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{state::peer::PeerId, state::race::InvalidTransition, transport::TransportError};

/// Errors raised by the session protocol engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be opened or dialled.
    #[error("connection error: {0}")]
    Connection(#[source] TransportError),
    /// Every generated host id collided with an existing one.
    #[error("no free peer id after {attempts} attempts")]
    IdExhausted { attempts: u32 },
    /// Operation reserved to the other side of the star.
    #[error("operation requires a {expected} session")]
    WrongMode { expected: &'static str },
    /// No live link to the host.
    #[error("not connected to the host")]
    NotConnected,
    /// Peer id not present in the registry.
    #[error("unknown peer `{0}`")]
    UnknownPeer(PeerId),
    /// `init` has not completed yet.
    #[error("session is not initialized")]
    NotInitialized,
    /// `destroy` was called.
    #[error("session has been destroyed")]
    Destroyed,
    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Session layer is not usable right now.
    #[error("session unavailable: {0}")]
    Unavailable(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownPeer(id) => ServiceError::NotFound(format!("peer `{id}`")),
            SessionError::WrongMode { .. } => ServiceError::InvalidState(err.to_string()),
            SessionError::Encode(_) => ServiceError::InvalidInput(err.to_string()),
            SessionError::Connection(_)
            | SessionError::IdExhausted { .. }
            | SessionError::NotConnected
            | SessionError::NotInitialized
            | SessionError::Destroyed => ServiceError::Unavailable(err.to_string()),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(format!(
            "{:?} is not allowed while {:?}",
            err.event, err.from
        ))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(message) => AppError::ServiceUnavailable(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
