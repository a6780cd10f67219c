//! HTTP transport.
//!
//! `POST /identify` resolves one observation, `GET /healthz` reports liveness.
//! Resolution is synchronous and runs on the blocking pool, so a client that
//! disconnects mid-request never interrupts a transaction halfway.

use crate::error::{IdentifyError, StoreError};
use crate::model::{IdentifyRequest, IdentifyResponse};
use crate::Identirust;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Seconds a client should wait before retrying a `503`.
pub const RETRY_AFTER_SECS: u64 = 1;

/// Build the service router.
pub fn router(service: Identirust) -> Router {
    Router::new()
        .route("/identify", post(identify))
        .route("/healthz", get(healthz))
        .with_state(service)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed body or failed validation.
    BadRequest(String),
    /// The request lost every retry, or the store is temporarily unavailable.
    Unavailable(String),
    /// Anything else. The detail is logged, never returned.
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IdentifyError> for ApiError {
    fn from(err: IdentifyError) -> Self {
        match err {
            IdentifyError::Validation(message) => ApiError::BadRequest(message),
            IdentifyError::Conflict { attempts } => ApiError::Unavailable(format!(
                "Request conflicted with concurrent updates after {attempts} attempts, please retry."
            )),
            IdentifyError::Store(StoreError::Unavailable(reason)) => {
                warn!(%reason, "contact store unavailable");
                ApiError::Unavailable("Contact store temporarily unavailable, please retry.".into())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            ApiError::BadRequest(message) => {
                (status, Json(ErrorBody { error: message })).into_response()
            }
            ApiError::Unavailable(message) => {
                let mut response = (status, Json(ErrorBody { error: message })).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
                response
            }
            ApiError::Internal(detail) => {
                error!(error = %detail, "identify failed");
                (
                    status,
                    Json(ErrorBody {
                        error: "Internal server error".into(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// `POST /identify`
pub async fn identify(
    State(service): State<Identirust>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let response = tokio::task::spawn_blocking(move || service.identify(request))
        .await
        .map_err(|err| ApiError::Internal(format!("identify task failed: {err}")))??;
    Ok(Json(response))
}

/// `GET /healthz`
pub async fn healthz() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok".into(),
    })
}
