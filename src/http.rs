//! # HTTP Server
//!
//! JSON API for the reconciliation engine.
//!
//! Routes:
//! - `GET  /`              health check
//! - `POST /identify`      reconcile `{email?, phoneNumber?}`
//! - `GET  /contacts/:id`  consolidated view of the cluster owning a contact

use crate::error::ReconcileError;
use crate::model::{coerce_identifier, ContactId, Fragment, IdentityView};
use crate::Identirust;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub identirust: Arc<Identirust>,
}

/// Body of `POST /identify`. Values may be any JSON scalar.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<serde_json::Value>,
    #[serde(default)]
    pub phone_number: Option<serde_json::Value>,
}

impl IdentifyRequest {
    pub fn to_fragment(&self) -> Result<Fragment, ReconcileError> {
        let email = coerce_identifier(self.email.as_ref())?;
        let phone_number = coerce_identifier(self.phone_number.as_ref())?;
        Fragment::new(email, phone_number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: IdentityView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub documentation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("contact {0} not found")]
    NotFound(ContactId),

    #[error("worker task failed: {0}")]
    Internal(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Reconcile(err) if err.is_client_error() => (
                StatusCode::BAD_REQUEST,
                "Either email or phoneNumber is required.",
            ),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Contact not found."),
            _ => {
                error!(error = %self, "identity reconciliation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        (
            status,
            Json(ErrorBody {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the router over a shared engine.
pub fn router(identirust: Arc<Identirust>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/identify", post(identify))
        .route("/contacts/:id", get(contact_cluster))
        .with_state(AppState { identirust })
}

/// Serve until Ctrl-C, then flush the store.
pub async fn serve(identirust: Arc<Identirust>, listen: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "identity reconciliation service listening");

    axum::serve(listener, router(identirust.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down; flushing contact store");
    identirust.flush()
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Online".to_string(),
        message: "Bitespeed Identity Reconciliation API is running perfectly!".to_string(),
        documentation: "Please send POST requests to the /identify endpoint.".to_string(),
    })
}

async fn identify(
    State(state): State<AppState>,
    Json(request): Json<IdentifyRequest>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let fragment = request.to_fragment()?;
    let identirust = state.identirust.clone();
    let view =
        tokio::task::spawn_blocking(move || identirust.identify_fragment(&fragment)).await??;
    Ok(Json(IdentifyResponse { contact: view }))
}

async fn contact_cluster(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<IdentityView>, ApiError> {
    let id = ContactId(id);
    let identirust = state.identirust.clone();
    tokio::task::spawn_blocking(move || identirust.cluster_of(id))
        .await??
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_accepts_numeric_phone() {
        let request: IdentifyRequest =
            serde_json::from_value(json!({"email": null, "phoneNumber": 123456})).unwrap();
        let fragment = request.to_fragment().unwrap();
        assert_eq!(fragment.email(), None);
        assert_eq!(fragment.phone_number(), Some("123456"));

        let request: IdentifyRequest =
            serde_json::from_value(json!({"phoneNumber": 123456.0})).unwrap();
        assert_eq!(request.to_fragment().unwrap().phone_number(), Some("123456"));
    }

    #[test]
    fn request_without_identifiers_is_invalid() {
        let request: IdentifyRequest = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(
            request.to_fragment(),
            Err(ReconcileError::Validation)
        ));
    }

    #[test]
    fn internal_errors_hide_detail() {
        let response =
            ApiError::Reconcile(ReconcileError::Store(anyhow::anyhow!("disk on fire")))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::Reconcile(ReconcileError::Validation).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
