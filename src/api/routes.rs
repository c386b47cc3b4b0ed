use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use ethers::types::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::models::{BetId, WinnerNotification};
use crate::notifications::NotificationStore;
use crate::scheduler::AutomationStatus;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: NotificationStore,
    pub status: Arc<RwLock<AutomationStatus>>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/notifications",
            get(list_notifications).delete(dismiss_notification),
        )
        .route("/api/automation/status", get(automation_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Unexpired prize/refund notices for one address
async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationQuery>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let address = parse_address(params.address.as_deref())?;
    let notifications = state
        .store
        .list_for(&address, Utc::now().timestamp())
        .await?;

    Ok(Json(NotificationsResponse {
        count: notifications.len(),
        notifications,
    }))
}

async fn dismiss_notification(
    State(state): State<AppState>,
    Query(params): Query<NotificationQuery>,
) -> Result<Json<DismissResponse>, ApiError> {
    let address = parse_address(params.address.as_deref())?;
    let bet_id = params
        .bet_id
        .ok_or_else(|| ApiError::BadRequest("betId is required".to_string()))?;

    let removed = state.store.remove(&address, bet_id).await?;
    Ok(Json(DismissResponse { removed }))
}

async fn automation_status(State(state): State<AppState>) -> Json<AutomationStatus> {
    Json(state.status.read().clone())
}

fn parse_address(raw: Option<&str>) -> Result<String, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest("address is required".to_string()))?;
    let address: Address = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid address: {}", raw)))?;
    Ok(format!("{:?}", address))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationQuery {
    address: Option<String>,
    bet_id: Option<BetId>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct NotificationsResponse {
    notifications: Vec<WinnerNotification>,
    count: usize,
}

#[derive(Serialize)]
struct DismissResponse {
    removed: bool,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Store(anyhow::Error),
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Store(err) => {
                tracing::error!("Notification store error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
