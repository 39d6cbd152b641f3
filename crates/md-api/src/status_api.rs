//! Status & Health Endpoints
//!
//! - `/v1/status` - liveness
//! - `/v1/status/health` - aggregate circuit health, 503 when any circuit
//!   is not CLOSED

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use md_gateway::{HealthSnapshot, SocialGateway};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

/// Status service state
#[derive(Clone)]
pub struct StatusState {
    pub social: Arc<SocialGateway>,
}

/// Liveness response
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

/// Aggregate health response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub circuits: Vec<CircuitHealthResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CircuitHealthResponse {
    pub platform: String,
    pub healthy: bool,
}

impl From<HealthSnapshot> for HealthResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: if snapshot.is_healthy() {
                "healthy"
            } else {
                "degraded"
            }
            .to_string(),
            circuits: snapshot
                .circuits
                .into_iter()
                .map(|c| CircuitHealthResponse {
                    platform: c.platform,
                    healthy: c.healthy,
                })
                .collect(),
        }
    }
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "",
    tag = "status",
    responses((status = 200, description = "Service is alive", body = StatusResponse))
)]
pub async fn get_status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

/// Circuit health
///
/// Returns 200 when every platform circuit is CLOSED, 503 otherwise.
#[utoipa::path(
    get,
    path = "/health",
    tag = "status",
    responses(
        (status = 200, description = "All circuits closed", body = HealthResponse),
        (status = 503, description = "At least one circuit open", body = HealthResponse)
    )
)]
pub async fn get_health(State(state): State<StatusState>) -> Response {
    match state.social.health_snapshot().await {
        Ok(snapshot) => {
            let status_code = if snapshot.is_healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status_code, Json(HealthResponse::from(snapshot))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Health snapshot failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse {
                    status: "unknown".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Create the status router
pub fn status_router(state: StatusState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(get_status))
        .routes(routes!(get_health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_gateway::{CircuitHealth, CircuitState, HealthStatus};

    #[test]
    fn test_health_response_shape() {
        let snapshot = HealthSnapshot {
            status: HealthStatus::Degraded,
            circuits: vec![
                CircuitHealth {
                    platform: "twitter".to_string(),
                    healthy: false,
                    state: CircuitState::Open,
                },
                CircuitHealth {
                    platform: "facebook".to_string(),
                    healthy: true,
                    state: CircuitState::Closed,
                },
            ],
        };

        let response = HealthResponse::from(snapshot);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["circuits"][0]["platform"], "twitter");
        assert_eq!(json["circuits"][0]["healthy"], false);
        assert_eq!(json["circuits"][1]["healthy"], true);
    }
}
