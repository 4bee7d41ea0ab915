use crate::api::responses::{
    ErrorCode, ErrorResponse, HealthStatus, HealthSuccessResponse, StatusSuccessResponse,
};
use crate::ups::{FeedState, UpsController, UpsStatus};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::error;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum StatusResponse {
    Success(StatusSuccessResponse),
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl IntoResponse for StatusResponse {
    fn into_response(self) -> Response {
        match self {
            StatusResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            StatusResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub enum HealthResponse {
    Success {
        status: StatusCode,
        body: HealthSuccessResponse,
    },
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        match self {
            HealthResponse::Success { status, body } => (status, Json(body)).into_response(),
            HealthResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

// Controller reads can touch the serial port when caching is off.
pub async fn get_status(State(controller): State<Arc<UpsController>>) -> impl IntoResponse {
    match tokio::task::spawn_blocking(move || controller.status()).await {
        Ok(status) => build_status_response(&status, SystemTime::now()),
        Err(err) => {
            error!(error = %err, "Status task failed");
            status_internal_error("status task failed")
        }
    }
}

pub async fn get_health(State(controller): State<Arc<UpsController>>) -> impl IntoResponse {
    match tokio::task::spawn_blocking(move || controller.feed_state()).await {
        Ok(feed) => build_health_response(feed, SystemTime::now()),
        Err(err) => {
            error!(error = %err, "Health task failed");
            health_internal_error("health task failed")
        }
    }
}

fn build_status_response(status: &UpsStatus, now: SystemTime) -> StatusResponse {
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return status_internal_error("timestamp formatting failure"),
    };

    if status.feed != FeedState::Ready {
        return StatusResponse::Error {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: ErrorResponse {
                error_code: ErrorCode::NoData,
                error_message: "No UPS telemetry available".to_string(),
                timestamp,
            },
        };
    }

    let refreshed_at = match status.refreshed_at.map(format_timestamp).transpose() {
        Ok(formatted) => formatted,
        Err(_) => return status_internal_error("timestamp formatting failure"),
    };

    StatusResponse::Success(StatusSuccessResponse {
        vout: status.vout,
        battery_level: status.battery_level,
        charging: status.charging,
        discharging: status.discharging,
        hardware_version: status.hardware_version.clone(),
        verbose: status.verbose.clone(),
        time_left_secs: status.time_left_secs,
        mode: status.mode,
        refreshed_at,
        timestamp,
    })
}

fn build_health_response(feed: FeedState, now: SystemTime) -> HealthResponse {
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return health_internal_error("timestamp formatting failure"),
    };

    let (status_code, status) = match feed {
        FeedState::Ready => (StatusCode::OK, HealthStatus::Ok),
        FeedState::Failed => (StatusCode::OK, HealthStatus::Degraded),
        FeedState::Pending => (StatusCode::SERVICE_UNAVAILABLE, HealthStatus::Ko),
    };

    HealthResponse::Success {
        status: status_code,
        body: HealthSuccessResponse { status, timestamp },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn internal_error_body(message: &str, route: &str) -> ErrorResponse {
    error!(message = message, route = route, "Internal error while handling request");
    let formatted = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        "1970-01-01T00:00:00Z".to_string()
    });
    ErrorResponse {
        error_code: ErrorCode::InternalError,
        error_message: INTERNAL_ERROR_MESSAGE.to_string(),
        timestamp: formatted,
    }
}

fn status_internal_error(message: &str) -> StatusResponse {
    StatusResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: internal_error_body(message, "/api/status"),
    }
}

fn health_internal_error(message: &str) -> HealthResponse {
    HealthResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: internal_error_body(message, "/api/health"),
    }
}
