// MIT License - Copyright (c) 2026 Peter Wright
// HTTP status/command surface

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::device::DeviceFleet;
use crate::error::AirconError;
use crate::properties::PropertyValue;
use crate::session::shutdown_requested;

/// JSON error body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps [`AirconError`] to a status code and an `{"error": ...}` body.
pub struct ApiError(AirconError);

impl From<AirconError> for ApiError {
    fn from(err: AirconError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            AirconError::Config { .. } => StatusCode::BAD_REQUEST,
            AirconError::UnknownDevice { .. } => StatusCode::NOT_FOUND,
            e => {
                error!("HTTP request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandQuery {
    device: Option<String>,
    property: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommandAccepted {
    queued_commands: usize,
}

#[derive(Debug, Serialize)]
struct DeviceSummary {
    id: String,
    device_type: String,
    state: String,
    pending_commands: usize,
}

/// Build the router.
///
/// `/hisense/status` and `/hisense/command` are kept for existing
/// SmartThings-style handlers.
pub fn router(fleet: Arc<DeviceFleet>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/command", get(command))
        .route("/hisense/status", get(status))
        .route("/hisense/command", get(command))
        .route("/devices", get(devices))
        .layer(TraceLayer::new_for_http())
        .with_state(fleet)
}

/// Serve until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    fleet: Arc<DeviceFleet>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!("HTTP: listening on {}", address);
    }
    axum::serve(listener, router(fleet))
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
        .await
}

async fn health_check() -> &'static str {
    "OK"
}

/// `GET /status[?device=<id>]`
async fn status(
    State(fleet): State<Arc<DeviceFleet>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<BTreeMap<String, PropertyValue>>, ApiError> {
    let device = fleet.get(query.device.as_deref())?;
    Ok(Json(device.snapshot().await))
}

/// `GET /command?property=<name>&value=<value>[&device=<id>]`
///
/// Responds once the command is validated and queued.
async fn command(
    State(fleet): State<Arc<DeviceFleet>>,
    Query(query): Query<CommandQuery>,
) -> Result<Json<CommandAccepted>, ApiError> {
    let device = fleet.get(query.device.as_deref())?;
    let (Some(property), Some(value)) = (query.property, query.value) else {
        return Err(AirconError::Validation {
            name: "property".into(),
            value: String::new(),
            reason: "both property and value are required".into(),
        }
        .into());
    };

    let ticket = device.issue_command(&property, &value).await.map_err(|e| {
        warn!("[{}] Rejected HTTP command {}={}: {}", device.id(), property, value, e);
        e
    })?;
    super::report_outcome(device.id(), "HTTP", ticket);

    Ok(Json(CommandAccepted {
        queued_commands: device.store().pending_count().await,
    }))
}

/// `GET /devices`
async fn devices(State(fleet): State<Arc<DeviceFleet>>) -> Json<Vec<DeviceSummary>> {
    let mut summaries = Vec::with_capacity(fleet.len());
    for device in fleet.iter() {
        summaries.push(DeviceSummary {
            id: device.id().to_string(),
            device_type: device.device_type().to_string(),
            state: device.session_state().as_str().to_string(),
            pending_commands: device.store().pending_count().await,
        });
    }
    Json(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::credentials::Credentials;
    use crate::device::Device;
    use crate::simulator::SimulatedDevice;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn credentials() -> Credentials {
        Credentials::new("sim", "ac-1", 8888, "AAAABBBBCCCCDDDDEEEEFFFFGGGGHHHH")
    }

    fn fleet(ids: &[&str]) -> Arc<DeviceFleet> {
        let mut fleet = DeviceFleet::new();
        for id in ids {
            let sim = SimulatedDevice::new(&credentials()).with_value("t_power", json!(0));
            let config = DeviceConfig::builder().device_id(*id).build();
            fleet
                .insert(Device::spawn(config, credentials(), sim.connector()).unwrap())
                .unwrap();
        }
        Arc::new(fleet)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn should_return_ok_when_health_check_called() {
        let app = router(fleet(&["ac"]));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn should_queue_valid_command() {
        let (status, body) = get(
            router(fleet(&["ac"])),
            "/command?property=t_temp&value=72",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["queued_commands"].as_u64().unwrap() <= 1);
    }

    #[tokio::test]
    async fn should_reject_read_only_property() {
        let (status, body) = get(
            router(fleet(&["ac"])),
            "/hisense/command?property=f_temp_in&value=20",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("f_temp_in"));
    }

    #[tokio::test]
    async fn should_reject_missing_value() {
        let (status, body) = get(router(fleet(&["ac"])), "/command?property=t_power").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn should_return_not_found_for_unknown_device() {
        let (status, _) = get(router(fleet(&["ac"])), "/status?device=attic").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn should_require_device_when_several() {
        let fleet = fleet(&["bedroom", "office"]);
        let (status, _) = get(router(fleet.clone()), "/status").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = get(router(fleet), "/status?device=office").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_object());
    }

    #[tokio::test]
    async fn should_list_devices() {
        let (status, body) = get(router(fleet(&["bedroom", "office"])), "/devices").await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["bedroom", "office"]);
        assert_eq!(body[0]["device_type"], "ac");
    }
}
