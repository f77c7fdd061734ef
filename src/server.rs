//! ==============================================================================
//! server.rs - http api
//! ==============================================================================
//!
//! routes:
//!     GET  /sensor            -> full SensorSnapshot (reading, error, alert, device flags)
//!     GET  /health            -> {status: "ok" | "degraded", timestamp}
//!     POST /control/{device}  -> {"state": "on" | "off"} switches a relay
//!
//! relationships:
//!     - reads: state.rs (SharedState snapshots)
//!     - writes through: control.rs (DeviceControlGateway)
//!     - polled by: notifier.rs (client role)
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::control::DeviceControlGateway;
use crate::domain::{device_key, SensorSnapshot};
use crate::error::ControlError;
use crate::state::SharedState;

#[derive(Clone)]
pub struct ApiState {
    pub state: SharedState,
    pub gateway: Arc<DeviceControlGateway>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

pub fn router(api: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/sensor", get(sensor_handler))
        .route("/health", get(health_handler))
        .route("/control/:device", post(control_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(api)
}

/// Serve until `shutdown` flips to true.
pub async fn run_server(api: ApiState, bind: &str, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("api listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(api))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// latest reading as json
async fn sensor_handler(State(api): State<ApiState>) -> Json<SensorSnapshot> {
    Json(api.state.snapshot().await.to_snapshot())
}

async fn health_handler(State(api): State<ApiState>) -> Json<HealthResponse> {
    let ok = api.state.snapshot().await.last_read_ok;
    Json(HealthResponse {
        status: if ok { "ok" } else { "degraded" },
        timestamp: now_rfc3339(),
    })
}

/// relay control endpoint
/// POST /control/heat {"state": "on"}
async fn control_handler(
    State(api): State<ApiState>,
    Path(device): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ControlError> {
    // a missing or unparseable body counts as a missing field
    let requested = match body.as_ref().and_then(|Json(body)| body.get("state")) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let on = api.gateway.set_device(&device, requested.as_deref()).await?;

    let mut response = serde_json::Map::new();
    response.insert("status".to_string(), json!("success"));
    response.insert(device_key(&device), json!(on));
    response.insert("timestamp".to_string(), json!(now_rfc3339()));
    Ok(Json(Value::Object(response)))
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "device control failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::HostConfig;
    use crate::domain::Reading;
    use crate::error::SensorError;
    use crate::hal::MockGpio;
    use crate::sensor::start_reader;

    struct TestApp {
        router: Router,
        state: SharedState,
        gpio: Arc<MockGpio>,
    }

    fn test_app() -> TestApp {
        let config = HostConfig::default();
        let gpio = Arc::new(MockGpio::new());
        let state = SharedState::new(config.devices.keys().cloned());
        let gateway = Arc::new(DeviceControlGateway::new(gpio.clone(), config.devices.clone(), state.clone()));
        let router = router(ApiState { state: state.clone(), gateway });
        TestApp { router, state, gpio }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_degraded_until_first_read() {
        let app = test_app();

        let (status, body) = send(&app.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert!(body["timestamp"].is_string());

        let reading = Reading::from_celsius(22.0, 70.0, 0.0, OffsetDateTime::now_utc());
        app.state.record_reading(reading, None).await;

        let (_, body) = send(&app.router, get("/health")).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_sensor_init_failure_stays_degraded() {
        let app = test_app();
        let (_tx, rx) = watch::channel(false);
        let opened = Err(SensorError::Init("no device at 0x44".to_string()));
        assert!(start_reader(opened, &app.state, &HostConfig::default(), &rx).await.is_none());

        let (_, body) = send(&app.router, get("/health")).await;
        assert_eq!(body["status"], "degraded");

        let (status, body) = send(&app.router, get("/sensor")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "Sensor init failed: no device at 0x44");
        assert_eq!(body["last_read_ok"], false);
        assert!(body["temperature_c"].is_null());
    }

    #[tokio::test]
    async fn test_sensor_snapshot() {
        let app = test_app();
        let reading = Reading::from_celsius(22.0, 70.0, 0.0, OffsetDateTime::now_utc());
        app.state.record_reading(reading, None).await;
        app.state.record_error("read_error: bus busy").await;

        let (status, body) = send(&app.router, get("/sensor")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temperature_c"], 22.0);
        assert_eq!(body["temperature_f"], 71.6);
        assert_eq!(body["humidity"], 70.0);
        assert_eq!(body["last_read_ok"], false);
        assert_eq!(body["error"], "read_error: bus busy");
        for device in ["heat", "light", "fan"] {
            assert_eq!(body[format!("{}_on", device)], false);
        }
    }

    #[tokio::test]
    async fn test_control_then_sensor() {
        let app = test_app();

        for _ in 0..2 {
            let (status, body) = send(&app.router, post_json("/control/heat", r#"{"state":"ON"}"#)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "success");
            assert_eq!(body["heat_on"], true);
            assert!(body["timestamp"].is_string());
        }
        assert_eq!(app.gpio.level(17), Some(true));

        let (_, body) = send(&app.router, get("/sensor")).await;
        assert_eq!(body["heat_on"], true);
        assert_eq!(body["fan_on"], false);
    }

    #[tokio::test]
    async fn test_control_rejects_bad_requests() {
        let app = test_app();

        let (status, body) = send(&app.router, post_json("/control/unknownthing", r#"{"state":"on"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Valid devices"));

        let (status, body) = send(&app.router, post_json("/control/heat", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing 'state' field in request body");

        let (status, _) = send(&app.router, post_json("/control/heat", r#"{"state":"sideways"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app.router, post_json("/control/heat", r#"{"state":1}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder().method("POST").uri("/control/heat").body(Body::empty()).unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(app.state.device_flag("heat").await, Some(false));
    }

    #[tokio::test]
    async fn test_control_hardware_failure() {
        let app = test_app();
        app.gpio.fail_pin(27);

        let (status, body) = send(&app.router, post_json("/control/light", r#"{"state":"on"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Failed to set light state"));
        assert_eq!(app.state.device_flag("light").await, Some(false));
    }
}
