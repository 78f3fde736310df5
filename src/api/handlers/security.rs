//! Security panel handlers

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::AppError;
use crate::models::SecurityAlert;

#[derive(Debug, Serialize)]
pub struct SecurityResponse {
    pub night_mode: bool,
    pub alert: Option<SecurityAlert>,
}

/// GET /api/security - Night-mode switch and the active alert, if any
pub async fn get_security(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.sync.snapshot();
    Json(SecurityResponse {
        night_mode: snapshot.night_mode,
        alert: snapshot.security_alert,
    })
}

#[derive(Debug, Deserialize)]
pub struct NightModeRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct NightModeResponse {
    pub night_mode: bool,
}

/// POST /api/security/night_mode - Flip the night-mode switch
pub async fn set_night_mode(
    State(state): State<AppState>,
    Json(payload): Json<NightModeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state.sync.set_night_mode(payload.enabled).await {
        return Err(AppError::InternalError("Device sync is not running".to_string()));
    }
    Ok(Json(NightModeResponse {
        night_mode: payload.enabled,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::{routes, AppState};
    use crate::assistant::CannedResponseProvider;
    use crate::config::DeviceConfig;
    use crate::device::{DeviceClient, DeviceSyncer, SyncOptions};
    use crate::hub::{self, HubState};
    use crate::notify::ToastNotifier;

    async fn app_state(door: &str) -> AppState {
        let hub_state = HubState::default();
        hub_state.report("E1", "Door", door).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, hub::routes("php").with_state(hub_state)).await.unwrap();
        });

        let config = DeviceConfig {
            base_url: format!("http://{}/api", addr),
            ..DeviceConfig::default()
        };
        let sync = DeviceSyncer::spawn(
            Arc::new(DeviceClient::new(&config).unwrap()),
            SyncOptions {
                device_id: "E1".to_string(),
                poll_interval: Duration::from_millis(50),
                follow_up_delay: Duration::from_millis(10),
                night_mode: false,
            },
        );
        let notifier = Arc::new(ToastNotifier::new(10));
        tokio::spawn(notifier.clone().start(sync.subscribe()));

        let mut rx = sync.watch();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.is_fallback))
            .await
            .unwrap()
            .unwrap();

        AppState {
            sync,
            notifier,
            assistant: Arc::new(CannedResponseProvider::new()),
        }
    }

    async fn call(state: AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = routes().with_state(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn night_mode(enabled: bool) -> Request<Body> {
        Request::post("/api/security/night_mode")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "enabled": enabled }).to_string()))
            .unwrap()
    }

    async fn wait_for_night_mode(state: &AppState, enabled: bool) {
        let mut rx = state.sync.watch();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.night_mode == enabled))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_door_at_night_raises_alert() {
        let state = app_state("OPEN").await;

        let (_, body) = call(state.clone(), Request::get("/api/security").body(Body::empty()).unwrap()).await;
        assert_eq!(body["night_mode"], false);
        assert!(body["alert"].is_null());

        let (status, body) = call(state.clone(), night_mode(true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["night_mode"], true);
        wait_for_night_mode(&state, true).await;

        let (_, body) = call(state.clone(), Request::get("/api/security").body(Body::empty()).unwrap()).await;
        assert_eq!(body["alert"]["sensor"], "Door");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_, body) = call(state.clone(), Request::get("/api/notifications").body(Body::empty()).unwrap()).await;
        assert!(body
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t["title"] == "SECURITY ALERT!"));

        call(state.clone(), night_mode(false)).await;
        wait_for_night_mode(&state, false).await;
        let (_, body) = call(state.clone(), Request::get("/api/security").body(Body::empty()).unwrap()).await;
        assert!(body["alert"].is_null());

        state.sync.stop();
    }

    #[tokio::test]
    async fn test_closed_door_at_night_is_quiet() {
        let state = app_state("CLOSED").await;

        call(state.clone(), night_mode(true)).await;
        wait_for_night_mode(&state, true).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let (_, body) = call(state.clone(), Request::get("/api/security").body(Body::empty()).unwrap()).await;
        assert_eq!(body["night_mode"], true);
        assert!(body["alert"].is_null());

        state.sync.stop();
    }
}
