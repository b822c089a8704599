use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::config;
use crate::ffmpeg::StartError;
use crate::ffmpeg::command::{Destination, StreamRequest};
use crate::ffmpeg::supervisor::supervisor;
use crate::ffmpeg::{device, locate_binary};

pub fn session_router() -> Router {
    Router::new()
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
        .route("/status", get(session_status))
}

/// All fields optional: missing devices fall back to the first enumerated
/// device (or a placeholder when enumeration yields nothing), missing
/// destinations fall back to the persisted list.
#[derive(Deserialize, Default)]
struct StartSessionRequest {
    video_device: Option<String>,
    audio_device: Option<String>,
    destinations: Option<Vec<Destination>>,
}

async fn start_session(body: Option<Json<StartSessionRequest>>) -> Response {
    let Json(body) = body.unwrap_or_default();
    let request = match resolve_request(body).await {
        Ok(request) => request,
        Err(e) => return start_error_response(e),
    };

    match supervisor().start(request).await {
        Ok(handle) => Json(json!({
            "status": supervisor().status(),
            "session": handle,
        }))
        .into_response(),
        Err(e) => start_error_response(e),
    }
}

async fn resolve_request(body: StartSessionRequest) -> Result<StreamRequest, StartError> {
    let destinations = match body.destinations {
        Some(destinations) => destinations,
        None => config::load_destinations(config::config().destinations_path())
            .map_err(|e| StartError::InvalidRequest(format!("destination store: {:#}", e)))?,
    };

    let (video_device, audio_device) = match (body.video_device, body.audio_device) {
        (Some(v), Some(a)) => (v, a),
        (v, a) => {
            let listed = default_devices().await;
            (
                v.unwrap_or_else(|| listed.0.clone()),
                a.unwrap_or_else(|| listed.1.clone()),
            )
        }
    };

    Ok(StreamRequest {
        video_device,
        audio_device,
        destinations,
    })
}

/// First enumerated device of each kind; placeholder names when enumeration
/// fails or comes back empty so the start request still has something to
/// reject or accept on its own merits.
async fn default_devices() -> (String, String) {
    let list = match locate_binary(config::config().ffmpeg_path()).await {
        Ok(binary) => device::list_devices(&binary).await,
        Err(e) => {
            log::warn!("Session: device enumeration unavailable: {}", e);
            device::DeviceList::default()
        }
    };
    (
        list.video
            .into_iter()
            .next()
            .unwrap_or_else(|| "default".to_string()),
        list.audio
            .into_iter()
            .next()
            .unwrap_or_else(|| "default".to_string()),
    )
}

fn start_error_response(err: StartError) -> Response {
    let code = match err {
        StartError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        StartError::AlreadyRunning => StatusCode::CONFLICT,
        StartError::MissingBinary(_) => StatusCode::SERVICE_UNAVAILABLE,
        StartError::StartupFailed(_) => StatusCode::BAD_GATEWAY,
    };
    (
        code,
        Json(json!({
            "error": err.to_string(),
            "status": supervisor().status(),
        })),
    )
        .into_response()
}

async fn stop_session() -> Response {
    supervisor().stop().await;
    Json(json!({ "status": supervisor().status() })).into_response()
}

async fn session_status() -> Response {
    Json(json!({
        "status": supervisor().status(),
        "running": supervisor().is_running().await,
        "session": supervisor().current_session().await,
    }))
    .into_response()
}
