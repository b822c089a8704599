use axum::{Json, Router, routing::get};

use crate::config;
use crate::ffmpeg::device::{self, DeviceList};
use crate::ffmpeg::locate_binary;

pub fn device_router() -> Router {
    Router::new().route("/list", get(list_devices))
}

/// Capture device names. A missing binary or a failed listing comes back as
/// empty lists, never an error.
async fn list_devices() -> Json<DeviceList> {
    match locate_binary(config::config().ffmpeg_path()).await {
        Ok(binary) => Json(device::list_devices(&binary).await),
        Err(e) => {
            log::warn!("Device: listing unavailable: {}", e);
            Json(DeviceList::default())
        }
    }
}
