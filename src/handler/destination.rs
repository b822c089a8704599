use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Deserialize;

use crate::config;
use crate::ffmpeg::command::Destination;
use crate::handler::ApiJsonResult;

pub fn destination_router() -> Router {
    Router::new()
        .route("/list", get(list_destinations))
        .route("/save", post(save_destinations))
}

async fn list_destinations() -> ApiJsonResult<Vec<Destination>> {
    let destinations = config::load_destinations(config::config().destinations_path())?;
    Ok(Json(destinations))
}

#[derive(Deserialize)]
struct SaveRequest {
    destinations: Vec<Destination>,
}

async fn save_destinations(Json(body): Json<SaveRequest>) -> ApiJsonResult<String> {
    config::save_destinations(config::config().destinations_path(), &body.destinations)?;
    log::info!("Destination: saved {} destination(s)", body.destinations.len());
    Ok(Json("success".to_string()))
}
