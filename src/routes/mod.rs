mod health;
mod metrics;
mod predict_image;
mod ws_predict;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::healthcheck))
        .route("/predict-image", post(predict_image::predict_image))
        .route("/ws/predict", get(ws_predict::ws_predict))
        .route("/metrics", get(metrics::metrics_handler))
}
