use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
pub struct Health {
    status: String,
    num_classes: usize,
    classes: Vec<String>,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    let classes = state.classifier.labels().to_vec();
    Json(Health {
        status: "ok".into(),
        num_classes: classes.len(),
        classes,
    })
}

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Real-time image prediction API is running." }))
}

#[cfg(test)]
mod tests {
    use crate::server::test_support::test_router;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_label_metadata() {
        let router = test_router(vec![0.0; 4]);
        let request = Request::get("/health").body(Body::empty()).unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["num_classes"], 4);
        assert_eq!(json["classes"][0], "a");
    }

    #[tokio::test]
    async fn root_serves_a_liveness_banner() {
        let router = test_router(vec![0.0; 4]);
        let request = Request::get("/").body(Body::empty()).unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
