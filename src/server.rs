use crate::{classifier::Classifier, config::Config, config::LimitsConfig, routes::api_routes, telemetry::Metrics};
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use serde_json::json;
use std::{any::Any, sync::Arc};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};

#[derive(Clone)]
pub struct SharedState {
    pub classifier: Arc<Classifier>,
    pub limits: LimitsConfig,
    pub metrics: Arc<Metrics>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(classifier: Arc<Classifier>, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics = Arc::new(Metrics::new());
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState {
            classifier,
            limits: config.limits.clone(),
            metrics,
        };

        // The body limit sits above the upload ceiling so oversized uploads
        // reach the handler's own size check and get a 400, not a bare 413.
        let router = Router::new()
            .merge(api_routes())
            .layer(DefaultBodyLimit::max(
                config.limits.max_upload_bytes.saturating_mul(2),
            ))
            .with_state(app_state)
            .layer(metrics_layer)
            .layer(CorsLayer::permissive())
            .layer(CatchPanicLayer::custom(handle_panic));

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", &self.listener.local_addr().unwrap());

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Unhandled panic in request handler: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}
