use crate::classifier::Classifier;
use crate::config::Config;
use crate::ort_classifier::OrtClassifier;
use crate::server::HttpServer;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model = match OrtClassifier::new(&config.model, config.inference.max_workers) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            tracing::error!("Failed to initialize model: {:?}", e);
            return Err(e);
        }
    };

    let classifier = match Classifier::new(model, &config.model, &config.inference) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            tracing::error!("Refusing to start: {}", e);
            return Err(Box::new(e));
        }
    };

    let server = HttpServer::new(classifier, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
