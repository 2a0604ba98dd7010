mod backends;
mod config;
mod error;
mod model;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::persistence::{self, FlushTracker};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env();
    let port = config.port;
    let workspace = persistence::load_workspace(&config.data_path);
    tracing::info!(
        path = %config.data_path.display(),
        projects = workspace.projects.len(),
        images = workspace.generated_images.len(),
        "workspace loaded"
    );

    let state = state::AppState::new(config, workspace).expect("http client init failed");

    // Spawn background persistence task.
    let tracker = Arc::new(FlushTracker::new());
    let persistence_task = persistence::spawn_persistence_task(state.clone(), tracker.clone());

    let app = routes::app(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "atelier listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    match persistence::shutdown(&state, &tracker, persistence_task).await {
        Ok(true) => tracing::info!("workspace flushed on shutdown"),
        Ok(false) => {}
        Err(e) => tracing::error!(error = %e, "final workspace flush failed"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
