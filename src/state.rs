//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the loaded config, one pooled HTTP client shared by every
//! backend adapter, and the workspace behind an async `RwLock`. Handlers
//! copy what they need out of the workspace and release the lock before
//! calling a backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::backends::BackendError;
use crate::config::{AppConfig, BackendTimeouts};
use crate::model::{AppSettings, Project};
use crate::services::store::{Action, Workspace};

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub workspace: Arc<RwLock<Workspace>>,
}

impl AppState {
    /// Build state around an already-loaded workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: AppConfig, workspace: Workspace) -> Result<Self, BackendError> {
        let http = build_http_client(config.timeouts)?;
        Ok(Self { config: Arc::new(config), http, workspace: Arc::new(RwLock::new(workspace)) })
    }

    pub async fn dispatch(&self, action: Action) {
        self.workspace.write().await.apply(action);
    }

    pub async fn settings(&self) -> AppSettings {
        self.workspace.read().await.settings.clone()
    }

    pub async fn current_project(&self) -> Option<Project> {
        self.workspace.read().await.current_project.clone()
    }
}

/// Pooled client with the configured request and connect timeouts.
///
/// # Errors
///
/// Returns an error if the TLS backend fails to initialize.
pub fn build_http_client(timeouts: BackendTimeouts) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeouts.request_secs))
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .build()
        .map_err(|e| BackendError::HttpClientBuild(e.to_string()))
}
