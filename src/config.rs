//! Service configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_DATA_PATH: &str = "atelier-data.json";
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;
pub const DEFAULT_BACKEND_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_BACKEND_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_COMFYUI_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_COMFYUI_MAX_POLLS: u32 = 600;
pub const DEFAULT_HF_API_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_DRIVE_API_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_DRIVE_UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload/drive/v3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            request_secs: DEFAULT_BACKEND_REQUEST_TIMEOUT_SECS,
            connect_secs: DEFAULT_BACKEND_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// JSON file holding the persisted workspace snapshot.
    pub data_path: PathBuf,
    pub flush_interval_ms: u64,
    pub timeouts: BackendTimeouts,
    /// ComfyUI history polling cadence; interval times count bounds a pose run.
    pub comfyui_poll_interval_ms: u64,
    pub comfyui_max_polls: u32,
    pub hf_api_base_url: String,
    pub drive_api_base_url: String,
    pub drive_upload_base_url: String,
}

impl AppConfig {
    /// Build typed config from the process environment.
    ///
    /// All keys are optional:
    /// - `PORT`: default 3001
    /// - `ATELIER_DATA_PATH`: default `atelier-data.json`
    /// - `ATELIER_FLUSH_INTERVAL_MS`: default 500
    /// - `BACKEND_REQUEST_TIMEOUT_SECS`: default 300
    /// - `BACKEND_CONNECT_TIMEOUT_SECS`: default 10
    /// - `COMFYUI_POLL_INTERVAL_MS`: default 500
    /// - `COMFYUI_MAX_POLLS`: default 600
    /// - `HF_API_BASE_URL`, `DRIVE_API_BASE_URL`, `DRIVE_UPLOAD_BASE_URL`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Unparseable numbers fall
    /// back to their defaults; URLs lose any trailing slash.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str, default: u64| lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default);
        let url = |key: &str, default: &str| {
            lookup(key)
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };

        Self {
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            data_path: lookup("ATELIER_DATA_PATH").map_or_else(|| PathBuf::from(DEFAULT_DATA_PATH), PathBuf::from),
            flush_interval_ms: parse_u64("ATELIER_FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS),
            timeouts: BackendTimeouts {
                request_secs: parse_u64("BACKEND_REQUEST_TIMEOUT_SECS", DEFAULT_BACKEND_REQUEST_TIMEOUT_SECS),
                connect_secs: parse_u64("BACKEND_CONNECT_TIMEOUT_SECS", DEFAULT_BACKEND_CONNECT_TIMEOUT_SECS),
            },
            comfyui_poll_interval_ms: parse_u64("COMFYUI_POLL_INTERVAL_MS", DEFAULT_COMFYUI_POLL_INTERVAL_MS),
            comfyui_max_polls: lookup("COMFYUI_MAX_POLLS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_COMFYUI_MAX_POLLS),
            hf_api_base_url: url("HF_API_BASE_URL", DEFAULT_HF_API_BASE_URL),
            drive_api_base_url: url("DRIVE_API_BASE_URL", DEFAULT_DRIVE_API_BASE_URL),
            drive_upload_base_url: url("DRIVE_UPLOAD_BASE_URL", DEFAULT_DRIVE_UPLOAD_BASE_URL),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
