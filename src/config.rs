// src/config.rs
use std::path::PathBuf;

/// Runtime configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the chapter-generation backend.
    pub backend_url: String,
    /// WebSocket endpoint for push messages.
    pub ws_url: String,
    /// When true, the access token is carried in the WebSocket handshake
    /// query string instead of an auth message after connect.
    pub ws_query_auth: bool,
    /// Override for the durable state directory.
    pub state_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let backend_url = std::env::var("CHAPGEN_BACKEND_URL")
            .unwrap_or_else(|_| "https://chapgen.app".to_string());
        let ws_url = std::env::var("CHAPGEN_WS_URL")
            .unwrap_or_else(|_| "wss://chapgen.app/ws/".to_string());
        let ws_query_auth = std::env::var("CHAPGEN_WS_QUERY_AUTH")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let state_dir = std::env::var("CHAPGEN_STATE_DIR").ok().map(PathBuf::from);

        Self {
            backend_url,
            ws_url,
            ws_query_auth,
            state_dir,
        }
    }
}
