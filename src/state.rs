// src/state.rs
// Shared application state: every component and the UI-visible slots,
// constructed once at startup and handed around behind an Arc.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;

use crate::backend_client::{BackendClient, ProcessedVideo};
use crate::config::AppConfig;
use crate::connection::LiveConnection;
use crate::error::AppError;
use crate::jobs::JobTracker;
use crate::session::SessionStore;
use crate::settings::Settings;
use crate::storage::{ClientStorage, KEY_LAST_PATH};
use crate::youtube_client::YouTubeClient;

pub struct AppState {
    pub config: AppConfig,
    pub storage: ClientStorage,
    pub http: reqwest::Client,
    pub session: SessionStore,
    pub jobs: JobTracker,
    pub connection: LiveConnection,
    pub youtube: YouTubeClient,
    pub backend: BackendClient,
    pub settings: Mutex<Settings>,
    /// The "generated chapters" slot the manual flow publishes into.
    chapters_tx: watch::Sender<String>,
    /// Most recent processed-videos listing from the backend.
    processed: RwLock<Vec<ProcessedVideo>>,
    /// One user-facing error string at a time, most recent wins.
    last_error: Mutex<Option<String>>,
    /// Job-driven busy indicator: set when a flow starts, cleared on
    /// submission failure or when the router finishes the job.
    loading: AtomicBool,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Arc<Self>, AppError> {
        let storage = ClientStorage::open(config.state_dir.clone())?;
        let session = SessionStore::load(storage.clone());
        let jobs = JobTracker::load(storage.clone());
        let connection = LiveConnection::new(config.ws_url.clone(), config.ws_query_auth);
        let settings = Settings::load(&storage);
        let backend = BackendClient::new(config.backend_url.clone());
        let (chapters_tx, _) = watch::channel(String::new());

        Ok(Arc::new(Self {
            config,
            storage,
            http: reqwest::Client::new(),
            session,
            jobs,
            connection,
            youtube: YouTubeClient::new(),
            backend,
            settings: Mutex::new(settings),
            chapters_tx,
            processed: RwLock::new(Vec::new()),
            last_error: Mutex::new(None),
            loading: AtomicBool::new(false),
        }))
    }

    // ------------------------------------------------------------------
    // UI-visible slots
    // ------------------------------------------------------------------

    pub fn record_error(&self, message: String) {
        tracing::error!("{}", message);
        *self.last_error.lock().unwrap() = Some(message);
    }

    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap() = None;
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn publish_chapters(&self, block: String) {
        self.chapters_tx.send_replace(block);
    }

    pub fn generated_chapters(&self) -> String {
        self.chapters_tx.borrow().clone()
    }

    pub fn subscribe_chapters(&self) -> watch::Receiver<String> {
        self.chapters_tx.subscribe()
    }

    pub fn processed_videos(&self) -> Vec<ProcessedVideo> {
        self.processed.read().unwrap().clone()
    }

    /// Re-query the backend's processed listing for the given user.
    pub async fn refresh_processed(&self, email: &str) -> Result<(), AppError> {
        let videos = self.backend.jobs_by_user(email).await?;
        tracing::debug!("Processed listing refreshed: {} videos", videos.len());
        *self.processed.write().unwrap() = videos;
        Ok(())
    }

    pub fn update_settings(&self, settings: Settings) {
        settings.save(&self.storage);
        *self.settings.lock().unwrap() = settings;
    }

    pub fn current_settings(&self) -> Settings {
        *self.settings.lock().unwrap()
    }

    /// Remember the last visited view so the next start can restore it.
    pub fn save_last_path(&self, path: &str) {
        if let Err(e) = self.storage.write(KEY_LAST_PATH, &path.to_string()) {
            tracing::warn!("Failed to persist last path: {}", e);
        }
    }

    pub fn last_path(&self) -> Option<String> {
        self.storage.read(KEY_LAST_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            backend_url: "https://backend.test".into(),
            ws_url: "wss://backend.test/ws/".into(),
            ws_query_auth: false,
            state_dir: Some(dir.path().to_path_buf()),
        };
        let state = AppState::new(config).unwrap();
        (dir, state)
    }

    #[test]
    fn test_error_slot_latest_wins() {
        let (_dir, state) = test_state();
        assert_eq!(state.last_error(), None);
        state.record_error("first".into());
        state.record_error("second".into());
        assert_eq!(state.last_error().as_deref(), Some("second"));
        state.clear_error();
        assert_eq!(state.last_error(), None);
    }

    #[test]
    fn test_chapters_slot_observable() {
        let (_dir, state) = test_state();
        let mut rx = state.subscribe_chapters();
        rx.borrow_and_update();
        state.publish_chapters("00:00 Intro".into());
        assert!(rx.has_changed().unwrap());
        assert_eq!(state.generated_chapters(), "00:00 Intro");
    }

    #[test]
    fn test_last_path_roundtrip() {
        let (_dir, state) = test_state();
        assert_eq!(state.last_path(), None);
        state.save_last_path("/manual");
        assert_eq!(state.last_path().as_deref(), Some("/manual"));
    }
}
