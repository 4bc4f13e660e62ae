// src/router.rs
//! Message router: the single place an inbound push message is interpreted,
//! matched against the tracked job, and dispatched. Latest-mode completions
//! write the description back through the YouTube API; manual-mode
//! completions publish a formatted chapter block locally.

use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Chapter, PushMessage};
use crate::error::AppError;
use crate::jobs::{Job, JobStatus, ProcessingMode};
use crate::state::AppState;

/// Delay before refreshing the processed-videos list after a completion,
/// giving the backend's own record time to converge.
pub const REFRESH_DELAY: Duration = Duration::from_millis(1500);

// ============================================================================
// Formatting
// ============================================================================

/// `MM:SS`, both fields zero-padded, minutes never rolling over into hours:
/// a 90-minute offset renders as `90:00`, not `1:30:00`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// One `MM:SS title` line per chapter, newline-joined. Shared by the
/// description write-back and the local display path.
pub fn format_chapter_block(chapters: &[Chapter]) -> String {
    chapters
        .iter()
        .map(|ch| format!("{} {}", format_timestamp(ch.start_time), ch.title))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Correlation
// ============================================================================

/// Match an inbound `chapters_ready` message against the tracked job.
///
/// Precedence: an explicit job id must match exactly (and a mismatch is
/// final — no weaker rule rescues it); with no job id on the message, a
/// matching video id correlates; failing that, a tracked manual job claims
/// any id-less message. The manual fallback is only sound because at most
/// one job is ever tracked — tighten it before introducing multi-job
/// tracking.
pub fn correlate(job: &Job, message: &PushMessage) -> bool {
    if let Some(incoming) = message.job_id() {
        return incoming == job.job_id;
    }
    if let (Some(incoming), Some(tracked)) = (message.video_id(), job.video_id.as_deref()) {
        if incoming == tracked {
            return true;
        }
    }
    job.mode == ProcessingMode::Manual
}

// ============================================================================
// Router
// ============================================================================

pub struct MessageRouter {
    state: Arc<AppState>,
}

impl MessageRouter {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Consume the connection subscription until the connection shuts
    /// down. Each message is handled inside its own error boundary so one
    /// bad message cannot wedge the router for the ones behind it.
    pub async fn run(self) {
        let (id, mut rx) = self.state.connection.subscribe();
        tracing::info!("Message router started");
        while let Some(message) = rx.recv().await {
            if let Err(e) = self.handle(message).await {
                tracing::warn!("Router failed to handle message: {}", e);
            }
        }
        self.state.connection.unsubscribe(id);
        tracing::info!("Message router stopped");
    }

    pub async fn handle(&self, message: PushMessage) -> Result<(), AppError> {
        match message.kind.as_str() {
            "chapters_ready" => self.on_chapters_ready(message).await,
            "status_update" => {
                self.on_status_update(&message);
                Ok(())
            }
            "ping" | "pong" => Ok(()),
            other => {
                tracing::debug!("Ignoring push message type '{}'", other);
                Ok(())
            }
        }
    }

    async fn on_chapters_ready(&self, message: PushMessage) -> Result<(), AppError> {
        let Some(chapters) = message.data.as_ref().and_then(|d| d.chapters.clone()) else {
            tracing::warn!("chapters_ready message without chapters, discarding");
            return Ok(());
        };

        let Some(job) = self.state.jobs.current() else {
            // nothing tracked; clear defensively in case a stale record
            // lingers in storage
            self.state.jobs.clear_job();
            return Ok(());
        };

        if !correlate(&job, &message) {
            tracing::debug!(
                "Discarding chapters for a job this client is not tracking (tracked {})",
                job.job_id
            );
            return Ok(());
        }

        match job.mode {
            ProcessingMode::Latest => self.complete_latest(&job, &message, &chapters).await,
            ProcessingMode::Manual => self.complete_manual(&job, &chapters),
        }
        Ok(())
    }

    /// Latest flow: write the chapters into the video description. Failure
    /// is recorded for the user but never blocks cleanup — the refresh is
    /// scheduled and the job cleared in all cases.
    async fn complete_latest(&self, job: &Job, message: &PushMessage, chapters: &[Chapter]) {
        let video_id = message
            .video_id()
            .map(str::to_string)
            .or_else(|| job.video_id.clone());

        let result = match video_id {
            Some(video_id) => self.update_description(&video_id, chapters).await,
            None => Err(AppError::Api(
                "Completion carried no video id to update".to_string(),
            )),
        };

        if let Err(e) = result {
            if e.is_auth() {
                self.state.session.sign_out();
            }
            self.state
                .record_error(format!("Failed to update video description: {}", e));
        } else {
            tracing::info!("✅ Chapters written for job {}", job.job_id);
        }

        self.schedule_processed_refresh();
        self.state.jobs.clear_job();
        self.state.set_loading(false);
    }

    /// Manual flow: no write-back, just publish the formatted block.
    fn complete_manual(&self, job: &Job, chapters: &[Chapter]) {
        let block = format_chapter_block(chapters);
        self.state.publish_chapters(block);
        self.state.jobs.update_status(&job.job_id, JobStatus::Completed);
        self.state.jobs.clear_job();
        self.state.set_loading(false);
        tracing::info!("✅ Chapters ready for job {} (manual)", job.job_id);
    }

    async fn update_description(
        &self,
        video_id: &str,
        chapters: &[Chapter],
    ) -> Result<(), AppError> {
        // Read the token at the moment of use, never from a snapshot
        // captured when the job started.
        let token = self
            .state
            .session
            .access_token()
            .ok_or_else(|| AppError::Auth("Not signed in".to_string()))?;
        let video = self.state.youtube.get_video(&token, video_id).await?;
        let block = format_chapter_block(chapters);
        self.state
            .youtube
            .append_chapters_to_description(&token, &video, &block)
            .await
    }

    fn on_status_update(&self, message: &PushMessage) {
        let Some(job_id) = message.job_id() else {
            return;
        };
        let Some(status) = message.status().and_then(JobStatus::parse) else {
            tracing::debug!("status_update with unknown status, ignoring");
            return;
        };

        let applied = self.state.jobs.update_status(job_id, status);
        if status.is_terminal() {
            if applied {
                self.state.set_loading(false);
            }
            self.schedule_processed_refresh();
        }
    }

    /// Fire-and-forget delayed refresh; the profile is read when the timer
    /// fires, so a sign-out in the meantime turns it into a no-op.
    fn schedule_processed_refresh(&self) {
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REFRESH_DELAY).await;
            let Some(profile) = state.session.session().profile else {
                return;
            };
            if let Err(e) = state.refresh_processed(&profile.email).await {
                tracing::warn!("Failed to refresh processed videos: {}", e);
            }
        });
    }
}
