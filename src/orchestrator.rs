// src/orchestrator.rs
//! Generation request orchestrators. Both flows resolve video metadata
//! through the YouTube API, submit the generation request, and hand the
//! accepted job to the tracker. The loading indicator is job-driven:
//! it clears on a submission failure, but a successful submission leaves
//! it set until the router processes the completion.

use std::sync::Arc;

use crate::backend_client::{GenerationConfig, GenerationRequest};
use crate::connection::status_message;
use crate::error::AppError;
use crate::jobs::ProcessingMode;
use crate::state::AppState;
use crate::youtube_client::extract_video_id;

/// Kick off generation for the signed-in user's most recent upload, with
/// automatic description write-back. Failures surface as one user-facing
/// error string; nothing is retried automatically.
pub async fn run_latest(state: &Arc<AppState>) {
    if let Err(e) = submit_latest(state).await {
        state.record_error(format!("An error occurred: {}", e));
        state.set_loading(false);
    }
}

/// Kick off generation for a user-supplied video URL. Results are
/// displayed locally; the video description is left untouched.
pub async fn run_manual(state: &Arc<AppState>, url: &str) {
    if let Err(e) = submit_manual(state, url).await {
        state.record_error(format!("An error occurred: {}", e));
        state.set_loading(false);
    }
}

async fn submit_latest(state: &Arc<AppState>) -> Result<(), AppError> {
    let token = state
        .session
        .access_token()
        .ok_or_else(|| AppError::Auth("User not logged in".to_string()))?;

    state.set_loading(true);
    state.clear_error();

    let settings = state.current_settings();

    let playlist_id = state.youtube.my_uploads_playlist(&token).await?;
    let video_id = state.youtube.latest_upload(&token, &playlist_id).await?;
    let video = state.youtube.get_video(&token, &video_id).await?;

    let request = GenerationRequest {
        youtube_url: format!("https://www.youtube.com/watch?v={}", video.id),
        generation_config: GenerationConfig {
            creativity: Some(settings.creativity_label().to_string()),
            segmentation_threshold: Some(settings.threshold_label().to_string()),
            update_video_description: true,
        },
        access_token: token,
        video_details: video.clone(),
    };

    let response = state.backend.submit(&request).await?;
    let accepted = response.accepted();
    let job_id = match response.job_id {
        Some(id) if accepted => id,
        _ => {
            return Err(AppError::Api(
                response
                    .message
                    .unwrap_or_else(|| "Failed to queue job".to_string()),
            ))
        }
    };

    let video_id = response.video_id.or(Some(video.id));
    let job = state
        .jobs
        .start_job(job_id, video_id, ProcessingMode::Latest);
    report_queued(state, &job.video_id);
    Ok(())
}

async fn submit_manual(state: &Arc<AppState>, url: &str) -> Result<(), AppError> {
    let token = state
        .session
        .access_token()
        .ok_or_else(|| AppError::Auth("User not logged in".to_string()))?;

    if url.trim().is_empty() {
        return Err(AppError::Api(
            "Please enter a YouTube video URL.".to_string(),
        ));
    }
    // reject unparseable input before any network call
    let video_id = extract_video_id(url).ok_or_else(|| {
        AppError::Api("Could not extract a valid Video ID from the URL.".to_string())
    })?;

    state.set_loading(true);
    state.clear_error();

    let video = state.youtube.get_video(&token, &video_id).await?;

    let request = GenerationRequest {
        youtube_url: url.to_string(),
        generation_config: GenerationConfig {
            creativity: None,
            segmentation_threshold: None,
            update_video_description: false,
        },
        access_token: token,
        video_details: video,
    };

    let response = state.backend.submit(&request).await?;
    let accepted = response.accepted();
    let job_id = match response.job_id {
        Some(id) if accepted => id,
        _ => {
            return Err(AppError::Api(
                response
                    .message
                    .unwrap_or_else(|| "Failed to queue job".to_string()),
            ))
        }
    };

    let video_id = response.video_id.or(Some(video_id));
    let job = state
        .jobs
        .start_job(job_id, video_id, ProcessingMode::Manual);
    report_queued(state, &job.video_id);
    Ok(())
}

/// Best-effort client-side status echo over the live connection; queued
/// for the next open if the socket happens to be down.
fn report_queued(state: &Arc<AppState>, video_id: &Option<String>) {
    if let Some(video_id) = video_id {
        state.connection.send(status_message(video_id, "queued"));
    }
}
