// src/backend_client.rs
// Client for the chapter-generation backend: job submission and the
// processed-jobs query. Transcription and chapter synthesis happen
// entirely server-side; results come back over the live connection.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::youtube_client::Video;

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

// ============================================================================
// Request / Response Structures
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creativity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmentation_threshold: Option<String>,
    pub update_video_description: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub youtube_url: String,
    pub generation_config: GenerationConfig,
    pub access_token: String,
    pub video_details: Video,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmitResponse {
    pub fn accepted(&self) -> bool {
        self.status.as_deref() == Some("accepted") && self.job_id.is_some()
    }
}

/// One row of the processed-jobs listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedVideo {
    pub id: i64,
    pub video_id: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
}

// ============================================================================
// Client Implementation
// ============================================================================

impl BackendClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Submit a generation request. The backend answers 202-style
    /// "accepted" for queued work, so any 2xx plus 202 counts as success;
    /// a failure body's `message` is surfaced when present.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<SubmitResponse, AppError> {
        let url = format!("{}/process-youtube-url/", self.base_url);

        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body: Option<SubmitResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() && status != reqwest::StatusCode::ACCEPTED {
            let message = body
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(AppError::Api(message));
        }

        body.ok_or_else(|| AppError::Api("Malformed backend response".to_string()))
    }

    /// Fetch the user's processed jobs, most recent first. No jobs is an
    /// empty list, not an error.
    pub async fn jobs_by_user(&self, email: &str) -> Result<Vec<ProcessedVideo>, AppError> {
        let url = format!(
            "{}/api/db/jobs/by-user/{}",
            self.base_url,
            urlencoding::encode(email)
        );

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Api("Failed to fetch processed videos".to_string()));
        }

        let videos = response
            .json()
            .await
            .map_err(|e| AppError::Api(format!("Malformed jobs response: {}", e)))?;
        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_requires_status_and_job_id() {
        let ok: SubmitResponse =
            serde_json::from_str(r#"{"status":"accepted","job_id":"J1","video_id":"V1"}"#).unwrap();
        assert!(ok.accepted());

        let no_job: SubmitResponse = serde_json::from_str(r#"{"status":"accepted"}"#).unwrap();
        assert!(!no_job.accepted());

        let failure: SubmitResponse =
            serde_json::from_str(r#"{"status":"failure","message":"quota exceeded"}"#).unwrap();
        assert!(!failure.accepted());
        assert_eq!(failure.message.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn test_generation_config_skips_absent_preferences() {
        let manual = GenerationConfig {
            creativity: None,
            segmentation_threshold: None,
            update_video_description: false,
        };
        let value = serde_json::to_value(&manual).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"update_video_description": false})
        );

        let latest = GenerationConfig {
            creativity: Some("Neutral".into()),
            segmentation_threshold: Some("Default".into()),
            update_video_description: true,
        };
        let value = serde_json::to_value(&latest).unwrap();
        assert_eq!(value["creativity"], "Neutral");
        assert_eq!(value["segmentation_threshold"], "Default");
    }

    #[test]
    fn test_base_url_trailing_slash_is_normalized() {
        let client = BackendClient::new("https://chapgen.app/".to_string());
        assert_eq!(client.base_url, "https://chapgen.app");
    }
}
