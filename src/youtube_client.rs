// src/youtube_client.rs
// YouTube Data API v3 client: uploads-playlist resolution, video metadata,
// and the chapters write-back into the video description.
// Docs: https://developers.google.com/youtube/v3

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::OnceLock;

use crate::error::AppError;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Separator between the existing description and the appended chapter
/// block. Kept byte-for-byte stable so repeated runs are recognizable.
pub const CHAPTERS_HEADER: &str = "\n\n\nChapters:\n";

#[derive(Debug, Clone)]
pub struct YouTubeClient {
    client: Client,
}

// ============================================================================
// Video Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub snippet: VideoSnippet,
}

/// A video snippet. Only the fields the client reads are typed; everything
/// else round-trips through `rest` because the description update must PUT
/// the snippet back whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnails: Option<serde_json::Value>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    #[serde(rename = "contentDetails")]
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemListResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(rename = "contentDetails")]
    content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

// ============================================================================
// Client Implementation
// ============================================================================

impl YouTubeClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Resolve the signed-in user's uploads playlist id.
    pub async fn my_uploads_playlist(&self, access_token: &str) -> Result<String, AppError> {
        let url = format!("{}/channels", API_BASE);

        let response = self
            .client
            .get(&url)
            .query(&[("part", "contentDetails"), ("mine", "true")])
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let body: ChannelListResponse = check_json(response).await?;
        body.items
            .into_iter()
            .next()
            .map(|item| item.content_details.related_playlists.uploads)
            .ok_or_else(|| AppError::Api("Could not find YouTube channel.".to_string()))
    }

    /// Resolve the most recent upload in a playlist.
    pub async fn latest_upload(
        &self,
        access_token: &str,
        playlist_id: &str,
    ) -> Result<String, AppError> {
        let url = format!("{}/playlistItems", API_BASE);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "contentDetails"),
                ("playlistId", playlist_id),
                ("maxResults", "1"),
            ])
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let body: PlaylistItemListResponse = check_json(response).await?;
        body.items
            .into_iter()
            .next()
            .map(|item| item.content_details.video_id)
            .ok_or_else(|| AppError::Api("Could not find latest video.".to_string()))
    }

    /// Fetch a video's full snippet.
    pub async fn get_video(&self, access_token: &str, video_id: &str) -> Result<Video, AppError> {
        let url = format!("{}/videos", API_BASE);

        let response = self
            .client
            .get(&url)
            .query(&[("part", "snippet"), ("id", video_id)])
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let body: VideoListResponse = check_json(response).await?;
        body.items.into_iter().next().ok_or_else(|| {
            AppError::Api("Could not fetch details for the requested video.".to_string())
        })
    }

    /// Append a formatted chapter block to the video description and PUT
    /// the snippet back. The caller supplies the already-formatted block.
    ///
    /// Required scope: https://www.googleapis.com/auth/youtube
    pub async fn append_chapters_to_description(
        &self,
        access_token: &str,
        video: &Video,
        chapter_block: &str,
    ) -> Result<(), AppError> {
        let url = format!("{}/videos", API_BASE);

        tracing::info!("📝 Writing chapters into description of video {}", video.id);

        let mut snippet = video.snippet.clone();
        snippet.description = format!(
            "{}{}{}",
            video.snippet.description, CHAPTERS_HEADER, chapter_block
        );

        let body = json!({
            "id": video.id,
            "snippet": snippet,
        });

        let response = self
            .client
            .put(&url)
            .query(&[("part", "snippet")])
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = api_error_message(&error_text)
                .unwrap_or_else(|| format!("YouTube update failed ({})", status));
            tracing::error!("❌ Failed to update video {}: {}", video.id, message);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(AppError::Auth(message));
            }
            return Err(AppError::Api(message));
        }

        tracing::info!("✅ Description updated for video {}", video.id);
        Ok(())
    }
}

impl Default for YouTubeClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared non-success handling: surface the Google error body's message
/// when it has one, map 401 to an auth failure.
async fn check_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        let message =
            api_error_message(&text).unwrap_or_else(|| format!("YouTube API error ({})", status));
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AppError::Auth(message));
        }
        return Err(AppError::Api(message));
    }
    serde_json::from_str(&text)
        .map_err(|e| AppError::Api(format!("Malformed YouTube API response: {}", e)))
}

fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

// ============================================================================
// URL Parsing
// ============================================================================

/// Extract a video id from a user-supplied URL. Only the canonical query
/// form (`watch?v=...`) and the short-link form (`youtu.be/...`) are
/// accepted; anything else is rejected before a network call is made.
pub fn extract_video_id(url: &str) -> Option<String> {
    static QUERY_FORM: OnceLock<Regex> = OnceLock::new();
    static SHORT_FORM: OnceLock<Regex> = OnceLock::new();

    let query = QUERY_FORM.get_or_init(|| Regex::new(r"[?&]v=([A-Za-z0-9_-]+)").unwrap());
    let short = SHORT_FORM.get_or_init(|| Regex::new(r"youtu\.be/([A-Za-z0-9_-]+)").unwrap());

    query
        .captures(url)
        .or_else(|| short.captures(url))
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_watch_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=abc123&t=5"),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn test_extract_from_short_url() {
        assert_eq!(
            extract_video_id("https://youtu.be/abc123?si=x"),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn test_extract_rejects_everything_else() {
        assert_eq!(extract_video_id("not a url"), None);
        assert_eq!(extract_video_id(""), None);
        assert_eq!(extract_video_id("https://example.com/watch/abc123"), None);
    }

    #[test]
    fn test_snippet_roundtrips_unknown_fields() {
        let raw = serde_json::json!({
            "title": "My Video",
            "description": "Hello",
            "categoryId": "22",
            "tags": ["a", "b"],
        });
        let snippet: VideoSnippet = serde_json::from_value(raw).unwrap();
        assert_eq!(snippet.title, "My Video");

        let back = serde_json::to_value(&snippet).unwrap();
        assert_eq!(back["categoryId"], "22");
        assert_eq!(back["tags"][0], "a");
    }

    #[test]
    fn test_api_error_message_extraction() {
        let body = r#"{"error": {"code": 403, "message": "Forbidden by policy"}}"#;
        assert_eq!(
            api_error_message(body),
            Some("Forbidden by policy".to_string())
        );
        assert_eq!(api_error_message("not json"), None);
    }
}
