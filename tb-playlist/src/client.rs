use crate::duration::iso8601_to_seconds;
use crate::error::{ApiError, Result};
use crate::types::{PlaylistId, VideoId, VideoMetadata};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

const YOUTUBE_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// The idempotent slice of the YouTube Data API the sync engine consumes.
///
/// All three calls draw from the same daily quota; callers are expected to
/// gate dispatch themselves.
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    /// Number of entries for `video` already present in `playlist`.
    async fn playlist_item_count(&self, playlist: &PlaylistId, video: &VideoId) -> Result<u64>;

    /// Appends `video` to `playlist`; returns the position of the new entry.
    ///
    /// Concurrent inserts on the same playlist are rejected server-side, so
    /// callers must serialize these.
    async fn insert_playlist_item(&self, playlist: &PlaylistId, video: &VideoId) -> Result<u64>;

    /// Batched duration lookup for up to one page of video ids.
    async fn video_durations(&self, videos: &[VideoId]) -> Result<Vec<VideoMetadata>>;
}

#[derive(Clone)]
pub struct YouTubeClient {
    http: reqwest::Client,
    access_token: String,
}

impl YouTubeClient {
    pub fn new(access_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{YOUTUBE_API_BASE_URL}{path}")
    }

    async fn read_success_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_failure(status, &body))
        }
    }
}

#[async_trait]
impl PlaylistApi for YouTubeClient {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn playlist_item_count(&self, playlist: &PlaylistId, video: &VideoId) -> Result<u64> {
        let response = self
            .http
            .get(self.api_url("/playlistItems"))
            .bearer_auth(&self.access_token)
            .query(&[
                ("part", "id"),
                ("playlistId", playlist.as_str()),
                ("videoId", video.as_str()),
            ])
            .send()
            .await?;

        let body = Self::read_success_body(response).await?;
        let parsed: PlaylistItemListResponse = serde_json::from_str(&body)?;
        Ok(parsed.page_info.total_results)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn insert_playlist_item(&self, playlist: &PlaylistId, video: &VideoId) -> Result<u64> {
        let request = serde_json::json!({
            "snippet": {
                "playlistId": playlist.as_str(),
                "resourceId": {
                    "kind": "youtube#video",
                    "videoId": video.as_str(),
                },
            },
        });
        let response = self
            .http
            .post(self.api_url("/playlistItems"))
            .bearer_auth(&self.access_token)
            .query(&[("part", "snippet")])
            .json(&request)
            .send()
            .await?;

        let body = Self::read_success_body(response).await?;
        let parsed: PlaylistItemResource = serde_json::from_str(&body)?;
        Ok(parsed.snippet.position)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(batch = videos.len()))]
    async fn video_durations(&self, videos: &[VideoId]) -> Result<Vec<VideoMetadata>> {
        let ids = videos
            .iter()
            .map(VideoId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let response = self
            .http
            .get(self.api_url("/videos"))
            .bearer_auth(&self.access_token)
            .query(&[("part", "contentDetails"), ("id", ids.as_str())])
            .send()
            .await?;

        let body = Self::read_success_body(response).await?;
        let parsed: VideoListResponse = serde_json::from_str(&body)?;
        Ok(durations_from_response(parsed))
    }
}

fn durations_from_response(response: VideoListResponse) -> Vec<VideoMetadata> {
    response
        .items
        .into_iter()
        .map(|item| {
            let duration_seconds = item
                .content_details
                .as_ref()
                .and_then(|details| iso8601_to_seconds(&details.duration));
            if duration_seconds.is_none() {
                tracing::warn!(video = %item.id, "video without a parseable duration");
            }
            VideoMetadata {
                id: VideoId::new(item.id),
                duration_seconds,
            }
        })
        .collect()
}

/// Maps a non-success response onto the error taxonomy. YouTube reports the
/// interesting cases in `error.errors[0].reason`; the daily quota shows up as
/// `quotaExceeded` (or the older `dailyLimitExceeded`) on a 403.
fn classify_failure(status: StatusCode, body: &str) -> ApiError {
    if status == StatusCode::NOT_FOUND {
        return ApiError::NotFound;
    }
    if let Ok(parsed) = serde_json::from_str::<ApiFailureBody>(body) {
        let quota = parsed
            .error
            .errors
            .iter()
            .any(|e| matches!(e.reason.as_str(), "quotaExceeded" | "dailyLimitExceeded"));
        if quota {
            return ApiError::QuotaExceeded;
        }
    }
    ApiError::Http(format!("youtube api status={status} body={body}"))
}

#[derive(Debug, Deserialize)]
struct ApiFailureBody {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemListResponse {
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    total_results: u64,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemResource {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemSnippet {
    position: u64,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    #[serde(default)]
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}
