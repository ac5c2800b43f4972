//! YouTube Data API v3 client for tunebridge.
//!
//! Pure HTTP client covering the three idempotent calls the sync engine
//! needs: playlist membership, playlist append, and batched duration lookup.
//! OAuth token refresh is the caller's concern; this crate is handed a
//! bearer token.

mod client;
mod duration;
mod error;
mod types;

pub use client::{PlaylistApi, YouTubeClient};
pub use duration::iso8601_to_seconds;
pub use error::{ApiError, Result};
pub use types::{PlaylistId, VideoId, VideoMetadata};
