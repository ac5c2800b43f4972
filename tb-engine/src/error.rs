use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tb_playlist::{ApiError, VideoId};
use thiserror::Error;

/// Submission failures the caller must react to. Duplicates and unknown
/// video ids are not here — those complete as [`crate::SubmitOutcome`]s,
/// since they are expected results rather than faults.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The daily quota ran out. Dispatch is paused; the requester should be
    /// told processing is delayed until `resume_at`, not that it failed.
    #[error("submission of {video} deferred until {resume_at}")]
    Deferred {
        video: VideoId,
        resume_at: DateTime<Utc>,
    },

    /// Anything else; surfaced for operator notification.
    #[error("submission of {video} failed")]
    Failed {
        video: VideoId,
        #[source]
        source: ApiError,
    },
}

/// Duration-check failures, carrying the full batch so the caller can report
/// every affected video.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("duration check of {} video(s) deferred until {resume_at}", videos.len())]
    Deferred {
        videos: Vec<VideoId>,
        resume_at: DateTime<Utc>,
    },

    #[error("duration check of {} video(s) failed", videos.len())]
    Failed {
        videos: Vec<VideoId>,
        #[source]
        source: ApiError,
    },
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("history fetch failed")]
    History(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
#[error("cursor file {path}")]
pub struct CursorError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
