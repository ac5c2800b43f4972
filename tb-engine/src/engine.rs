use crate::error::{PolicyError, SubmitError};
use crate::extract::extract_video_ids;
use crate::policy::DurationPolicy;
use crate::submit::{SubmissionQueue, SubmitOutcome};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tb_playlist::{ApiError, PlaylistId, VideoId};

/// Per-video result of scanning one message. Everything here is a normal
/// outcome to render, not a control-flow surprise; sibling videos in a
/// message never affect each other.
#[derive(Debug)]
pub enum ItemOutcome {
    Appended { video: VideoId, position: u64 },
    Duplicate { video: VideoId },
    UnknownVideo { video: VideoId },
    /// Over the configured duration limit; not submitted.
    OverLimit { video: VideoId },
    /// Quota ran out; processing resumes at `resume_at`.
    Deferred { video: VideoId, resume_at: DateTime<Utc> },
    Failed { video: VideoId, source: ApiError },
}

#[derive(Debug, Default)]
pub struct MessageReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl MessageReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// The per-message pipeline: extract references, apply the duration policy,
/// submit what survives.
pub struct SyncEngine {
    playlist: PlaylistId,
    policy: DurationPolicy,
    queue: SubmissionQueue,
}

impl SyncEngine {
    pub fn new(playlist: PlaylistId, policy: DurationPolicy, queue: SubmissionQueue) -> Self {
        Self {
            playlist,
            policy,
            queue,
        }
    }

    /// Scans `text` and mirrors every acceptable reference into the playlist.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn process_text(&self, text: &str) -> MessageReport {
        let videos = extract_video_ids(text);
        if videos.is_empty() {
            return MessageReport::default();
        }

        let verdict = match self.policy.check(&videos).await {
            Ok(verdict) => verdict,
            Err(PolicyError::Deferred { videos, resume_at }) => {
                return MessageReport {
                    outcomes: videos
                        .into_iter()
                        .map(|video| ItemOutcome::Deferred { video, resume_at })
                        .collect(),
                };
            }
            Err(PolicyError::Failed { videos, source }) => {
                return MessageReport {
                    outcomes: videos
                        .into_iter()
                        .map(|video| ItemOutcome::Failed {
                            video,
                            source: source.clone(),
                        })
                        .collect(),
                };
            }
        };

        let mut outcomes: Vec<ItemOutcome> = verdict
            .over
            .into_iter()
            .map(|video| ItemOutcome::OverLimit { video })
            .collect();
        let submitted = join_all(
            verdict
                .within
                .iter()
                .map(|video| self.submit_one(video)),
        )
        .await;
        outcomes.extend(submitted);
        MessageReport { outcomes }
    }

    /// The override path: extract and submit, skipping the duration policy.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn process_unfiltered(&self, text: &str) -> MessageReport {
        let videos = extract_video_ids(text);
        let outcomes = join_all(videos.iter().map(|video| self.submit_one(video))).await;
        MessageReport { outcomes }
    }

    async fn submit_one(&self, video: &VideoId) -> ItemOutcome {
        match self.queue.submit(&self.playlist, video).await {
            Ok(SubmitOutcome::Appended { position }) => ItemOutcome::Appended {
                video: video.clone(),
                position,
            },
            Ok(SubmitOutcome::Duplicate) => ItemOutcome::Duplicate {
                video: video.clone(),
            },
            Ok(SubmitOutcome::UnknownVideo) => ItemOutcome::UnknownVideo {
                video: video.clone(),
            },
            Err(SubmitError::Deferred { video, resume_at }) => {
                ItemOutcome::Deferred { video, resume_at }
            }
            Err(SubmitError::Failed { video, source }) => ItemOutcome::Failed { video, source },
        }
    }
}
