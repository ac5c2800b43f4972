use crate::error::SubmitError;
use crate::quota::QuotaGate;
use std::sync::Arc;
use tb_playlist::{ApiError, PlaylistApi, PlaylistId, VideoId};
use tokio::sync::{mpsc, oneshot};

const APPEND_QUEUE_DEPTH: usize = 256;

/// Result of a submission that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Newly appended; `position` is where the playlist put it.
    Appended { position: u64 },
    /// Already in the playlist; nothing appended.
    Duplicate,
    /// The API rejected the id as unknown. Swallowed: the missing embed in
    /// chat already tells the requester.
    UnknownVideo,
}

struct AppendJob {
    playlist: PlaylistId,
    video: VideoId,
    done: oneshot::Sender<Result<SubmitOutcome, SubmitError>>,
}

/// Serialized append pipeline with pre-append deduplication.
///
/// Membership checks run with unbounded read concurrency. Appends go through
/// a single worker fed by a channel, so exactly one insert is in flight at a
/// time and inserts complete in enqueue order — overlapping inserts on the
/// same playlist fail server-side. Once a job is enqueued it runs to
/// completion; there is no cancellation.
pub struct SubmissionQueue {
    api: Arc<dyn PlaylistApi>,
    gate: Arc<QuotaGate>,
    appends: mpsc::Sender<AppendJob>,
}

impl SubmissionQueue {
    pub fn new(api: Arc<dyn PlaylistApi>, gate: Arc<QuotaGate>) -> Self {
        let (appends, jobs) = mpsc::channel(APPEND_QUEUE_DEPTH);
        tokio::spawn(run_append_worker(api.clone(), gate.clone(), jobs));
        Self { api, gate, appends }
    }

    /// Appends `video` to `playlist` unless it is already there.
    pub async fn submit(
        &self,
        playlist: &PlaylistId,
        video: &VideoId,
    ) -> Result<SubmitOutcome, SubmitError> {
        self.gate.acquire().await;
        match self.api.playlist_item_count(playlist, video).await {
            Ok(0) => {}
            Ok(_) => {
                tracing::info!(%video, %playlist, "ignored duplicate");
                return Ok(SubmitOutcome::Duplicate);
            }
            Err(error) => return settle_api_error(&self.gate, video, error).await,
        }

        let (done, result) = oneshot::channel();
        let job = AppendJob {
            playlist: playlist.clone(),
            video: video.clone(),
            done,
        };
        if self.appends.send(job).await.is_err() {
            return Err(SubmitError::Failed {
                video: video.clone(),
                source: ApiError::Http("append worker unavailable".to_string()),
            });
        }
        match result.await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Failed {
                video: video.clone(),
                source: ApiError::Http("append worker dropped the job".to_string()),
            }),
        }
    }
}

async fn run_append_worker(
    api: Arc<dyn PlaylistApi>,
    gate: Arc<QuotaGate>,
    mut jobs: mpsc::Receiver<AppendJob>,
) {
    while let Some(job) = jobs.recv().await {
        gate.acquire().await;
        let result = match api.insert_playlist_item(&job.playlist, &job.video).await {
            Ok(position) => {
                tracing::info!(
                    video = %job.video,
                    playlist = %job.playlist,
                    position,
                    "appended to playlist"
                );
                Ok(SubmitOutcome::Appended { position })
            }
            Err(error) => settle_api_error(&gate, &job.video, error).await,
        };
        // The requester may have gone away; the append itself still counted.
        let _ = job.done.send(result);
    }
}

async fn settle_api_error(
    gate: &QuotaGate,
    video: &VideoId,
    error: ApiError,
) -> Result<SubmitOutcome, SubmitError> {
    match error {
        ApiError::NotFound => {
            tracing::info!(%video, "api reports an unknown video id; skipping");
            Ok(SubmitOutcome::UnknownVideo)
        }
        ApiError::QuotaExceeded => {
            let resume_at = gate.pause_until_next_reset().await;
            Err(SubmitError::Deferred {
                video: video.clone(),
                resume_at,
            })
        }
        source => Err(SubmitError::Failed {
            video: video.clone(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{SubmissionQueue, SubmitOutcome};
    use crate::error::SubmitError;
    use crate::quota::QuotaGate;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tb_playlist::{ApiError, PlaylistApi, PlaylistId, VideoId, VideoMetadata};
    use tokio::time::timeout;

    /// Scripted failure kinds, mapped to fresh `ApiError`s per call.
    #[derive(Clone, Copy)]
    enum Fail {
        NotFound,
        Quota,
        Server,
    }

    impl Fail {
        fn to_error(self) -> ApiError {
            match self {
                Fail::NotFound => ApiError::NotFound,
                Fail::Quota => ApiError::QuotaExceeded,
                Fail::Server => ApiError::Http("status=500".to_string()),
            }
        }
    }

    #[derive(Default)]
    struct FakePlaylist {
        members: Mutex<Vec<String>>,
        appended: Mutex<Vec<String>>,
        // Consumed on first insert of that video; later inserts succeed.
        insert_failures: Mutex<HashMap<String, Fail>>,
    }

    impl FakePlaylist {
        fn failing_insert(video: &str, fail: Fail) -> Self {
            let fake = Self::default();
            fake.insert_failures
                .lock()
                .expect("lock")
                .insert(video.to_string(), fail);
            fake
        }

        fn appended(&self) -> Vec<String> {
            self.appended.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl PlaylistApi for FakePlaylist {
        async fn playlist_item_count(
            &self,
            _playlist: &PlaylistId,
            video: &VideoId,
        ) -> tb_playlist::Result<u64> {
            let members = self.members.lock().expect("lock");
            Ok(members.iter().filter(|m| *m == video.as_str()).count() as u64)
        }

        async fn insert_playlist_item(
            &self,
            _playlist: &PlaylistId,
            video: &VideoId,
        ) -> tb_playlist::Result<u64> {
            if let Some(fail) = self.insert_failures.lock().expect("lock").remove(video.as_str()) {
                return Err(fail.to_error());
            }
            let mut members = self.members.lock().expect("lock");
            members.push(video.as_str().to_string());
            self.appended
                .lock()
                .expect("lock")
                .push(video.as_str().to_string());
            Ok(members.len() as u64 - 1)
        }

        async fn video_durations(
            &self,
            _videos: &[VideoId],
        ) -> tb_playlist::Result<Vec<VideoMetadata>> {
            Ok(Vec::new())
        }
    }

    fn queue_with(api: Arc<FakePlaylist>) -> (SubmissionQueue, Arc<QuotaGate>) {
        let gate = Arc::new(QuotaGate::with_default_schedule());
        (SubmissionQueue::new(api, gate.clone()), gate)
    }

    #[tokio::test]
    async fn second_submission_of_the_same_video_appends_nothing() {
        let api = Arc::new(FakePlaylist::default());
        let (queue, _gate) = queue_with(api.clone());
        let playlist = PlaylistId::new("PL1");
        let video = VideoId::new("abc");

        let first = queue.submit(&playlist, &video).await.expect("first submit");
        assert_eq!(first, SubmitOutcome::Appended { position: 0 });

        let second = queue.submit(&playlist, &video).await.expect("second submit");
        assert_eq!(second, SubmitOutcome::Duplicate);

        assert_eq!(api.appended(), vec!["abc"], "exactly one append call");
    }

    #[tokio::test]
    async fn unknown_video_is_swallowed_not_surfaced() {
        let api = Arc::new(FakePlaylist::failing_insert("gone", Fail::NotFound));
        let (queue, _gate) = queue_with(api.clone());

        let outcome = queue
            .submit(&PlaylistId::new("PL1"), &VideoId::new("gone"))
            .await
            .expect("not-found completes without error");
        assert_eq!(outcome, SubmitOutcome::UnknownVideo);
        assert!(api.appended().is_empty());
    }

    #[tokio::test]
    async fn server_failure_surfaces_as_failed() {
        let api = Arc::new(FakePlaylist::failing_insert("bad", Fail::Server));
        let (queue, _gate) = queue_with(api.clone());

        let error = queue
            .submit(&PlaylistId::new("PL1"), &VideoId::new("bad"))
            .await
            .expect_err("server failure surfaces");
        assert!(matches!(error, SubmitError::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_defers_pauses_and_resumes_automatically() {
        let api = Arc::new(FakePlaylist::failing_insert("first", Fail::Quota));
        let (queue, gate) = queue_with(api.clone());
        let queue = Arc::new(queue);
        let playlist = PlaylistId::new("PL1");

        let error = queue
            .submit(&playlist, &VideoId::new("first"))
            .await
            .expect_err("quota failure defers");
        let SubmitError::Deferred { video, resume_at } = error else {
            panic!("expected a deferred submission");
        };
        assert_eq!(video.as_str(), "first");
        assert!(resume_at > chrono::Utc::now(), "resume instant is in the future");
        assert!(gate.is_paused().await, "gate pauses on quota exhaustion");

        // Work queued behind the pause is retained, not dropped.
        let retained = {
            let queue = queue.clone();
            let playlist = playlist.clone();
            tokio::spawn(async move { queue.submit(&playlist, &VideoId::new("second")).await })
        };
        timeout(Duration::from_secs(60), gate.acquire())
            .await
            .expect_err("dispatch is halted while paused");

        // Once the reset instant passes, the retained work drains by itself.
        let outcome = retained
            .await
            .expect("task joins")
            .expect("retained submission completes after resume");
        assert_eq!(outcome, SubmitOutcome::Appended { position: 0 });
        assert_eq!(api.appended(), vec!["second"]);
    }
}
