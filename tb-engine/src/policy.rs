use crate::error::PolicyError;
use crate::quota::QuotaGate;
use std::collections::HashSet;
use std::sync::Arc;
use tb_playlist::{ApiError, PlaylistApi, VideoId};

/// Partition of an extraction batch by the configured duration limit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DurationVerdict {
    pub within: Vec<VideoId>,
    pub over: Vec<VideoId>,
}

/// Filters extraction batches against a maximum video duration with one
/// batched metadata lookup per message, so quota cost stays O(1) however
/// many links a message carries.
pub struct DurationPolicy {
    api: Arc<dyn PlaylistApi>,
    gate: Arc<QuotaGate>,
    max_duration_seconds: Option<u64>,
}

impl DurationPolicy {
    pub fn new(
        api: Arc<dyn PlaylistApi>,
        gate: Arc<QuotaGate>,
        max_duration_seconds: Option<u64>,
    ) -> Self {
        Self {
            api,
            gate,
            max_duration_seconds,
        }
    }

    /// Splits `videos` into within-limit and over-limit, preserving order.
    ///
    /// With no limit configured or an empty batch, everything passes without
    /// a remote call. Videos the metadata response omits (deleted, private)
    /// pass as well; the append step catches genuinely invalid ids.
    pub async fn check(&self, videos: &[VideoId]) -> Result<DurationVerdict, PolicyError> {
        let Some(max) = self.max_duration_seconds else {
            return Ok(DurationVerdict {
                within: videos.to_vec(),
                over: Vec::new(),
            });
        };
        if videos.is_empty() {
            return Ok(DurationVerdict::default());
        }

        self.gate.acquire().await;
        let metadata = match self.api.video_durations(videos).await {
            Ok(metadata) => metadata,
            Err(ApiError::QuotaExceeded) => {
                let resume_at = self.gate.pause_until_next_reset().await;
                return Err(PolicyError::Deferred {
                    videos: videos.to_vec(),
                    resume_at,
                });
            }
            Err(source) => {
                return Err(PolicyError::Failed {
                    videos: videos.to_vec(),
                    source,
                });
            }
        };

        let too_long: HashSet<&str> = metadata
            .iter()
            .filter(|entry| entry.duration_seconds.is_some_and(|seconds| seconds > max))
            .map(|entry| entry.id.as_str())
            .collect();
        let (within, over): (Vec<VideoId>, Vec<VideoId>) = videos
            .iter()
            .cloned()
            .partition(|video| !too_long.contains(video.as_str()));
        Ok(DurationVerdict { within, over })
    }
}

#[cfg(test)]
mod tests {
    use super::{DurationPolicy, DurationVerdict};
    use crate::error::PolicyError;
    use crate::quota::QuotaGate;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tb_playlist::{ApiError, PlaylistApi, PlaylistId, VideoId, VideoMetadata};

    struct FakeMetadata {
        // (id, duration) pairs returned by the batched lookup.
        durations: Vec<(&'static str, Option<u64>)>,
        quota_exhausted: bool,
        lookups: AtomicUsize,
    }

    impl FakeMetadata {
        fn with_durations(durations: Vec<(&'static str, Option<u64>)>) -> Arc<Self> {
            Arc::new(Self {
                durations,
                quota_exhausted: false,
                lookups: AtomicUsize::new(0),
            })
        }

        fn exhausted() -> Arc<Self> {
            Arc::new(Self {
                durations: Vec::new(),
                quota_exhausted: true,
                lookups: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PlaylistApi for FakeMetadata {
        async fn playlist_item_count(
            &self,
            _playlist: &PlaylistId,
            _video: &VideoId,
        ) -> tb_playlist::Result<u64> {
            Ok(0)
        }

        async fn insert_playlist_item(
            &self,
            _playlist: &PlaylistId,
            _video: &VideoId,
        ) -> tb_playlist::Result<u64> {
            Ok(0)
        }

        async fn video_durations(
            &self,
            videos: &[VideoId],
        ) -> tb_playlist::Result<Vec<VideoMetadata>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.quota_exhausted {
                return Err(ApiError::QuotaExceeded);
            }
            Ok(self
                .durations
                .iter()
                .filter(|(id, _)| videos.iter().any(|v| v.as_str() == *id))
                .map(|(id, duration_seconds)| VideoMetadata {
                    id: VideoId::new(*id),
                    duration_seconds: *duration_seconds,
                })
                .collect())
        }
    }

    fn videos(ids: &[&str]) -> Vec<VideoId> {
        ids.iter().copied().map(VideoId::new).collect()
    }

    fn policy(api: Arc<FakeMetadata>, max: Option<u64>) -> DurationPolicy {
        DurationPolicy::new(api, Arc::new(QuotaGate::with_default_schedule()), max)
    }

    #[tokio::test]
    async fn partition_is_disjoint_and_covers_the_batch() {
        let api = FakeMetadata::with_durations(vec![
            ("short", Some(100)),
            ("long", Some(500)),
            ("edge", Some(300)),
        ]);
        let policy = policy(api.clone(), Some(300));

        let verdict = policy
            .check(&videos(&["short", "long", "edge"]))
            .await
            .expect("check succeeds");
        assert_eq!(
            verdict,
            DurationVerdict {
                within: videos(&["short", "edge"]),
                over: videos(&["long"]),
            },
            "strictly-greater comparison; the exact limit passes"
        );
        assert_eq!(api.lookups.load(Ordering::SeqCst), 1, "one batched lookup");
    }

    #[tokio::test]
    async fn no_limit_and_empty_batches_skip_the_remote_call() {
        let unlimited = FakeMetadata::with_durations(vec![("a", Some(10))]);
        let verdict = policy(unlimited.clone(), None)
            .check(&videos(&["a"]))
            .await
            .expect("check succeeds");
        assert_eq!(verdict.within, videos(&["a"]));
        assert!(verdict.over.is_empty());
        assert_eq!(unlimited.lookups.load(Ordering::SeqCst), 0);

        let limited = FakeMetadata::with_durations(vec![]);
        let verdict = policy(limited.clone(), Some(60))
            .check(&[])
            .await
            .expect("check succeeds");
        assert!(verdict.within.is_empty() && verdict.over.is_empty());
        assert_eq!(limited.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn videos_missing_from_the_response_pass_open() {
        let api = FakeMetadata::with_durations(vec![("known", Some(10_000))]);
        let verdict = policy(api, Some(300))
            .check(&videos(&["known", "deleted", "private"]))
            .await
            .expect("check succeeds");
        assert_eq!(verdict.within, videos(&["deleted", "private"]));
        assert_eq!(verdict.over, videos(&["known"]));
    }

    #[tokio::test]
    async fn unparseable_durations_pass_open() {
        let api = FakeMetadata::with_durations(vec![("odd", None)]);
        let verdict = policy(api, Some(1))
            .check(&videos(&["odd"]))
            .await
            .expect("check succeeds");
        assert_eq!(verdict.within, videos(&["odd"]));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_defers_the_whole_batch() {
        let api = FakeMetadata::exhausted();
        let gate = Arc::new(QuotaGate::with_default_schedule());
        let policy = DurationPolicy::new(api, gate.clone(), Some(60));

        let error = policy
            .check(&videos(&["a", "b"]))
            .await
            .expect_err("quota exhaustion surfaces");
        let PolicyError::Deferred { videos: batch, .. } = error else {
            panic!("expected a deferred batch");
        };
        assert_eq!(batch, videos(&["a", "b"]), "error carries the full batch");
        assert!(gate.is_paused().await);
    }
}
