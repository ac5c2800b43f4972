use crate::cursor::CursorStore;
use crate::error::ReplayError;
use async_trait::async_trait;
use std::sync::Arc;
use tb_channels::{ChannelId, ChatMessage, MessageId};
use tokio::sync::Mutex;

/// Chat history pagination as the replayer consumes it. Implemented by the
/// application over the chat transport; ids stay opaque in here.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// One page of messages strictly after `after` (channel start when
    /// absent) and strictly before `before`, in no particular order. An
    /// empty page means the window is drained.
    async fn page_between(
        &self,
        channel: &ChannelId,
        after: Option<&MessageId>,
        before: &MessageId,
    ) -> anyhow::Result<Vec<ChatMessage>>;

    /// Identifier of the newest message in the channel, if any.
    async fn latest_message_id(&self, channel: &ChannelId)
    -> anyhow::Result<Option<MessageId>>;
}

/// Where replayed messages go: the same pipeline live messages take.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn process(&self, message: &ChatMessage);
}

/// Identifier of the first live message observed this run; set at most once.
///
/// Bounds backlog replay so a message arriving while replay is paging is
/// never scanned twice — once by replay catching up and once live.
#[derive(Default)]
pub struct HorizonMarker {
    first_live: Mutex<Option<MessageId>>,
}

impl HorizonMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` unless a live message was already observed.
    pub async fn observe(&self, id: &MessageId) {
        let mut cell = self.first_live.lock().await;
        if cell.is_none() {
            *cell = Some(id.clone());
        }
    }

    pub async fn get(&self) -> Option<MessageId> {
        self.first_live.lock().await.clone()
    }
}

/// Replays the watched channel's backlog once, at startup, resuming from the
/// persisted cursor and stopping at the horizon.
pub struct Replayer {
    history: Arc<dyn HistorySource>,
    sink: Arc<dyn MessageSink>,
    channel: ChannelId,
    cursor: Arc<CursorStore>,
    horizon: Arc<HorizonMarker>,
}

impl Replayer {
    pub fn new(
        history: Arc<dyn HistorySource>,
        sink: Arc<dyn MessageSink>,
        channel: ChannelId,
        cursor: Arc<CursorStore>,
        horizon: Arc<HorizonMarker>,
    ) -> Self {
        Self {
            history,
            sink,
            channel,
            cursor,
            horizon,
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run(&self) -> Result<(), ReplayError> {
        let start = self.cursor.get().await;
        let horizon = match self.horizon.get().await {
            Some(id) => Some(id),
            None => self.history.latest_message_id(&self.channel).await?,
        };
        let Some(horizon) = horizon else {
            tracing::info!("channel has no messages; nothing to replay");
            return Ok(());
        };
        if start.as_ref() == Some(&horizon) {
            tracing::info!(cursor = %horizon, "cursor already at the horizon; no backlog");
            return Ok(());
        }

        tracing::info!(
            cursor = ?start.as_ref().map(MessageId::as_str),
            horizon = %horizon,
            "replaying backlog"
        );

        let mut after = start;
        loop {
            let mut page = self
                .history
                .page_between(&self.channel, after.as_ref(), &horizon)
                .await?;
            if page.is_empty() {
                break;
            }
            page.sort_by_key(|message| message.created_at);
            for message in &page {
                self.sink.process(message).await;
            }
            if let Some(last) = page.last() {
                self.cursor.advance(last.id.clone()).await;
                after = Some(last.id.clone());
            }
        }

        // With no live traffic the cursor must still land on the horizon, or
        // an empty window would be rescanned on every startup.
        if self.horizon.get().await.is_none() {
            self.cursor.advance(horizon).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{HistorySource, HorizonMarker, MessageSink, Replayer};
    use crate::cursor::CursorStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tb_channels::{ChannelId, ChatMessage, MessageId, UserId};

    fn message(id: &str, t: i64, content: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::new(id),
            channel_id: ChannelId::new("chan"),
            guild_id: None,
            author_id: UserId::new("user"),
            author_is_bot: false,
            content: content.to_string(),
            created_at: Utc.timestamp_opt(t, 0).single().expect("valid timestamp"),
        }
    }

    struct FakeHistory {
        // All channel messages, oldest first by timestamp.
        messages: Vec<ChatMessage>,
        page_calls: AtomicUsize,
        latest_calls: AtomicUsize,
    }

    impl FakeHistory {
        fn new(messages: Vec<ChatMessage>) -> Arc<Self> {
            Arc::new(Self {
                messages,
                page_calls: AtomicUsize::new(0),
                latest_calls: AtomicUsize::new(0),
            })
        }

        fn remote_calls(&self) -> usize {
            self.page_calls.load(Ordering::SeqCst) + self.latest_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HistorySource for FakeHistory {
        async fn page_between(
            &self,
            _channel: &ChannelId,
            after: Option<&MessageId>,
            before: &MessageId,
        ) -> anyhow::Result<Vec<ChatMessage>> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            let numeric = |id: &MessageId| id.as_str().parse::<u64>().unwrap_or(0);
            let low = after.map(|id| numeric(id)).unwrap_or(0);
            let high = numeric(before);
            let mut page: Vec<ChatMessage> = self
                .messages
                .iter()
                .filter(|m| {
                    let id = numeric(&m.id);
                    (after.is_none() || id > low) && id < high
                })
                .cloned()
                .collect();
            // Newest first, as the transport delivers pages.
            page.reverse();
            Ok(page)
        }

        async fn latest_message_id(
            &self,
            _channel: &ChannelId,
        ) -> anyhow::Result<Option<MessageId>> {
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.messages.last().map(|m| m.id.clone()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn process(&self, message: &ChatMessage) {
            self.seen
                .lock()
                .expect("lock")
                .push(message.content.clone());
        }
    }

    async fn replayer(
        history: Arc<FakeHistory>,
        sink: Arc<RecordingSink>,
        cursor: Arc<CursorStore>,
        horizon: Arc<HorizonMarker>,
    ) -> Replayer {
        Replayer::new(
            history,
            sink,
            ChannelId::new("chan"),
            cursor,
            horizon,
        )
    }

    async fn fresh_cursor() -> (tempfile::TempDir, Arc<CursorStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CursorStore::open(dir.path().join("cursor"))
            .await
            .expect("open");
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn backlog_is_replayed_oldest_first_and_cursor_lands_on_the_newest() {
        let history = FakeHistory::new(vec![
            message("1", 1, "item A"),
            message("2", 2, "item B"),
            message("3", 3, "nothing here"),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let (_dir, cursor) = fresh_cursor().await;
        let horizon = Arc::new(HorizonMarker::new());
        // A live message arrived before replay started; it bounds the scan.
        horizon.observe(&MessageId::new("4")).await;

        replayer(history.clone(), sink.clone(), cursor.clone(), horizon)
            .await
            .run()
            .await
            .expect("replay succeeds");

        assert_eq!(sink.seen(), vec!["item A", "item B", "nothing here"]);
        assert_eq!(cursor.get().await, Some(MessageId::new("3")));
        assert_eq!(history.latest_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cursor_at_the_horizon_means_zero_fetches() {
        let history = FakeHistory::new(vec![message("9", 9, "already handled")]);
        let sink = Arc::new(RecordingSink::default());
        let (_dir, cursor) = fresh_cursor().await;
        cursor.advance(MessageId::new("9")).await;
        let horizon = Arc::new(HorizonMarker::new());
        horizon.observe(&MessageId::new("9")).await;

        replayer(history.clone(), sink.clone(), cursor.clone(), horizon)
            .await
            .run()
            .await
            .expect("replay succeeds");

        assert!(sink.seen().is_empty());
        assert_eq!(history.remote_calls(), 0, "steady state touches nothing");
    }

    #[tokio::test]
    async fn empty_window_without_live_traffic_forces_the_cursor_to_the_horizon() {
        let history = FakeHistory::new(vec![message("5", 5, "old news")]);
        let sink = Arc::new(RecordingSink::default());
        let (_dir, cursor) = fresh_cursor().await;
        cursor.advance(MessageId::new("5")).await;
        // No live message observed: the horizon comes from the channel.
        let horizon = Arc::new(HorizonMarker::new());

        replayer(history.clone(), sink.clone(), cursor.clone(), horizon)
            .await
            .run()
            .await
            .expect("replay succeeds");

        assert!(sink.seen().is_empty());
        assert_eq!(cursor.get().await, Some(MessageId::new("5")));
    }

    #[tokio::test]
    async fn replay_from_nothing_advances_even_when_no_page_returns() {
        let history = FakeHistory::new(vec![message("7", 7, "horizon itself")]);
        let sink = Arc::new(RecordingSink::default());
        let (_dir, cursor) = fresh_cursor().await;
        let horizon = Arc::new(HorizonMarker::new());

        replayer(history.clone(), sink.clone(), cursor.clone(), horizon)
            .await
            .run()
            .await
            .expect("replay succeeds");

        // Only the horizon message exists; the window before it is empty, but
        // the cursor still advances so the next startup skips the scan.
        assert!(sink.seen().is_empty());
        assert_eq!(cursor.get().await, Some(MessageId::new("7")));
    }

    #[tokio::test]
    async fn horizon_marker_only_keeps_the_first_observation() {
        let marker = HorizonMarker::new();
        marker.observe(&MessageId::new("first")).await;
        marker.observe(&MessageId::new("second")).await;
        assert_eq!(marker.get().await, Some(MessageId::new("first")));
    }
}
