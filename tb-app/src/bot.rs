//! Event loop wiring: Discord events in, playlist submissions out.

use crate::config::{PolicyMode, TunebridgeConfig};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tb_channels::{
    ChannelId, ChatEvent, ChatMessage, ComponentPress, DiscordAdapter, MessageId, OutboundReply,
    ReplyButton, UserId,
};
use tb_engine::{
    CursorStore, DurationPolicy, HistorySource, HorizonMarker, ItemOutcome, MessageReport,
    MessageSink, QuotaGate, Replayer, SubmissionQueue, SyncEngine,
};
use tb_playlist::{PlaylistApi, PlaylistId, VideoId, YouTubeClient};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const EVENT_QUEUE_DEPTH: usize = 256;
const OVERRIDE_CUSTOM_ID_PREFIX: &str = "override:";
/// How long shutdown waits for in-flight submissions before saving the
/// cursor anyway. Anything cut off here is reprocessed on the next start.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = TunebridgeConfig::load(config_path).await?;
    tracing::info!(
        channel = %cfg.discord.channel,
        playlist = %cfg.playlist.id,
        technician = ?cfg.discord.technician,
        max_duration_seconds = ?cfg.playlist.max_duration_seconds,
        policy = ?cfg.playlist.policy,
        quota_reset_schedule = %cfg.quota.reset_schedule,
        cursor_path = %cfg.state.cursor_path.display(),
        "config ok"
    );
    Ok(())
}

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = TunebridgeConfig::load(config_path).await?;

    let gate = Arc::new(QuotaGate::new(cfg.quota.schedule()?));
    let api: Arc<dyn PlaylistApi> = Arc::new(YouTubeClient::new(&cfg.playlist.access_token)?);
    let engine = Arc::new(SyncEngine::new(
        PlaylistId::new(cfg.playlist.id.clone()),
        DurationPolicy::new(api.clone(), gate.clone(), cfg.playlist.max_duration_seconds),
        SubmissionQueue::new(api, gate.clone()),
    ));
    let cursor = Arc::new(CursorStore::open(cfg.state.cursor_path.clone()).await?);
    let adapter = Arc::new(DiscordAdapter::new(&cfg.discord.bot_token)?);

    let bot = Arc::new(Bot {
        adapter: adapter.clone(),
        engine,
        cursor: cursor.clone(),
        horizon: Arc::new(HorizonMarker::new()),
        channel: ChannelId::new(cfg.discord.channel.clone()),
        technician: cfg.discord.technician.clone().map(UserId::new),
        policy_mode: cfg.playlist.policy,
    });

    let (tx, mut events) = mpsc::channel(EVENT_QUEUE_DEPTH);
    adapter.start(tx);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    tracing::info!(
        channel = %bot.channel,
        playlist = %cfg.playlist.id,
        "tunebridge started"
    );

    let tasks = TaskTracker::new();
    let mut replay_started = false;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChatEvent::Ready { bot_user_id } => {
                        tracing::info!(%bot_user_id, "gateway session ready");
                        // Reconnects raise READY again; replay runs once.
                        if !replay_started {
                            replay_started = true;
                            spawn_replay(bot.clone(), &tasks);
                        }
                    }
                    ChatEvent::MessageCreated(message) => {
                        if message.channel_id != bot.channel {
                            continue;
                        }
                        bot.horizon.observe(&message.id).await;
                        bot.cursor.advance(message.id.clone()).await;
                        let bot = bot.clone();
                        tasks.spawn(async move { bot.handle_message(&message).await });
                    }
                    ChatEvent::MessageEdited(message) => {
                        if message.channel_id != bot.channel {
                            continue;
                        }
                        // Edits rescan but never move the cursor or the
                        // horizon; the remote duplicate check makes the
                        // rescan safe.
                        let bot = bot.clone();
                        tasks.spawn(async move { bot.handle_message(&message).await });
                    }
                    ChatEvent::ButtonPressed(press) => {
                        let bot = bot.clone();
                        tasks.spawn(async move { bot.handle_override(press).await });
                    }
                }
            }
        }
    }

    tasks.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            grace = ?SHUTDOWN_GRACE,
            "shutdown grace expired with submissions still in flight; they will be reprocessed"
        );
    }

    // The only checkpoint write of a normal run.
    if let Err(error) = cursor.save().await {
        tracing::error!(%error, "failed to persist the channel cursor");
    } else {
        tracing::info!("channel cursor persisted; goodbye");
    }
    Ok(())
}

struct Bot {
    adapter: Arc<DiscordAdapter>,
    engine: Arc<SyncEngine>,
    cursor: Arc<CursorStore>,
    horizon: Arc<HorizonMarker>,
    channel: ChannelId,
    technician: Option<UserId>,
    policy_mode: PolicyMode,
}

fn spawn_replay(bot: Arc<Bot>, tasks: &TaskTracker) {
    tasks.spawn(async move {
        let replayer = Replayer::new(
            bot.clone(),
            bot.clone(),
            bot.channel.clone(),
            bot.cursor.clone(),
            bot.horizon.clone(),
        );
        if let Err(error) = replayer.run().await {
            tracing::error!(%error, "backlog replay failed");
        }
    });
}

impl Bot {
    async fn handle_message(&self, message: &ChatMessage) {
        if message.author_is_bot {
            return;
        }
        let report = self.engine.process_text(&message.content).await;
        if report.is_empty() {
            return;
        }
        self.render_report(message, &report).await;
    }

    /// "Add anyway": re-fetch the original message and push its videos
    /// through the pipeline with the duration policy bypassed.
    async fn handle_override(&self, press: ComponentPress) {
        if press.channel_id != self.channel || self.policy_mode == PolicyMode::Block {
            return;
        }
        let Some(message_id) = press.custom_id.strip_prefix(OVERRIDE_CUSTOM_ID_PREFIX) else {
            return;
        };
        if let Err(error) = self.adapter.ack_component(&press).await {
            tracing::warn!(%error, "interaction ack failed");
        }
        let message = match self
            .adapter
            .fetch_message(&self.channel, &MessageId::new(message_id))
            .await
        {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(%error, message_id, "could not refetch message for override");
                return;
            }
        };
        tracing::info!(message_id, presser = %press.presser_id, "duration policy overridden");
        let report = self.engine.process_unfiltered(&message.content).await;
        self.render_report(&message, &report).await;
    }

    async fn render_report(&self, message: &ChatMessage, report: &MessageReport) {
        let over: Vec<&VideoId> = report
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::OverLimit { video } => Some(video),
                _ => None,
            })
            .collect();
        if !over.is_empty() {
            let mut reply = OutboundReply::text(over_limit_notice(&over))
                .in_reply_to(message.id.clone());
            if self.policy_mode == PolicyMode::Override {
                reply = reply.with_button(ReplyButton {
                    label: "Add anyway".to_string(),
                    custom_id: format!("{OVERRIDE_CUSTOM_ID_PREFIX}{}", message.id),
                });
            }
            self.send_reply(reply).await;
        }

        let deferred: Vec<(&VideoId, DateTime<Utc>)> = report
            .outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Deferred { video, resume_at } => Some((video, *resume_at)),
                _ => None,
            })
            .collect();
        if let Some((_, resume_at)) = deferred.first() {
            let videos: Vec<&VideoId> = deferred.iter().map(|(video, _)| *video).collect();
            let reply = OutboundReply::text(deferred_notice(&videos, *resume_at))
                .in_reply_to(message.id.clone());
            self.send_reply(reply).await;
        }

        for outcome in &report.outcomes {
            if let ItemOutcome::Failed { video, source } = outcome {
                tracing::error!(%video, error = %source, "submission failed");
                self.notify_failure(message, video).await;
            }
        }
    }

    async fn notify_failure(&self, message: &ChatMessage, video: &VideoId) {
        let reply = OutboundReply::text(failure_notice(video)).in_reply_to(message.id.clone());
        let reply_id = match self.adapter.send_reply(&self.channel, &reply).await {
            Ok(id) => Some(id),
            Err(error) => {
                tracing::error!(%error, "could not post the failure notice");
                None
            }
        };
        let Some(technician) = &self.technician else {
            return;
        };
        let location = reply_id
            .map(|id| message_link(message.guild_id.as_deref(), &self.channel, &id))
            .unwrap_or_else(|| {
                message_link(message.guild_id.as_deref(), &self.channel, &message.id)
            });
        if let Err(error) = self
            .adapter
            .direct_message(technician, &format!("failed to add `{video}`: {location}"))
            .await
        {
            tracing::error!(%error, "could not reach the technician");
        }
    }

    async fn send_reply(&self, reply: OutboundReply) {
        if let Err(error) = self.adapter.send_reply(&self.channel, &reply).await {
            tracing::error!(%error, "reply failed");
        }
    }
}

#[async_trait]
impl HistorySource for Bot {
    async fn page_between(
        &self,
        channel: &ChannelId,
        after: Option<&MessageId>,
        before: &MessageId,
    ) -> Result<Vec<ChatMessage>> {
        self.adapter.history_page(channel, after, before).await
    }

    async fn latest_message_id(&self, channel: &ChannelId) -> Result<Option<MessageId>> {
        self.adapter.latest_message_id(channel).await
    }
}

#[async_trait]
impl MessageSink for Bot {
    async fn process(&self, message: &ChatMessage) {
        self.handle_message(message).await;
    }
}

fn backticked(videos: &[&VideoId]) -> String {
    videos
        .iter()
        .map(|video| format!("`{video}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn over_limit_notice(videos: &[&VideoId]) -> String {
    if videos.len() == 1 {
        format!(
            "{} is longer than this playlist allows, so it was not added.",
            backticked(videos)
        )
    } else {
        format!(
            "{} are longer than this playlist allows, so they were not added.",
            backticked(videos)
        )
    }
}

fn deferred_notice(videos: &[&VideoId], resume_at: DateTime<Utc>) -> String {
    format!(
        "The daily API quota is used up; adding {} is delayed until {}.",
        backticked(videos),
        resume_at.format("%Y-%m-%d %H:%M UTC")
    )
}

fn failure_notice(video: &VideoId) -> String {
    format!(
        "There was an error adding `{video}`; this has been logged and the technician notified."
    )
}

fn message_link(guild_id: Option<&str>, channel: &ChannelId, message: &MessageId) -> String {
    let guild = guild_id.unwrap_or("@me");
    format!("https://discord.com/channels/{guild}/{channel}/{message}")
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
