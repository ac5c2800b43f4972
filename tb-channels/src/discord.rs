use crate::types::{
    ChannelId, ChatEvent, ChatMessage, ComponentPress, MessageId, OutboundReply, UserId,
};
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;

const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
const DISCORD_API_BASE_URL: &str = "https://discord.com/api/v10";
// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const DISCORD_DEFAULT_INTENTS: u64 = 1 | (1 << 9) | (1 << 15);
const DISCORD_HISTORY_PAGE_LIMIT: u32 = 100;
const DISCORD_RETRY_BASE_MS: u64 = 250;
const DISCORD_RETRY_MAX_MS: u64 = 30_000;
/// First second of 2015, the snowflake epoch, in unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

#[derive(Clone)]
pub struct DiscordAdapter {
    http: reqwest::Client,
    bot_token: String,
    gateway_intents: u64,
}

impl DiscordAdapter {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            gateway_intents: DISCORD_DEFAULT_INTENTS,
        })
    }

    pub fn with_gateway_intents(mut self, gateway_intents: u64) -> Self {
        self.gateway_intents = gateway_intents;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{DISCORD_API_BASE_URL}{path}")
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    /// Starts the gateway loop, pushing events to `tx` until the receiver is
    /// dropped. Connection losses reconnect with capped exponential backoff.
    pub fn start(&self, tx: mpsc::Sender<ChatEvent>) {
        let adapter = self.clone();
        tokio::spawn(async move {
            let mut consecutive_failures: u32 = 0;
            loop {
                let connected_at = tokio::time::Instant::now();
                match adapter.run_gateway_once(&tx).await {
                    Ok(()) => {
                        tracing::info!("discord event receiver dropped; gateway loop exiting");
                        return;
                    }
                    Err(error) => {
                        if connected_at.elapsed() > Duration::from_secs(60) {
                            consecutive_failures = 0;
                        }
                        consecutive_failures += 1;
                        let delay = transient_retry_delay(consecutive_failures);
                        tracing::warn!(
                            %error,
                            attempt = consecutive_failures,
                            ?delay,
                            "discord gateway connection lost; reconnecting with backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
    }

    /// One gateway session: HELLO, IDENTIFY, heartbeats, then the event read
    /// loop. `Ok(())` means the event channel closed (shutdown); errors mean
    /// the connection died and the caller should reconnect.
    async fn run_gateway_once(&self, tx: &mpsc::Sender<ChatEvent>) -> Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(DISCORD_GATEWAY_URL).await?;
        let (write, mut read) = ws.split();
        let write = Arc::new(Mutex::new(write));

        // HELLO.
        let heartbeat_interval_ms: u64 = if let Some(msg) = read.next().await {
            let msg = msg?;
            let v: serde_json::Value = serde_json::from_str(msg.to_text()?)?;
            v.get("d")
                .and_then(|d| d.get("heartbeat_interval"))
                .and_then(|x| x.as_u64())
                .ok_or_else(|| anyhow::anyhow!("discord HELLO missing heartbeat_interval"))?
        } else {
            return Err(anyhow::anyhow!("discord gateway closed before HELLO"));
        };

        // IDENTIFY.
        let identify = serde_json::json!({
            "op": 2,
            "d": {
                "token": self.authorization(),
                "intents": self.gateway_intents,
                "properties": { "os": "linux", "browser": "tunebridge", "device": "tunebridge" }
            }
        });
        write
            .lock()
            .await
            .send(Message::Text(identify.to_string().into()))
            .await?;

        let seq: Arc<RwLock<Option<i64>>> = Arc::new(RwLock::new(None));

        // Heartbeat loop.
        {
            let write = write.clone();
            let seq = seq.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
                loop {
                    interval.tick().await;
                    let s = *seq.read().await;
                    let payload = serde_json::json!({ "op": 1, "d": s });
                    if write
                        .lock()
                        .await
                        .send(Message::Text(payload.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }

        while let Some(msg) = read.next().await {
            let msg = msg?;
            let txt = msg.to_text()?;
            let v: serde_json::Value = serde_json::from_str(txt)?;

            if let Some(s) = v.get("s").and_then(|s| s.as_i64()) {
                *seq.write().await = Some(s);
            }

            let op = v
                .get("op")
                .and_then(|o| o.as_i64())
                .ok_or_else(|| anyhow::anyhow!("discord payload missing op"))?;
            if op == 11 {
                continue;
            }

            let t = v.get("t").and_then(|t| t.as_str());
            let event = match t {
                Some("READY") => {
                    let id = v
                        .get("d")
                        .and_then(|d| d.get("user"))
                        .and_then(|u| u.get("id"))
                        .and_then(|id| id.as_str())
                        .ok_or_else(|| anyhow::anyhow!("discord READY missing user id"))?;
                    Some(ChatEvent::Ready {
                        bot_user_id: UserId::new(id),
                    })
                }
                Some(kind @ ("MESSAGE_CREATE" | "MESSAGE_UPDATE")) => {
                    let payload = v
                        .get("d")
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("discord {kind} missing payload"))?;
                    let payload: DiscordMessagePayload = serde_json::from_value(payload)?;
                    // Partial updates (embed resolution and the like) carry no
                    // author or content and are not rescannable.
                    match build_chat_message(payload) {
                        Some(message) if message.author_is_bot => None,
                        Some(message) if kind == "MESSAGE_CREATE" => {
                            Some(ChatEvent::MessageCreated(message))
                        }
                        Some(message) => Some(ChatEvent::MessageEdited(message)),
                        None => None,
                    }
                }
                Some("INTERACTION_CREATE") => {
                    let payload = v.get("d").cloned().ok_or_else(|| {
                        anyhow::anyhow!("discord INTERACTION_CREATE missing payload")
                    })?;
                    let payload: DiscordInteractionPayload = serde_json::from_value(payload)?;
                    build_component_press(payload).map(ChatEvent::ButtonPressed)
                }
                Some(_) | None => None,
            };

            if let Some(event) = event {
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }

        Err(anyhow::anyhow!("discord gateway stream ended unexpectedly"))
    }

    pub async fn send_reply(
        &self,
        channel: &ChannelId,
        reply: &OutboundReply,
    ) -> Result<MessageId> {
        let mut body = serde_json::json!({ "content": reply.content });
        if let Some(to) = &reply.reply_to {
            body["message_reference"] = serde_json::json!({
                "message_id": to.as_str(),
                "fail_if_not_exists": false,
            });
        }
        if let Some(button) = &reply.button {
            body["components"] = serde_json::json!([{
                "type": 1,
                "components": [{
                    "type": 2,
                    "style": 1,
                    "label": button.label,
                    "custom_id": button.custom_id,
                }],
            }]);
        }

        let url = self.api_url(&format!("/channels/{channel}/messages"));
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.authorization())
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "discord send failed: status={status} body={text}"
            ));
        }
        let created: DiscordMessagePayload = resp.json().await?;
        Ok(MessageId::new(created.id))
    }

    pub async fn fetch_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<ChatMessage> {
        let url = self.api_url(&format!("/channels/{channel}/messages/{message}"));
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.authorization())
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "discord message fetch failed: status={status} body={text}"
            ));
        }
        let payload: DiscordMessagePayload = resp.json().await?;
        build_chat_message(payload)
            .ok_or_else(|| anyhow::anyhow!("discord message {message} has no scannable content"))
    }

    /// One page of channel history strictly after `after` (channel start when
    /// absent) and strictly before `before`. The REST API only accepts one
    /// positional filter, so the upper bound is applied here from the ids.
    pub async fn history_page(
        &self,
        channel: &ChannelId,
        after: Option<&MessageId>,
        before: &MessageId,
    ) -> Result<Vec<ChatMessage>> {
        let after_param = after.map_or_else(|| "0".to_string(), |id| id.as_str().to_string());
        let url = self.api_url(&format!("/channels/{channel}/messages"));
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.authorization())
            .query(&[
                ("limit", DISCORD_HISTORY_PAGE_LIMIT.to_string()),
                ("after", after_param),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "discord history fetch failed: status={status} body={text}"
            ));
        }
        let payloads: Vec<DiscordMessagePayload> = resp.json().await?;
        Ok(history_messages(payloads, before))
    }

    pub async fn latest_message_id(&self, channel: &ChannelId) -> Result<Option<MessageId>> {
        let url = self.api_url(&format!("/channels/{channel}"));
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.authorization())
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "discord channel fetch failed: status={status} body={text}"
            ));
        }
        let payload: DiscordChannelPayload = resp.json().await?;
        Ok(payload.last_message_id.map(MessageId::new))
    }

    pub async fn direct_message(&self, user: &UserId, content: &str) -> Result<()> {
        let url = self.api_url("/users/@me/channels");
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.authorization())
            .json(&serde_json::json!({ "recipient_id": user.as_str() }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "discord dm channel create failed: status={status} body={text}"
            ));
        }
        let dm: DiscordChannelIdPayload = resp.json().await?;
        self.send_reply(&ChannelId::new(dm.id), &OutboundReply::text(content))
            .await?;
        Ok(())
    }

    /// Acknowledges a component interaction without changing the message
    /// (callback type 6, deferred update).
    pub async fn ack_component(&self, press: &ComponentPress) -> Result<()> {
        let url = self.api_url(&format!(
            "/interactions/{}/{}/callback",
            press.interaction_id, press.interaction_token
        ));
        let resp = self
            .http
            .post(url)
            .json(&serde_json::json!({ "type": 6 }))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "discord interaction ack failed: status={status} body={text}"
            ));
        }
        Ok(())
    }
}

fn transient_retry_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis((DISCORD_RETRY_BASE_MS * multiplier).min(DISCORD_RETRY_MAX_MS))
}

fn build_chat_message(payload: DiscordMessagePayload) -> Option<ChatMessage> {
    let author = payload.author?;
    let content = payload.content?;
    let created_at = payload
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(|| snowflake_timestamp(&payload.id));
    Some(ChatMessage {
        id: MessageId::new(payload.id),
        channel_id: ChannelId::new(payload.channel_id),
        guild_id: payload.guild_id,
        author_id: UserId::new(author.id),
        author_is_bot: author.bot,
        content,
        created_at,
    })
}

fn build_component_press(payload: DiscordInteractionPayload) -> Option<ComponentPress> {
    // Type 3 is MESSAGE_COMPONENT; everything else is not ours.
    if payload.kind != 3 {
        return None;
    }
    let custom_id = payload.data?.custom_id?;
    let channel_id = payload.channel_id?;
    let presser = payload
        .member
        .and_then(|member| member.user)
        .or(payload.user)?;
    Some(ComponentPress {
        interaction_id: payload.id,
        interaction_token: payload.token,
        channel_id: ChannelId::new(channel_id),
        presser_id: UserId::new(presser.id),
        custom_id,
    })
}

fn history_messages(
    payloads: Vec<DiscordMessagePayload>,
    before: &MessageId,
) -> Vec<ChatMessage> {
    let horizon = snowflake(before.as_str());
    payloads
        .into_iter()
        .filter(|payload| match (snowflake(&payload.id), horizon) {
            (Some(id), Some(horizon)) => id < horizon,
            _ => false,
        })
        .filter_map(build_chat_message)
        .collect()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn snowflake(id: &str) -> Option<u64> {
    id.parse::<u64>().ok()
}

/// Creation time encoded in a snowflake's upper bits; used when a gateway
/// payload carries no timestamp field.
fn snowflake_timestamp(id: &str) -> DateTime<Utc> {
    let Some(value) = snowflake(id) else {
        return Utc::now();
    };
    let ms = DISCORD_EPOCH_MS + ((value >> 22) as i64);
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[derive(Debug, Deserialize)]
struct DiscordMessagePayload {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    author: Option<DiscordAuthor>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordAuthor {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordInteractionPayload {
    id: String,
    token: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    data: Option<DiscordInteractionData>,
    #[serde(default)]
    member: Option<DiscordMember>,
    #[serde(default)]
    user: Option<DiscordAuthor>,
}

#[derive(Debug, Deserialize)]
struct DiscordInteractionData {
    #[serde(default)]
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordMember {
    #[serde(default)]
    user: Option<DiscordAuthor>,
}

#[derive(Debug, Deserialize)]
struct DiscordChannelPayload {
    #[serde(default)]
    last_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordChannelIdPayload {
    id: String,
}
