use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(ChannelId);
id_newtype!(UserId);

/// A chat message as the engine sees it: identity, origin, text, and a
/// creation timestamp for backlog ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<String>,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A button press on one of our own replies.
#[derive(Debug, Clone)]
pub struct ComponentPress {
    pub interaction_id: String,
    pub interaction_token: String,
    pub channel_id: ChannelId,
    pub presser_id: UserId,
    pub custom_id: String,
}

/// Inbound events from the Discord gateway.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Gateway session established; carries our own user id.
    Ready { bot_user_id: UserId },
    MessageCreated(ChatMessage),
    MessageEdited(ChatMessage),
    ButtonPressed(ComponentPress),
}

/// A single actionable control attached to a reply.
#[derive(Debug, Clone)]
pub struct ReplyButton {
    pub label: String,
    pub custom_id: String,
}

#[derive(Debug, Clone)]
pub struct OutboundReply {
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub button: Option<ReplyButton>,
}

impl OutboundReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reply_to: None,
            button: None,
        }
    }

    pub fn in_reply_to(mut self, message: MessageId) -> Self {
        self.reply_to = Some(message);
        self
    }

    pub fn with_button(mut self, button: ReplyButton) -> Self {
        self.button = Some(button);
        self
    }
}
