//! Chat transport for tunebridge.
//!
//! Discord gateway + REST adapter. Delivers inbound chat events over an mpsc
//! channel and exposes the small REST surface the bot needs: replies (with an
//! optional action button), history pagination, message lookup, direct
//! messages, and component acks.

mod discord;
mod types;

pub use discord::DiscordAdapter;
pub use types::{
    ChannelId, ChatEvent, ChatMessage, ComponentPress, MessageId, OutboundReply, ReplyButton,
    UserId,
};
