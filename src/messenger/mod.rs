//! Notification delivery.
//!
//! The tracker hands every accepted stream to a [`Messenger`] once per room.
//! The chat command handler uses the same trait for its replies.

pub mod discord;
pub mod gateway;
pub mod memory;

use crate::store::Room;
use crate::stream::Stream;
use async_trait::async_trait;
use thiserror::Error;

pub use discord::{DiscordConfig, DiscordMessenger};
pub use memory::{Delivery, MemoryMessenger};

/// Errors that can occur while delivering a message.
#[derive(Debug, Error)]
pub enum MessengerError {
    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The chat service rejected the request.
    #[error("chat api returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Websocket failure on the gateway connection.
    #[error("gateway error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The gateway sent something we could not use.
    #[error("gateway protocol error: {0}")]
    Protocol(String),

    /// Delivery refused by a local messenger.
    #[error("delivery to room {0} refused")]
    Refused(String),
}

/// Delivers notifications to rooms.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Announce that `stream` went live.
    async fn message_stream(&self, room: &Room, stream: &Stream) -> Result<(), MessengerError>;

    /// Post the list of streams that are live right now.
    async fn message_stream_list(
        &self,
        room: &Room,
        streams: &[Stream],
    ) -> Result<(), MessengerError>;

    /// Post free-form text.
    async fn message_text(&self, room: &Room, text: &str) -> Result<(), MessengerError>;
}
