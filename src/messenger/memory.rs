//! In-process messenger.
//!
//! Keeps every delivery in memory and logs it instead of talking to a chat
//! service. Used by `livewatch run --dry-run` and by tests, which can also
//! mark rooms as failing to exercise the delivery-abort path.

use super::{Messenger, MessengerError};
use crate::store::Room;
use crate::stream::Stream;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::info;

/// One message handed to the messenger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A "went live" announcement.
    Stream { room: String, stream_id: String },
    /// A live-list reply, by stream id.
    StreamList { room: String, stream_ids: Vec<String> },
    /// Plain text.
    Text { room: String, text: String },
}

impl Delivery {
    /// Room the message went to.
    pub fn room(&self) -> &str {
        match self {
            Delivery::Stream { room, .. }
            | Delivery::StreamList { room, .. }
            | Delivery::Text { room, .. } => room,
        }
    }
}

/// Messenger that records instead of sending.
#[derive(Debug, Default)]
pub struct MemoryMessenger {
    deliveries: Mutex<Vec<Delivery>>,
    failing: Mutex<HashSet<String>>,
    log_only: bool,
}

impl MemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A messenger that logs deliveries but keeps nothing, for long dry runs.
    pub fn log_only() -> Self {
        Self {
            log_only: true,
            ..Self::default()
        }
    }

    /// Make every delivery to `room` fail with [`MessengerError::Refused`].
    pub fn fail_room(&self, room: impl Into<String>) {
        self.failing.lock().insert(room.into());
    }

    /// Undo [`fail_room`](Self::fail_room).
    pub fn heal_room(&self, room: &str) {
        self.failing.lock().remove(room);
    }

    /// Every successful delivery so far, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Stream ids announced so far, in order, one entry per room.
    pub fn announced(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Stream { stream_id, .. } => Some(stream_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text replies so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.deliveries.lock().clear();
    }

    fn record(&self, room: &Room, delivery: Delivery) -> Result<(), MessengerError> {
        if self.failing.lock().contains(&room.id) {
            return Err(MessengerError::Refused(room.id.clone()));
        }
        if !self.log_only {
            self.deliveries.lock().push(delivery);
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for MemoryMessenger {
    async fn message_stream(&self, room: &Room, stream: &Stream) -> Result<(), MessengerError> {
        self.record(
            room,
            Delivery::Stream {
                room: room.id.clone(),
                stream_id: stream.id.clone(),
            },
        )?;
        info!(room = %room, stream_id = %stream.id, user = %stream.user.display_name, "went live");
        Ok(())
    }

    async fn message_stream_list(
        &self,
        room: &Room,
        streams: &[Stream],
    ) -> Result<(), MessengerError> {
        self.record(
            room,
            Delivery::StreamList {
                room: room.id.clone(),
                stream_ids: streams.iter().map(|s| s.id.clone()).collect(),
            },
        )?;
        info!(room = %room, count = streams.len(), "live list");
        Ok(())
    }

    async fn message_text(&self, room: &Room, text: &str) -> Result<(), MessengerError> {
        self.record(
            room,
            Delivery::Text {
                room: room.id.clone(),
                text: text.to_string(),
            },
        )?;
        info!(room = %room, text, "text");
        Ok(())
    }
}
