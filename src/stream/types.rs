//! Live stream snapshots as reported by the streaming service.
//!
//! A [`Stream`] is one observed live instance at poll time. Its `id` changes
//! whenever the owner restarts the broadcast; `user.id` stays the same.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The account that produces streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier on the service, invariant across restarts.
    pub id: String,
    /// Login name, used to build channel links.
    pub login: String,
    /// Name as shown to viewers. May differ from `login` in case or script.
    pub display_name: String,
    /// Avatar URL, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

impl User {
    /// Create a user with only an id; names default to the id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            login: id.clone(),
            display_name: id.clone(),
            id,
            profile_image_url: None,
        }
    }

    /// Link to the user's channel page.
    pub fn channel_url(&self) -> String {
        format!("https://twitch.tv/{}", self.login)
    }
}

/// One live stream instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Identifier of this instance; a restart produces a new one.
    pub id: String,
    /// Owner of the stream.
    pub user: User,
    /// Stream title.
    pub title: String,
    /// Preview image URL with dimensions already filled in.
    pub thumbnail_url: String,
    /// When this instance went live.
    pub started_at: DateTime<Utc>,
}

impl Stream {
    /// Whether `other` is the same instance (compared by id only).
    pub fn is_same_instance(&self, other: &Stream) -> bool {
        self.id == other.id
    }

    /// Owner id, the key restart windows are computed over.
    pub fn owner_id(&self) -> &str {
        &self.user.id
    }
}

/// One poll cycle's full snapshot.
pub type Batch = Vec<Stream>;
