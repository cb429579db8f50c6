//! Discord REST messenger.
//!
//! Announcements are sent as rich embeds through the channel messages
//! endpoint using a bot token.

use super::{Messenger, MessengerError};
use crate::store::Room;
use crate::stream::Stream;
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const EMBED_COLOR: u32 = 0x00aa00;
const SERVICE_NAME: &str = "Twitch";
const SERVICE_ICON_URL: &str = "https://assets.help.twitch.tv/Glitch_Purple_RGB.png";

/// Discord API configuration.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Bot token, without the `Bot ` prefix
    pub token: String,
    /// REST API base URL
    pub api_base: String,
    /// Gateway websocket URL
    pub gateway_url: String,
}

impl DiscordConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: "https://discord.com/api/v10".to_string(),
            gateway_url: "wss://gateway.discord.gg/?v=10&encoding=json".to_string(),
        }
    }

    /// Get the message endpoint URL for a channel.
    pub fn messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel_id)
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }
}

/// Sends messages to Discord channels.
pub struct DiscordMessenger {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordMessenger {
    /// Create a new messenger.
    pub fn new(config: DiscordConfig) -> Result<Self, MessengerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { config, client })
    }

    async fn post(&self, room: &Room, message: &CreateMessage) -> Result<(), MessengerError> {
        let response = self
            .client
            .post(self.config.messages_url(&room.id))
            .header("Authorization", self.config.authorization())
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MessengerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(room = %room, "message posted");
        Ok(())
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn message_stream(&self, room: &Room, stream: &Stream) -> Result<(), MessengerError> {
        let cache_token = uuid::Uuid::new_v4().simple();
        let message = CreateMessage::embed(stream_embed(stream, &cache_token.to_string()));
        self.post(room, &message).await
    }

    async fn message_stream_list(
        &self,
        room: &Room,
        streams: &[Stream],
    ) -> Result<(), MessengerError> {
        self.post(room, &CreateMessage::embed(list_embed(streams)))
            .await
    }

    async fn message_text(&self, room: &Room, text: &str) -> Result<(), MessengerError> {
        self.post(room, &CreateMessage::text(text)).await
    }
}

/// Title for a went-live embed. Shows the login too when it differs from the
/// display name by more than case.
pub fn went_live_title(display_name: &str, login: &str) -> String {
    if display_name.to_lowercase() == login.to_lowercase() {
        format!("{display_name} Went Live!")
    } else {
        format!(
            "{} ({}) Went Live!",
            escape_markdown(display_name),
            escape_markdown(login)
        )
    }
}

fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
}

fn stream_link(stream: &Stream) -> String {
    format!("[{}]({})", stream.title, stream.user.channel_url())
}

fn stream_embed(stream: &Stream, cache_token: &str) -> Embed {
    let channel_url = stream.user.channel_url();
    Embed {
        title: Some(went_live_title(&stream.user.display_name, &stream.user.login)),
        description: Some(stream_link(stream)),
        color: Some(EMBED_COLOR),
        image: Some(EmbedImage {
            url: format!(
                "{}?cache_invalidation_token={cache_token}",
                stream.thumbnail_url
            ),
            width: 1280,
            height: 720,
        }),
        thumbnail: stream
            .user
            .profile_image_url
            .as_ref()
            .map(|url| EmbedImage {
                url: url.clone(),
                width: 300,
                height: 300,
            }),
        author: Some(EmbedAuthor {
            name: SERVICE_NAME.to_string(),
            url: channel_url,
            icon_url: SERVICE_ICON_URL.to_string(),
        }),
        timestamp: Some(stream.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        footer: Some(EmbedFooter {
            text: "Live since".to_string(),
        }),
        fields: Vec::new(),
    }
}

fn list_embed(streams: &[Stream]) -> Embed {
    Embed {
        title: Some("Currently Live".to_string()),
        fields: streams
            .iter()
            .map(|s| EmbedField {
                name: s.user.login.clone(),
                value: stream_link(s),
            })
            .collect(),
        ..Embed::default()
    }
}

#[derive(Debug, Serialize)]
struct CreateMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<Embed>,
}

impl CreateMessage {
    fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            embeds: Vec::new(),
        }
    }

    fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<EmbedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct EmbedImage {
    url: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct EmbedAuthor {
    name: String,
    url: String,
    icon_url: String,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::User;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn sample_stream() -> Stream {
        Stream {
            id: "40001".to_string(),
            user: User {
                id: "77".to_string(),
                login: "block_dropper".to_string(),
                display_name: "ブロック".to_string(),
                profile_image_url: Some("https://cdn.example/avatar.png".to_string()),
            },
            title: "sprint practice".to_string(),
            thumbnail_url: "https://cdn.example/live_1280x720.jpg".to_string(),
            started_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap(),
        }
    }

    fn test_config(server: &MockServer) -> DiscordConfig {
        let mut config = DiscordConfig::new("secret-token");
        config.api_base = server.uri();
        config
    }

    #[test]
    fn test_went_live_title() {
        assert_eq!(went_live_title("Dropper", "dropper"), "Dropper Went Live!");
        assert_eq!(
            went_live_title("ブロック", "block_dropper"),
            "ブロック (block\\_dropper) Went Live!"
        );
    }

    #[test]
    fn test_config_urls() {
        let config = DiscordConfig::new("abc");
        assert_eq!(
            config.messages_url("123"),
            "https://discord.com/api/v10/channels/123/messages"
        );
        assert_eq!(config.authorization(), "Bot abc");
    }

    #[tokio::test]
    async fn test_message_stream_posts_embed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/channels/555/messages"))
            .and(header("Authorization", "Bot secret-token"))
            .and(body_partial_json(serde_json::json!({
                "embeds": [{
                    "title": "ブロック (block\\_dropper) Went Live!",
                    "description": "[sprint practice](https://twitch.tv/block_dropper)",
                    "color": 0x00aa00,
                    "timestamp": "2024-03-01T10:15:00Z",
                    "footer": { "text": "Live since" },
                    "author": { "name": "Twitch", "url": "https://twitch.tv/block_dropper" },
                    "thumbnail": { "url": "https://cdn.example/avatar.png", "width": 300, "height": 300 }
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "1"})))
            .expect(1)
            .mount(&server)
            .await;

        let messenger = DiscordMessenger::new(test_config(&server)).unwrap();
        messenger
            .message_stream(&Room::new("555"), &sample_stream())
            .await
            .unwrap();

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let image_url = body["embeds"][0]["image"]["url"].as_str().unwrap();
        assert!(image_url
            .starts_with("https://cdn.example/live_1280x720.jpg?cache_invalidation_token="));
    }

    #[tokio::test]
    async fn test_message_stream_list_and_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/channels/9/messages"))
            .and(body_partial_json(serde_json::json!({
                "embeds": [{
                    "title": "Currently Live",
                    "fields": [{
                        "name": "block_dropper",
                        "value": "[sprint practice](https://twitch.tv/block_dropper)"
                    }]
                }]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/channels/9/messages"))
            .and(body_partial_json(serde_json::json!({ "content": "hello" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let messenger = DiscordMessenger::new(test_config(&server)).unwrap();
        let room = Room::new("9");
        messenger
            .message_stream_list(&room, &[sample_stream()])
            .await
            .unwrap();
        messenger.message_text(&room, "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Missing Access"))
            .mount(&server)
            .await;

        let messenger = DiscordMessenger::new(test_config(&server)).unwrap();
        let err = messenger
            .message_text(&Room::new("1"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MessengerError::Api { status: 403, ref message } if message == "Missing Access"
        ));
    }
}
