//! Twitch Helix fetcher.
//!
//! Polls the streams endpoint for a single game and resolves the owners'
//! profiles so notifications can show display names and avatars.

use super::{Batch, FetchError, Fetcher, Stream, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Thumbnail dimensions substituted into the service's URL template.
const THUMBNAIL_WIDTH: &str = "1280";
const THUMBNAIL_HEIGHT: &str = "720";

/// Tokens are refreshed this long before the service says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Twitch API configuration.
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    /// Application client id
    pub client_id: String,
    /// Application client secret
    pub client_secret: String,
    /// Game whose live streams are tracked
    pub game_id: String,
    /// Helix API base URL
    pub api_base: String,
    /// OAuth base URL
    pub auth_base: String,
}

impl TwitchConfig {
    /// Create a configuration pointing at the public Twitch endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        game_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            game_id: game_id.into(),
            api_base: "https://api.twitch.tv/helix".to_string(),
            auth_base: "https://id.twitch.tv".to_string(),
        }
    }

    /// Get the streams endpoint URL.
    pub fn streams_url(&self) -> String {
        format!("{}/streams", self.api_base)
    }

    /// Get the users endpoint URL.
    pub fn users_url(&self) -> String {
        format!("{}/users", self.api_base)
    }

    /// Get the OAuth token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.auth_base)
    }
}

#[derive(Debug, Clone)]
struct AppToken {
    access_token: String,
    expires_at: Instant,
}

impl AppToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

/// Fetches live streams for one game from Twitch.
pub struct TwitchFetcher {
    config: TwitchConfig,
    client: reqwest::Client,
    token: Mutex<Option<AppToken>>,
}

impl TwitchFetcher {
    /// Create a new fetcher.
    pub fn new(config: TwitchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    /// Return a cached app access token, requesting a new one when needed.
    async fn access_token(&self) -> Result<String, FetchError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .post(self.config.token_url())
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("token response: {e}")))?;

        debug!(expires_in = body.expires_in, "obtained app access token");

        let token = AppToken {
            access_token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: String,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(url)
            .header("Client-Id", &self.config.client_id)
            .header("Authorization", format!("Bearer {token}"))
            .query(query)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Revoked or expired early; the next tick requests a new one.
            *self.token.lock().await = None;
        }

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn fetch_live(&self) -> Result<Batch, FetchError> {
        let streams: DataResponse<RawStream> = self
            .get(
                self.config.streams_url(),
                &[("game_id", self.config.game_id.as_str()), ("first", "100")],
            )
            .await?;

        if streams.data.is_empty() {
            return Ok(Vec::new());
        }

        let query: Vec<(&str, &str)> = streams
            .data
            .iter()
            .map(|s| ("id", s.user_id.as_str()))
            .collect();
        let users: DataResponse<RawUser> = self.get(self.config.users_url(), &query).await?;
        let users: HashMap<String, RawUser> =
            users.data.into_iter().map(|u| (u.id.clone(), u)).collect();

        streams
            .data
            .into_iter()
            .map(|raw| {
                let profile = users.get(&raw.user_id);
                construct_stream(raw, profile)
            })
            .collect()
    }
}

#[async_trait]
impl Fetcher for TwitchFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Batch, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.fetch_live() => result,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(FetchError::Status {
        status: status.as_u16(),
        message,
    })
}

fn construct_stream(raw: RawStream, profile: Option<&RawUser>) -> Result<Stream, FetchError> {
    let started_at = DateTime::parse_from_rfc3339(&raw.started_at)
        .map_err(|e| FetchError::Decode(format!("started_at '{}': {e}", raw.started_at)))?
        .with_timezone(&Utc);

    let thumbnail_url = raw
        .thumbnail_url
        .replace("{width}", THUMBNAIL_WIDTH)
        .replace("{height}", THUMBNAIL_HEIGHT);

    let user = User {
        id: raw.user_id,
        login: profile
            .map(|p| p.login.clone())
            .unwrap_or_else(|| raw.user_login.clone()),
        display_name: profile
            .map(|p| p.display_name.clone())
            .unwrap_or(raw.user_name),
        profile_image_url: profile
            .map(|p| p.profile_image_url.clone())
            .filter(|u| !u.is_empty()),
    };

    Ok(Stream {
        id: raw.id,
        user,
        title: raw.title,
        thumbnail_url,
        started_at,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    id: String,
    user_id: String,
    #[serde(default)]
    user_login: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnail_url: String,
    started_at: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    login: String,
    display_name: String,
    #[serde(default)]
    profile_image_url: String,
}
