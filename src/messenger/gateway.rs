//! Discord gateway listener.
//!
//! Keeps a websocket session to the gateway so the bot can see messages
//! that mention it and hand them to the [`CommandHandler`]. The session
//! identifies with the bot token, heartbeats at the interval the gateway
//! asks for, and reconnects after a delay whenever the socket drops.

use super::discord::DiscordConfig;
use super::MessengerError;
use crate::commands::CommandHandler;
use crate::store::Room;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// `GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT`
const INTENTS: u64 = (1 << 9) | (1 << 12) | (1 << 15);

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One gateway frame.
#[derive(Debug, Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// What a dispatch means to the listener.
#[derive(Debug, PartialEq, Eq)]
enum Event {
    Ready { user_id: String },
    Mention { channel_id: String, content: String },
    Ignored,
}

fn interpret_dispatch(event_type: Option<&str>, data: &Value, bot_id: Option<&str>) -> Event {
    match event_type {
        Some("READY") => match data["user"]["id"].as_str() {
            Some(id) => Event::Ready {
                user_id: id.to_string(),
            },
            None => Event::Ignored,
        },
        Some("MESSAGE_CREATE") => {
            let Some(bot_id) = bot_id else {
                return Event::Ignored;
            };
            if data["author"]["id"].as_str() == Some(bot_id) {
                return Event::Ignored;
            }
            let mentioned = data["mentions"]
                .as_array()
                .is_some_and(|users| users.iter().any(|u| u["id"].as_str() == Some(bot_id)));
            match (mentioned, data["channel_id"].as_str(), data["content"].as_str()) {
                (true, Some(channel_id), Some(content)) => Event::Mention {
                    channel_id: channel_id.to_string(),
                    content: content.to_string(),
                },
                _ => Event::Ignored,
            }
        }
        _ => Event::Ignored,
    }
}

fn heartbeat(seq: Option<u64>) -> Message {
    Message::Text(json!({ "op": OP_HEARTBEAT, "d": seq }).to_string().into())
}

/// Listens for bot mentions on the gateway.
pub struct GatewayListener {
    config: DiscordConfig,
    handler: Arc<CommandHandler>,
    reconnect_delay: Duration,
}

impl GatewayListener {
    pub fn new(config: DiscordConfig, handler: Arc<CommandHandler>) -> Self {
        Self {
            config,
            handler,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Set how long to wait before reconnecting a dropped session.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Keep a session open until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("gateway listener started");

        loop {
            match self.session(&cancel).await {
                Ok(()) if cancel.is_cancelled() => break,
                Ok(()) => info!("gateway session closed"),
                Err(e) => warn!(error = %e, "gateway session failed"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {
                    debug!("reconnecting to gateway");
                }
            }
        }

        info!("gateway listener stopped");
    }

    /// One gateway session. Returns `Ok(())` when cancelled or when the
    /// gateway ends the stream cleanly.
    async fn session(&self, cancel: &CancellationToken) -> Result<(), MessengerError> {
        let handshake = async {
            let (ws, _) = connect_async(self.config.gateway_url.as_str()).await?;
            let (sink, mut source) = ws.split();

            let hello = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => break parse_payload(&text)?,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(MessengerError::from(e)),
                    None => return Err(MessengerError::Protocol("closed before hello".into())),
                }
            };
            if hello.op != OP_HELLO {
                return Err(MessengerError::Protocol(format!(
                    "expected hello, got op {}",
                    hello.op
                )));
            }
            let interval_ms = hello.d["heartbeat_interval"].as_u64().ok_or_else(|| {
                MessengerError::Protocol("hello without heartbeat_interval".into())
            })?;
            Ok::<_, MessengerError>((sink, source, interval_ms))
        };

        let (mut sink, mut source, interval_ms) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            handshake = handshake => handshake?,
        };
        let period = Duration::from_millis(interval_ms.max(1));

        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.config.token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": env!("CARGO_PKG_NAME"),
                    "device": env!("CARGO_PKG_NAME"),
                }
            }
        });
        sink.send(Message::Text(identify.to_string().into())).await?;
        debug!(heartbeat_ms = interval_ms, "identified");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq: Option<u64> = None;
        let mut bot_id: Option<String> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticker.tick() => sink.send(heartbeat(seq)).await?,
                frame = source.next() => {
                    let payload = match frame {
                        None => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(Message::Text(text))) => parse_payload(&text)?,
                        Some(Ok(Message::Close(frame))) => {
                            return Err(MessengerError::Protocol(format!("closed by gateway: {frame:?}")));
                        }
                        Some(Ok(_)) => continue,
                    };

                    if payload.s.is_some() {
                        seq = payload.s;
                    }

                    match payload.op {
                        OP_DISPATCH => {
                            match interpret_dispatch(payload.t.as_deref(), &payload.d, bot_id.as_deref()) {
                                Event::Ready { user_id } => {
                                    info!(user_id = %user_id, "gateway ready");
                                    bot_id = Some(user_id);
                                }
                                Event::Mention { channel_id, content } => self.dispatch(channel_id, content),
                                Event::Ignored => {}
                            }
                        }
                        OP_HEARTBEAT => sink.send(heartbeat(seq)).await?,
                        OP_HEARTBEAT_ACK => {}
                        OP_RECONNECT | OP_INVALID_SESSION => {
                            return Err(MessengerError::Protocol(format!("gateway asked to reconnect (op {})", payload.op)));
                        }
                        other => debug!(op = other, "unhandled gateway op"),
                    }
                }
            }
        }
    }

    /// Run a command off the socket task so heartbeats keep flowing.
    fn dispatch(&self, channel_id: String, content: String) {
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let room = Room::new(channel_id);
            if let Err(e) = handler.handle(&room, &content).await {
                warn!(room = %room, error = %e, "command failed");
            }
        });
    }
}

fn parse_payload(text: &str) -> Result<Payload, MessengerError> {
    serde_json::from_str(text).map_err(|e| MessengerError::Protocol(format!("bad payload: {e}")))
}
