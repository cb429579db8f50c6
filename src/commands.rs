//! Chat commands addressed to the bot.
//!
//! A command is a message that starts with a mention of the bot followed by
//! a command word and optional arguments:
//!
//! ```text
//! @bot list
//! @bot spam #announcements
//! @bot forget #announcements
//! @bot help
//! ```
//!
//! Replies go back to the room the command was posted in. Unknown commands
//! are ignored.

use crate::messenger::{Messenger, MessengerError};
use crate::store::{ReportStore, Room, StoreError};
use crate::tracker::LiveStreams;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, info};

/// Reply to the `help` command.
pub const HELP_TEXT: &str = "```\nUSAGE\n\
    \tspam - Add channel to list of spammable channels\n\
    \tforget - Remove channel from list of spammable channels\n\
    \tlist - List currently live streamers\n\
    \thelp - Display this message```";

const NOBODY_LIVE: &str = "Nobody is currently streaming :pensive:";
const SPAM_USAGE: &str = "Command `spam` requires an argument - channel where it will spam";
const FORGET_USAGE: &str =
    "Command `forget` requires an argument - channel which to exclude from spamming";
const IMPROPER_ROOM: &str = "Improper room format";

/// Errors that can occur while handling a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("reply failed: {0}")]
    Reply(#[from] MessengerError),
}

/// A recognised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Spam(Option<String>),
    Forget(Option<String>),
    Help,
}

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<@!?\d+>\s+(\w+)((?:\s*[\w<>#]+)*)\s*$").expect("command pattern compiles")
});

static ROOM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#(\d+)>").expect("room pattern compiles"));

impl Command {
    /// Parse a chat message. Returns `None` for anything that is not a known
    /// command.
    pub fn parse(message: &str) -> Option<Self> {
        let caps = COMMAND_RE.captures(message.trim())?;
        let name = caps.get(1)?.as_str();
        let first_arg = caps
            .get(2)
            .and_then(|m| m.as_str().split_whitespace().next())
            .map(str::to_string);

        match name {
            "list" => Some(Command::List),
            "spam" => Some(Command::Spam(first_arg)),
            "forget" => Some(Command::Forget(first_arg)),
            "help" => Some(Command::Help),
            _ => None,
        }
    }
}

/// Extract the channel id from a `<#123>` channel mention.
pub fn parse_room(arg: &str) -> Option<Room> {
    ROOM_RE
        .captures(arg)
        .and_then(|caps| caps.get(1))
        .map(|m| Room::new(m.as_str()))
}

/// Executes commands against the store and the tracker's live set.
pub struct CommandHandler {
    store: Arc<dyn ReportStore>,
    live: LiveStreams,
    messenger: Arc<dyn Messenger>,
}

impl CommandHandler {
    pub fn new(
        store: Arc<dyn ReportStore>,
        live: LiveStreams,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            store,
            live,
            messenger,
        }
    }

    /// Handle one message posted in `source`.
    pub async fn handle(&self, source: &Room, message: &str) -> Result<(), CommandError> {
        let Some(command) = Command::parse(message) else {
            debug!(room = %source, "not a command");
            return Ok(());
        };

        info!(room = %source, ?command, "handling command");

        match command {
            Command::List => self.list(source).await,
            Command::Spam(arg) => self.spam(source, arg.as_deref()).await,
            Command::Forget(arg) => self.forget(source, arg.as_deref()).await,
            Command::Help => self.reply(source, HELP_TEXT).await,
        }
    }

    async fn list(&self, source: &Room) -> Result<(), CommandError> {
        let streams = self.live.snapshot();
        if streams.is_empty() {
            return self.reply(source, NOBODY_LIVE).await;
        }
        self.messenger
            .message_stream_list(source, &streams)
            .await
            .map_err(CommandError::from)
    }

    async fn spam(&self, source: &Room, arg: Option<&str>) -> Result<(), CommandError> {
        let Some(arg) = arg else {
            return self.reply(source, SPAM_USAGE).await;
        };
        let Some(room) = parse_room(arg) else {
            return self.reply(source, IMPROPER_ROOM).await;
        };

        match self.store.add_room(&room).await {
            Ok(()) => {
                info!(room = %room, "room added");
                self.reply(source, &format!("Successfully added room <#{room}>"))
                    .await
            }
            Err(StoreError::Duplicate(_)) => {
                self.reply(
                    source,
                    &format!("Failed to add channel <#{room}>: it is already added."),
                )
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn forget(&self, source: &Room, arg: Option<&str>) -> Result<(), CommandError> {
        let Some(arg) = arg else {
            return self.reply(source, FORGET_USAGE).await;
        };
        let Some(room) = parse_room(arg) else {
            return self.reply(source, IMPROPER_ROOM).await;
        };

        let removed = match self.store.remove_room(&room).await {
            Ok(removed) => removed,
            Err(e) => {
                self.reply(source, &format!("Failed to remove room <#{room}> :pensive:"))
                    .await?;
                return Err(e.into());
            }
        };

        if removed {
            info!(room = %room, "room removed");
            self.reply(source, &format!("Successfully removed room <#{room}>"))
                .await
        } else {
            self.reply(source, &format!("Failed to remove room <#{room}> :pensive:"))
                .await
        }
    }

    async fn reply(&self, source: &Room, text: &str) -> Result<(), CommandError> {
        self.messenger
            .message_text(source, text)
            .await
            .map_err(CommandError::from)
    }
}
