//! Process wiring for `livewatch run`.

use crate::clock;
use crate::commands::CommandHandler;
use crate::config::Config;
use crate::messenger::gateway::GatewayListener;
use crate::messenger::{DiscordConfig, DiscordMessenger, MemoryMessenger, Messenger};
use crate::store::{ReportStore, SqliteStore};
use crate::stream::{TwitchConfig, TwitchFetcher};
use crate::tracker::Tracker;
use crate::watcher::PeriodicWatcher;
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Log announcements instead of sending them; no chat connection.
    pub dry_run: bool,
}

/// Run the tracker until `cancel` fires.
pub async fn run(config: Config, options: RunOptions, cancel: CancellationToken) -> anyhow::Result<()> {
    config
        .validate(!options.dry_run)
        .context("invalid configuration")?;
    config.ensure_directories()?;

    let store: Arc<dyn ReportStore> = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))?,
    );

    let fetcher = Arc::new(
        TwitchFetcher::new(TwitchConfig::new(
            &config.twitch_client_id,
            &config.twitch_secret,
            &config.game_id,
        ))
        .context("failed to create Twitch client")?,
    );

    let discord = DiscordConfig::new(&config.discord_token);
    let messenger: Arc<dyn Messenger> = if options.dry_run {
        info!("dry run: announcements are only logged");
        Arc::new(MemoryMessenger::log_only())
    } else {
        Arc::new(DiscordMessenger::new(discord.clone()).context("failed to create Discord client")?)
    };

    let clock = clock::system();
    let tracker = Tracker::new(Arc::clone(&store), Arc::clone(&messenger), Arc::clone(&clock));

    let gateway = if options.dry_run {
        None
    } else {
        let handler = Arc::new(CommandHandler::new(
            Arc::clone(&store),
            tracker.live(),
            Arc::clone(&messenger),
        ));
        let listener = GatewayListener::new(discord, handler);
        Some(tokio::spawn(listener.run(cancel.clone())))
    };

    #[cfg(feature = "server")]
    let server = match config.server_port {
        Some(port) => {
            let state = crate::server::ServerState::new(tracker.live(), tracker.stats(), clock);
            Some(crate::server::run(crate::server::ServerConfig::new(port), state).await?)
        }
        None => None,
    };
    #[cfg(not(feature = "server"))]
    if config.server_port.is_some() {
        warn!("server_port ignored (server feature not enabled at compile time)");
    }

    info!(
        game_id = %config.game_id,
        poll_secs = config.poll_interval.as_secs(),
        db = %config.db_path.display(),
        "livewatch running"
    );

    let watcher =
        PeriodicWatcher::new(fetcher, config.poll_interval).with_buffer(config.channel_buffer);
    tracker.run(watcher, cancel.clone()).await;

    if let Some(handle) = gateway {
        if let Err(e) = handle.await {
            warn!(error = %e, "gateway task failed");
        }
    }

    #[cfg(feature = "server")]
    if let Some((_, shutdown)) = server {
        let _ = shutdown.send(());
    }

    info!("livewatch stopped");
    Ok(())
}
