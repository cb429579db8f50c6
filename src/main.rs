//! livewatch CLI
//!
//! Watches a streaming service for newly live channels and announces them.

use clap::{ArgAction, Parser, Subcommand};
use livewatch::app::{self, RunOptions};
use livewatch::commands::parse_room;
use livewatch::config::Config;
use livewatch::store::{migrations, ReportStore, Room, SqliteStore, StoreError};
use livewatch::{HELP_TEXT, VERSION};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "livewatch")]
#[command(version = VERSION)]
#[command(about = "Announces newly live streams to chat rooms", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Report database, overriding the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Include timestamps in log lines
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    log_time: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll and announce until interrupted
    Run {
        /// Log announcements instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage the rooms that receive announcements
    Rooms {
        #[command(subcommand)]
        action: RoomsAction,
    },

    /// Print the report log
    Reports {
        /// Output format (json or jsonl)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Show configuration
    Config,

    /// Create the report database and apply migrations
    InitDb,

    /// Print the chat command usage text
    HelpText,
}

#[derive(Subcommand)]
enum RoomsAction {
    /// List rooms
    List,
    /// Add a room by id or `<#id>` mention
    Add { room: String },
    /// Remove a room by id or `<#id>` mention
    Remove { room: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_time);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { dry_run } => cmd_run(config, dry_run).await,
        Commands::Rooms { action } => cmd_rooms(&config, action).await,
        Commands::Reports { format } => cmd_reports(&config, &format).await,
        Commands::Config => cmd_config(&cli.config, &config),
        Commands::InitDb => cmd_init_db(&config),
        Commands::HelpText => {
            println!("{HELP_TEXT}");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(log_time: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("livewatch=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log_time {
        builder.init();
    } else {
        builder.without_time().init();
    }
}

fn load_config(cli: &Cli) -> Result<Config, livewatch::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

async fn cmd_run(config: Config, dry_run: bool) -> anyhow::Result<()> {
    println!("livewatch v{VERSION}");
    println!("Press Ctrl+C to stop");
    println!();

    let cancel = CancellationToken::new();
    ctrlc_handler(cancel.clone())?;

    app::run(config, RunOptions { dry_run }, cancel).await
}

fn open_store(config: &Config) -> Result<SqliteStore, StoreError> {
    SqliteStore::open(&config.db_path)
}

/// Accept either a bare id or a `<#id>` mention.
fn room_arg(arg: &str) -> Room {
    parse_room(arg).unwrap_or_else(|| Room::new(arg.trim()))
}

async fn cmd_rooms(config: &Config, action: RoomsAction) -> anyhow::Result<()> {
    let store = open_store(config)?;

    match action {
        RoomsAction::List => {
            let rooms = store.list_rooms().await?;
            if rooms.is_empty() {
                println!("No rooms configured.");
                println!("Add one with 'livewatch rooms add <id>' or '@bot spam #channel'.");
            }
            for room in rooms {
                println!("{room}");
            }
        }
        RoomsAction::Add { room } => {
            let room = room_arg(&room);
            match store.add_room(&room).await {
                Ok(()) => println!("Added room {room}"),
                Err(StoreError::Duplicate(_)) => println!("Room {room} is already added"),
                Err(e) => return Err(e.into()),
            }
        }
        RoomsAction::Remove { room } => {
            let room = room_arg(&room);
            if store.remove_room(&room).await? {
                println!("Removed room {room}");
            } else {
                println!("Room {room} was not configured");
            }
        }
    }

    Ok(())
}

async fn cmd_reports(config: &Config, format: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let reports = store.list_reports().await?;

    if format == "jsonl" {
        for report in &reports {
            println!("{}", serde_json::to_string(report)?);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    Ok(())
}

fn cmd_config(path: &Option<PathBuf>, config: &Config) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {:?}",
        path.clone().unwrap_or_else(Config::config_path)
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn cmd_init_db(config: &Config) -> anyhow::Result<()> {
    config.ensure_directories()?;
    let _store = open_store(config)?;
    println!(
        "Database ready at {:?} (schema v{})",
        config.db_path,
        migrations::latest_version()
    );
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        cancel.cancel();
    })?;
    Ok(())
}
