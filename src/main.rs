//! presence-ipc CLI - publishes player status as rich presence.
//!
//! This is the main binary entry point. See the `presence_ipc` library
//! for the core functionality.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mimalloc::MiMalloc;
use presence_ipc::activity::{Activity, ActivityKind, Assets, Timestamps};
use presence_ipc::commands::{self, VERSION};
use presence_ipc::env::Environment;
use presence_ipc::Config;

/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "presence-ipc")]
#[command(version = VERSION)]
#[command(about = "Publish rich presence to the local IPC host service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read player status JSON lines from stdin and keep presence in sync (default)
    Watch,
    /// Set the activity once and print the host's reply
    Set {
        #[command(flatten)]
        activity: ActivityArgs,
        /// Seconds to wait for the host
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Clear the activity once
    Clear {
        /// Seconds to wait for the host
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Show or edit the config file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
    /// Print the socket path the client connects to
    SocketPath,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config (default)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print one value using dot notation (e.g. "reconnect.error_delay_ms")
    Get {
        key: String,
    },
    /// Set one value using dot notation (parsed as JSON when possible)
    Set {
        key: String,
        value: String,
    },
}

#[derive(Args)]
struct ActivityArgs {
    /// Activity name
    #[arg(long)]
    name: Option<String>,
    /// Activity type: 0 playing, 1 streaming, 2 listening, 3 watching, 5 competing
    #[arg(long = "type", value_parser = parse_kind)]
    kind: Option<ActivityKind>,
    /// First line
    #[arg(long)]
    details: Option<String>,
    /// Second line
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    large_image: Option<String>,
    #[arg(long)]
    large_text: Option<String>,
    #[arg(long)]
    small_image: Option<String>,
    #[arg(long)]
    small_text: Option<String>,
    /// Show elapsed time starting now
    #[arg(long)]
    elapsed: bool,
}

fn parse_kind(raw: &str) -> Result<ActivityKind, String> {
    let value: u8 = raw.parse().map_err(|e| format!("{e}"))?;
    ActivityKind::try_from(value)
}

impl ActivityArgs {
    fn into_activity(self) -> Activity {
        let assets = Assets {
            large_image: self.large_image,
            large_text: self.large_text,
            small_image: self.small_image,
            small_text: self.small_text,
        };
        Activity {
            name: self.name,
            kind: self.kind,
            details: self.details,
            state: self.state,
            assets: (!assets.is_empty()).then_some(assets),
            timestamps: self.elapsed.then(|| Timestamps {
                start: Some(chrono::Utc::now().timestamp_millis()),
                end: None,
            }),
            ..Activity::default()
        }
    }
}

fn init_logging() -> Result<()> {
    let filter = Environment::current().default_log_filter();
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));

    // stdout is reserved for command output; log to stderr or PRESENCE_LOG_FILE
    if let Ok(path) = std::env::var("PRESENCE_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }

    builder.format_timestamp_secs().init();
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    log::debug!("Environment: {}", Environment::current());

    // Load config per command: `config path` and `config init` must work on a broken file
    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => {
            let config = Config::load()?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            runtime()?.block_on(commands::watch::run(config, stdin))?;
        }
        Commands::Set { activity, wait } => {
            let config = Config::load()?;
            let activity = activity.into_activity();
            runtime()?.block_on(commands::set_activity(
                &config,
                activity,
                Duration::from_secs(wait),
            ))?;
        }
        Commands::Clear { wait } => {
            let config = Config::load()?;
            runtime()?.block_on(commands::clear_activity(&config, Duration::from_secs(wait)))?;
        }
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config::show(&Config::load()?)?,
            ConfigAction::Path => commands::config::path()?,
            ConfigAction::Init { force } => commands::config::init(force)?,
            ConfigAction::Get { key } => commands::config::get(&Config::load()?, &key)?,
            ConfigAction::Set { key, value } => {
                runtime()?.block_on(commands::config::set(&key, &value))?;
            }
        },
        Commands::SocketPath => commands::socket_path(&Config::load()?)?,
    }

    Ok(())
}
