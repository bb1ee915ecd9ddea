// kanon — operator CLI for the k-anonymity sign-and-join store
//
// Inspects and edits the local message store, parameter cache, user profile
// and engine configuration.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use kanon_core::clock::Clock;
use kanon_core::{KAnonMessage, KAnonStores, MessageStatus, SystemClock};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kanon")]
#[command(about = "K-Anon — sign-and-join store inspector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit stored join candidates
    Messages {
        #[command(subcommand)]
        action: MessagesAction,
    },
    /// Inspect cached client and server parameters
    Params {
        #[command(subcommand)]
        action: ParamsAction,
    },
    /// Show or reset the user profile id
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MessagesAction {
    /// List stored messages
    List {
        #[arg(short, long)]
        status: Option<MessageStatus>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Store a new message for the next background run
    Add {
        hash_set: String,
        correlation_id: u64,
        /// Lifetime in seconds
        #[arg(short, long, default_value = "86400")]
        ttl: u64,
    },
    /// Remove expired messages
    Purge,
    /// Reset signed or failed messages for another attempt
    Resubmit {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Count messages by status
    Stats,
}

#[derive(Subcommand)]
enum ParamsAction {
    /// Show every parameter row
    Show,
    /// Delete all cached parameters
    Clear,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show the current profile id
    Show,
    /// Forget the profile id; a new one is minted on next use
    Reset,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a config value
    Set { key: String, value: String },
    /// Get a config value
    Get { key: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Messages { action } => cmd_messages(action).await,
        Commands::Params { action } => cmd_params(action).await,
        Commands::Profile { action } => cmd_profile(action).await,
        Commands::Config { action } => cmd_config(action).await,
    }
}

fn open_stores(clock: Arc<dyn Clock>) -> Result<KAnonStores> {
    let data_dir = config::Config::data_dir()?;
    let storage_path = data_dir.join("storage");
    tracing::debug!("Opening store at {}", storage_path.display());
    KAnonStores::open(&storage_path, clock).context("Failed to open store")
}

fn format_time(unix_secs: u64) -> String {
    i64::try_from(unix_secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix_secs.to_string())
}

fn colored_status(status: MessageStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        MessageStatus::NotProcessed => label.yellow(),
        MessageStatus::Signed => label.bright_cyan(),
        MessageStatus::Joined => label.green(),
        MessageStatus::Failed => label.red(),
    }
}

async fn cmd_messages(action: MessagesAction) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = open_stores(clock.clone())?;
    let store = &stores.messages;

    match action {
        MessagesAction::List { status, limit } => {
            let now = clock.now();
            let messages: Vec<KAnonMessage> = store
                .all()?
                .into_iter()
                .filter(|m| status.map(|s| m.status == s).unwrap_or(true))
                .take(limit)
                .collect();

            println!("{}", "Messages".bold());
            println!();

            if messages.is_empty() {
                println!("  {}", "(none)".dimmed());
                return Ok(());
            }

            for m in messages {
                let expiry = if m.is_expired(now) {
                    format!("expired {}", format_time(m.expiry_at)).dimmed()
                } else {
                    format!("expires {}", format_time(m.expiry_at)).normal()
                };
                println!(
                    "  {:>6}  {:<14} {:<24} corr={}  {}",
                    m.id,
                    colored_status(m.status),
                    m.hash_set.bright_cyan(),
                    m.correlation_id,
                    expiry
                );
            }
        }

        MessagesAction::Add {
            hash_set,
            correlation_id,
            ttl,
        } => {
            if hash_set.is_empty() {
                anyhow::bail!("Hash set must not be empty");
            }
            if ttl == 0 {
                anyhow::bail!("TTL must be greater than zero");
            }
            let now = clock.now();
            let stored = store.insert(KAnonMessage::new(
                &hash_set,
                correlation_id,
                now,
                now.saturating_add(ttl),
            ))?;
            println!(
                "{} Stored message {} for {}",
                "✓".green(),
                stored.id,
                hash_set.bright_cyan()
            );
        }

        MessagesAction::Purge => {
            let removed = store.delete_expired(clock.now())?;
            println!("{} Removed {} expired message(s)", "✓".green(), removed);
        }

        MessagesAction::Resubmit { ids } => {
            let changed = store.resubmit(&ids)?;
            println!(
                "{} Resubmitted {} of {} message(s)",
                "✓".green(),
                changed,
                ids.len()
            );
            if changed < ids.len() {
                println!(
                    "  {}",
                    "Only signed or failed messages can be resubmitted".dimmed()
                );
            }
        }

        MessagesAction::Stats => {
            println!("{}", "Message Stats".bold());
            println!();
            for status in MessageStatus::ALL {
                println!(
                    "  {:<16} {}",
                    colored_status(status),
                    store.count_by_status(status)?
                );
            }
            println!("  {:<16} {}", "total".bold(), store.count()?);
        }
    }

    Ok(())
}

async fn cmd_params(action: ParamsAction) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = open_stores(clock.clone())?;
    let params = &stores.params;

    match action {
        ParamsAction::Show => {
            let now = clock.now();

            println!("{}", "Client Parameters".bold());
            let clients = params.all_client_parameters()?;
            if clients.is_empty() {
                println!("  {}", "(none cached)".dimmed());
            }
            for row in clients {
                let state = if row.is_active(now) {
                    "active".green()
                } else {
                    "expired".dimmed()
                };
                println!(
                    "  {:>4}  v{:<10} {:<8} client={}  expires {}",
                    row.id,
                    row.version,
                    state,
                    row.client_id,
                    format_time(row.expiry_at)
                );
            }

            println!();
            println!("{}", "Server Parameters".bold());
            let servers = params.all_server_parameters()?;
            if servers.is_empty() {
                println!("  {}", "(none cached)".dimmed());
            }
            for row in servers {
                let sign = if row.is_usable_for_sign(now) {
                    "sign".green()
                } else {
                    "sign".dimmed()
                };
                let join = if row.is_usable_for_join(now) {
                    "join".green()
                } else {
                    "join".dimmed()
                };
                println!(
                    "  {:>4}  v{:<10} {} until {}  {} until {}",
                    row.id,
                    row.version,
                    sign,
                    format_time(row.sign_expiry_at),
                    join,
                    format_time(row.join_expiry_at)
                );
            }
        }

        ParamsAction::Clear => {
            let clients = params.delete_all_client_parameters()?;
            let servers = params.delete_all_server_parameters()?;
            println!(
                "{} Deleted {} client and {} server parameter row(s)",
                "✓".green(),
                clients,
                servers
            );
        }
    }

    Ok(())
}

async fn cmd_profile(action: ProfileAction) -> Result<()> {
    let stores = open_stores(Arc::new(SystemClock))?;

    match action {
        ProfileAction::Show => match stores.profile.current()? {
            Some(id) => println!("{} {}", "Profile:".bold(), id.to_string().bright_cyan()),
            None => println!("{} {}", "Profile:".bold(), "(not created yet)".dimmed()),
        },

        ProfileAction::Reset => {
            stores.profile.reset()?;
            println!("{} Profile id reset", "✓".green());
            println!(
                "  {}",
                "Cached client parameters will be re-registered on the next run".dimmed()
            );
        }
    }

    Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                let shown = if value.is_empty() {
                    "(unset)".dimmed().to_string()
                } else {
                    value
                };
                println!("  {:<38} {}", key.bright_cyan(), shown);
            }
        }
    }

    Ok(())
}
