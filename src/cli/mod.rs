//! CLI entry point for devicelink.

pub mod auth;
pub mod config;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::worker::WorkerArgs;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "DEVICELINK_LOG";

/// devicelink CLI
#[derive(Parser, Debug)]
#[command(name = "devicelink", version, about = "OAuth device-flow login that survives its caller")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authentication management
    Auth(AuthArgs),
    /// Read or change persisted settings
    Config(ConfigArgs),
    /// Run the polling worker (spawned by `auth login`)
    #[command(hide = true)]
    Worker(WorkerCliArgs),
}

/// Arguments for the `auth` subcommand group.
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

/// Auth subcommands for login, status, and logout.
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Start a device-flow login and return immediately
    Login(LoginArgs),
    /// Show the status of the most recent login
    Status(StatusArgs),
    /// Delete the stored credential
    Logout,
}

/// Arguments for `devicelink auth login`.
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// OAuth scope to request (repeatable; defaults to `public_repo read:user`)
    #[arg(long = "scope")]
    pub scopes: Vec<String>,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `devicelink auth status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `config` subcommand group.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print a value
    Get { key: String },
    /// Set a value
    Set { key: String, value: String },
    /// Remove a value
    Unset { key: String },
}

/// Arguments the supervisor passes to the worker.
#[derive(Parser, Debug)]
pub struct WorkerCliArgs {
    #[arg(long)]
    pub flow_id: Uuid,

    #[arg(long)]
    pub client_id: String,

    /// Poll interval in seconds
    #[arg(long)]
    pub interval: u64,

    /// RFC 3339 expiry of the device code
    #[arg(long)]
    pub expires_at: DateTime<Utc>,

    #[arg(long)]
    pub token_url: Option<String>,
}

impl From<WorkerCliArgs> for WorkerArgs {
    fn from(args: WorkerCliArgs) -> Self {
        Self {
            flow_id: args.flow_id,
            client_id: args.client_id,
            interval_secs: args.interval,
            expires_at: args.expires_at,
            token_url: args.token_url,
        }
    }
}

/// Install a stderr `tracing` subscriber filtered by `DEVICELINK_LOG`.
pub fn init_logging() {
    let mut filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in ["hyper=off", "reqwest=off", "rustls=off"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
