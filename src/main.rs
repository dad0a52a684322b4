//! devicelink CLI binary entry point.

use clap::Parser;
use devicelink::cli::{AuthCommands, Cli, Commands};
use devicelink::config::AuthPaths;
use devicelink::worker::run_worker;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    // The worker runs with null stdio; its record is the worker log.
    if !matches!(cli.command, Commands::Worker(_)) {
        devicelink::cli::init_logging();
    }
    let paths = AuthPaths::from_env();

    let result = match cli.command {
        Commands::Auth(auth_args) => match auth_args.command {
            AuthCommands::Login(args) => devicelink::cli::auth::handle_login(&paths, args).await,
            AuthCommands::Status(args) => devicelink::cli::auth::handle_status(&paths, args),
            AuthCommands::Logout => devicelink::cli::auth::handle_logout(&paths),
        },
        Commands::Config(config_args) => {
            devicelink::cli::config::handle_config(&paths, config_args.command)
        }
        Commands::Worker(args) => run_worker(args.into(), paths).await.map(|_| ()),
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {e}", e.code());
        std::process::exit(1);
    }
}
