//! CLI auth command handlers for login, status, and logout.

use crate::auth::{AuthService, LoginStarted};
use crate::config::{AuthPaths, ProviderEndpoints};
use crate::error::AuthError;

use super::{LoginArgs, StatusArgs};

fn service(paths: &AuthPaths) -> AuthService {
    AuthService::new(paths.clone()).with_endpoints(ProviderEndpoints::from_env())
}

/// Handle `devicelink auth login`. Returns as soon as the worker is spawned.
pub async fn handle_login(paths: &AuthPaths, args: LoginArgs) -> Result<(), AuthError> {
    let started = service(paths).start_login(&args.scopes).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&started)?);
    } else {
        print_instructions(&started);
    }
    Ok(())
}

fn print_instructions(started: &LoginStarted) {
    println!("Visit:      {}", started.verification_uri);
    println!("Enter code: {}", started.user_code);
    println!(
        "The code expires at {}. Authorization completes in the background;",
        started.expires_at.format("%H:%M:%S UTC")
    );
    println!("run `devicelink auth status` to check on it.");
}

/// Handle `devicelink auth status`.
pub fn handle_status(paths: &AuthPaths, args: StatusArgs) -> Result<(), AuthError> {
    let report = service(paths).status();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

/// Handle `devicelink auth logout`.
pub fn handle_logout(paths: &AuthPaths) -> Result<(), AuthError> {
    service(paths).logout()?;
    println!("Logged out.");
    Ok(())
}
