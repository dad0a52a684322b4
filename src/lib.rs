//! devicelink: OAuth device-flow authentication that outlives the request
//! handler that started it.
//!
//! A short-lived handler resolves the client id, requests a device code and
//! spawns a detached worker process that polls the token endpoint to
//! completion. Progress is handed off through a state file and a tagged log;
//! any later caller reconstructs status with [`health::HealthMonitor`], and
//! the token ends up encrypted at rest in [`auth::CredentialVault`].
//!
//! # Quick Start
//!
//! ```no_run
//! use devicelink::auth::AuthService;
//! use devicelink::config::AuthPaths;
//!
//! # async fn example() -> devicelink::error::Result<()> {
//! let svc = AuthService::new(AuthPaths::from_env());
//! let started = svc.start_login(&[]).await?;
//! println!("Visit {} and enter {}", started.verification_uri, started.user_code);
//! // ...later, from another process:
//! println!("{}", svc.status());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod health;
pub mod util;
pub mod worker;

#[cfg(feature = "cli")]
pub mod cli;
