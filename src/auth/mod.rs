//! OAuth device-flow initiation, token polling and credential storage.

pub mod device_code;
pub mod http;
pub mod service;
pub mod token;
pub mod vault;

pub use device_code::{
    DeviceAuthorization, DeviceFlowInitiator, HttpTokenPoller, PollOutcome, TokenPoller,
};
pub use service::{AuthService, LoginStarted};
pub use token::StoredToken;
pub use vault::{CredentialStore, CredentialVault};
