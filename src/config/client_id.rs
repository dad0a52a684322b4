//! OAuth client id resolution.
//!
//! Resolution order, first hit wins:
//! 1. `DEVICELINK_GITHUB_CLIENT_ID` environment variable
//! 2. `oauth.client_id` in the config store
//! 3. the compiled-in default
//!
//! [`ClientIdResolver::resolve`] is the only place this order is encoded.
//! Login, the worker and diagnostics all go through it.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::{ConfigKey, ConfigStore};
use crate::error::AuthError;

/// Environment variable carrying the OAuth application id.
pub const CLIENT_ID_ENV: &str = "DEVICELINK_GITHUB_CLIENT_ID";

/// OAuth application id shipped with the binary.
pub const DEFAULT_CLIENT_ID: &str = "Ov23liZkSJ4bEqLXc0Fq";

static CLIENT_ID_PATTERN: OnceLock<Regex> = OnceLock::new();

fn client_id_pattern() -> &'static Regex {
    CLIENT_ID_PATTERN.get_or_init(|| {
        Regex::new(r"^(?:Iv1\.[0-9a-f]{16}|Ov23[0-9A-Za-z]{16})$").expect("valid client id regex")
    })
}

/// A format-validated GitHub OAuth application id. Not a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    /// Validate `value` (trimmed) against the provider's client id format.
    pub fn parse(value: &str, source_name: &str) -> Result<Self, AuthError> {
        let trimmed = value.trim();
        if client_id_pattern().is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(AuthError::InvalidClientIdFormat {
                source_name: source_name.to_string(),
                value: trimmed.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a resolved client id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIdSource {
    Environment,
    ConfigFile,
    CompiledDefault,
}

impl ClientIdSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Environment => CLIENT_ID_ENV,
            Self::ConfigFile => "config oauth.client_id",
            Self::CompiledDefault => "compiled default",
        }
    }
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves the OAuth application id.
#[derive(Clone)]
pub struct ClientIdResolver {
    store: ConfigStore,
    env: EnvLookup,
    default: Option<&'static str>,
}

impl fmt::Debug for ClientIdResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdResolver")
            .field("store", &self.store)
            .field("default", &self.default)
            .finish()
    }
}

impl ClientIdResolver {
    /// Resolver reading the process environment.
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            env: Arc::new(|key| std::env::var(key).ok()),
            default: Some(DEFAULT_CLIENT_ID),
        }
    }

    /// Replace the environment lookup.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Replace (or remove) the compiled-in fallback.
    pub fn with_default(mut self, default: Option<&'static str>) -> Self {
        self.default = default;
        self
    }

    /// Resolve the client id: env var, then config store, then default.
    ///
    /// A value that is present but malformed is an error at that layer; it
    /// never silently falls through to the next one.
    pub fn resolve(&self) -> Result<ClientId, AuthError> {
        self.resolve_with_source().map(|(id, _)| id)
    }

    /// Like [`resolve`](Self::resolve) but also reports which layer won.
    pub fn resolve_with_source(&self) -> Result<(ClientId, ClientIdSource), AuthError> {
        if let Some(raw) = (self.env)(CLIENT_ID_ENV).filter(|v| !v.trim().is_empty()) {
            let id = ClientId::parse(&raw, ClientIdSource::Environment.label())?;
            return Ok((id, ClientIdSource::Environment));
        }

        if let Some(raw) = self
            .store
            .get(ConfigKey::OAuthClientId)?
            .filter(|v| !v.trim().is_empty())
        {
            let id = ClientId::parse(&raw, ClientIdSource::ConfigFile.label())?;
            return Ok((id, ClientIdSource::ConfigFile));
        }

        match self.default {
            Some(raw) => {
                let id = ClientId::parse(raw, ClientIdSource::CompiledDefault.label())?;
                Ok((id, ClientIdSource::CompiledDefault))
            }
            None => Err(AuthError::NoClientId),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.toml"))
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn default_client_id_is_well_formed() {
        assert!(ClientId::parse(DEFAULT_CLIENT_ID, "default").is_ok());
    }

    #[test]
    fn accepts_both_github_formats() {
        assert!(ClientId::parse("Iv1.0123456789abcdef", "t").is_ok());
        assert!(ClientId::parse("  Ov23abcdefghij012345 ", "t").is_ok());
        assert!(ClientId::parse("Iv1.0123456789ABCDEF", "t").is_err());
        assert!(ClientId::parse("not-a-client-id", "t").is_err());
        assert!(ClientId::parse("", "t").is_err());
    }

    #[test]
    fn env_wins_over_config_and_default() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .set(ConfigKey::OAuthClientId, "Iv1.aaaaaaaaaaaaaaaa")
            .unwrap();
        let resolver = ClientIdResolver::new(store)
            .with_env(|_| Some("Ov23bbbbbbbbbbbbbbbb".to_string()));

        let (id, source) = resolver.resolve_with_source().unwrap();
        assert_eq!(id.as_str(), "Ov23bbbbbbbbbbbbbbbb");
        assert_eq!(source, ClientIdSource::Environment);
    }

    #[test]
    fn config_wins_over_default() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .set(ConfigKey::OAuthClientId, "Iv1.aaaaaaaaaaaaaaaa")
            .unwrap();
        let resolver = ClientIdResolver::new(store).with_env(no_env);

        let (id, source) = resolver.resolve_with_source().unwrap();
        assert_eq!(id.as_str(), "Iv1.aaaaaaaaaaaaaaaa");
        assert_eq!(source, ClientIdSource::ConfigFile);
    }

    #[test]
    fn falls_back_to_compiled_default() {
        let dir = TempDir::new().unwrap();
        let resolver = ClientIdResolver::new(store(&dir)).with_env(|_| Some("   ".into()));

        let (id, source) = resolver.resolve_with_source().unwrap();
        assert_eq!(id.as_str(), DEFAULT_CLIENT_ID);
        assert_eq!(source, ClientIdSource::CompiledDefault);
    }

    #[test]
    fn missing_everywhere_is_no_client_id() {
        let dir = TempDir::new().unwrap();
        let resolver = ClientIdResolver::new(store(&dir))
            .with_env(no_env)
            .with_default(None);

        assert!(matches!(resolver.resolve(), Err(AuthError::NoClientId)));
    }

    #[test]
    fn malformed_env_value_does_not_fall_through() {
        let dir = TempDir::new().unwrap();
        let resolver = ClientIdResolver::new(store(&dir)).with_env(|_| Some("bogus".into()));

        let err = resolver.resolve().unwrap_err();
        assert!(matches!(err, AuthError::InvalidClientIdFormat { .. }));
    }

    #[test]
    fn clones_resolve_identically() {
        let dir = TempDir::new().unwrap();
        let resolver = ClientIdResolver::new(store(&dir)).with_env(no_env);
        let other = resolver.clone();
        assert_eq!(resolver.resolve().unwrap(), other.resolve().unwrap());
    }
}
