//! Encrypted at-rest storage for the bearer token.
//!
//! File layout (JSON, base64 fields):
//! `{version, kdf, iterations, salt, iv, authTag, ciphertext}`.
//! The key is PBKDF2-HMAC-SHA256 over a machine-specific passphrase; the
//! cipher is ChaCha20-Poly1305 with a fixed associated-data label.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::token::StoredToken;
use crate::config::AuthPaths;
use crate::error::AuthError;
use crate::util::fs::{atomic_write, remove_if_exists};

const VAULT_FILE_VERSION: u32 = 1;
const KDF_NAME: &str = "pbkdf2-hmac-sha256";
const AAD: &[u8] = b"devicelink-credential-v1";

/// Minimum accepted PBKDF2 rounds.
pub const MIN_ITERATIONS: u32 = 100_000;
/// Rounds used for new writes.
pub const DEFAULT_ITERATIONS: u32 = 210_000;
const MAX_ITERATIONS: u32 = 10_000_000;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const TAG_SIZE: usize = 16;

/// Storage abstraction for the persisted bearer token.
///
/// `load` never fails: anything unreadable is reported as absent.
pub trait CredentialStore: Send + Sync {
    fn store(&self, token: &StoredToken) -> Result<(), AuthError>;
    fn load(&self) -> Option<StoredToken>;
    fn clear(&self) -> Result<(), AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VaultFile {
    version: u32,
    kdf: String,
    iterations: u32,
    salt: String,
    iv: String,
    auth_tag: String,
    ciphertext: String,
}

/// File-backed [`CredentialStore`] with authenticated encryption.
///
/// # Example
/// ```no_run
/// use devicelink::auth::{CredentialStore, CredentialVault, StoredToken};
/// use devicelink::config::AuthPaths;
///
/// let vault = CredentialVault::new(&AuthPaths::from_env());
/// vault.store(&StoredToken::new("gho_example", "bearer", "read:user"))?;
/// assert!(vault.load().is_some());
/// # Ok::<(), devicelink::error::AuthError>(())
/// ```
#[derive(Clone)]
pub struct CredentialVault {
    path: PathBuf,
    passphrase: String,
    iterations: u32,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("path", &self.path)
            .field("iterations", &self.iterations)
            .finish()
    }
}

impl CredentialVault {
    pub fn new(paths: &AuthPaths) -> Self {
        Self::at_path(paths.credential_file())
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            passphrase: machine_passphrase(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Override the machine passphrase.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = passphrase.into();
        self
    }

    /// Rounds used for future writes; clamped to at least [`MIN_ITERATIONS`].
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.clamp(MIN_ITERATIONS, MAX_ITERATIONS);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a credential file is present (without decrypting it).
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn derive_key(&self, salt: &[u8], iterations: u32) -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.passphrase.as_bytes(), salt, iterations, &mut key);
        key
    }

    fn seal(&self, token: &StoredToken) -> Result<VaultFile, AuthError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut iv);

        let key = self.derive_key(&salt, self.iterations);
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| AuthError::StorageFailed(format!("cipher init: {e}")))?;
        let plaintext = serde_json::to_vec(token)?;
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &plaintext,
                    aad: AAD,
                },
            )
            .map_err(|e| AuthError::StorageFailed(format!("encrypt: {e}")))?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(VaultFile {
            version: VAULT_FILE_VERSION,
            kdf: KDF_NAME.to_string(),
            iterations: self.iterations,
            salt: STANDARD.encode(salt),
            iv: STANDARD.encode(iv),
            auth_tag: STANDARD.encode(tag),
            ciphertext: STANDARD.encode(sealed),
        })
    }

    fn open(&self, file: &VaultFile) -> Result<StoredToken, String> {
        if file.version != VAULT_FILE_VERSION || file.kdf != KDF_NAME {
            return Err(format!(
                "unsupported vault format v{} / {}",
                file.version, file.kdf
            ));
        }
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&file.iterations) {
            return Err(format!("iteration count {} out of range", file.iterations));
        }

        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| format!("{field} is not valid base64: {e}"))
        };
        let salt = decode("salt", &file.salt)?;
        let iv = decode("iv", &file.iv)?;
        let tag = decode("authTag", &file.auth_tag)?;
        let mut sealed = decode("ciphertext", &file.ciphertext)?;
        if salt.len() != SALT_SIZE || iv.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return Err("salt, iv or authTag has the wrong length".to_string());
        }
        sealed.extend_from_slice(&tag);

        let key = self.derive_key(&salt, file.iterations);
        let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|e| e.to_string())?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: AAD,
                },
            )
            .map_err(|_| "authentication failed".to_string())?;
        serde_json::from_slice(&plaintext).map_err(|e| format!("payload: {e}"))
    }
}

impl CredentialStore for CredentialVault {
    fn store(&self, token: &StoredToken) -> Result<(), AuthError> {
        let file = self.seal(token)?;
        let serialized = serde_json::to_vec_pretty(&file)?;
        atomic_write(&self.path, &serialized)
            .map_err(|e| AuthError::StorageFailed(format!("{}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), "Credential stored");
        Ok(())
    }

    fn load(&self) -> Option<StoredToken> {
        let raw = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Credential file unreadable");
                return None;
            }
        };
        let file: VaultFile = match serde_json::from_slice(&raw) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Credential file corrupt");
                return None;
            }
        };
        match self.open(&file) {
            Ok(token) => Some(token),
            Err(reason) => {
                tracing::warn!(path = %self.path.display(), reason = %reason, "Credential file rejected");
                None
            }
        }
    }

    fn clear(&self) -> Result<(), AuthError> {
        remove_if_exists(&self.path)
            .map_err(|e| AuthError::StorageFailed(format!("{}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), "Credential cleared");
        Ok(())
    }
}

/// Passphrase tied to this machine and user account.
///
/// Uses `/etc/machine-id` when readable, otherwise the hostname, combined
/// with the user name and home directory.
pub fn machine_passphrase() -> String {
    let machine = read_machine_id()
        .or_else(hostname)
        .unwrap_or_else(|| "unknown-host".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let home = directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().display().to_string())
        .unwrap_or_default();
    format!("devicelink-vault-v1:{machine}:{user}:{home}")
}

fn read_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .filter_map(|p| fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}
