use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bearer token payload kept inside the credential vault.
///
/// # Example
/// ```no_run
/// use devicelink::auth::StoredToken;
///
/// let token = StoredToken::new("gho_example", "bearer", "public_repo read:user");
/// assert_eq!(token.token_type, "bearer");
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub access_token: String,
    pub token_type: String,
    pub scope: String,
    pub stored_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            scope: scope.into(),
            stored_at: Utc::now(),
        }
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .split([',', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredToken")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("stored_at", &self.stored_at)
            .finish()
    }
}
