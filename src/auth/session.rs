use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The stable account record a session authenticates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider-issued unique id
    pub id: String,

    /// Email address, if the provider exposes one
    #[serde(default)]
    pub email: Option<String>,

    /// Free-form attributes supplied at sign-up (e.g. `username`)
    #[serde(default, alias = "user_metadata")]
    pub metadata: HashMap<String, Value>,

    /// When the provider created the account
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Create an identity with no extra attributes
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            metadata: HashMap::new(),
            created_at: None,
        }
    }

    /// String metadata value, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Provider-issued proof of an authenticated identity
///
/// Sessions belong to the identity provider. The sync core only keeps copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for backend requests
    pub access_token: String,

    /// Token used to obtain a new access token once this one expires
    pub refresh_token: Option<String>,

    /// Usually "bearer"
    pub token_type: String,

    /// When the access token expires (if known)
    pub expires_at: Option<DateTime<Utc>>,

    /// The identity this session authenticates
    pub user: Identity,
}

impl Session {
    /// Create a bearer session expiring `lifetime_secs` from now
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        lifetime_secs: i64,
        user: Identity,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            token_type: "bearer".to_string(),
            expires_at: Some(Utc::now() + Duration::seconds(lifetime_secs)),
            user,
        }
    }

    /// Check if the access token is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |exp| exp <= Utc::now())
    }

    /// Check if the token will expire within the given threshold
    pub fn expires_soon(&self, threshold_secs: i64) -> bool {
        self.expires_at
            .map_or(false, |exp| (exp - Utc::now()).num_seconds() < threshold_secs)
    }
}

/// Kind of session change reported by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// A session change delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChange {
    pub kind: AuthChangeKind,
    /// Session after the change; `None` once signed out
    pub session: Option<Session>,
    /// Provider-assigned, increasing per feed
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
}

/// Target the consumer must navigate to for a federated (OAuth) sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedRedirect {
    pub provider: String,
    pub url: String,
}
