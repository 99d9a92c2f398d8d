use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{self, PetcareResult};

// Default configuration values
const DEFAULT_REDIRECT_TO: &str = "petcare://auth/callback";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PROFILES_TABLE: &str = "profiles";
const DEFAULT_CONFIG_FILE: &str = "petcare.json";
const DEFAULT_SESSION_FILE: &str = "petcare-session.json";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub profiles: ProfileConfig,
}

/// Hosted backend (auth + REST) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Public anon key sent as `apikey` on every request
    #[serde(default = "default_anon_key")]
    pub anon_key: String,
    /// Where federated sign-in sends the user back to
    #[serde(default = "default_redirect_to")]
    pub redirect_to: String,
    /// HTTP client timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Sync core tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on any single provider/store call made by the core
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Broadcast capacity of the snapshot stream
    #[serde(default = "default_state_capacity")]
    pub state_capacity: usize,
    /// Snapshots kept for late subscribers
    #[serde(default = "default_state_buffer")]
    pub state_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_profiles_table")]
    pub table: String,
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(fallback)
}

fn default_backend_url() -> String {
    std::env::var("PETCARE_BACKEND_URL").unwrap_or_default()
}

fn default_anon_key() -> String {
    std::env::var("PETCARE_ANON_KEY").unwrap_or_default()
}

fn default_redirect_to() -> String {
    std::env::var("PETCARE_REDIRECT_TO").unwrap_or_else(|_| DEFAULT_REDIRECT_TO.to_string())
}

fn default_request_timeout_ms() -> u64 {
    env_or("PETCARE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)
}

fn default_call_timeout_ms() -> u64 {
    env_or("PETCARE_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT_MS)
}

fn default_state_capacity() -> usize {
    env_or("PETCARE_STATE_CAPACITY", crate::events::STATE_STREAM_CAPACITY)
}

fn default_state_buffer() -> usize {
    env_or("PETCARE_STATE_BUFFER", crate::events::STATE_BUFFER_SIZE)
}

fn default_profiles_table() -> String {
    std::env::var("PETCARE_PROFILES_TABLE").unwrap_or_else(|_| DEFAULT_PROFILES_TABLE.to_string())
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            anon_key: default_anon_key(),
            redirect_to: default_redirect_to(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject settings the HTTP backends cannot work with
    pub fn validate(&self) -> PetcareResult<()> {
        if self.url.trim().is_empty() {
            return Err(error::config_invalid("backend.url", "must not be empty"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(error::config_invalid("backend.url", "must be an http(s) URL"));
        }
        if self.anon_key.trim().is_empty() {
            return Err(error::config_invalid("backend.anon_key", "must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(error::config_invalid("backend.request_timeout_ms", "must be positive"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            state_capacity: default_state_capacity(),
            state_buffer: default_state_buffer(),
        }
    }
}

impl SyncConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> PetcareResult<()> {
        if self.call_timeout_ms == 0 {
            return Err(error::config_invalid("sync.call_timeout_ms", "must be positive"));
        }
        if self.state_capacity == 0 {
            return Err(error::config_invalid("sync.state_capacity", "must be positive"));
        }
        Ok(())
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            table: default_profiles_table(),
        }
    }
}

/// Path of the JSON config file
pub fn config_path() -> PathBuf {
    std::env::var("PETCARE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Path of the stored session, `PETCARE_SESSION_PATH` or next to the config file
pub fn session_path() -> PathBuf {
    std::env::var("PETCARE_SESSION_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_path().with_file_name(DEFAULT_SESSION_FILE))
}

/// Load configuration from the default path, falling back to env defaults
pub async fn load_config() -> PetcareResult<Config> {
    load_config_from(&config_path()).await
}

/// Load configuration from `path`; a missing file yields the defaults
pub async fn load_config_from(path: &Path) -> PetcareResult<Config> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!("No configuration at {}, using defaults", path.display());
        let config = Config::default();
        // Defaults come from the environment and can be just as wrong
        config.sync.validate()?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| error::config_invalid("path", &format!("{}: {}", path.display(), e)))?;
    let config: Config = serde_json::from_str(&raw)
        .map_err(|e| error::config_invalid("file", &format!("{}: {}", path.display(), e)))?;
    config.sync.validate()?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Save configuration to `path`
pub async fn save_config(path: &Path, config: &Config) -> PetcareResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| error::internal(format!("create {}: {}", parent.display(), e)))?;
    }

    let raw = serde_json::to_string_pretty(config)?;
    fs::write(path, raw)
        .await
        .map_err(|e| error::internal(format!("write {}: {}", path.display(), e)))?;
    debug!("Saved configuration to {}", path.display());
    Ok(())
}
