use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::auth::session::Session;
use crate::error::{self, PetcareResult};

/// On-disk form of a held session
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionPayload {
    session: Session,
    /// When this entry was written
    saved_at: DateTime<Utc>,
}

/// JSON file that keeps the signed-in session between runs
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored session
    ///
    /// A missing file is no session. An unreadable entry is discarded with a
    /// warning so a damaged file does not lock the user out.
    pub async fn load(&self) -> PetcareResult<Option<Session>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!(path = %self.path.display(), "No stored session");
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)
            .await
            .map_err(|e| error::internal(format!("read {}: {}", self.path.display(), e)))?;
        match serde_json::from_str::<SessionPayload>(&raw) {
            Ok(payload) => {
                debug!(
                    identity = %payload.session.user.id,
                    saved_at = %payload.saved_at,
                    "Stored session loaded"
                );
                Ok(Some(payload.session))
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable stored session");
                self.clear().await?;
                Ok(None)
            }
        }
    }

    pub async fn save(&self, session: &Session) -> PetcareResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| error::internal(format!("create {}: {}", parent.display(), e)))?;
        }

        let payload = SessionPayload {
            session: session.clone(),
            saved_at: Utc::now(),
        };
        let raw = serde_json::to_string_pretty(&payload)?;
        fs::write(&self.path, raw)
            .await
            .map_err(|e| error::internal(format!("write {}: {}", self.path.display(), e)))?;
        debug!(identity = %session.user.id, path = %self.path.display(), "Session stored");
        Ok(())
    }

    pub async fn clear(&self) -> PetcareResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Stored session removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(error::internal(format!("remove {}: {}", self.path.display(), e))),
        }
    }
}
