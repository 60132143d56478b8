//! On-disk session: the bearer token and the user it belongs to.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ClientError;
use crate::db::UserResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: UserResponse,
}

/// JSON file holding the current [`Session`]
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored session, or `None` when nobody is logged in
    pub fn load(&self) -> Result<Option<Session>, ClientError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // An unreadable session is as good as none
                tracing::warn!(path = %self.path.display(), "Discarding corrupt session file: {}", e);
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(session)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
