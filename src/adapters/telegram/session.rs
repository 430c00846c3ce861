//! Session storage. The engine consumes an already-authorised session file;
//! login flows belong to the external command surface.

use crate::domain::DomainError;
use grammers_session::storages::SqliteSession;
use std::path::{Path, PathBuf};

/// Handle to the on-disk session shared by every consumer of the same
/// credentials: the in-process client opens it directly, and the delegated
/// downloader receives the same file via bind mount. Keeping both on one
/// path is what lets the process-global semaphore prevent concurrent logins.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location handed to the delegated downloader's invocation.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the persistent SQLite-backed session, creating parent
    /// directories as needed. A fresh (never-authorised) file opens fine;
    /// every gateway call will then surface a fatal session error until the
    /// operator logs the session in out of band.
    pub async fn open(&self) -> Result<SqliteSession, DomainError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::State(format!(
                    "create session directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        SqliteSession::open(&self.path).await.map_err(|e| {
            DomainError::Fatal(format!("open session {}: {e}", self.path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/deeper/session.db"));
        store.open().await.unwrap();
        assert!(store.path().exists());
        assert!(store.path().parent().unwrap().is_dir());
    }
}
