//! On-disk session persistence
//!
//! A session survives process restarts through two JSON files: the
//! session-scoped file (cleared on logout, typically under a runtime
//! directory) and an optional legacy file from older releases that is only
//! read once to migrate tokens into the session-scoped file.
//!
//! All writes use atomic temp-file + rename with 0600 permissions. A tokio
//! Mutex per file serializes concurrent writers (request-time refresh,
//! background refresh, logout).

use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{TokenPair, TokenStore};

/// Session state persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub access_token: Option<Secret<String>>,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
    /// Cached user profile; opaque to the session layer
    #[serde(default)]
    pub user: Value,
}

impl PersistedSession {
    pub fn new(tokens: &TokenPair, user: Value) -> Self {
        Self {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
            user,
        }
    }

    /// Whether any non-empty token is present.
    pub fn has_tokens(&self) -> bool {
        let present = |t: &Option<Secret<String>>| t.as_ref().is_some_and(|t| !t.is_empty());
        present(&self.access_token) || present(&self.refresh_token)
    }
}

/// A single JSON file holding one `PersistedSession`.
pub struct SessionFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored session. A missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<PersistedSession>> {
        let _guard = self.lock.lock().await;
        read_session(&self.path).await
    }

    /// Replace the stored session.
    pub async fn save(&self, session: &PersistedSession) -> Result<()> {
        let _guard = self.lock.lock().await;
        write_atomic(&self.path, session).await
    }

    /// Read-modify-write under the file lock, only if `still_current`
    /// resolves true once the lock is held. A missing file starts from the
    /// default session. Returns whether the file was written.
    pub async fn update_if<P, F>(&self, still_current: P, apply: F) -> Result<bool>
    where
        P: Future<Output = bool>,
        F: FnOnce(&mut PersistedSession),
    {
        let _guard = self.lock.lock().await;
        if !still_current.await {
            return Ok(false);
        }
        let mut session = read_session(&self.path).await?.unwrap_or_default();
        apply(&mut session);
        write_atomic(&self.path, &session).await?;
        Ok(true)
    }

    /// Delete the file. Missing is fine.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed session file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("removing session file: {e}"))),
        }
    }
}

/// Session-scoped storage with a one-time migration source.
pub struct SessionPersistence {
    session: SessionFile,
    legacy: Option<SessionFile>,
}

impl SessionPersistence {
    pub fn new(session_path: impl Into<PathBuf>, legacy_path: Option<PathBuf>) -> Self {
        Self {
            session: SessionFile::new(session_path),
            legacy: legacy_path.map(SessionFile::new),
        }
    }

    pub fn session_file(&self) -> &SessionFile {
        &self.session
    }

    /// Load the persisted session.
    ///
    /// The session-scoped file wins. Otherwise the legacy file is consulted;
    /// if it holds tokens they are copied into the session-scoped file and
    /// the legacy file is removed so the migration happens once.
    pub async fn rehydrate(&self) -> Result<Option<PersistedSession>> {
        if let Some(session) = self.session.load().await?
            && session.has_tokens()
        {
            debug!(path = %self.session.path().display(), "rehydrated session");
            return Ok(Some(session));
        }

        let Some(legacy) = &self.legacy else {
            return Ok(None);
        };
        let Some(session) = legacy.load().await?.filter(PersistedSession::has_tokens) else {
            return Ok(None);
        };

        self.session.save(&session).await?;
        legacy.clear().await?;
        info!(
            from = %legacy.path().display(),
            to = %self.session.path().display(),
            "migrated legacy session"
        );
        Ok(Some(session))
    }

    pub async fn save(&self, session: &PersistedSession) -> Result<()> {
        self.session.save(session).await
    }

    /// Store a refreshed token pair, keeping the cached user.
    ///
    /// Nothing is written unless `store` is still in the session that
    /// started at `epoch`; the check runs under the file lock, so a logout
    /// that cleared the store before removing the file cannot have the
    /// pair written back after it. Returns whether the pair was stored.
    pub async fn save_tokens(
        &self,
        store: &TokenStore,
        epoch: u64,
        tokens: &TokenPair,
    ) -> Result<bool> {
        self.session
            .update_if(async { store.epoch().await == epoch }, |session| {
                session.access_token = Some(tokens.access_token.clone());
                session.refresh_token = Some(tokens.refresh_token.clone());
            })
            .await
    }

    pub async fn user(&self) -> Result<Option<Value>> {
        Ok(self
            .session
            .load()
            .await?
            .map(|s| s.user)
            .filter(|u| !u.is_null()))
    }

    /// Remove both the session-scoped and the legacy file.
    pub async fn clear(&self) -> Result<()> {
        self.session.clear().await?;
        if let Some(legacy) = &self.legacy {
            legacy.clear().await?;
        }
        Ok(())
    }
}

async fn read_session(path: &Path) -> Result<Option<PersistedSession>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Storage(format!("reading session file: {e}"))),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| Error::Storage(format!("parsing session file: {e}")))
}

/// Write the session file atomically.
///
/// Writes a temp file in the same directory, then renames it over the
/// target. Permissions are 0600 on unix since the file holds bearer tokens.
async fn write_atomic(path: &Path, session: &PersistedSession) -> Result<()> {
    let json = serde_json::to_string_pretty(session)
        .map_err(|e| Error::Storage(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Storage(format!("creating session directory: {e}")))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("session");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
