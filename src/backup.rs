//! Whole-collection backup to an external target.
//!
//! Credentials are an explicit [`CloudCredentials`] value handed to an
//! [`Authenticator`]; nothing is global. Authenticating yields a
//! [`CloudSession`] that can back up and restore a [`Snapshot`].
//!
//! Only the local-directory target is wired up. The OAuth providers accept
//! credentials but report [`CloudError::Unavailable`] on authentication.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::Snapshot;

pub const BACKUP_FILE_NAME: &str = "feedkeep-backup.json";

const BACKUP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("{0} backup is not available")]
    Unavailable(CloudProvider),

    #[error("Missing backup credential: {0}")]
    MissingCredential(&'static str),

    #[error("No backup found at {0}")]
    NotFound(PathBuf),

    #[error("Backup I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid backup file: {0}")]
    InvalidBackup(#[from] serde_json::Error),

    #[error("Unsupported backup format version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    #[default]
    LocalDirectory,
    GoogleDrive,
    Dropbox,
    OneDrive,
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudProvider::LocalDirectory => "Local directory",
            CloudProvider::GoogleDrive => "Google Drive",
            CloudProvider::Dropbox => "Dropbox",
            CloudProvider::OneDrive => "OneDrive",
        };
        f.write_str(name)
    }
}

/// Credentials for one backup target.
#[derive(Clone, Default)]
pub struct CloudCredentials {
    pub provider: CloudProvider,
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    /// Target directory for [`CloudProvider::LocalDirectory`]
    pub directory: Option<PathBuf>,
}

impl CloudCredentials {
    pub fn local(directory: impl Into<PathBuf>) -> Self {
        Self {
            provider: CloudProvider::LocalDirectory,
            directory: Some(directory.into()),
            ..Self::default()
        }
    }
}

/// SEC-015: Mask client_secret in Debug output to prevent secret leakage.
impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("directory", &self.directory)
            .finish()
    }
}

/// What a backup run wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub feeds: usize,
    pub articles: usize,
    pub read_later: usize,
}

#[derive(Serialize, Deserialize)]
struct BackupFile {
    version: u32,
    created_at: DateTime<Utc>,
    snapshot: Snapshot,
}

pub struct Authenticator {
    credentials: CloudCredentials,
}

impl Authenticator {
    pub fn new(credentials: CloudCredentials) -> Self {
        Self { credentials }
    }

    pub fn provider(&self) -> CloudProvider {
        self.credentials.provider
    }

    /// Validates the credentials and opens a session with the target.
    pub async fn authenticate(&self) -> Result<CloudSession, CloudError> {
        let credentials = &self.credentials;
        match credentials.provider {
            CloudProvider::LocalDirectory => {
                let directory = credentials
                    .directory
                    .clone()
                    .ok_or(CloudError::MissingCredential("directory"))?;
                tokio::fs::create_dir_all(&directory).await?;
                tracing::debug!(directory = %directory.display(), "Backup target ready");
                Ok(CloudSession { directory })
            }
            provider => {
                if credentials.client_id.trim().is_empty() {
                    return Err(CloudError::MissingCredential("client_id"));
                }
                if credentials.client_secret.is_none() {
                    return Err(CloudError::MissingCredential("client_secret"));
                }
                tracing::warn!(%provider, "OAuth backup providers are not supported");
                Err(CloudError::Unavailable(provider))
            }
        }
    }
}

/// An authenticated backup target.
#[derive(Debug, Clone)]
pub struct CloudSession {
    directory: PathBuf,
}

impl CloudSession {
    pub fn backup_path(&self) -> PathBuf {
        self.directory.join(BACKUP_FILE_NAME)
    }

    /// Writes `snapshot` to the target, replacing any previous backup
    /// atomically.
    pub async fn backup(&self, snapshot: &Snapshot) -> Result<BackupInfo, CloudError> {
        let created_at = Utc::now();
        let file = BackupFile {
            version: BACKUP_FORMAT_VERSION,
            created_at,
            snapshot: snapshot.clone(),
        };
        let content = serde_json::to_vec_pretty(&file)?;

        let path = self.backup_path();
        write_atomic(&path, &content).await?;

        let info = BackupInfo {
            path,
            created_at,
            feeds: snapshot.feeds.len(),
            articles: snapshot.articles.len(),
            read_later: snapshot.read_later.len(),
        };
        tracing::info!(path = %info.path.display(), feeds = info.feeds, articles = info.articles, "Backup written");
        Ok(info)
    }

    /// Reads the latest backup from the target.
    pub async fn restore(&self) -> Result<Snapshot, CloudError> {
        let path = self.backup_path();
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CloudError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        let file: BackupFile = serde_json::from_slice(&content)?;
        if file.version != BACKUP_FORMAT_VERSION {
            return Err(CloudError::UnsupportedVersion(file.version));
        }
        tracing::info!(path = %path.display(), created_at = %file.created_at, "Backup read");
        Ok(file.snapshot)
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    let temp_path = path.with_extension(format!("tmp.{:016x}", Utc::now().timestamp_nanos_opt().unwrap_or(0)));

    if let Err(e) = write_synced(&temp_path, content).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

async fn write_synced(path: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.sync_all().await
}
