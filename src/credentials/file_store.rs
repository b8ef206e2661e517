//! JSON document store for credentials
//!
//! Keeps the whole bundle in one `creds.json` inside the auth directory.
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves the previous document intact.

use super::{CredentialStore, Credentials};
use crate::error::StorageError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const DEFAULT_CREDS_FILE: &str = "creds.json";

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    file_name: String,
}

impl JsonFileStore {
    pub fn new() -> Self {
        Self {
            file_name: DEFAULT_CREDS_FILE.to_string(),
        }
    }

    pub fn with_file_name<S: Into<String>>(file_name: S) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn creds_path(&self, auth_dir: &Path) -> PathBuf {
        auth_dir.join(&self.file_name)
    }

    async fn ensure_dir(auth_dir: &Path) -> Result<(), StorageError> {
        match tokio::fs::metadata(auth_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Inaccessible {
                path: auth_dir.to_path_buf(),
                source: std::io::Error::new(ErrorKind::Other, "path exists but is not a directory"),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => tokio::fs::create_dir_all(auth_dir)
                .await
                .map_err(|source| StorageError::Inaccessible {
                    path: auth_dir.to_path_buf(),
                    source,
                }),
            Err(source) => Err(StorageError::Inaccessible {
                path: auth_dir.to_path_buf(),
                source,
            }),
        }
    }
}

impl Default for JsonFileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn load(&self, auth_dir: &Path) -> Result<Credentials, StorageError> {
        Self::ensure_dir(auth_dir).await?;
        let path = self.creds_path(auth_dir);

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored credentials at {}, starting fresh", path.display());
                return Ok(Credentials::fresh());
            }
            Err(source) => return Err(StorageError::Inaccessible { path, source }),
        };

        serde_json::from_slice(&content).map_err(|source| StorageError::Corrupt { path, source })
    }

    async fn save(&self, auth_dir: &Path, credentials: &Credentials) -> Result<(), StorageError> {
        Self::ensure_dir(auth_dir).await?;
        let path = self.creds_path(auth_dir);
        let tmp_path = path.with_extension("json.tmp");

        let payload = serde_json::to_vec_pretty(credentials).map_err(|e| StorageError::Backend {
            message: format!("Failed to encode credentials: {e}"),
        })?;

        let write_failed = |source| StorageError::WriteFailed {
            path: path.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(write_failed)?;
        file.write_all(&payload).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        drop(file);

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(write_failed)?;

        debug!("Saved credentials to {}", path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}
