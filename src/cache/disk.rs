//! Filesystem tier for payloads above the spillover threshold.
//!
//! Files live flat under one directory and are named by the SHA-256 of the
//! cache key, so a key always maps to the same file and the name never
//! carries request-controlled characters.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use super::keys::CacheKey;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("invalid cache file name `{0}`")]
    InvalidFileName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open the store rooted at `root`, creating the directory if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic file name for a key.
    pub fn file_name_for(key: &CacheKey) -> String {
        hex::encode(Sha256::digest(key.as_str().as_bytes()))
    }

    /// Write a payload so that readers observe either the previous file or the
    /// complete new one, never a partial write.
    pub async fn write(&self, file_name: &str, data: &[u8]) -> Result<PathBuf, DiskError> {
        let target = self.resolve(file_name)?;
        let staging = self
            .root
            .join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        if let Err(err) = write_file(&staging, data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(target)
    }

    /// Read a payload. A missing file is `Ok(None)`.
    pub async fn read(&self, file_name: &str) -> Result<Option<Bytes>, DiskError> {
        let path = self.resolve(file_name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a payload. Returns `false` when the file was already gone.
    pub async fn delete(&self, file_name: &str) -> Result<bool, DiskError> {
        let path = self.resolve(file_name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Absolute path of a stored file.
    pub fn path_for(&self, file_name: &str) -> Result<PathBuf, DiskError> {
        self.resolve(file_name)
    }

    fn resolve(&self, file_name: &str) -> Result<PathBuf, DiskError> {
        if file_name.is_empty() || !file_name.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(DiskError::InvalidFileName(file_name.to_string()));
        }
        Ok(self.root.join(file_name))
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}
