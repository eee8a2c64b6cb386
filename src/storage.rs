use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage key '{0}' escapes the upload root")]
    InvalidKey(String),
    #[error("stored file '{0}' does not exist")]
    NotFound(String),
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(_) => AppError::missing("stored file"),
            other => AppError::internal(other),
        }
    }
}

/// Where uploaded document bytes live, addressed by relative key.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Removes the object; `Ok(false)` when it was already gone.
    async fn delete_object(&self, key: &str) -> Result<bool, StorageError>;
}

/// Files kept below a directory on the local file system.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// `YYYY/MM/DD/<random>_<filename>` for a file uploaded on `date`.
pub fn storage_key(date: NaiveDate, sanitized_filename: &str) -> String {
    format!(
        "{}/{}_{}",
        date.format("%Y/%m/%d"),
        Uuid::new_v4().simple(),
        sanitized_filename
    )
}
