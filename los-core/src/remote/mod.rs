//! Synchronization with the remote file endpoint.
//!
//! The remote folder is a single-slot "current report" store: publishing
//! deletes every existing entry before uploading the new one. There is no
//! rollback if the upload fails after deletion; the folder is then left
//! empty until the next successful run, which is an accepted operational
//! risk of the full-replace strategy. The design assumes at most one
//! pipeline run active at a time.

mod encrypt;
mod sftp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use encrypt::EncryptedStore;
pub use sftp::{SftpSettings, SftpStore};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("local file {0} does not exist")]
    MissingLocalFile(PathBuf),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("session error: {0}")]
    Session(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File operations on the configured remote folder.
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// Names of all entries in the remote folder.
    async fn list(&self) -> Result<Vec<String>, RemoteError>;

    /// Upload `local` under its own file name, overwriting any remote file
    /// of the same name. Errors when the local file does not exist.
    async fn upload(&self, local: &Path) -> Result<(), RemoteError>;

    /// Delete a remote file by name. Deleting an already absent file is
    /// logged and succeeds, so a retried run cannot trip over its own
    /// earlier cleanup.
    async fn delete(&self, name: &str) -> Result<(), RemoteError>;
}

/// Full-replace publish: delete every remote entry, then upload `local`.
pub async fn publish(store: &dyn RemoteFileStore, local: &Path) -> Result<(), RemoteError> {
    let existing = store.list().await?;
    info!(count = existing.len(), "clearing remote folder before upload");
    for name in existing {
        store.delete(&name).await?;
    }
    store.upload(local).await
}
