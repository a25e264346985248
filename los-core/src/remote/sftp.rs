//! SFTP implementation of the remote file store.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use tracing::info;

use super::{RemoteError, RemoteFileStore};

// libssh2 SFTP status for a missing remote file.
const SFTP_NO_SUCH_FILE: i32 = 2;

#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub folder: PathBuf,
}

/// Remote store backed by an SFTP server.
///
/// ssh2 is a blocking library; every operation opens a fresh session inside
/// `spawn_blocking`. A run performs only a handful of remote calls, so the
/// per-operation handshake is not worth a pooled connection.
#[derive(Debug, Clone)]
pub struct SftpStore {
    settings: Arc<SftpSettings>,
}

impl SftpStore {
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    async fn with_sftp<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp, &SftpSettings) -> Result<T, RemoteError> + Send + 'static,
    {
        let settings = Arc::clone(&self.settings);
        tokio::task::spawn_blocking(move || {
            let sftp = connect(&settings)?;
            op(&sftp, &settings)
        })
        .await
        .map_err(|err| RemoteError::Session(format!("sftp task failed: {err}")))?
    }
}

fn connect(settings: &SftpSettings) -> Result<Sftp, RemoteError> {
    let address = (settings.host.as_str(), settings.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            RemoteError::Session(format!("could not resolve host {}", settings.host))
        })?;
    let stream = TcpStream::connect_timeout(&address, settings.timeout)?;

    let mut session = Session::new()?;
    session.set_tcp_stream(stream);
    session.set_timeout(settings.timeout.as_millis() as u32);
    session.handshake()?;
    session.userauth_password(&settings.username, &settings.password)?;
    Ok(session.sftp()?)
}

#[async_trait]
impl RemoteFileStore for SftpStore {
    async fn list(&self) -> Result<Vec<String>, RemoteError> {
        info!("listing files on SFTP server");
        self.with_sftp(|sftp, settings| {
            let entries = sftp.readdir(&settings.folder)?;
            Ok(entries
                .into_iter()
                .filter_map(|(path, _)| {
                    path.file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                })
                .collect())
        })
        .await
    }

    async fn upload(&self, local: &Path) -> Result<(), RemoteError> {
        if !local.is_file() {
            return Err(RemoteError::MissingLocalFile(local.to_path_buf()));
        }
        let local = local.to_path_buf();
        info!(path = %local.display(), "uploading file to SFTP server");
        self.with_sftp(move |sftp, settings| {
            let file_name = local
                .file_name()
                .ok_or_else(|| RemoteError::MissingLocalFile(local.clone()))?;
            let bytes = std::fs::read(&local)?;
            let mut remote = sftp.create(&settings.folder.join(file_name))?;
            remote.write_all(&bytes)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<(), RemoteError> {
        let name = name.to_string();
        info!(name, "deleting file from SFTP server");
        self.with_sftp(move |sftp, settings| {
            match sftp.unlink(&settings.folder.join(&name)) {
                Ok(()) => Ok(()),
                Err(err) if err.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => {
                    info!(name, "file was already absent");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        })
        .await
    }
}
