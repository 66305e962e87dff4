//! Storage providers artifacts are shipped to.
//!
//! Currently the following providers are implemented:
//!
//! - [LocalProvider]: A directory on the local filesystem.
//! - [FtpProvider]: A directory on an FTP server.
//! - [S3Provider]: A key prefix in an S3 bucket.
//!
//! Every provider lists its entries sorted by key. Artifact names start with
//! the application name followed by the timestamp, so this is oldest first.

pub mod ftp;
pub mod local;
pub mod s3;

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use derive_more::{Display, Error, From};

pub use ftp::FtpProvider;
pub use local::LocalProvider;
pub use s3::S3Provider;

use crate::config::{BackupConfig, ProviderConfig};

/// An artifact stored by a [StorageProvider].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct RemoteEntry {
    /// Name of the artifact, relative to the backup location.
    pub key: String,
    /// Size in bytes, if the provider reports it.
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn new(key: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

impl fmt::Display for RemoteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors of a [StorageProvider].
pub enum ProviderError {
    /// The requested key doesn't exist.
    #[display("Backup not found: {_0}")]
    NotFound(#[error(ignore)] String),
    /// Reading or writing a local file failed.
    #[display("Transport failed: {_0}")]
    #[from]
    Io(io::Error),
    /// The remote end failed or refused the request.
    #[display("Transport failed: {_0}")]
    Transport(#[error(ignore)] String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Uniform access to a backup location.
pub trait StorageProvider {
    /// Stores the file at `local_path` under its file name.
    ///
    /// The backup location is created if it doesn't exist yet.
    fn put(&mut self, local_path: &Path) -> Result<(), ProviderError>;

    /// Streams the artifact `key` into `writer`.
    fn get(&mut self, key: &str, writer: &mut dyn Write) -> Result<(), ProviderError>;

    /// All stored artifacts, sorted by key. Empty if nothing is stored yet.
    fn list(&mut self) -> Result<Vec<RemoteEntry>, ProviderError>;

    /// Deletes the artifact `key`, [ProviderError::NotFound] if it's absent.
    fn delete(&mut self, key: &str) -> Result<(), ProviderError>;
}

/// Provider selected by [BackupConfig::provider].
pub fn from_config(config: &BackupConfig) -> Result<Box<dyn StorageProvider>, ProviderError> {
    let provider: Box<dyn StorageProvider> = match &config.provider {
        ProviderConfig::Local => Box::new(LocalProvider::new(config.local_backup_dir())),
        ProviderConfig::Ftp(ftp) => Box::new(FtpProvider::new(ftp.clone(), &config.remote_backup_dir)),
        ProviderConfig::S3(s3) => Box::new(S3Provider::new(s3, &config.remote_backup_dir)?),
    };
    log::debug!(target: "provider", "Using {} provider", config.provider.kind());

    Ok(provider)
}

/// Key the file at `local_path` is stored under.
pub(crate) fn file_key(local_path: &Path) -> Result<String, ProviderError> {
    local_path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Transport(format!("not a file: {}", local_path.display())))
}
