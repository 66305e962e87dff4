//! Backups kept in a directory on an FTP server.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};

use super::{file_key, ProviderError, RemoteEntry, StorageProvider};
use crate::config::FtpConfig;

/// Stores artifacts in a directory on an FTP server.
///
/// The session is opened on first use and closed when the provider is dropped.
pub struct FtpProvider {
    config: FtpConfig,
    remote_dir: String,
    stream: Option<FtpStream>,
}

impl FtpProvider {
    pub fn new(config: FtpConfig, remote_dir: &str) -> Self {
        Self {
            config,
            remote_dir: remote_dir.to_string(),
            stream: None,
        }
    }

    fn connect(&self) -> Result<FtpStream, ProviderError> {
        let FtpConfig {
            host,
            port,
            user,
            password,
        } = &self.config;
        log::debug!(target: "provider::ftp", "Connect to {host}:{port} as {user}");

        let mut stream = FtpStream::connect((host.as_str(), *port)).map_err(transport)?;
        stream.login(user.as_str(), password.as_str()).map_err(transport)?;
        stream.transfer_type(FileType::Binary).map_err(transport)?;

        if !self.remote_dir.is_empty() && stream.cwd(&self.remote_dir).is_err() {
            log::info!(target: "provider::ftp", "Create remote directory {}", self.remote_dir);
            if self.remote_dir.starts_with('/') {
                stream.cwd("/").map_err(transport)?;
            }
            for component in dir_components(&self.remote_dir) {
                if stream.cwd(component).is_err() {
                    stream.mkdir(component).map_err(transport)?;
                    stream.cwd(component).map_err(transport)?;
                }
            }
        }

        Ok(stream)
    }

    fn session(&mut self) -> Result<&mut FtpStream, ProviderError> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };
        Ok(self.stream.insert(stream))
    }
}

impl Drop for FtpProvider {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.quit() {
                log::debug!(target: "provider::ftp", "Closing the FTP session failed: {e}");
            }
        }
    }
}

fn transport(e: FtpError) -> ProviderError {
    match e {
        FtpError::ConnectionError(e) => ProviderError::Io(e),
        other => ProviderError::Transport(other.to_string()),
    }
}

fn is_unavailable(e: &FtpError) -> bool {
    matches!(e, FtpError::UnexpectedResponse(response) if response.status == Status::FileUnavailable)
}

/// `550` for `key` means the file is absent.
fn not_found_as(key: &str, e: FtpError) -> ProviderError {
    if is_unavailable(&e) {
        ProviderError::NotFound(key.to_string())
    } else {
        transport(e)
    }
}

/// Directories below each other in `remote_dir`, created one by one.
fn dir_components(remote_dir: &str) -> impl Iterator<Item = &str> {
    remote_dir
        .split('/')
        .filter(|component| !component.is_empty() && *component != ".")
}

/// Entries of an `NLST` reply. Some servers answer with paths, only the file
/// name is kept. Directories marked with a trailing slash are skipped.
fn listed_entries(names: Vec<String>) -> Vec<RemoteEntry> {
    let mut entries: Vec<_> = names
        .iter()
        .map(String::as_str)
        .filter(|name| !name.ends_with('/'))
        .map(|name| name.rsplit_once('/').map_or(name, |(_, base)| base))
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(|name| RemoteEntry::new(name, None))
        .collect();
    entries.sort();
    entries
}

impl StorageProvider for FtpProvider {
    fn put(&mut self, local_path: &Path) -> Result<(), ProviderError> {
        let key = file_key(local_path)?;
        let mut reader = BufReader::new(File::open(local_path)?);
        log::info!(target: "provider::ftp", "Upload {} to {}/{key}", local_path.display(), self.remote_dir);

        let bytes = self.session()?.put_file(&key, &mut reader).map_err(transport)?;
        log::debug!(target: "provider::ftp", "Uploaded {bytes} bytes");
        Ok(())
    }

    fn get(&mut self, key: &str, writer: &mut dyn Write) -> Result<(), ProviderError> {
        let session = self.session()?;
        let mut stream = session
            .retr_as_stream(key)
            .map_err(|e| not_found_as(key, e))?;
        io::copy(&mut stream, writer)?;
        session.finalize_retr_stream(stream).map_err(transport)?;
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<RemoteEntry>, ProviderError> {
        let names = match self.session()?.nlst(None) {
            Ok(names) => names,
            // some servers answer an empty directory with 550
            Err(e) if is_unavailable(&e) => Vec::new(),
            Err(e) => return Err(transport(e)),
        };

        Ok(listed_entries(names))
    }

    fn delete(&mut self, key: &str) -> Result<(), ProviderError> {
        self.session()?.rm(key).map_err(|e| not_found_as(key, e))
    }
}
