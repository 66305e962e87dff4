//! Backups kept in a directory of the local filesystem.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use super::{file_key, ProviderError, RemoteEntry, StorageProvider};

/// Stores artifacts in a local directory.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: PathBuf) -> Self {
        if root.is_relative() {
            log::warn!(target: "provider::local", "backup_dir is relative: {}", root.display());
        }
        Self { root }
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, ProviderError> {
        let path = Path::new(key);
        let is_plain_name = path.file_name().is_some_and(|name| name == path.as_os_str());
        if !is_plain_name {
            return Err(ProviderError::NotFound(key.to_string()));
        }
        Ok(self.root.join(path))
    }
}

fn not_found_as(key: &str) -> impl FnOnce(io::Error) -> ProviderError + '_ {
    move |e| match e.kind() {
        io::ErrorKind::NotFound => ProviderError::NotFound(key.to_string()),
        _ => ProviderError::Io(e),
    }
}

impl StorageProvider for LocalProvider {
    fn put(&mut self, local_path: &Path) -> Result<(), ProviderError> {
        let key = file_key(local_path)?;
        fs::create_dir_all(&self.root)?;
        let target = self.root.join(&key);

        if fs::canonicalize(local_path)? == fs::canonicalize(&self.root)?.join(&key) {
            log::debug!(target: "provider::local", "{key} already in {}", self.root.display());
            return Ok(());
        }

        log::info!(target: "provider::local", "Copy {} to {}", local_path.display(), target.display());
        fs::copy(local_path, &target)?;
        Ok(())
    }

    fn get(&mut self, key: &str, writer: &mut dyn Write) -> Result<(), ProviderError> {
        let path = self.path_of(key)?;
        let file = File::open(&path).map_err(not_found_as(key))?;
        let mut reader = BufReader::new(file);
        io::copy(&mut reader, writer)?;
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<RemoteEntry>, ProviderError> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(key) = entry.file_name().to_str() {
                entries.push(RemoteEntry::new(key, Some(metadata.len())));
            }
        }
        entries.sort();

        Ok(entries)
    }

    fn delete(&mut self, key: &str) -> Result<(), ProviderError> {
        let path = self.path_of(key)?;
        fs::remove_file(path).map_err(not_found_as(key))?;
        log::debug!(target: "provider::local", "Deleted {key}");
        Ok(())
    }
}
