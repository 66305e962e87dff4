//! Top level sequencing of backup, cleanup and restore runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::compress::{CompressionEngine, CompressionError};
use crate::config::{BackupConfig, ConfigError};
use crate::database::{DumpEngine, DumpError};
use crate::naming::{ArchiveNamer, Timestamp};
use crate::process::ProcessRunner;
use crate::providers::{self, LocalProvider, ProviderError, RemoteEntry, StorageProvider};
use crate::restore::{ArchiveFormat, RestoreEngine, RestoreError};
use crate::util::retention::{Retention, SweepReport};

#[derive(Debug, Display, Error, From)]
/// Fatal errors of an orchestrator operation.
pub enum BackupError {
    #[display("{_0}")]
    #[from]
    Config(ConfigError),
    #[display("{_0}")]
    #[from]
    Dump(DumpError),
    #[display("{_0}")]
    #[from]
    Compression(CompressionError),
    #[display("{_0}")]
    #[from]
    Provider(ProviderError),
    #[display("{_0}")]
    #[from]
    Restore(RestoreError),
    #[display("Unable to create dump directory {}: {source}", path.display())]
    DumpDir { path: PathBuf, source: io::Error },
    /// The artifact vanished between creation and upload.
    #[display("Artifact missing, not uploading: {}", _0.display())]
    MissingArtifact(#[error(ignore)] PathBuf),
}

/// Deleted and failed entries of a [BackupOrchestrator::cleanup] run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupReport {
    /// Artifacts in the dump directory.
    pub local: SweepReport<RemoteEntry>,
    /// Artifacts of the provider, `None` if uploads are disabled.
    pub remote: Option<SweepReport<RemoteEntry>>,
}

/// Composes dumps, compression, storage and retention into the user facing
/// operations.
///
/// One orchestrator corresponds to one run: all artifacts it produces share the
/// [Timestamp] taken at construction.
pub struct BackupOrchestrator {
    config: BackupConfig,
    namer: ArchiveNamer,
    runner: ProcessRunner,
    provider: Box<dyn StorageProvider>,
}

impl BackupOrchestrator {
    /// Validates `config` and connects the configured provider lazily.
    pub fn new(config: BackupConfig) -> Result<Self, BackupError> {
        config.check()?;
        let provider = providers::from_config(&config)?;
        Self::with_provider(config, provider, Timestamp::now())
    }

    /// Orchestrator storing to `provider` instead of the configured one.
    pub fn with_provider(
        config: BackupConfig,
        provider: Box<dyn StorageProvider>,
        timestamp: Timestamp,
    ) -> Result<Self, BackupError> {
        config.check()?;
        let runner = ProcessRunner::new(
            config.verbose,
            config.enable_nice.then_some(config.nice_level),
        );
        let namer = ArchiveNamer::new(&config.app_name, timestamp);
        log::debug!(target: "orchestrator", "Run timestamp {}", namer.timestamp());

        Ok(Self {
            config,
            namer,
            runner,
            provider,
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    fn dump_dir(&self) -> Result<PathBuf, BackupError> {
        let path = self.config.dump_base_path();
        fs::create_dir_all(&path).map_err(|source| BackupError::DumpDir {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Dumps the database and stores the artifact.
    pub fn backup(&mut self) -> Result<PathBuf, BackupError> {
        let dir = self.dump_dir()?;
        let artifact = DumpEngine::new(&self.config, &self.namer, &self.runner).dump(&dir)?;
        self.store(&artifact)?;
        log::info!(target: "orchestrator", "Database backup finished: {}", artifact.display());
        Ok(artifact)
    }

    /// Packs the static paths into one archive and stores it.
    pub fn backup_static(&mut self) -> Result<PathBuf, BackupError> {
        let paths = self.config.static_paths()?;
        let dir = self.dump_dir()?;
        let artifact = CompressionEngine::new(&self.config, &self.namer, &self.runner)
            .compress_static(&paths, &dir)?;
        self.store(&artifact)?;
        log::info!(target: "orchestrator", "Static backup finished: {}", artifact.display());
        Ok(artifact)
    }

    fn store(&mut self, artifact: &Path) -> Result<(), BackupError> {
        if !artifact.is_file() {
            return Err(BackupError::MissingArtifact(artifact.to_path_buf()));
        }
        if !self.config.uploads_enabled() {
            log::info!(target: "orchestrator", "Uploads disabled, keeping {} local only", artifact.display());
            return Ok(());
        }

        log::info!(target: "orchestrator", "Storing {} with the {} provider", artifact.display(), self.config.provider.kind());
        self.provider.put(artifact)?;
        Ok(())
    }

    /// Deletes all but the [keep_backups](BackupConfig::keep_backups) most
    /// recent artifacts in the dump directory and at the provider.
    ///
    /// Listing failures are fatal, failing deletions are logged and reported.
    pub fn cleanup(&mut self) -> Result<CleanupReport, BackupError> {
        let retention = Retention::new(self.config.keep_backups);

        let mut local = LocalProvider::new(self.config.dump_base_path());
        let local = sweep(&retention, "local", &self.namer, &mut local)?;

        let remote = if self.config.uploads_enabled() {
            Some(sweep(&retention, "remote", &self.namer, self.provider.as_mut())?)
        } else {
            None
        };

        Ok(CleanupReport { local, remote })
    }

    /// Artifacts of this application at the provider, or in the dump directory
    /// if uploads are disabled. Oldest first.
    pub fn list_backups(&mut self) -> Result<Vec<RemoteEntry>, BackupError> {
        let entries = if self.config.uploads_enabled() {
            self.provider.list()?
        } else {
            LocalProvider::new(self.config.dump_base_path()).list()?
        };

        Ok(owned_by(entries, &self.namer))
    }

    /// Restores the database from the artifact `key`.
    ///
    /// The artifact is taken from the dump directory if uploads are disabled.
    pub fn restore_backup(&mut self, key: &str) -> Result<ArchiveFormat, BackupError> {
        let dir = self.dump_dir()?;
        log::info!(target: "orchestrator", "Restoring {key}");

        let mut local;
        let source: &mut dyn StorageProvider = if self.config.uploads_enabled() {
            self.provider.as_mut()
        } else {
            local = LocalProvider::new(dir.clone());
            &mut local
        };

        let format = RestoreEngine::new(&self.config, &self.runner).restore(source, key, &dir)?;
        Ok(format)
    }
}

fn owned_by(entries: Vec<RemoteEntry>, namer: &ArchiveNamer) -> Vec<RemoteEntry> {
    entries
        .into_iter()
        .filter(|entry| namer.owns(&entry.key))
        .collect()
}

/// Applies `retention` to the artifacts of `provider` owned by `namer`.
fn sweep(
    retention: &Retention,
    location: &str,
    namer: &ArchiveNamer,
    provider: &mut dyn StorageProvider,
) -> Result<SweepReport<RemoteEntry>, BackupError> {
    let entries = owned_by(provider.list()?, namer);
    log::debug!(target: "orchestrator", "{} {location} backup(s) found", entries.len());

    Ok(retention.sweep(location, &entries, |entry| {
        match provider.delete(&entry.key) {
            Err(e) if e.is_not_found() => {
                log::debug!(target: "orchestrator", "{} already gone", entry.key);
                Ok(())
            }
            other => other,
        }
    }))
}
