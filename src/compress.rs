//! Packing of database dumps and static files with `tar`/`gzip` or `zip`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::config::{BackupConfig, Compressor};
use crate::naming::ArchiveNamer;
use crate::process::{CommandLine, ProcessError, ProcessRunner};

#[derive(Debug, Display, Error, From)]
/// Errors creating a compressed artifact.
pub enum CompressionError {
    /// The archiver could not be run or exited unsuccessfully.
    #[display("Compression failed: {_0}")]
    #[from]
    Process(ProcessError),
    /// The archiver succeeded but the artifact is missing.
    #[display("Compressed artifact missing after compression: {}", _0.display())]
    MissingArtifact(#[error(ignore)] PathBuf),
    /// Input has no file name.
    #[display("Not a file: {}", _0.display())]
    InvalidInput(#[error(ignore)] PathBuf),
}

/// Wraps dumps and static paths into a single compressed artifact.
pub struct CompressionEngine<'a> {
    config: &'a BackupConfig,
    namer: &'a ArchiveNamer,
    runner: &'a ProcessRunner,
}

impl<'a> CompressionEngine<'a> {
    pub fn new(config: &'a BackupConfig, namer: &'a ArchiveNamer, runner: &'a ProcessRunner) -> Self {
        Self {
            config,
            namer,
            runner,
        }
    }

    /// Compresses the raw dump at `raw_path` next to it.
    ///
    /// Zip archives store the dump without its directory.
    pub fn compress_db(&self, raw_path: &Path) -> Result<PathBuf, CompressionError> {
        let (Some(dir), Some(file_name)) = (raw_path.parent(), raw_path.file_name()) else {
            return Err(CompressionError::InvalidInput(raw_path.to_path_buf()));
        };
        let final_path = dir.join(
            self.namer
                .db_final_name(true, self.config.compressor),
        );
        log::info!(target: "compress", "Compress database dump to {}", final_path.display());

        let command = match self.config.compressor {
            Compressor::Zip => self
                .zip_command()
                .arg("-j")
                .arg(&final_path)
                .arg(raw_path),
            Compressor::TarGz => CommandLine::new("tar")
                .arg("-czf")
                .arg(&final_path)
                .arg("-C")
                .arg(dir)
                .arg(file_name),
        };

        self.run(&command, &final_path)?;
        Ok(final_path)
    }

    /// Packs all `paths` into one archive in `dir` with a single archiver call.
    pub fn compress_static(&self, paths: &[PathBuf], dir: &Path) -> Result<PathBuf, CompressionError> {
        let final_path = dir.join(self.namer.static_final_name(self.config.compressor));
        for path in paths {
            log::debug!(target: "compress", "Static path: {}", path.display());
        }
        log::info!(target: "compress", "Compress {} static path(s) to {}", paths.len(), final_path.display());

        let command = self.static_command(paths, &final_path)?;
        self.run(&command, &final_path)?;
        Ok(final_path)
    }

    /// The single archiver call packing `paths` into `final_path`.
    ///
    /// tar members are given relative to `/`, so they are stored the same way
    /// as absolute paths without tar stripping the leading slash.
    pub fn static_command(
        &self,
        paths: &[PathBuf],
        final_path: &Path,
    ) -> Result<CommandLine, CompressionError> {
        let command = match self.config.compressor {
            Compressor::Zip => {
                let mut command = self.zip_command().arg("-r").arg(final_path).args(paths);
                if !self.config.skips.is_empty() {
                    command = command.arg("-x").args(&self.config.skips);
                }
                command
            }
            Compressor::TarGz => CommandLine::new("tar")
                .arg("-czf")
                .arg(final_path)
                .args(self.config.skips.iter().map(|skip| format!("--exclude={skip}")))
                .args(["-C", "/"])
                .args(
                    paths
                        .iter()
                        .map(|path| root_relative(path))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
        };
        Ok(command)
    }

    fn zip_command(&self) -> CommandLine {
        let command = CommandLine::new("zip").arg("-q");
        match self.config.zip_password() {
            Some(password) => command.arg("-P").arg(password),
            None => command,
        }
    }

    fn run(&self, command: &CommandLine, final_path: &Path) -> Result<(), CompressionError> {
        let result = self.runner.run(command).and_then(|r| r.ensure_success(command));
        if let Err(e) = result {
            remove_partial(final_path);
            return Err(e.into());
        }

        if !final_path.is_file() {
            return Err(CompressionError::MissingArtifact(final_path.to_path_buf()));
        }
        Ok(())
    }
}

/// `path` made absolute, without its leading `/`.
fn root_relative(path: &Path) -> Result<PathBuf, CompressionError> {
    let absolute =
        std::path::absolute(path).map_err(|_| CompressionError::InvalidInput(path.to_path_buf()))?;
    Ok(absolute
        .strip_prefix("/")
        .map(Path::to_path_buf)
        .unwrap_or(absolute))
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {
            log::warn!(target: "compress", "Removed partial artifact {}", path.display())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            log::warn!(target: "compress", "Unable to remove partial artifact {}: {e}", path.display())
        }
    }
}
