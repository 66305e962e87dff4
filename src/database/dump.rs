//! Database dumps with `pg_dump` or `mysqldump`.

use std::fs;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use super::{sqlcmd_options, with_credentials, Adapter, UnsupportedAdapter};
use crate::compress::{CompressionEngine, CompressionError};
use crate::config::BackupConfig;
use crate::naming::ArchiveNamer;
use crate::process::{CommandLine, ProcessError, ProcessRunner};

#[derive(Debug, Display, Error, From)]
/// Errors producing a database dump.
pub enum DumpError {
    #[display("{_0}")]
    #[from]
    UnsupportedAdapter(UnsupportedAdapter),
    /// The dumper could not be run or exited unsuccessfully.
    #[display("Database dump failed: {_0}")]
    #[from]
    Process(ProcessError),
    #[display("{_0}")]
    #[from]
    Compression(CompressionError),
    /// The raw dump could not be removed after compression.
    #[display("Unable to remove raw dump {}: {source}", path.display())]
    RemoveRaw {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Produces database dumps in the dump directory.
pub struct DumpEngine<'a> {
    config: &'a BackupConfig,
    namer: &'a ArchiveNamer,
    runner: &'a ProcessRunner,
}

impl<'a> DumpEngine<'a> {
    pub fn new(config: &'a BackupConfig, namer: &'a ArchiveNamer, runner: &'a ProcessRunner) -> Self {
        Self {
            config,
            namer,
            runner,
        }
    }

    /// The dumper command writing to `raw_path`.
    pub fn dump_command(&self, raw_path: &Path) -> Result<CommandLine, DumpError> {
        let database = &self.config.database;
        let adapter = Adapter::of(database)?;
        let binary = self
            .config
            .mysqldump_path
            .as_deref()
            .or(self.config.dump_path.as_deref())
            .unwrap_or(adapter.dump_binary());

        let command = CommandLine::new(binary);
        let command = match adapter {
            // custom format including large objects
            Adapter::Postgresql => command.args(["-F", "c", "-b"]),
            Adapter::Mysql => command.args(self.config.mysqldump_options()),
        };

        Ok(with_credentials(command, database, adapter)
            .args(sqlcmd_options(database, adapter))
            .arg(&database.database)
            .stdout_to(raw_path))
    }

    /// Dumps the database into `dir` and returns the artifact to store.
    ///
    /// Unless compression is disabled the raw dump is compressed and removed.
    pub fn dump(&self, dir: &Path) -> Result<PathBuf, DumpError> {
        let raw_path = dir.join(self.namer.db_dump_name());
        let command = self.dump_command(&raw_path)?;
        log::info!(target: "dump", "Create {} dump of database {}", self.config.database.adapter, self.config.database.database);

        let result = self
            .runner
            .run(&command)
            .and_then(|result| result.ensure_success(&command));
        if let Err(e) = result {
            if fs::remove_file(&raw_path).is_ok() {
                log::warn!(target: "dump", "Removed partial dump {}", raw_path.display());
            }
            return Err(e.into());
        }
        log::debug!(target: "dump", "Database dumped to {}", raw_path.display());

        if self.config.disable_compression {
            return Ok(raw_path);
        }

        let final_path =
            CompressionEngine::new(self.config, self.namer, self.runner).compress_db(&raw_path)?;
        fs::remove_file(&raw_path).map_err(|source| DumpError::RemoveRaw {
            path: raw_path.clone(),
            source,
        })?;
        log::info!(target: "dump", "Finished database dump {}", final_path.display());

        Ok(final_path)
    }
}
