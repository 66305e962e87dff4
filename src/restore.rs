//! Restore of a stored database artifact into the live database.
//!
//! A restore fetches the artifact into a scratch directory, unpacks it, drops
//! the existing tables (PostgreSQL only) and loads the dump. A failing step
//! aborts the remaining ones; nothing is rolled back. The scratch directory is
//! removed on every exit path.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use derive_more::{Display, Error, From};
use regex::Regex;

use crate::config::BackupConfig;
use crate::database::{sqlcmd_options, with_credentials, Adapter, UnsupportedAdapter};
use crate::process::{CommandLine, ProcessError, ProcessRunner};
use crate::providers::{ProviderError, StorageProvider};

static TAR_GZ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+)\.tar\.gz$").expect("tar.gz pattern should be valid"));
static ZIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+)\.zip$").expect("zip pattern should be valid"));

const PUBLIC_TABLES_QUERY: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema='public' AND table_type='BASE TABLE'";

#[derive(Debug, Display, Error, From)]
/// Errors restoring a backup.
pub enum RestoreError {
    #[display("Restore unsupported: {_0}")]
    #[from]
    UnsupportedAdapter(UnsupportedAdapter),
    /// The key has no known archive suffix and compression is enabled.
    #[display("Restore not implemented for unknown file type: {_0}")]
    UnsupportedFormat(#[error(ignore)] String),
    #[display("Fetching backup failed: {_0}")]
    #[from]
    Provider(ProviderError),
    #[display("Scratch file I/O failed: {_0}")]
    #[from]
    Io(io::Error),
    /// An external tool of `stage` failed.
    #[display("Restore stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        source: ProcessError,
    },
    /// The unpacked archive doesn't contain the expected dump.
    #[display("Unpacked archive is missing {}", _0.display())]
    MissingPayload(#[error(ignore)] PathBuf),
}

/// Packaging of a stored artifact.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
    /// A dump stored without compression.
    Plain,
}

impl ArchiveFormat {
    /// Detects the format from the suffix of `key` and returns it with the
    /// file name of the dump inside the artifact.
    ///
    /// Keys without an archive suffix are only accepted as plain dumps when
    /// compression is disabled.
    pub fn detect(key: &str, disable_compression: bool) -> Result<(Self, String), RestoreError> {
        let name = key.rsplit('/').next().unwrap_or(key);

        if let Some(stem) = TAR_GZ.captures(name).and_then(|c| c.get(1)) {
            return Ok((Self::TarGz, format!("{}.sql", stem.as_str())));
        }
        if let Some(stem) = ZIP.captures(name).and_then(|c| c.get(1)) {
            return Ok((Self::Zip, format!("{}.sql", stem.as_str())));
        }
        if disable_compression && !name.is_empty() {
            return Ok((Self::Plain, name.to_string()));
        }

        Err(RestoreError::UnsupportedFormat(key.to_string()))
    }
}

/// Table names printed by `psql -t -A`, one per line.
pub fn parse_tables(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `DROP TABLE` statement for all `tables`, `None` if there are none.
pub fn drop_statement(tables: &[String]) -> Option<String> {
    if tables.is_empty() {
        return None;
    }
    let quoted: Vec<String> = tables
        .iter()
        .map(|table| format!("\"{}\"", table.replace('"', "\"\"")))
        .collect();
    Some(format!("DROP TABLE {} CASCADE", quoted.join(", ")))
}

/// Fetches, unpacks and loads stored database dumps.
pub struct RestoreEngine<'a> {
    config: &'a BackupConfig,
    runner: &'a ProcessRunner,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(config: &'a BackupConfig, runner: &'a ProcessRunner) -> Self {
        Self { config, runner }
    }

    /// Restores the artifact `key` of `provider` into the configured database.
    ///
    /// Scratch files are placed in a temporary directory below `scratch_root`.
    pub fn restore(
        &self,
        provider: &mut dyn StorageProvider,
        key: &str,
        scratch_root: &Path,
    ) -> Result<ArchiveFormat, RestoreError> {
        let adapter = Adapter::of(&self.config.database)?;
        let (format, payload_name) = ArchiveFormat::detect(key, self.config.disable_compression)?;
        log::debug!(target: "restore", "{key} is {format:?}, expecting {payload_name}");

        std::fs::create_dir_all(scratch_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("restore-")
            .tempdir_in(scratch_root)?;

        let archive = self.fetch(provider, key, scratch.path())?;
        let payload = match format {
            ArchiveFormat::Plain => archive,
            _ => {
                self.extract(format, &archive, scratch.path())?;
                let payload = scratch.path().join(&payload_name);
                if !payload.is_file() {
                    return Err(RestoreError::MissingPayload(PathBuf::from(payload_name)));
                }
                payload
            }
        };
        log::info!(target: "restore", "Restore file unpacked: {}", payload.display());

        match self.prepare_database(adapter) {
            Err(RestoreError::UnsupportedAdapter(e)) => {
                log::warn!(target: "restore", "Existing tables are kept, dropping them is unsupported: {e}");
            }
            other => other?,
        }

        self.load(adapter, &payload)?;
        log::info!(target: "restore", "Restored {key} into {}", self.config.database.database);

        Ok(format)
    }

    /// Streams `key` into a file in `dir`.
    fn fetch(
        &self,
        provider: &mut dyn StorageProvider,
        key: &str,
        dir: &Path,
    ) -> Result<PathBuf, RestoreError> {
        let name = key.rsplit('/').next().unwrap_or(key);
        let path = dir.join(name);
        log::info!(target: "restore", "Fetching {key} to {}", path.display());

        let mut writer = BufWriter::new(File::create(&path)?);
        provider.get(key, &mut writer)?;
        writer.flush()?;

        Ok(path)
    }

    /// Extracts `archive` into `dest` with `tar` or `unzip`.
    pub fn extract(
        &self,
        format: ArchiveFormat,
        archive: &Path,
        dest: &Path,
    ) -> Result<(), RestoreError> {
        let command = match format {
            ArchiveFormat::TarGz => CommandLine::new("tar")
                .arg("-xzf")
                .arg(archive)
                .arg("-C")
                .arg(dest),
            ArchiveFormat::Zip => {
                let command = CommandLine::new("unzip").arg("-o").arg("-q");
                let command = match self.config.zip_password() {
                    Some(password) => command.arg("-P").arg(password),
                    None => command,
                };
                command.arg(archive).arg("-d").arg(dest)
            }
            ArchiveFormat::Plain => return Ok(()),
        };

        self.run("unpack", &command).map(|_| ())
    }

    /// Drops every base table of the `public` schema.
    ///
    /// Only PostgreSQL is supported, other adapters yield
    /// [RestoreError::UnsupportedAdapter].
    pub fn prepare_database(&self, adapter: Adapter) -> Result<(), RestoreError> {
        if adapter != Adapter::Postgresql {
            return Err(UnsupportedAdapter(adapter.to_string()).into());
        }

        let output = self.run("list tables", &self.psql(PUBLIC_TABLES_QUERY))?;
        let tables = parse_tables(&output);
        let Some(statement) = drop_statement(&tables) else {
            log::info!(target: "restore", "No tables to drop");
            return Ok(());
        };

        log::info!(target: "restore", "Dropping {} table(s)", tables.len());
        self.run("drop tables", &self.psql(&statement))?;
        Ok(())
    }

    fn psql(&self, query: &str) -> CommandLine {
        let database = &self.config.database;
        with_credentials(
            CommandLine::new(&self.config.psql_path),
            database,
            Adapter::Postgresql,
        )
        .args(sqlcmd_options(database, Adapter::Postgresql))
        .args(["-t", "-A", "-c", query])
        .arg(&database.database)
    }

    /// The loader command for the dump at `payload`.
    pub fn load_command(&self, adapter: Adapter, payload: &Path) -> CommandLine {
        let database = &self.config.database;
        let binary = self
            .config
            .restore_command_path
            .as_deref()
            .unwrap_or(adapter.restore_binary());
        let command = with_credentials(CommandLine::new(binary), database, adapter);

        match adapter {
            Adapter::Postgresql => command
                .arg("--clean")
                .args(sqlcmd_options(database, adapter))
                .arg(format!("--dbname={}", database.database))
                .arg(payload),
            Adapter::Mysql => command
                .args(sqlcmd_options(database, adapter))
                .arg(&database.database)
                .stdin_from(payload),
        }
    }

    fn load(&self, adapter: Adapter, payload: &Path) -> Result<(), RestoreError> {
        self.run("restore", &self.load_command(adapter, payload))
            .map(|_| ())
    }

    fn run(&self, stage: &'static str, command: &CommandLine) -> Result<String, RestoreError> {
        self.runner
            .run(command)
            .and_then(|result| result.ensure_success(command))
            .map(|result| result.stdout_lossy())
            .map_err(|source| RestoreError::Stage { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::compress::CompressionEngine;
    use crate::config::{Compressor, DatabaseConfig};
    use crate::naming::{ArchiveNamer, Timestamp};
    use crate::providers::memory::MemoryProvider;

    fn config(adapter: &str) -> BackupConfig {
        BackupConfig {
            app_name: "acme".to_string(),
            database: DatabaseConfig {
                adapter: adapter.to_string(),
                database: "acme_production".to_string(),
                ..DatabaseConfig::default()
            },
            restore_command_path: Some("true".to_string()),
            psql_path: "true".to_string(),
            ..BackupConfig::default()
        }
    }

    fn has(binaries: &[&str]) -> bool {
        binaries.iter().all(|b| which::which(b).is_ok())
    }

    fn files_below(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let relative = path.strip_prefix(root).unwrap().to_path_buf();
                    files.push((relative, fs::read(&path).unwrap()));
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn detects_format_from_suffix() {
        assert_eq!(
            ArchiveFormat::detect("backup.zip", false).unwrap(),
            (ArchiveFormat::Zip, "backup.sql".to_string())
        );
        assert_eq!(
            ArchiveFormat::detect("acme_2024-01-01_100_db.TAR.GZ", false).unwrap(),
            (ArchiveFormat::TarGz, "acme_2024-01-01_100_db.sql".to_string())
        );
        assert_eq!(
            ArchiveFormat::detect("backup.sql", true).unwrap(),
            (ArchiveFormat::Plain, "backup.sql".to_string())
        );
        assert!(matches!(
            ArchiveFormat::detect("backup.sql", false),
            Err(RestoreError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn drop_statement_quotes_tables() {
        let tables = parse_tables(" users \n\n orders\n");
        assert_eq!(tables, vec!["users", "orders"]);
        assert_eq!(
            drop_statement(&tables).unwrap(),
            r#"DROP TABLE "users", "orders" CASCADE"#
        );
        assert_eq!(drop_statement(&parse_tables("\n \n")), None);
    }

    #[test]
    fn mysql_loader_reads_dump_from_stdin() {
        let mut config = config("mysql");
        config.restore_command_path = None;
        config.database.password = Some("x".to_string());
        let runner = ProcessRunner::default();
        let command = RestoreEngine::new(&config, &runner)
            .load_command(Adapter::Mysql, Path::new("/tmp/acme.sql"));

        assert_eq!(
            command.to_string(),
            "mysql --password=x acme_production < /tmp/acme.sql"
        );
    }

    #[test]
    fn postgres_loader_cleans_and_hides_password() {
        let mut config = config("postgresql");
        config.restore_command_path = None;
        config.database.password = Some("x".to_string());
        config.database.username = Some("acme".to_string());
        let runner = ProcessRunner::default();
        let command = RestoreEngine::new(&config, &runner)
            .load_command(Adapter::Postgresql, Path::new("/tmp/acme.sql"));

        assert_eq!(
            command.to_string(),
            "PGPASSWORD=*** pg_restore --clean --user=acme --dbname=acme_production /tmp/acme.sql"
        );
    }

    #[test]
    fn plain_dump_is_restored_without_unpacking() {
        let mut config = config("mysql");
        config.disable_compression = true;
        let runner = ProcessRunner::default();
        let scratch = tempfile::tempdir().unwrap();
        let mut provider = MemoryProvider::default();
        provider
            .objects
            .insert("backup.sql".to_string(), b"select 1;".to_vec());

        let format = RestoreEngine::new(&config, &runner)
            .restore(&mut provider, "backup.sql", scratch.path())
            .unwrap();

        assert_eq!(format, ArchiveFormat::Plain);
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_key_is_not_found() {
        let config = config("postgresql");
        let runner = ProcessRunner::default();
        let scratch = tempfile::tempdir().unwrap();

        let result = RestoreEngine::new(&config, &runner).restore(
            &mut MemoryProvider::default(),
            "acme_2024-01-01_100_db.tar.gz",
            scratch.path(),
        );

        assert!(matches!(
            result,
            Err(RestoreError::Provider(ProviderError::NotFound(_)))
        ));
    }

    #[test]
    fn failing_loader_aborts_restore() {
        let mut config = config("postgresql");
        config.disable_compression = true;
        config.restore_command_path = Some("false".to_string());
        let runner = ProcessRunner::default();
        let scratch = tempfile::tempdir().unwrap();
        let mut provider = MemoryProvider::default();
        provider.objects.insert("backup.sql".to_string(), Vec::new());

        let result =
            RestoreEngine::new(&config, &runner).restore(&mut provider, "backup.sql", scratch.path());

        assert!(matches!(
            result,
            Err(RestoreError::Stage {
                stage: "restore",
                ..
            })
        ));
        assert_eq!(fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn tar_gz_dump_is_fetched_unpacked_and_loaded() {
        if !has(&["tar", "gzip"]) {
            return;
        }
        let config = config("postgresql");
        let runner = ProcessRunner::default();
        let namer = ArchiveNamer::new(
            "acme",
            Timestamp::from_datetime(&Utc.timestamp_opt(1_704_067_200, 0).unwrap()),
        );
        let work = tempfile::tempdir().unwrap();
        let raw = work.path().join(namer.db_dump_name());
        fs::write(&raw, "PGDMP").unwrap();
        let archive = CompressionEngine::new(&config, &namer, &runner)
            .compress_db(&raw)
            .unwrap();

        let mut provider = MemoryProvider::default();
        provider.put(&archive).unwrap();
        let key = namer.db_final_name(true, Compressor::TarGz);

        let scratch = tempfile::tempdir().unwrap();
        let format = RestoreEngine::new(&config, &runner)
            .restore(&mut provider, &key, scratch.path())
            .unwrap();
        assert_eq!(format, ArchiveFormat::TarGz);
    }

    #[test]
    fn password_zip_dump_is_fetched_unpacked_and_loaded() {
        if !has(&["zip", "unzip"]) {
            return;
        }
        let config = BackupConfig {
            compressor: Compressor::Zip,
            zip_password: Some("s3cret".to_string()),
            ..config("postgresql")
        };
        let runner = ProcessRunner::default();
        let namer = ArchiveNamer::new(
            "acme",
            Timestamp::from_datetime(&Utc.timestamp_opt(1_704_067_200, 0).unwrap()),
        );
        let work = tempfile::tempdir().unwrap();
        let raw = work.path().join(namer.db_dump_name());
        fs::write(&raw, "PGDMP").unwrap();
        let archive = CompressionEngine::new(&config, &namer, &runner)
            .compress_db(&raw)
            .unwrap();

        let mut provider = MemoryProvider::default();
        provider.put(&archive).unwrap();
        let key = namer.db_final_name(true, Compressor::Zip);
        assert_eq!(
            ArchiveFormat::detect(&key, false).unwrap().1,
            namer.db_dump_name()
        );

        let scratch = tempfile::tempdir().unwrap();
        let format = RestoreEngine::new(&config, &runner)
            .restore(&mut provider, &key, scratch.path())
            .unwrap();
        assert_eq!(format, ArchiveFormat::Zip);

        let wrong_password = BackupConfig {
            zip_password: Some("wrong".to_string()),
            ..config
        };
        let result = RestoreEngine::new(&wrong_password, &runner).restore(
            &mut provider,
            &key,
            scratch.path(),
        );
        assert!(matches!(
            result,
            Err(RestoreError::Stage {
                stage: "unpack",
                ..
            })
        ));
    }

    fn static_round_trip(compressor: Compressor) {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("public/uploads/nested")).unwrap();
        fs::write(root.path().join("public/uploads/a.bin"), [0u8, 159, 146, 150]).unwrap();
        fs::write(root.path().join("public/uploads/nested/b.txt"), "hello").unwrap();
        fs::write(root.path().join("robots.txt"), "User-agent: *").unwrap();

        let config = BackupConfig {
            app_root: root.path().to_path_buf(),
            static_paths: Some("public robots.txt".to_string()),
            compressor,
            zip_password: Some("s3cret".to_string()),
            ..config("postgresql")
        };
        let runner = ProcessRunner::default();
        let namer = ArchiveNamer::new("acme", Timestamp::now());
        let out = tempfile::tempdir().unwrap();
        let archive = CompressionEngine::new(&config, &namer, &runner)
            .compress_static(&config.static_paths().unwrap(), out.path())
            .unwrap();

        let format = match compressor {
            Compressor::TarGz => ArchiveFormat::TarGz,
            Compressor::Zip => ArchiveFormat::Zip,
        };
        let dest = tempfile::tempdir().unwrap();
        RestoreEngine::new(&config, &runner)
            .extract(format, &archive, dest.path())
            .unwrap();

        // archivers store absolute paths without the leading slash
        let root_in_archive = root.path().strip_prefix("/").unwrap();
        assert_eq!(
            files_below(&dest.path().join(root_in_archive)),
            files_below(root.path())
        );
    }

    #[test]
    fn static_tar_gz_round_trip_is_byte_identical() {
        if has(&["tar", "gzip"]) {
            static_round_trip(Compressor::TarGz);
        }
    }

    #[test]
    fn static_zip_round_trip_is_byte_identical() {
        if has(&["zip", "unzip"]) {
            static_round_trip(Compressor::Zip);
        }
    }
}
