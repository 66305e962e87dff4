//! Resolved settings of a backup run.
//!
//! A [BackupConfig] is read once from a TOML file and never mutated afterwards.
//! Every component borrows it from the [BackupOrchestrator](crate::orchestrator::BackupOrchestrator).

use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

/// Value shipped in the default config for settings that must be changed.
pub const PLACEHOLDER: &str = "replace_me";

const DEFAULT_MYSQLDUMP_OPTIONS: &str = "--complete-insert --skip-extended-insert";

/// Archiver used to pack dumps and static files.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Display, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Compressor {
    /// `tar` with gzip compression, producing `.tar.gz`.
    #[default]
    #[display("tar_gz")]
    TarGz,
    /// `zip`, optionally password protected.
    #[display("zip")]
    Zip,
}

/// Connection settings of the database to back up.
///
/// Unset fields are treated as empty strings.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgresql` or `mysql`.
    pub adapter: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name of the database.
    pub database: String,
}

/// Credentials of the FTP provider.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
}

fn default_ftp_port() -> u16 {
    21
}

/// Credentials of the S3 provider.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for S3 compatible services.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Storage provider selected by the `kind` tag.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Directory on the local filesystem ([BackupConfig::backup_dir]).
    #[default]
    Local,
    Ftp(FtpConfig),
    S3(S3Config),
}

impl ProviderConfig {
    /// Name of the provider as written in the config.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Local => "local",
            ProviderConfig::Ftp(_) => "ftp",
            ProviderConfig::S3(_) => "s3",
        }
    }
}

#[derive(Debug, Display, Error)]
/// Missing or placeholder settings.
pub enum ConfigError {
    /// `app_name` is not set.
    #[display("Application name (app_name) is not set in the config")]
    AppNameMissing,
    /// A required provider credential is blank or a placeholder.
    #[display("{provider} setting `{key}` is not set in the config; set disable_ftp = true to keep backups local only")]
    ProviderSettingMissing {
        provider: &'static str,
        key: &'static str,
    },
    /// `backup_static` was requested without `static_paths`.
    #[display("No static paths (static_paths) are defined in the config")]
    StaticPathsMissing,
}

/// Resolved configuration of one backup run.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Name prefixed to every artifact.
    pub app_name: String,
    /// Root relative paths are resolved against.
    pub app_root: PathBuf,
    pub database: DatabaseConfig,
    pub compressor: Compressor,
    pub zip_password: Option<String>,
    /// Space delimited list of files and directories for `backup_static`.
    pub static_paths: Option<String>,
    /// Exclude patterns for static archives.
    pub skips: Vec<String>,
    /// Number of most recent artifacts kept per location.
    pub keep_backups: usize,
    pub provider: ProviderConfig,
    /// Directory artifacts are written to. Defaults to `<app_root>/tmp/backup`.
    pub dump_base_path: Option<PathBuf>,
    /// Target directory of the local provider.
    pub backup_dir: PathBuf,
    /// Directory on the FTP server or key prefix in the S3 bucket.
    pub remote_backup_dir: String,
    pub mysqldump_options: String,
    pub disable_compression: bool,
    /// Keep artifacts local only, never talk to the provider.
    pub disable_ftp: bool,
    pub verbose: bool,
    pub enable_nice: bool,
    pub nice_level: i32,
    pub dump_path: Option<String>,
    /// Deprecated alias of `dump_path`, wins when both are set.
    pub mysqldump_path: Option<String>,
    pub restore_command_path: Option<String>,
    pub psql_path: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            app_name: PLACEHOLDER.to_string(),
            app_root: PathBuf::from("."),
            database: DatabaseConfig::default(),
            compressor: Compressor::default(),
            zip_password: None,
            static_paths: None,
            skips: Vec::new(),
            keep_backups: 5,
            provider: ProviderConfig::default(),
            dump_base_path: None,
            backup_dir: PathBuf::from("backups"),
            remote_backup_dir: "backups".to_string(),
            mysqldump_options: DEFAULT_MYSQLDUMP_OPTIONS.to_string(),
            disable_compression: false,
            disable_ftp: false,
            verbose: false,
            enable_nice: false,
            nice_level: 10,
            dump_path: None,
            mysqldump_path: None,
            restore_command_path: None,
            psql_path: "psql".to_string(),
        }
    }
}

fn is_unset(value: &str) -> bool {
    value.trim().is_empty() || value == PLACEHOLDER
}

impl BackupConfig {
    /// Validates settings required by every operation.
    pub fn check(&self) -> Result<(), ConfigError> {
        if is_unset(&self.app_name) {
            return Err(ConfigError::AppNameMissing);
        }

        if self.disable_ftp {
            return Ok(());
        }

        let required: Vec<(&'static str, &str)> = match &self.provider {
            ProviderConfig::Local => Vec::new(),
            ProviderConfig::Ftp(ftp) => vec![
                ("host", ftp.host.as_str()),
                ("user", ftp.user.as_str()),
                ("password", ftp.password.as_str()),
            ],
            ProviderConfig::S3(s3) => vec![
                ("bucket", s3.bucket.as_str()),
                ("access_key_id", s3.access_key_id.as_str()),
                ("secret_access_key", s3.secret_access_key.as_str()),
            ],
        };

        match required.into_iter().find(|(_, value)| is_unset(value)) {
            Some((key, _)) => Err(ConfigError::ProviderSettingMissing {
                provider: self.provider.kind(),
                key,
            }),
            None => Ok(()),
        }
    }

    /// Directory artifacts are written to.
    pub fn dump_base_path(&self) -> PathBuf {
        match &self.dump_base_path {
            Some(path) => self.resolve(path),
            None => self.app_root.join("tmp").join("backup"),
        }
    }

    /// Target directory of the local provider.
    pub fn local_backup_dir(&self) -> PathBuf {
        self.resolve(&self.backup_dir)
    }

    /// Resolves `path` against [app_root](Self::app_root) unless it's absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.app_root.join(path)
        }
    }

    /// Static paths in configured order, resolved against the application root.
    pub fn static_paths(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let paths: Vec<PathBuf> = self
            .static_paths
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(|p| self.resolve(Path::new(p)))
            .collect();

        if paths.is_empty() {
            Err(ConfigError::StaticPathsMissing)
        } else {
            Ok(paths)
        }
    }

    /// Extra flags passed to `mysqldump`.
    pub fn mysqldump_options(&self) -> Vec<String> {
        self.mysqldump_options
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Password for zip archives, if one is configured.
    pub fn zip_password(&self) -> Option<&str> {
        self.zip_password
            .as_deref()
            .filter(|password| !password.trim().is_empty())
    }

    /// Whether artifacts are shipped to the provider.
    pub fn uploads_enabled(&self) -> bool {
        !self.disable_ftp
    }
}
