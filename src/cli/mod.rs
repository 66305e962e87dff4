use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long, global = true)]
    pub verbose: Option<LevelFilter>,

    /// Path to the TOML config. A default config is written if it doesn't exist.
    #[arg(
        long,
        global = true,
        env = "BACKUP_FU_CONFIG",
        default_value = "config/backup_fu.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Default, Clone, PartialEq, Eq)]
pub enum Action {
    /// Dump and store the database. (Default)
    #[default]
    Backup,
    /// Archive and store the configured static paths.
    BackupStatic,
    /// Delete all but the most recent backups, locally and at the provider.
    Cleanup,
    /// List stored backups, oldest first.
    ListBackups(ListArgs),
    /// Restore the database from a stored backup.
    RestoreBackup(RestoreArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ListArgs {
    /// Print the listing as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RestoreArgs {
    /// Name of the stored backup, as printed by `list-backups`.
    pub key: String,
}
