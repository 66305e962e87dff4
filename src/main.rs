use std::io;
use std::path::Path;
use std::process::ExitCode;

use backup_fu_lib::cli::{Action, Cli, ListArgs, RestoreArgs};
use backup_fu_lib::config::BackupConfig;
use backup_fu_lib::orchestrator::{BackupError, BackupOrchestrator};

use clap::Parser;
use derive_more::{Display, Error, From};
use log::LevelFilter;

#[derive(Debug, Display, Error, From)]
enum ReadConfigError {
    #[display("Reading the config file failed: {_0}")]
    Io(io::Error),
    #[display("Parsing the config file failed: {_0}")]
    Toml(toml::de::Error),
}

/// The parsed config, `None` if there is no file at `path`.
fn read_config(path: &Path) -> Result<Option<BackupConfig>, ReadConfigError> {
    match std::fs::read_to_string(path) {
        Ok(config_str) => Ok(Some(toml::from_str(&config_str)?)),
        Err(_) if std::fs::exists(path).is_ok_and(|b| !b) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_default_config(path: &Path) -> BackupConfig {
    log::debug!(
        "Writing default config to {} because it doesn't exist yet",
        path.display()
    );
    let default_config = BackupConfig::default();
    let written = toml::to_string_pretty(&default_config)
        .map_err(|e| e.to_string())
        .and_then(|config_str| {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            std::fs::write(path, config_str).map_err(|e| e.to_string())
        });
    if let Err(e) = written {
        log::warn!("Writing default config to {} failed {e}", path.display());
    }

    default_config
}

fn run(orchestrator: &mut BackupOrchestrator, action: Action) -> Result<(), BackupError> {
    match action {
        Action::Backup => {
            orchestrator.backup()?;
        }
        Action::BackupStatic => {
            orchestrator.backup_static()?;
        }
        Action::Cleanup => {
            let report = orchestrator.cleanup()?;
            let remote = report.remote.unwrap_or_default();
            log::info!(
                "Removed {} local and {} remote backup(s)",
                report.local.deleted.len(),
                remote.deleted.len()
            );
            let failed = report.local.failed.len() + remote.failed.len();
            if failed > 0 {
                log::warn!("{failed} backup(s) could not be removed");
            }
        }
        Action::ListBackups(ListArgs { json }) => {
            let entries = orchestrator.list_backups()?;
            if json {
                match serde_json::to_string_pretty(&entries) {
                    Ok(listing) => println!("{listing}"),
                    Err(e) => log::error!("Serializing the backup listing failed: {e}"),
                }
            } else {
                for entry in entries {
                    println!("{entry}");
                }
            }
        }
        Action::RestoreBackup(RestoreArgs { key }) => {
            orchestrator.restore_backup(&key)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let action = cli.action.unwrap_or_default();
    let config = read_config(&cli.config);

    // init logger
    let mut env_logger = env_logger::builder();
    match cli.verbose {
        Some(level) => {
            env_logger.filter_level(level);
        }
        None if matches!(&config, Ok(Some(cfg)) if cfg.verbose) => {
            env_logger.filter_level(LevelFilter::Info);
        }
        None => {}
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    let config = match config {
        Ok(Some(config)) => config,
        Ok(None) => write_default_config(&cli.config),
        Err(e) => {
            log::error!("{e} ({})", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let mut orchestrator = match BackupOrchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&mut orchestrator, action) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
