//! Database engines supported for dump and restore.

pub mod dump;

use std::str::FromStr;

use derive_more::{Display, Error};

use crate::config::DatabaseConfig;
use crate::process::CommandLine;

pub use dump::{DumpEngine, DumpError};

/// Environment variable carrying the PostgreSQL password.
pub const PG_PASSWORD_ENV: &str = "PGPASSWORD";

/// Supported database engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Adapter {
    #[display("postgresql")]
    Postgresql,
    #[display("mysql")]
    Mysql,
}

/// The configured adapter is neither PostgreSQL nor MySQL.
#[derive(Debug, Display, Error)]
#[display("Database adapter is unsupported: {_0}")]
pub struct UnsupportedAdapter(#[error(ignore)] pub String);

impl FromStr for Adapter {
    type Err = UnsupportedAdapter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(Self::Postgresql),
            "mysql" => Ok(Self::Mysql),
            other => Err(UnsupportedAdapter(other.to_string())),
        }
    }
}

impl Adapter {
    /// Adapter of `database`.
    pub fn of(database: &DatabaseConfig) -> Result<Self, UnsupportedAdapter> {
        database.adapter.parse()
    }

    /// Default binary producing a dump.
    pub fn dump_binary(self) -> &'static str {
        match self {
            Adapter::Postgresql => "pg_dump",
            Adapter::Mysql => "mysqldump",
        }
    }

    /// Default binary loading a dump.
    pub fn restore_binary(self) -> &'static str {
        match self {
            Adapter::Postgresql => "pg_restore",
            Adapter::Mysql => "mysql",
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Connection flags shared by the dump, restore and query tools.
///
/// The host flag is left out for `localhost`. The password is only passed on
/// the command line for MySQL; PostgreSQL reads it from [PG_PASSWORD_ENV].
pub fn sqlcmd_options(database: &DatabaseConfig, adapter: Adapter) -> Vec<String> {
    let mut options = Vec::new();

    if let Some(host) = present(&database.host).filter(|host| *host != "localhost") {
        options.push(format!("--host={host}"));
    }
    if let Some(port) = database.port {
        options.push(format!("--port={port}"));
    }
    if let Some(user) = present(&database.username) {
        options.push(format!("--user={user}"));
    }
    if adapter != Adapter::Postgresql {
        if let Some(password) = present(&database.password) {
            options.push(format!("--password={password}"));
        }
    }

    options
}

/// Hands the PostgreSQL password to `command` through the environment.
pub fn with_credentials(
    command: CommandLine,
    database: &DatabaseConfig,
    adapter: Adapter,
) -> CommandLine {
    match (adapter, present(&database.password)) {
        (Adapter::Postgresql, Some(password)) => command.env(PG_PASSWORD_ENV, password),
        _ => command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(adapter: &str) -> DatabaseConfig {
        DatabaseConfig {
            adapter: adapter.to_string(),
            username: Some("acme".to_string()),
            password: Some("x".to_string()),
            database: "acme_production".to_string(),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn postgres_password_never_reaches_the_command_line() {
        let database = database("postgresql");
        let options = sqlcmd_options(&database, Adapter::of(&database).unwrap());

        assert!(options.iter().all(|o| !o.starts_with("--password=")));
        assert!(options.contains(&"--user=acme".to_string()));

        let command = with_credentials(CommandLine::new("pg_dump"), &database, Adapter::Postgresql);
        assert_eq!(
            command.envs(),
            &[(PG_PASSWORD_ENV.to_string(), "x".to_string())]
        );
    }

    #[test]
    fn mysql_password_is_a_flag() {
        let database = database("mysql");
        let options = sqlcmd_options(&database, Adapter::of(&database).unwrap());
        assert!(options.contains(&"--password=x".to_string()));

        let command = with_credentials(CommandLine::new("mysqldump"), &database, Adapter::Mysql);
        assert!(command.envs().is_empty());
    }

    #[test]
    fn localhost_host_flag_is_omitted() {
        let mut database = database("mysql");
        database.host = Some("localhost".to_string());
        let options = sqlcmd_options(&database, Adapter::Mysql);
        assert!(options.iter().all(|o| !o.starts_with("--host=")));

        database.host = Some("db1".to_string());
        let options = sqlcmd_options(&database, Adapter::Mysql);
        assert!(options.contains(&"--host=db1".to_string()));
    }

    #[test]
    fn port_flag_only_when_configured() {
        let mut database = database("postgresql");
        assert!(sqlcmd_options(&database, Adapter::Postgresql)
            .iter()
            .all(|o| !o.starts_with("--port=")));

        database.port = Some(5433);
        assert!(sqlcmd_options(&database, Adapter::Postgresql).contains(&"--port=5433".to_string()));
    }

    #[test]
    fn unset_fields_produce_no_flags() {
        let database = DatabaseConfig {
            adapter: "mysql".to_string(),
            username: Some(String::new()),
            ..DatabaseConfig::default()
        };
        assert!(sqlcmd_options(&database, Adapter::Mysql).is_empty());
    }

    #[test]
    fn unknown_adapter_is_rejected() {
        for adapter in ["sqlite3", "mysql2", "postgres"] {
            match Adapter::of(&database(adapter)) {
                Err(UnsupportedAdapter(name)) => assert_eq!(name, adapter),
                other => panic!("unexpected adapter for {adapter}: {other:?}"),
            }
        }
    }
}
