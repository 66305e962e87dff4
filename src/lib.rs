//! Library to backup the database and static files of a web application.
//!
//! A run dumps the database with `pg_dump` or `mysqldump`, compresses the dump
//! with `tar`/`gzip` or `zip` and ships it to a [storage provider][providers].
//! Old backups are pruned per location by [cleanup][orchestrator::BackupOrchestrator::cleanup],
//! and any stored backup can be [restored][restore] into the live database.
//!
//! The entry point is the [BackupOrchestrator][orchestrator::BackupOrchestrator].

#![forbid(unsafe_code)]

pub mod cli;
pub mod compress;
pub mod config;
pub mod database;
pub mod naming;
pub mod orchestrator;
pub mod process;
pub mod providers;
pub mod restore;
pub mod util;
