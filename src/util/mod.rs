//! Helpers shared by the backup operations.

pub mod retention;
