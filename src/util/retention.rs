//! "Keep the N most recent" retention of backup artifacts.

use std::fmt::Display;

/// Configure retention of artifacts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Retention {
    /// Defines how many of the most recent artifacts to keep.
    pub keep: usize,
}

impl Retention {
    pub fn new(keep: usize) -> Self {
        Self { keep }
    }

    /// Returns the entries to delete from `entries`, which are sorted oldest first.
    ///
    /// Every entry but the last [keep](Self::keep) is returned.
    pub fn prune<'a, T>(&self, entries: &'a [T]) -> &'a [T] {
        let excess = entries.len().saturating_sub(self.keep);
        &entries[..excess]
    }

    /// Deletes every entry [prune](Self::prune) selects, best effort.
    ///
    /// A failing deletion is logged and doesn't stop the remaining ones.
    pub fn sweep<T, E, F>(&self, location: &str, entries: &[T], mut delete: F) -> SweepReport<T>
    where
        T: Clone + Display,
        E: Display,
        F: FnMut(&T) -> Result<(), E>,
    {
        let doomed = self.prune(entries);
        let mut report = SweepReport::default();

        if doomed.is_empty() {
            log::info!(target: "retention", "No old {location} backups to clean up");
            return report;
        }
        log::info!(target: "retention", "Keeping {} of {} {location} backups", self.keep, entries.len());

        for entry in doomed {
            match delete(entry) {
                Ok(()) => {
                    log::debug!(target: "retention", "Removed old {location} backup {entry}");
                    report.deleted.push(entry.clone());
                }
                Err(e) => {
                    log::warn!(target: "retention", "Removing old {location} backup {entry} failed: {e}");
                    report.failed.push(entry.clone());
                }
            }
        }

        report
    }
}

/// Outcome of [Retention::sweep].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepReport<T> {
    pub deleted: Vec<T>,
    pub failed: Vec<T>,
}

impl<T> Default for SweepReport<T> {
    fn default() -> Self {
        Self {
            deleted: Vec::new(),
            failed: Vec::new(),
        }
    }
}
