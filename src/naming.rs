//! Deterministic artifact names.
//!
//! Every name has the shape `<app_name>_<timestamp>_<kind>.<ext>`. The
//! [Timestamp] is the second component, so names of one application sort
//! lexically in creation order.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Local, TimeZone};
use regex::Regex;

use crate::config::Compressor;

/// `YYYY-MM-DD_<unix-seconds>`, computed once per run.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(String);

impl Timestamp {
    /// Timestamp of the current local time.
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    pub fn from_datetime<Tz: TimeZone>(datetime: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(format!(
            "{}_{}",
            datetime.format("%Y-%m-%d"),
            datetime.timestamp()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything of an artifact name after `<app_name>_`.
static ARTIFACT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}_\d+_(db|static)\.(sql|zip|tar|tar\.gz)$")
        .expect("artifact pattern should be valid")
});

/// What an artifact contains.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Database,
    Static,
}

impl ArtifactKind {
    fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Database => "db",
            ArtifactKind::Static => "static",
        }
    }
}

/// Everything needed to name one artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    pub base_name: String,
    pub timestamp: Timestamp,
    pub compressed: bool,
    pub compressor: Compressor,
}

impl ArtifactDescriptor {
    /// `<base_name>_<timestamp>_<kind>` without extension.
    pub fn stem(&self) -> String {
        format!("{}_{}_{}", self.base_name, self.timestamp, self.kind.suffix())
    }

    /// File name of the artifact.
    pub fn file_name(&self) -> String {
        let extension = match (self.compressed, self.compressor) {
            (false, _) => "sql",
            (true, Compressor::Zip) => "zip",
            (true, Compressor::TarGz) => "tar.gz",
        };
        format!("{}.{extension}", self.stem())
    }

    /// Raw, zip, tar and tar.gz names of the artifact.
    pub fn candidate_names(&self) -> [String; 4] {
        let stem = self.stem();
        [
            format!("{stem}.sql"),
            format!("{stem}.zip"),
            format!("{stem}.tar"),
            format!("{stem}.tar.gz"),
        ]
    }
}

/// Names of the artifacts of one run.
#[derive(Clone, Debug)]
pub struct ArchiveNamer {
    app_name: String,
    timestamp: Timestamp,
}

impl ArchiveNamer {
    pub fn new(app_name: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            app_name: app_name.into(),
            timestamp,
        }
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    /// Prefix shared by every artifact of the application, across runs.
    pub fn prefix(&self) -> String {
        format!("{}_", self.app_name)
    }

    pub fn descriptor(
        &self,
        kind: ArtifactKind,
        compressed: bool,
        compressor: Compressor,
    ) -> ArtifactDescriptor {
        ArtifactDescriptor {
            kind,
            base_name: self.app_name.clone(),
            timestamp: self.timestamp.clone(),
            compressed,
            compressor,
        }
    }

    /// Whether `file_name` is an artifact of this application, from any run.
    ///
    /// Artifacts of another application whose name merely starts with this
    /// one's, like `acme_shop` for `acme`, are not owned.
    pub fn owns(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(&self.prefix())
            .is_some_and(|rest| ARTIFACT_SUFFIX.is_match(rest))
    }

    /// Name of the uncompressed database dump.
    pub fn db_dump_name(&self) -> String {
        self.descriptor(ArtifactKind::Database, false, Compressor::default())
            .file_name()
    }

    /// Name of the database artifact that is finally stored.
    pub fn db_final_name(&self, compressed: bool, compressor: Compressor) -> String {
        self.descriptor(ArtifactKind::Database, compressed, compressor)
            .file_name()
    }

    /// Name of the static files archive.
    pub fn static_final_name(&self, compressor: Compressor) -> String {
        self.descriptor(ArtifactKind::Static, true, compressor)
            .file_name()
    }
}
