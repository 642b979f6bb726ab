pub mod copier;
pub mod exclusion;
pub mod progress;
pub mod resync;
pub mod scanner;
pub mod sequencer;

pub use copier::TreeCopier;
pub use exclusion::ExclusionSet;
pub use resync::prepare_destination;
pub use scanner::FileCounter;
pub use sequencer::{BackupSequencer, SequencerHandle, TriggerOutcome};

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors that abort a backup run (or, for `Subscribe`, leave the watcher inert).
///
/// Per-file problems never show up here; they are collected in
/// [`CopyReport`] and [`resync::ResyncReport`] instead.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("source directory not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("source root ({0}) is not accessible")]
    SourceRootUnreachable(PathBuf),

    #[error("failed to delete destination folder {path}: {source}")]
    ClearDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create destination folder {path}: {source}")]
    CreateDestination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to subscribe to volume notifications: {0}")]
    Subscribe(String),

    #[error("countdown cancelled by shutdown")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

/// Mutable state of one execution, owned by the sequencer for the run's duration.
#[derive(Debug, Clone)]
pub struct BackupRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Estimate from a separate walk; progress display only.
    pub total_files: u64,
    pub copied_files: u64,
    pub outcome: RunOutcome,
}

impl BackupRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            total_files: 0,
            copied_files: 0,
            outcome: RunOutcome::Pending,
        }
    }

    pub fn sample(&self, file_name: &str) -> ProgressSample {
        ProgressSample {
            file_name: file_name.to_string(),
            copied_files: self.copied_files,
            total_files: self.total_files,
        }
    }
}

impl Default for BackupRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view handed to the progress callback once per copied file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSample {
    pub file_name: String,
    pub copied_files: u64,
    pub total_files: u64,
}

#[derive(Debug, Clone)]
pub struct CopyFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Partial failures accumulated by a copy pass.
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    pub files_copied: u64,
    pub failures: Vec<CopyFailure>,
    pub skipped_links: Vec<PathBuf>,
    pub excluded_dirs: u64,
}

impl CopyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What the sequencer hands back once a run has finished, whatever the outcome.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run: BackupRun,
    pub report: Option<CopyReport>,
}
