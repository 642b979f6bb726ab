use super::ExclusionSet;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Walk shared by the counter and the copier: links are never followed and
/// siblings come files first, then directories, each group sorted by name.
pub(crate) fn sorted_walk(root: &Path) -> WalkDir {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| dir_last(a, b).then_with(|| a.file_name().cmp(b.file_name())))
}

fn dir_last(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type().is_dir().cmp(&b.file_type().is_dir())
}

/// True when `entry` roots a subtree that must not be entered. The walk root
/// itself is never excluded.
pub(crate) fn is_excluded_dir(entry: &DirEntry, exclusions: &ExclusionSet) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && exclusions.is_excluded_os(entry.file_name())
}

/// Estimates how many files a copy pass will touch.
pub struct FileCounter {
    exclusions: Arc<ExclusionSet>,
}

impl FileCounter {
    pub fn new(exclusions: Arc<ExclusionSet>) -> Self {
        Self { exclusions }
    }

    /// Counts regular files under `root`, skipping excluded subtrees.
    ///
    /// Never fails: a missing root counts as zero and unreadable directories
    /// are skipped, so the result may under-count.
    pub fn count_files(&self, root: &Path) -> u64 {
        if !root.is_dir() {
            debug!("Nothing to count, {} is not a directory", root.display());
            return 0;
        }

        let exclusions = &self.exclusions;
        let mut count = 0u64;

        let walker = sorted_walk(root)
            .into_iter()
            .filter_entry(|e| !is_excluded_dir(e, exclusions));

        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => count += 1,
                Ok(_) => {}
                Err(e) => {
                    // Ignore directories we can't access or that vanished mid-walk
                    debug!("Skipping unreadable entry while counting: {}", e);
                }
            }
        }

        info!("Counted {} files under {}", count, root.display());
        count
    }
}
