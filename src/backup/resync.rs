use super::{BackupError, Result};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Entries whose attributes could not be reset. Informational only: deletion
/// is what decides whether the resync succeeded.
#[derive(Debug, Clone, Default)]
pub struct ResyncReport {
    pub existed: bool,
    pub attribute_failures: Vec<(PathBuf, String)>,
}

/// Wipes `path` and recreates it empty.
///
/// Attribute resets are best-effort. Failing to delete the old tree is fatal:
/// copying into a half-cleared destination would mix old and new data.
pub fn prepare_destination(path: &Path) -> Result<ResyncReport> {
    prepare_with(path, make_writable)
}

fn prepare_with<F>(path: &Path, reset: F) -> Result<ResyncReport>
where
    F: Fn(&Path, bool) -> io::Result<()>,
{
    let mut report = ResyncReport::default();

    if path.exists() {
        report.existed = true;

        warn!("Clearing read-only attributes before deletion.");
        report.attribute_failures = set_normal_attributes(path, &reset);

        warn!("Deleting existing destination folder: {}", path.display());
        remove_existing(path).map_err(|e| BackupError::ClearDestination {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    fs::create_dir_all(path).map_err(|e| BackupError::CreateDestination {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("Destination folder recreated successfully.");

    Ok(report)
}

fn remove_existing(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Makes every entry under `path` (the root included) writable by its owner.
///
/// walkdir opens a directory before yielding its children, so a directory we
/// cannot list surfaces as a walk error. Such directories are unlocked and the
/// walk starts over; every extra pass unlocks at least one more directory.
fn set_normal_attributes<F>(path: &Path, reset: &F) -> Vec<(PathBuf, String)>
where
    F: Fn(&Path, bool) -> io::Result<()>,
{
    let mut unlocked = HashSet::new();
    loop {
        let (failures, progressed) = reset_pass(path, reset, &mut unlocked);
        if !progressed {
            return failures;
        }
        debug!("Unlocked {} directories, walking {} again", unlocked.len(), path.display());
    }
}

fn reset_pass<F>(
    path: &Path,
    reset: &F,
    unlocked: &mut HashSet<PathBuf>,
) -> (Vec<(PathBuf, String)>, bool)
where
    F: Fn(&Path, bool) -> io::Result<()>,
{
    let mut failures = Vec::new();
    let mut progressed = false;

    for entry in WalkDir::new(path).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let failed = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
                let is_dir = fs::symlink_metadata(&failed).is_ok_and(|m| m.is_dir());
                if is_dir && !unlocked.contains(&failed) && reset(&failed, true).is_ok() {
                    unlocked.insert(failed);
                    progressed = true;
                    continue;
                }
                warn!("Could not visit {}: {}", failed.display(), e);
                failures.push((failed, e.to_string()));
                continue;
            }
        };

        // set_permissions would follow the link and touch its target
        if entry.path_is_symlink() {
            continue;
        }

        if let Err(e) = reset(entry.path(), entry.file_type().is_dir()) {
            warn!(
                "Could not set normal attributes on file {}: {}",
                entry.path().display(),
                e
            );
            failures.push((entry.path().to_path_buf(), e.to_string()));
        }
    }

    (failures, progressed)
}

#[cfg(unix)]
fn make_writable(path: &Path, is_dir: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    // Directories also need search permission for their children to be removed
    let wanted = if is_dir { 0o700 } else { 0o200 };
    if perms.mode() & wanted != wanted {
        perms.set_mode(perms.mode() | wanted);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(path: &Path, _is_dir: bool) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}
