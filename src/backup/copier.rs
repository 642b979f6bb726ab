use super::scanner::{is_excluded_dir, sorted_walk};
use super::{BackupError, BackupRun, CopyFailure, CopyReport, ExclusionSet, ProgressSample, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Replicates a source tree into a destination root, file by file.
pub struct TreeCopier {
    exclusions: Arc<ExclusionSet>,
}

impl TreeCopier {
    pub fn new(exclusions: Arc<ExclusionSet>) -> Self {
        Self { exclusions }
    }

    /// Copies every non-excluded file under `source` to the same relative path
    /// under `destination`, overwriting what is there.
    ///
    /// Only a missing `source` (or an uncreatable `destination`) is an error.
    /// Anything that goes wrong for a single file or subdirectory is logged,
    /// recorded in the returned report, and the walk moves on. Each successful
    /// copy bumps `run.copied_files` and fires `on_progress`.
    ///
    /// Symbolic links and special files are skipped, never followed.
    pub fn copy_all<F>(
        &self,
        source: &Path,
        destination: &Path,
        run: &mut BackupRun,
        mut on_progress: F,
    ) -> Result<CopyReport>
    where
        F: FnMut(&ProgressSample),
    {
        if !source.is_dir() {
            return Err(BackupError::SourceNotFound(source.to_path_buf()));
        }

        fs::create_dir_all(destination).map_err(|e| BackupError::CreateDestination {
            path: destination.to_path_buf(),
            source: e,
        })?;

        let exclusions = &self.exclusions;
        let mut excluded_dirs = 0u64;
        let mut report = CopyReport::default();

        let walker = sorted_walk(source).into_iter().filter_entry(|e| {
            if is_excluded_dir(e, exclusions) {
                debug!("Skipping excluded directory: {}", e.path().display());
                excluded_dirs += 1;
                false
            } else {
                true
            }
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                    warn!("Could not read {}: {}", path.display(), e);
                    report.failures.push(CopyFailure { path, message: e.to_string() });
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            let target = match entry.path().strip_prefix(source) {
                Ok(relative) => destination.join(relative),
                Err(_) => continue,
            };
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if let Err(e) = fs::create_dir_all(&target) {
                    error!("Failed to create directory {}: {}", target.display(), e);
                    report.failures.push(CopyFailure {
                        path: entry.path().to_path_buf(),
                        message: e.to_string(),
                    });
                }
            } else if file_type.is_file() {
                match fs::copy(entry.path(), &target) {
                    Ok(_) => {
                        run.copied_files += 1;
                        report.files_copied += 1;
                        on_progress(&run.sample(&entry.file_name().to_string_lossy()));
                    }
                    Err(e) => {
                        error!("Failed to copy file: {}: {}", entry.path().display(), e);
                        report.failures.push(CopyFailure {
                            path: entry.path().to_path_buf(),
                            message: e.to_string(),
                        });
                    }
                }
            } else {
                warn!("Skipping link or special file: {}", entry.path().display());
                report.skipped_links.push(PathBuf::from(entry.path()));
            }
        }

        report.excluded_dirs = excluded_dirs;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn copier(names: &[&str]) -> TreeCopier {
        TreeCopier::new(Arc::new(ExclusionSet::new(names.iter().copied())))
    }

    fn listing(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }

    fn scenario_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path();
        fs::write(src.join("a.txt"), b"alpha").unwrap();
        fs::create_dir_all(src.join("node_modules")).unwrap();
        fs::write(src.join("node_modules/x.txt"), b"x").unwrap();
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/b.txt"), b"bravo").unwrap();
        tmp
    }

    #[test]
    fn test_copy_mirrors_tree_minus_exclusions() {
        let src = scenario_tree();
        let dst = TempDir::new().unwrap();
        let dest = dst.path().join("out");
        let mut run = BackupRun::new();

        let report = copier(&["node_modules"])
            .copy_all(src.path(), &dest, &mut run, |_| {})
            .unwrap();

        assert_eq!(listing(&dest), vec!["a.txt", "sub/b.txt"]);
        assert_eq!(fs::read(dest.join("sub/b.txt")).unwrap(), b"bravo");
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.excluded_dirs, 1);
        assert_eq!(run.copied_files, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn test_progress_fires_once_per_file_in_stable_order() {
        let src = scenario_tree();
        let dst = TempDir::new().unwrap();
        let mut run = BackupRun::new();
        run.total_files = 2;
        let mut samples = Vec::new();

        copier(&["node_modules"])
            .copy_all(src.path(), dst.path(), &mut run, |s| samples.push(s.clone()))
            .unwrap();

        let names: Vec<_> = samples.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(samples[1].copied_files, 2);
        assert_eq!(samples[1].total_files, 2);
    }

    #[test]
    fn test_single_failure_does_not_abort_siblings() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"a").unwrap();
        fs::write(src.path().join("b.txt"), b"b").unwrap();
        fs::write(src.path().join("c.txt"), b"c").unwrap();

        // A directory sitting where b.txt should land makes that one copy fail
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(dst.path().join("b.txt/blocker")).unwrap();
        let mut run = BackupRun::new();

        let report = copier(&[])
            .copy_all(src.path(), dst.path(), &mut run, |_| {})
            .unwrap();

        assert_eq!(report.files_copied, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("b.txt"));
        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(dst.path().join("c.txt")).unwrap(), b"c");
    }

    #[test]
    fn test_overwrites_existing_files() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"new").unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(dst.path().join("a.txt"), b"old contents").unwrap();

        copier(&[])
            .copy_all(src.path(), dst.path(), &mut BackupRun::new(), |_| {})
            .unwrap();

        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_missing_source_is_structural_error() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");

        let err = copier(&[])
            .copy_all(&tmp.path().join("missing"), &dest, &mut BackupRun::new(), |_| {})
            .unwrap_err();

        assert!(matches!(err, BackupError::SourceNotFound(_)));
        assert!(!dest.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped_and_reported() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("real.txt"), b"r").unwrap();
        std::os::unix::fs::symlink(src.path().join("real.txt"), src.path().join("link.txt"))
            .unwrap();
        let dst = TempDir::new().unwrap();

        let report = copier(&[])
            .copy_all(src.path(), dst.path(), &mut BackupRun::new(), |_| {})
            .unwrap();

        assert_eq!(listing(dst.path()), vec!["real.txt"]);
        assert_eq!(report.skipped_links.len(), 1);
    }
}
