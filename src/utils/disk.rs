use crate::volume::mounts::containing_mount;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// The mount point holding `path`, or failing that the path's own root
/// (`/` on Unix, `E:\` on Windows). `None` for relative paths that no mount
/// table entry covers.
pub fn resolve_source_root(path: &Path, mount_table: &Path) -> Option<PathBuf> {
    match containing_mount(mount_table, path) {
        Ok(Some(mount)) => return Some(mount),
        Ok(None) => {}
        Err(e) => debug!("Mount table {} unavailable: {}", mount_table.display(), e),
    }

    let root: PathBuf = path
        .components()
        .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect();
    (!root.as_os_str().is_empty()).then_some(root)
}

/// A root counts as reachable when it is a directory we can list. A mount
/// point whose device went away typically fails the listing.
pub fn verify_accessible(path: &Path) -> bool {
    path.is_dir() && std::fs::read_dir(path).is_ok()
}
