pub mod monitor;
pub mod mounts;
pub mod watcher;

pub use monitor::{MountTableSource, VolumeMonitor};
pub use watcher::{AttachWatcher, VolumeSource, WatcherState};

use std::path::{Path, PathBuf};

/// One volume attach notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeAttachEvent {
    pub volume_id: String,
    pub mount_point: Option<PathBuf>,
}

impl VolumeAttachEvent {
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            mount_point: None,
        }
    }

    /// The volume is identified by its label, the last component of the mount point.
    pub fn from_mount_point(mount_point: &Path) -> Option<Self> {
        let label = mount_point.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            volume_id: label,
            mount_point: Some(mount_point.to_path_buf()),
        })
    }
}

/// Trims whitespace and a single trailing separator, so `E:`, `E/` and `E` are
/// all the same volume.
pub fn normalize_volume_id(id: &str) -> &str {
    let id = id.trim();
    id.strip_suffix(&[':', '/', '\\'][..]).unwrap_or(id)
}

pub fn matches_target(detected: &str, target: &str) -> bool {
    normalize_volume_id(detected).eq_ignore_ascii_case(normalize_volume_id(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_letter_variants_match() {
        assert!(matches_target("E:", "E"));
        assert!(matches_target("e:", "E"));
        assert!(matches_target("E", "E"));
        assert!(matches_target("e", "E:"));
    }

    #[test]
    fn test_only_one_separator_is_stripped() {
        assert_eq!(normalize_volume_id("E::"), "E:");
        assert!(!matches_target("E::", "E"));
    }

    #[test]
    fn test_labels_match_case_insensitively() {
        assert!(matches_target("PNYRP60PSSD/", "pnyrp60pssd"));
        assert!(!matches_target("BACKUP2", "BACKUP"));
    }

    #[test]
    fn test_event_from_mount_point_uses_label() {
        let event = VolumeAttachEvent::from_mount_point(Path::new("/media/me/MY USB")).unwrap();
        assert_eq!(event.volume_id, "MY USB");
        assert_eq!(event.mount_point.as_deref(), Some(Path::new("/media/me/MY USB")));
        assert!(VolumeAttachEvent::from_mount_point(Path::new("/")).is_none());
    }
}
