//! Reading the kernel mount table (`/proc/self/mounts` format).

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Mount points listed in a mount table, in table order.
pub fn parse_mount_points(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_triplet(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_triplet(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Mount points strictly beneath one of `roots`, i.e. removable volumes.
pub fn removable_mounts(table: &Path, roots: &[PathBuf]) -> io::Result<BTreeSet<PathBuf>> {
    let contents = fs::read_to_string(table)?;
    Ok(parse_mount_points(&contents)
        .into_iter()
        .filter(|mount| roots.iter().any(|root| mount != root && mount.starts_with(root)))
        .collect())
}

/// Deepest mount point containing `path`, if the table lists any.
pub fn containing_mount(table: &Path, path: &Path) -> io::Result<Option<PathBuf>> {
    let contents = fs::read_to_string(table)?;
    Ok(parse_mount_points(&contents)
        .into_iter()
        .filter(|mount| path.starts_with(mount))
        .max_by_key(|mount| mount.components().count()))
}

/// Splits two snapshots into (newly mounted, no longer mounted).
pub fn diff_mounts(
    previous: &BTreeSet<PathBuf>,
    current: &BTreeSet<PathBuf>,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mounted = current.difference(previous).cloned().collect();
    let unmounted = previous.difference(current).cloned().collect();
    (mounted, unmounted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
/dev/sda1 /media/me/MY\\040USB vfat rw,nosuid,nodev 0 0
/dev/sdb1 /run/media/me/BACKUP exfat rw 0 0
/dev/sdc1 /mnt/data ext4 rw 0 0
";

    #[test]
    fn test_parse_decodes_escaped_spaces() {
        let mounts = parse_mount_points(TABLE);
        assert_eq!(mounts.len(), 5);
        assert_eq!(mounts[2], PathBuf::from("/media/me/MY USB"));
    }

    #[test]
    fn test_backslash_without_octal_is_kept() {
        assert_eq!(unescape_octal(r"a\b"), r"a\b");
        assert_eq!(unescape_octal(r"tail\04"), r"tail\04");
        assert_eq!(unescape_octal(r"x\134y"), r"x\y");
    }

    #[test]
    fn test_removable_mounts_filters_by_root() {
        let tmp = TempDir::new().unwrap();
        let table = tmp.path().join("mounts");
        fs::write(&table, TABLE).unwrap();
        let roots = vec![PathBuf::from("/media"), PathBuf::from("/run/media")];

        let mounts = removable_mounts(&table, &roots).unwrap();

        let expected: BTreeSet<PathBuf> = [
            PathBuf::from("/media/me/MY USB"),
            PathBuf::from("/run/media/me/BACKUP"),
        ]
        .into_iter()
        .collect();
        assert_eq!(mounts, expected);
    }

    #[test]
    fn test_containing_mount_picks_deepest() {
        let tmp = TempDir::new().unwrap();
        let table = tmp.path().join("mounts");
        fs::write(&table, TABLE).unwrap();

        let mount = containing_mount(&table, Path::new("/mnt/data/projects/x")).unwrap();
        assert_eq!(mount, Some(PathBuf::from("/mnt/data")));
        let mount = containing_mount(&table, Path::new("/home/me")).unwrap();
        assert_eq!(mount, Some(PathBuf::from("/")));
    }

    #[test]
    fn test_diff_reports_both_directions() {
        let previous: BTreeSet<PathBuf> = [PathBuf::from("/media/a"), PathBuf::from("/media/b")]
            .into_iter()
            .collect();
        let current: BTreeSet<PathBuf> = [PathBuf::from("/media/b"), PathBuf::from("/media/c")]
            .into_iter()
            .collect();

        let (mounted, unmounted) = diff_mounts(&previous, &current);
        assert_eq!(mounted, vec![PathBuf::from("/media/c")]);
        assert_eq!(unmounted, vec![PathBuf::from("/media/a")]);
    }
}
