use super::mounts::{diff_mounts, removable_mounts};
use super::watcher::VolumeSource;
use super::VolumeAttachEvent;
use crate::backup::{BackupError, Result};
use crate::utils::config::Config;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turns changes of the kernel mount table into attach events.
///
/// `notify` watches the mount roots so a new mount directory wakes the scan
/// right away; a fixed-interval rescan covers mounts that show up in the table
/// after their directory was created. Only mounts that were not present in the
/// previous snapshot are reported, so volumes attached before start-up are
/// ignored. Dropping the monitor releases the OS watcher and stops the scan.
pub struct VolumeMonitor {
    _watcher: RecommendedWatcher,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl VolumeMonitor {
    pub fn start(
        roots: Vec<PathBuf>,
        table: PathBuf,
        poll_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<VolumeAttachEvent>)> {
        let baseline = removable_mounts(&table, &roots).map_err(|e| {
            BackupError::Subscribe(format!("cannot read mount table {}: {}", table.display(), e))
        })?;
        debug!("{} removable volume(s) already mounted", baseline.len());

        // Capacity 1: wake-ups arriving while a scan is pending collapse into it
        let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(_) => {
                    let _ = wake_tx.try_send(());
                }
                Err(e) => warn!("Mount root watch error: {}", e),
            }
        })
        .map_err(|e| BackupError::Subscribe(format!("cannot create file watcher: {}", e)))?;

        for path in watch_targets(&roots) {
            match watcher.watch(&path, RecursiveMode::NonRecursive) {
                Ok(()) => debug!("Watching {}", path.display()),
                Err(e) => warn!("Failed to watch {}: {}", path.display(), e),
            }
        }

        let (event_tx, event_rx) = mpsc::channel(16);
        let stop = CancellationToken::new();
        let task = tokio::spawn(scan_loop(
            roots,
            table,
            poll_interval,
            baseline,
            wake_rx,
            event_tx,
            stop.clone(),
        ));

        Ok((
            Self {
                _watcher: watcher,
                stop,
                task,
            },
            event_rx,
        ))
    }
}

impl Drop for VolumeMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
        self.task.abort();
    }
}

/// Each existing root plus its immediate subdirectories, which is where
/// per-user mount directories such as `/media/<user>` live.
fn watch_targets(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut targets = Vec::new();
    for root in roots.iter().filter(|r| r.is_dir()) {
        targets.push(root.clone());
        if let Ok(entries) = std::fs::read_dir(root) {
            targets.extend(
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir()),
            );
        }
    }
    targets
}

async fn scan_loop(
    roots: Vec<PathBuf>,
    table: PathBuf,
    poll_interval: Duration,
    mut known: BTreeSet<PathBuf>,
    mut wake_rx: mpsc::Receiver<()>,
    event_tx: mpsc::Sender<VolumeAttachEvent>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            wake = wake_rx.recv() => {
                if wake.is_none() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let current = match removable_mounts(&table, &roots) {
            Ok(current) => current,
            Err(e) => {
                warn!("Failed to read mount table {}: {}", table.display(), e);
                continue;
            }
        };

        let (mounted, unmounted) = diff_mounts(&known, &current);
        for mount in &unmounted {
            info!("Volume detached: {}", mount.display());
        }
        for mount in &mounted {
            info!("Volume attached: {}", mount.display());
            if let Some(event) = VolumeAttachEvent::from_mount_point(mount) {
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
        known = current;
    }
}

/// [`VolumeSource`] backed by the host's mount table.
pub struct MountTableSource {
    roots: Vec<PathBuf>,
    table: PathBuf,
    poll_interval: Duration,
    monitor: Option<VolumeMonitor>,
}

impl MountTableSource {
    pub fn new(roots: Vec<PathBuf>, table: impl AsRef<Path>, poll_interval: Duration) -> Self {
        Self {
            roots,
            table: table.as_ref().to_path_buf(),
            poll_interval,
            monitor: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.mount_roots.clone(),
            &config.mount_table,
            Duration::from_secs(config.poll_interval_secs.max(1)),
        )
    }
}

impl VolumeSource for MountTableSource {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<VolumeAttachEvent>> {
        let (monitor, events) =
            VolumeMonitor::start(self.roots.clone(), self.table.clone(), self.poll_interval)?;
        self.monitor = Some(monitor);
        Ok(events)
    }

    fn unsubscribe(&mut self) {
        if self.monitor.take().is_some() {
            info!("Mount table watching stopped and resources disposed.");
        }
    }
}
