use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use usb_backup_watcher::backup::sequencer::Event;
use usb_backup_watcher::backup::{BackupSequencer, RunOutcome};
use usb_backup_watcher::utils::config::Config;
use usb_backup_watcher::volume::{AttachWatcher, MountTableSource, WatcherState};

fn mount_line(mount: &Path) -> String {
    format!("/dev/sdx1 {} vfat rw,nosuid 0 0\n", mount.display())
}

#[tokio::test]
async fn attaching_target_volume_mirrors_source() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("projects");
    fs::create_dir_all(source.join("app/node_modules/dep")).unwrap();
    fs::create_dir_all(source.join("app/src")).unwrap();
    fs::write(source.join("README.md"), b"readme").unwrap();
    fs::write(source.join("app/src/main.rs"), b"fn main() {}").unwrap();
    fs::write(source.join("app/node_modules/dep/index.js"), b"skip me").unwrap();

    let media = tmp.path().join("media");
    let volume = media.join("me/BACKUPDRIVE");
    fs::create_dir_all(&volume).unwrap();
    let dest = volume.join("projects-mirror");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("leftover.txt"), b"from last time").unwrap();

    let table = tmp.path().join("mounts");
    fs::write(&table, "").unwrap();

    let mut config = Config::for_paths(&source, &dest, "backupdrive");
    config.countdown_secs = 0;
    config.mount_roots = vec![media.clone()];
    config.mount_table = table.clone();

    let cancel = CancellationToken::new();
    let (sequencer, sequencer_task) = BackupSequencer::from_config(&config, cancel.clone()).spawn();
    let mut events = sequencer.subscribe_events();

    let watcher = AttachWatcher::new(Arc::new(config.backup()), sequencer);
    let mut state = watcher.state();
    let source_events = MountTableSource::new(config.mount_roots.clone(), &table, Duration::from_millis(50));
    let watcher_task = tokio::spawn(watcher.run(source_events, cancel.clone()));
    state.wait_for(|s| *s == WatcherState::Armed).await.unwrap();

    // A foreign volume first, then the target
    fs::write(&table, mount_line(&media.join("me/OTHER"))).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(dest.join("leftover.txt").exists());

    fs::write(
        &table,
        format!("{}{}", mount_line(&media.join("me/OTHER")), mount_line(&volume)),
    )
    .unwrap();

    let summary = loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("backup should run after the target is attached")
            .unwrap();
        if let Event::RunFinished(summary) = event {
            break summary;
        }
    };

    assert_eq!(summary.run.outcome, RunOutcome::Succeeded);
    assert_eq!(summary.run.total_files, 2);
    assert_eq!(summary.run.copied_files, 2);
    assert_eq!(fs::read(dest.join("README.md")).unwrap(), b"readme");
    assert_eq!(fs::read(dest.join("app/src/main.rs")).unwrap(), b"fn main() {}");
    assert!(!dest.join("app/node_modules").exists());
    assert!(!dest.join("leftover.txt").exists());

    cancel.cancel();
    watcher_task.await.unwrap();
    sequencer_task.await.unwrap();
    assert_eq!(*state.borrow(), WatcherState::Idle);
}
