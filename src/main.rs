use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use usb_backup_watcher::backup::BackupSequencer;
use usb_backup_watcher::utils;
use usb_backup_watcher::volume::{AttachWatcher, MountTableSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the format can be chosen
    let config = utils::config::load_config()?;
    utils::logging::init_tracing(config.log_format);

    info!("Starting USB Backup Watcher v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: From='{}', To='{}', TargetVolume='{}'",
        config.source_root.display(),
        config.destination_root.display(),
        config.target_volume_id
    );

    let cancel = CancellationToken::new();

    let (sequencer, sequencer_task) = BackupSequencer::from_config(&config, cancel.clone()).spawn();
    let watcher = AttachWatcher::new(Arc::new(config.backup()), sequencer.clone());
    let watcher_task = tokio::spawn(watcher.run(MountTableSource::from_config(&config), cancel.clone()));

    shutdown_signal().await;
    info!("USB Event Watcher service is stopping.");
    cancel.cancel();

    if let Err(e) = watcher_task.await {
        warn!("Watcher task ended abnormally: {}", e);
    }

    if sequencer.is_busy() {
        warn!("A backup copy is in progress; it will finish before the process exits.");
    }
    if let Err(e) = sequencer_task.await {
        warn!("Sequencer task ended abnormally: {}", e);
    }

    info!("Service stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
