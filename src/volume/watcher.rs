use super::{matches_target, normalize_volume_id, VolumeAttachEvent};
use crate::backup::{Result, SequencerHandle, TriggerOutcome};
use crate::utils::config::BackupConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where attach notifications come from. The OS-backed implementation is
/// [`super::MountTableSource`]; tests feed events through a plain channel.
pub trait VolumeSource: Send {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<VolumeAttachEvent>>;

    /// Releases the OS subscription. Must be safe to call more than once.
    fn unsubscribe(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Armed,
    /// Subscription failed; alive but never reacting.
    Inert,
}

/// Releases the subscription on every exit path, unwinding included.
struct Subscription<'a, S: VolumeSource>(&'a mut S);

impl<S: VolumeSource> Drop for Subscription<'_, S> {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

/// Listens for volume attaches and hands matches for the configured target to
/// the sequencer, without ever waiting on a backup.
pub struct AttachWatcher {
    backup: Arc<BackupConfig>,
    sequencer: SequencerHandle,
    state_tx: watch::Sender<WatcherState>,
}

impl AttachWatcher {
    pub fn new(backup: Arc<BackupConfig>, sequencer: SequencerHandle) -> Self {
        let (state_tx, _) = watch::channel(WatcherState::Idle);
        Self {
            backup,
            sequencer,
            state_tx,
        }
    }

    pub fn state(&self) -> watch::Receiver<WatcherState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to `source` and reacts to events until `cancel` fires or the
    /// source closes its channel.
    pub async fn run<S: VolumeSource>(self, mut source: S, cancel: CancellationToken) {
        info!("USB Event Watcher is starting.");

        let mut events = match source.subscribe() {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to start the volume watcher: {}", e);
                self.state_tx.send_replace(WatcherState::Inert);
                cancel.cancelled().await;
                self.state_tx.send_replace(WatcherState::Idle);
                return;
            }
        };
        let subscription = Subscription(&mut source);

        self.state_tx.send_replace(WatcherState::Armed);
        info!("Volume watching started successfully. Waiting for USB drive insertion...");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(event) => self.on_attach(event),
                None => {
                    warn!("Volume notification channel closed");
                    break;
                }
            }
        }

        drop(subscription);
        self.state_tx.send_replace(WatcherState::Idle);
        info!("Volume watching stopped and resources released.");
    }

    fn on_attach(&self, event: VolumeAttachEvent) {
        let detected = normalize_volume_id(&event.volume_id).to_string();
        let target = &self.backup.target_volume_id;

        if !matches_target(&detected, target) {
            info!(
                "USB Drive Detected, but not the target. Detected: {}, Target: {}",
                detected, target
            );
            return;
        }

        info!("******************************************************************");
        info!("TARGET USB Drive Detected! Volume: {}", detected);

        match self.sequencer.try_trigger(event) {
            TriggerOutcome::Accepted => {}
            TriggerOutcome::Busy => {
                warn!("A backup is already running, ignoring attach of {}", detected);
            }
            TriggerOutcome::Closed => {
                error!("Backup sequencer is not running, cannot start backup for {}", detected);
            }
        }
    }
}
