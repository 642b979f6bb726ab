use super::progress::log_progress;
use super::resync::prepare_destination;
use super::{
    BackupError, BackupRun, CopyReport, ExclusionSet, FileCounter, Result, RunOutcome, RunSummary,
    TreeCopier,
};
use crate::utils::config::{BackupConfig, Config};
use crate::utils::disk::{resolve_source_root, verify_accessible};
use crate::volume::VolumeAttachEvent;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub enum Event {
    CountdownStarted { volume_id: String },
    CountdownCancelled,
    RunFinished(Box<RunSummary>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Accepted,
    /// A run is pending or in flight; the trigger was dropped.
    Busy,
    /// The sequencer task has stopped.
    Closed,
}

/// Cheap, cloneable front door to a spawned [`BackupSequencer`].
#[derive(Clone)]
pub struct SequencerHandle {
    request_tx: mpsc::Sender<VolumeAttachEvent>,
    busy: Arc<AtomicBool>,
    event_tx: broadcast::Sender<Event>,
}

impl SequencerHandle {
    /// Starts a run unless one is already pending or in flight. Overlapping
    /// attaches are dropped, never queued.
    pub fn try_trigger(&self, event: VolumeAttachEvent) -> TriggerOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TriggerOutcome::Busy;
        }

        match self.request_tx.try_send(event) {
            Ok(()) => TriggerOutcome::Accepted,
            // The pending request clears the flag once it has run
            Err(TrySendError::Full(_)) => TriggerOutcome::Busy,
            Err(TrySendError::Closed(_)) => {
                self.busy.store(false, Ordering::Release);
                TriggerOutcome::Closed
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}

/// Countdown, resync, count, copy: one run at a time.
///
/// The countdown stops as soon as `cancel` fires. Once file I/O has begun the
/// run is not interrupted; a stop request during a copy does not halt it.
pub struct BackupSequencer {
    backup: Arc<BackupConfig>,
    exclusions: Arc<ExclusionSet>,
    countdown: Duration,
    mount_table: PathBuf,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

impl BackupSequencer {
    pub fn new(
        backup: Arc<BackupConfig>,
        exclusions: Arc<ExclusionSet>,
        countdown: Duration,
        mount_table: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            backup,
            exclusions,
            countdown,
            mount_table,
            cancel,
            event_tx,
        }
    }

    pub fn from_config(config: &Config, cancel: CancellationToken) -> Self {
        Self::new(
            Arc::new(config.backup()),
            Arc::new(ExclusionSet::new(config.exclude_dirs.iter().cloned())),
            Duration::from_secs(config.countdown_secs),
            config.mount_table.clone(),
            cancel,
        )
    }

    pub fn spawn(self) -> (SequencerHandle, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::channel(1);
        let busy = Arc::new(AtomicBool::new(false));
        let handle = SequencerHandle {
            request_tx,
            busy: busy.clone(),
            event_tx: self.event_tx.clone(),
        };

        let task = tokio::spawn(self.process_requests(request_rx, busy));
        (handle, task)
    }

    async fn process_requests(
        self,
        mut rx: mpsc::Receiver<VolumeAttachEvent>,
        busy: Arc<AtomicBool>,
    ) {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = rx.recv() => request,
            };
            let Some(trigger) = request else { break };

            let summary = self.run(trigger).await;
            busy.store(false, Ordering::Release);

            if let Some(summary) = summary {
                let _ = self.event_tx.send(Event::RunFinished(Box::new(summary)));
            }
        }
        debug!("Backup sequencer stopped");
    }

    /// Executes one run for `trigger`. Returns `None` when shutdown cancelled
    /// the countdown, in which case nothing on disk was touched.
    pub async fn run(&self, trigger: VolumeAttachEvent) -> Option<RunSummary> {
        let _ = self.event_tx.send(Event::CountdownStarted {
            volume_id: trigger.volume_id.clone(),
        });

        if let Err(e) = self.countdown().await {
            info!("{}, no backup steps executed.", e);
            let _ = self.event_tx.send(Event::CountdownCancelled);
            return None;
        }

        let run = BackupRun::new();
        let run_id = run.id;
        let span = info_span!("backup_run", run_id = %run_id, volume = %trigger.volume_id);

        let backup = self.backup.clone();
        let exclusions = self.exclusions.clone();
        let mount_table = self.mount_table.clone();
        let blocking_span = span.clone();

        let result = tokio::task::spawn_blocking(move || {
            blocking_span.in_scope(|| execute(&backup, &exclusions, &mount_table, run))
        })
        .await;

        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                span.in_scope(|| error!("Backup task did not complete: {}", e));
                let mut run = BackupRun::new();
                run.id = run_id;
                run.outcome = RunOutcome::Failed(format!("backup task did not complete: {}", e));
                RunSummary { run, report: None }
            }
        };

        info!("******************************************************************");
        Some(summary)
    }

    async fn countdown(&self) -> Result<()> {
        if self.countdown.is_zero() {
            return Ok(());
        }

        info!(
            "Starting backup countdown: {}.",
            humantime::format_duration(self.countdown)
        );

        let mut remaining = self.countdown;
        while !remaining.is_zero() {
            info!("Time until copy starts: {}...", humantime::format_duration(remaining));
            let step = remaining.min(COUNTDOWN_STEP);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(BackupError::Cancelled),
                _ = tokio::time::sleep(step) => {}
            }
            remaining -= step;
        }

        info!("Countdown complete. Proceeding with file operations.");
        Ok(())
    }
}

fn execute(
    backup: &BackupConfig,
    exclusions: &Arc<ExclusionSet>,
    mount_table: &Path,
    mut run: BackupRun,
) -> RunSummary {
    let started = Instant::now();

    match perform(backup, exclusions, mount_table, &mut run) {
        Ok(report) => {
            let elapsed = humantime::format_duration(Duration::from_secs(started.elapsed().as_secs()));
            if report.is_clean() {
                info!("Backup process completed successfully in {}.", elapsed);
            } else {
                warn!(
                    "Backup process completed in {} with {} failed item(s).",
                    elapsed,
                    report.failures.len()
                );
            }
            info!(
                "Copied {} file(s), skipped {} link(s), excluded {} director(ies).",
                report.files_copied,
                report.skipped_links.len(),
                report.excluded_dirs
            );
            run.outcome = RunOutcome::Succeeded;
            RunSummary {
                run,
                report: Some(report),
            }
        }
        Err(e) => {
            error!("Backup aborted: {}", e);
            run.outcome = RunOutcome::Failed(e.to_string());
            RunSummary { run, report: None }
        }
    }
}

fn perform(
    backup: &BackupConfig,
    exclusions: &Arc<ExclusionSet>,
    mount_table: &Path,
    run: &mut BackupRun,
) -> Result<CopyReport> {
    if let Err(e) = prepare_destination(&backup.destination_root) {
        error!(
            "Failed to delete or recreate the destination folder: {}. Aborting backup.",
            backup.destination_root.display()
        );
        return Err(e);
    }

    match resolve_source_root(&backup.source_root, mount_table) {
        Some(root) if verify_accessible(&root) => debug!("Source root {} is reachable", root.display()),
        Some(root) => return Err(BackupError::SourceRootUnreachable(root)),
        None => return Err(BackupError::SourceRootUnreachable(backup.source_root.clone())),
    }

    run.total_files = FileCounter::new(exclusions.clone()).count_files(&backup.source_root);
    run.copied_files = 0;
    info!(
        "Found {} files to copy (excluding: {}). Starting backup process.",
        run.total_files, exclusions
    );

    TreeCopier::new(exclusions.clone()).copy_all(
        &backup.source_root,
        &backup.destination_root,
        run,
        log_progress,
    )
}
