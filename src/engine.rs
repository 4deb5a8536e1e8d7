use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use colored::*;
use log::{debug, error, info, warn};

use crate::config::{Endpoint, SyncConfig, DEFAULT_INTERVAL_MINUTES};
use crate::db::PreferenceStore;
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::notifier::{Notification, Notifier, NOTIFICATION_ID};
use crate::scanner::{scan_directory, UploadTarget};
use crate::uploader::{is_upload_success, Uploader};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Counts for one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub uploaded: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run held the guard; nothing was scanned.
    Skipped,
    Finished(RunSummary),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::Skipped => true,
            RunOutcome::Finished(summary) => summary.is_success(),
        }
    }
}

/// Holds the single-flight flag for the lifetime of one run.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// Prefix operator-facing output with the directory being synced
fn sync_log(scope: &str, message: &str) {
    println!("[{}] {}", scope.cyan(), message);
}

pub struct SyncEngine {
    store: Arc<PreferenceStore>,
    uploader: Box<dyn Uploader>,
    notifier: Arc<dyn Notifier>,
    events: Arc<EventBus>,
    // Shared with every other engine on the same database file
    running: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<PreferenceStore>,
        uploader: Box<dyn Uploader>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let running = store.run_flag();
        Self {
            store,
            uploader,
            notifier,
            events: Arc::new(EventBus::new()),
            running,
        }
    }

    pub fn store(&self) -> &Arc<PreferenceStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Scan the configured directory once and upload everything found.
    ///
    /// Settings are re-read from the store on every call. Returns
    /// [`RunOutcome::Skipped`] without touching the store or the directory
    /// when a run is already in progress on any engine backed by the same
    /// database file. An invalid directory or missing
    /// endpoint settings fail the run before any file is read.
    pub fn run_once(&self) -> Result<RunOutcome> {
        let _guard = match RunGuard::acquire(&self.running) {
            Some(guard) => guard,
            None => {
                info!("Upload already in progress, skipping this run");
                return Ok(RunOutcome::Skipped);
            }
        };

        let config = SyncConfig::load(&self.store)?;
        let directory = config.directory_ref()?;
        let endpoint = config.endpoint()?;
        let scope = directory.display();

        let targets = scan_directory(directory.path())?;
        if targets.is_empty() {
            sync_log(&scope, "No images to upload");
            return Ok(RunOutcome::Finished(RunSummary::default()));
        }

        sync_log(
            &scope,
            &format!("{} Found {} images to upload", "🔍".blue(), targets.len()),
        );

        let summary = self.upload_all(&scope, &endpoint, &targets);
        Ok(RunOutcome::Finished(summary))
    }

    fn upload_all(&self, scope: &str, endpoint: &Endpoint, targets: &[UploadTarget]) -> RunSummary {
        let started = Instant::now();
        let total = targets.len();
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };

        self.notifier
            .notify(NOTIFICATION_ID, &Notification::Progress { current: 0, total });

        for (i, target) in targets.iter().enumerate() {
            match self.upload_one(scope, endpoint, target) {
                Ok(true) => summary.uploaded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    error!("Upload of {} failed: {}", target.file_name, e);
                    sync_log(
                        scope,
                        &format!("{} {} failed: {}", "❌".red(), target.file_name.red(), e),
                    );
                    summary.failed += 1;
                }
            }

            self.notifier.notify(
                NOTIFICATION_ID,
                &Notification::Progress {
                    current: i + 1,
                    total,
                },
            );
        }

        let terminal = if summary.is_success() {
            Notification::Complete
        } else {
            Notification::Error
        };
        self.notifier.notify(NOTIFICATION_ID, &terminal);

        sync_log(
            scope,
            &format!(
                "📊 Run finished in {:.1}s: {} uploaded, {} failed",
                started.elapsed().as_secs_f64(),
                summary.uploaded.to_string().green(),
                summary.failed.to_string().red()
            ),
        );

        summary
    }

    /// `Ok(false)` when the server answered without the success marker.
    fn upload_one(&self, scope: &str, endpoint: &Endpoint, target: &UploadTarget) -> Result<bool> {
        debug!("Uploading {}", target.path.display());
        let response = self.uploader.upload(endpoint, target)?;

        if !is_upload_success(&response) {
            warn!("Upload of {} rejected: {}", target.file_name, response);
            sync_log(
                scope,
                &format!("{} {} rejected by server", "⚠️".yellow(), target.file_name.yellow()),
            );
            return Ok(false);
        }

        sync_log(scope, &format!("{} Uploaded {}", "✅".green(), target.file_name.green()));

        match fs::remove_file(&target.path) {
            Ok(()) => debug!("Deleted {}", target.path.display()),
            Err(e) => warn!("Uploaded {} but could not delete it: {}", target.path.display(), e),
        }

        // A confirmed upload counts even when the counters cannot be written
        match self.store.record_upload(Local::now()) {
            Ok((formatted_time, total)) => {
                self.events.post(SyncEvent::sync_time(&formatted_time));
                self.events.post(SyncEvent::upload_count(total));
            }
            Err(e) => warn!("Uploaded {} but could not record it: {}", target.file_name, e),
        }

        Ok(true)
    }

    /// Run until `shutdown` is raised or sync is switched off.
    ///
    /// The interval is re-read after every run. Store errors are logged and
    /// retried after the last known interval.
    pub fn run_periodic(&self, shutdown: &AtomicBool) {
        let mut iteration = 0u64;
        let mut interval = Duration::from_secs(DEFAULT_INTERVAL_MINUTES * 60);

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, leaving sync loop");
                break;
            }

            match SyncConfig::load(&self.store) {
                Ok(config) if !config.sync_enabled => {
                    info!("Sync disabled, leaving sync loop");
                    break;
                }
                Ok(_) => {
                    iteration += 1;
                    info!("Starting sync iteration {}", iteration);

                    match self.run_once() {
                        Ok(RunOutcome::Skipped) => debug!("Iteration {} skipped", iteration),
                        Ok(RunOutcome::Finished(summary)) => info!(
                            "Iteration {} finished: {}/{} uploaded",
                            iteration, summary.uploaded, summary.total
                        ),
                        // Don't exit on errors, the next tick retries
                        Err(e) => error!("Iteration {} failed: {}", iteration, e),
                    }

                    match SyncConfig::load(&self.store) {
                        Ok(config) => interval = config.interval(),
                        Err(e) => warn!("Could not re-read interval, keeping {}s: {}", interval.as_secs(), e),
                    }
                }
                Err(e) => error!("Could not read settings, retrying in {}s: {}", interval.as_secs(), e),
            }

            info!("Waiting {}s before next sync", interval.as_secs());
            if !wait_unless_shutdown(interval, shutdown) {
                info!("Shutdown requested during interval wait");
                break;
            }
        }
    }
}

/// Sleep for `duration`, polling `shutdown`. Returns false if it was raised.
fn wait_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(SHUTDOWN_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
    !shutdown.load(Ordering::SeqCst)
}
