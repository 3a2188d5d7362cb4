use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::fetch::{UpdateInfo, UpdateSource};
use super::settings::{KeyValueStore, Settings, SettingsPatch, SettingsStore};
use super::status::{StatusPatch, UpdateState, UpdateStatus};
use super::timer::AutoUpdateTimer;
use super::worker::{
    ClientMessage, CoordinatorEvent, MessageRelay, WorkerError, WorkerMessage, WorkerScript,
    WorkerSupport,
};
use super::OfflineError;

/// Tunables that come from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Scope the worker is registered under.
    pub scope: String,
    pub auto_update_interval: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            scope: "/".into(),
            auto_update_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Owns the offline settings, the update status and the worker lifecycle.
///
/// All state lives on the owner's thread. Background activity (the auto-update
/// timer, worker install jobs) only queues [`CoordinatorEvent`]s, which are
/// applied by [`OfflineCoordinator::process_events`] or
/// [`OfflineCoordinator::wait_for_events`].
pub struct OfflineCoordinator {
    store: SettingsStore,
    source: Box<dyn UpdateSource>,
    worker: WorkerSupport,
    options: CoordinatorOptions,
    settings: Settings,
    status: UpdateStatus,
    latest_update: Option<UpdateInfo>,
    updating: bool,
    registered: bool,
    timer: Option<AutoUpdateTimer>,
    timer_generation: u64,
    events_tx: Sender<CoordinatorEvent>,
    events_rx: Receiver<CoordinatorEvent>,
    clock: fn() -> OffsetDateTime,
}

impl OfflineCoordinator {
    /// Build a coordinator from its collaborators. No background work starts
    /// until [`OfflineCoordinator::start`].
    pub fn new(
        store: Box<dyn KeyValueStore>,
        source: Box<dyn UpdateSource>,
        worker: WorkerSupport,
        options: CoordinatorOptions,
    ) -> Self {
        let store = SettingsStore::new(store);
        let settings = store.load();
        let status = UpdateStatus {
            current_version: settings.current_version.clone(),
            current_date: settings.current_date.clone(),
            ..UpdateStatus::default()
        };
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            store,
            source,
            worker,
            options,
            settings,
            status,
            latest_update: None,
            updating: false,
            registered: false,
            timer: None,
            timer_generation: 0,
            events_tx,
            events_rx,
            clock: OffsetDateTime::now_utc,
        }
    }

    /// Replace the wall clock used for cache freshness.
    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Kick off the auto-update loop if the user enabled it.
    pub fn start(&mut self) {
        if self.settings.auto_updates {
            self.start_auto_update();
        }
    }

    /// Stop scheduled work. The installed worker stays registered.
    pub fn shutdown(&mut self) {
        self.cancel_auto_update();
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn status(&self) -> &UpdateStatus {
        &self.status
    }

    pub fn latest_update(&self) -> Option<&UpdateInfo> {
        self.latest_update.as_ref()
    }

    /// Whether an install or clear is in flight.
    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn has_pending_auto_update(&self) -> bool {
        self.timer.is_some()
    }

    /// A sender that feeds worker messages into this coordinator.
    pub fn relay(&self) -> MessageRelay {
        MessageRelay::new(self.events_tx.clone())
    }

    /// Whether the worker host is running an install job.
    pub fn is_installing(&self) -> bool {
        self.worker
            .host_ref()
            .is_some_and(|host| host.is_installing())
    }

    /// Compare the installed version with the remote release.
    ///
    /// Returns the cached record untouched while an install is running or the
    /// tracker is past `init`/`nothing`. Otherwise a cached record published in
    /// the last 24 hours is reused; anything older triggers a fetch.
    pub fn check_for_update(&mut self) -> Result<Option<UpdateInfo>, OfflineError> {
        if self.is_installing() || !self.status.state.is_idle() {
            return Ok(self.latest_update.clone());
        }
        let now = (self.clock)();
        let update = match &self.latest_update {
            Some(cached) if cached.is_fresh(now) => cached.clone(),
            _ => self.source.fetch_latest()?,
        };
        self.status.update_version = Some(update.latest.clone());
        self.status.update_date = Some(update.date.clone());
        self.status.state = if self.settings.current_version.as_deref() != Some(&update.latest) {
            UpdateState::UpdateAvailable
        } else {
            UpdateState::Nothing
        };
        debug!(
            "Update check: latest {} (installed {:?}) -> {}",
            update.latest, self.settings.current_version, self.status.state
        );
        self.latest_update = Some(update.clone());
        Ok(Some(update))
    }

    /// Run an update check and return the resulting status.
    pub fn update_available(&mut self) -> Result<&UpdateStatus, OfflineError> {
        self.check_for_update()?;
        Ok(&self.status)
    }

    /// Reinstall the worker pointed at the latest known version.
    ///
    /// A failed reinstall puts the tracker back where it was.
    pub fn request_update(&mut self) -> Result<(), OfflineError> {
        if self.is_installing() {
            debug!("Update requested while an install is running");
            return Ok(());
        }
        let latest = self.latest_update.as_ref().map(|update| update.latest.clone());
        if latest.is_some() && latest == self.status.current_version {
            return Ok(());
        }
        let previous = (self.status.state, self.updating);
        self.updating = true;
        self.status.state = UpdateState::Downloading;
        info!("Requesting update to {}", latest.as_deref().unwrap_or("undefined"));
        let result = self.reinstall_worker(latest);
        if result.is_err() {
            (self.status.state, self.updating) = previous;
        }
        result
    }

    fn reinstall_worker(&mut self, version: Option<String>) -> Result<(), OfflineError> {
        if let Some(host) = self.worker.host() {
            let removed = host.unregister()?;
            debug!("Previous worker unregistered: {removed}");
            self.registered = false;
        }
        self.enable_worker(Some(self.settings.prefer_online), version)
    }

    /// Register the worker. `prefer_online` defaults to the stored preference.
    pub fn enable_worker(
        &mut self,
        prefer_online: Option<bool>,
        version: Option<String>,
    ) -> Result<(), OfflineError> {
        let script = WorkerScript {
            prefer_online: prefer_online.unwrap_or(self.settings.prefer_online),
            version,
        };
        let relay = self.relay();
        let Some(host) = self.worker.host() else {
            debug!("Skipping worker {}: unsupported", script.identifier());
            return Ok(());
        };
        info!("Enabling worker {}", script.identifier());
        host.register(&script, &self.options.scope, relay)?;
        self.registered = true;
        Ok(())
    }

    pub fn disable_worker(&mut self) -> Result<(), OfflineError> {
        let Some(host) = self.worker.host() else {
            return Ok(());
        };
        info!("Disabling worker");
        host.unregister()?;
        self.registered = false;
        Ok(())
    }

    /// Apply a settings change, reconfiguring the worker and the auto-update
    /// loop as needed, then persist the merged record.
    pub fn apply_settings(&mut self, patch: SettingsPatch) -> Result<Settings, OfflineError> {
        let current = self.store.load();

        if !current.offline && patch.offline == Some(true) && !self.registered {
            let update = self.check_for_update()?;
            self.enable_worker(patch.prefer_online, update.map(|update| update.latest))?;
        } else if let Some(prefer_online) = patch.prefer_online
            && prefer_online != current.prefer_online
        {
            self.disable_worker()?;
            let version = patch
                .current_version
                .clone()
                .unwrap_or_else(|| self.status.current_version.clone());
            self.enable_worker(Some(prefer_online), version)?;
        }

        if current.offline && patch.offline == Some(false) {
            self.disable_worker()?;
        }

        if patch.auto_updates == Some(false) && self.timer.is_some() {
            info!("Auto updates disabled");
            self.cancel_auto_update();
        } else if patch.auto_updates == Some(true) && !current.auto_updates {
            self.start_auto_update();
        }

        let merged = current.merged(&patch);
        self.store.save(&merged)?;
        self.settings = merged.clone();
        Ok(merged)
    }

    /// Apply a partial status update.
    ///
    /// The installed version/date are always written back to the settings.
    /// An incoming `init` while mid-flow resets the tracker and re-runs the
    /// update check.
    pub fn set_status(&mut self, patch: StatusPatch) -> Result<(), OfflineError> {
        if let Some(progress) = patch.progress {
            self.status.progress = progress;
        }
        if let Some(date) = patch.current_date {
            self.status.current_date = date;
        }
        if let Some(version) = patch.current_version {
            self.status.current_version = version;
        }

        let persisted = SettingsPatch {
            current_version: Some(self.status.current_version.clone()),
            current_date: Some(self.status.current_date.clone()),
            ..SettingsPatch::default()
        };
        if let Err(err) = self.apply_settings(persisted) {
            warn!("Failed to persist installed version: {err}");
        }

        let Some(state) = patch.state else {
            return Ok(());
        };
        if state == UpdateState::Init && self.status.state != UpdateState::Init {
            debug!("Worker reset from {}", self.status.state);
            self.updating = false;
            self.status.update_version = None;
            self.status.update_date = None;
            self.status.state = UpdateState::Init;
            self.check_for_update()?;
        } else {
            self.updating = state.marks_updating();
            self.status.state = state;
        }
        Ok(())
    }

    /// Ask the worker to drop all offline content.
    pub fn clear(&mut self) -> Result<(), OfflineError> {
        let previous = (self.status.state, self.updating);
        self.status.state = UpdateState::Clearing;
        self.updating = true;
        let delivered = match self.worker.host() {
            Some(host) => host.post_message(ClientMessage::Clear),
            None => Err(WorkerError::NoActiveWorker(ClientMessage::Clear)),
        };
        match delivered {
            Ok(()) => Ok(()),
            Err(WorkerError::NoActiveWorker(_)) => {
                debug!("No active worker to clear");
                (self.status.state, self.updating) = previous;
                Ok(())
            }
            Err(err) => {
                (self.status.state, self.updating) = previous;
                Err(err.into())
            }
        }
    }

    /// Send a liveness probe; the worker answers with `pong`.
    pub fn ping(&mut self) -> Result<(), OfflineError> {
        if let Some(host) = self.worker.host() {
            host.post_message(ClientMessage::Ping)?;
        }
        Ok(())
    }

    pub fn handle_message(&mut self, message: WorkerMessage) -> Result<(), OfflineError> {
        match message {
            WorkerMessage::UpdateStatus(patch) => self.set_status(patch),
            WorkerMessage::Pong => {
                info!("pong");
                Ok(())
            }
            WorkerMessage::Unknown => {
                debug!("Ignoring unknown worker message");
                Ok(())
            }
        }
    }

    /// Apply every queued event without blocking. Returns how many were handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for the next event, then drain the queue.
    pub fn wait_for_events(&mut self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event);
                1 + self.process_events()
            }
            Err(_) => 0,
        }
    }

    fn dispatch(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Worker(message) => {
                if let Err(err) = self.handle_message(message) {
                    warn!("Worker message failed: {err}");
                }
            }
            CoordinatorEvent::AutoUpdateDue { generation } => {
                let current = self.timer.as_ref().map(AutoUpdateTimer::generation);
                if current == Some(generation) {
                    self.start_auto_update();
                } else {
                    debug!("Ignoring stale auto-update tick {generation}");
                }
            }
        }
    }

    /// Check, update, and schedule the next run.
    ///
    /// The next run is scheduled even when this one fails.
    pub fn run_auto_update(&mut self) -> Result<(), OfflineError> {
        info!("Running auto update");
        self.cancel_auto_update();
        let result = self.check_then_update();
        self.schedule_auto_update();
        result
    }

    fn check_then_update(&mut self) -> Result<(), OfflineError> {
        self.check_for_update()?;
        self.request_update()
    }

    fn start_auto_update(&mut self) {
        if let Err(err) = self.run_auto_update() {
            warn!("Auto update failed, retrying next interval: {err}");
        }
    }

    fn schedule_auto_update(&mut self) {
        self.timer_generation += 1;
        self.timer = Some(AutoUpdateTimer::schedule(
            self.options.auto_update_interval,
            self.timer_generation,
            self.events_tx.clone(),
        ));
    }

    fn cancel_auto_update(&mut self) {
        self.timer = None;
    }
}

impl Drop for OfflineCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
