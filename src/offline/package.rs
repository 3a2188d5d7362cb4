//! In-process worker that installs offline content packages.
//!
//! Packages live at `{base}/packages/{latest}-content.zip` (full) and
//! `{base}/packages/{installed}-{latest}-updates.zip` (incremental, for versions
//! listed in `update.json`'s `updates`). An incremental package may carry a
//! top-level `removed` file listing content paths to delete, one per line.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atomic_write::atomic_write;
use crate::http_client;

use super::archive::{self, ZipExtractionLimits};
use super::fetch::{UpdateInfo, parse_update_json};
use super::status::{StatusPatch, UpdateState};
use super::worker::{
    ClientMessage, MessageRelay, WorkerError, WorkerHost, WorkerMessage, WorkerScript,
};

const MAX_METADATA_BYTES: usize = 256 * 1024;
const MAX_PACKAGE_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const INSTALLED_FILE_NAME: &str = "installed.json";
const REMOVED_LIST_NAME: &str = "removed";

/// Errors raised while installing a content package.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Zip error: {0}")]
    Zip(String),
    #[error("Invalid package: {0}")]
    Invalid(String),
    #[error("Bad update metadata: {0}")]
    Metadata(String),
}

/// Marker recording what is unpacked under `content/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub version: String,
    pub date: Option<String>,
}

#[derive(Debug)]
struct Registration {
    script: WorkerScript,
    scope: String,
    relay: MessageRelay,
}

/// [`WorkerHost`] that downloads and unpacks content on a background thread.
#[derive(Debug)]
pub struct PackageWorkerHost {
    base_url: String,
    root: PathBuf,
    registration: Option<Registration>,
    installing: Arc<AtomicBool>,
}

impl PackageWorkerHost {
    /// `root` holds `content/`, the installed marker and scratch space.
    pub fn new(base_url: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            root: root.into(),
            registration: None,
            installing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    pub fn installed(&self) -> Result<Option<InstalledVersion>, PackageError> {
        read_installed(&self.root)
    }

    /// Script of the active registration, if any.
    pub fn active_script(&self) -> Option<&WorkerScript> {
        self.registration.as_ref().map(|reg| &reg.script)
    }

    /// Locate a file for `path` in installed content, unless the active worker
    /// prefers the network.
    pub fn resolve_offline(&self, path: &str) -> Option<PathBuf> {
        let registration = self.registration.as_ref()?;
        if registration.script.prefer_online {
            return None;
        }
        let relative = archive::sanitize_relative_path(path.trim_start_matches('/')).ok()?;
        let candidate = self.content_dir().join(relative);
        candidate.is_file().then_some(candidate)
    }

    fn spawn_install(
        &self,
        target: String,
        installed: Option<InstalledVersion>,
        relay: MessageRelay,
    ) {
        if self.installing.swap(true, Ordering::SeqCst) {
            debug!("Install already running; not starting another for {target}");
            return;
        }
        let job = InstallJob {
            base_url: self.base_url.clone(),
            root: self.root.clone(),
            target,
            installed,
            relay,
        };
        let installing = Arc::clone(&self.installing);
        let spawned = thread::Builder::new()
            .name("docsite-package-install".into())
            .spawn(move || {
                let relay = job.relay.clone();
                let patch = job.run();
                installing.store(false, Ordering::SeqCst);
                post_status(&relay, patch);
            });
        if let Err(err) = spawned {
            warn!("Could not start package install: {err}");
            self.installing.store(false, Ordering::SeqCst);
        }
    }

    fn clear_content(&self, relay: &MessageRelay) -> Result<(), PackageError> {
        post_status(relay, StatusPatch::state(UpdateState::Clearing));
        let content = self.content_dir();
        if content.exists() {
            fs::remove_dir_all(&content)?;
        }
        let marker = self.root.join(INSTALLED_FILE_NAME);
        if marker.exists() {
            fs::remove_file(&marker)?;
        }
        info!("Offline content cleared");
        post_status(
            relay,
            StatusPatch::state(UpdateState::Init).with_current(None, None),
        );
        Ok(())
    }
}

impl WorkerHost for PackageWorkerHost {
    fn register(
        &mut self,
        script: &WorkerScript,
        scope: &str,
        relay: MessageRelay,
    ) -> Result<(), WorkerError> {
        let installed =
            read_installed(&self.root).map_err(|err| WorkerError::Register(err.to_string()))?;
        debug!("Registered {} with scope {scope}", script.identifier());
        match &script.version {
            Some(target) if installed.as_ref().map(|i| &i.version) != Some(target) => {
                self.spawn_install(target.clone(), installed, relay.clone());
            }
            _ => {
                let (version, date) = installed
                    .map(|i| (Some(i.version), i.date))
                    .unwrap_or((None, None));
                post_status(
                    &relay,
                    StatusPatch::state(UpdateState::Init).with_current(version, date),
                );
            }
        }
        self.registration = Some(Registration {
            script: script.clone(),
            scope: scope.to_string(),
            relay,
        });
        Ok(())
    }

    fn unregister(&mut self) -> Result<bool, WorkerError> {
        Ok(match self.registration.take() {
            Some(registration) => {
                debug!("Unregistered worker for scope {}", registration.scope);
                true
            }
            None => false,
        })
    }

    fn is_installing(&self) -> bool {
        self.installing.load(Ordering::SeqCst)
    }

    fn post_message(&mut self, message: ClientMessage) -> Result<(), WorkerError> {
        let Some(registration) = self.registration.as_ref() else {
            return Err(WorkerError::NoActiveWorker(message));
        };
        let relay = registration.relay.clone();
        match message {
            ClientMessage::Clear => {
                if let Err(err) = self.clear_content(&relay) {
                    warn!("Clearing offline content failed: {err}");
                    post_status(&relay, StatusPatch::state(UpdateState::Init));
                }
            }
            ClientMessage::Ping => {
                relay.post(WorkerMessage::Pong);
            }
        }
        Ok(())
    }
}

struct InstallJob {
    base_url: String,
    root: PathBuf,
    target: String,
    installed: Option<InstalledVersion>,
    relay: MessageRelay,
}

impl InstallJob {
    /// Install the target and return the final `init` status to report.
    fn run(self) -> StatusPatch {
        match self.install() {
            Ok(installed) => {
                info!("Installed offline content {}", installed.version);
                StatusPatch::state(UpdateState::Init)
                    .with_progress(100)
                    .with_current(Some(installed.version), installed.date)
            }
            Err(err) => {
                warn!("Offline content install of {} failed: {err}", self.target);
                let (version, date) = self
                    .installed
                    .clone()
                    .map(|i| (Some(i.version), i.date))
                    .unwrap_or((None, None));
                StatusPatch::state(UpdateState::Init)
                    .with_progress(-1)
                    .with_current(version, date)
            }
        }
    }

    fn install(&self) -> Result<InstalledVersion, PackageError> {
        let metadata = self.fetch_metadata()?;
        let package = package_name(&metadata, self.installed.as_ref(), &self.target);
        let url = format!("{}/packages/{}", self.base_url, package.file_name);
        let downloads = self.root.join("downloads");
        fs::create_dir_all(&downloads)?;
        let zip_path = downloads.join(&package.file_name);

        post_status(
            &self.relay,
            StatusPatch::state(UpdateState::Downloading).with_progress(0),
        );
        self.download(&url, &zip_path)?;

        post_status(
            &self.relay,
            StatusPatch::state(UpdateState::Unpacking).with_progress(-1),
        );
        let staging = self.root.join("staging");
        archive::ensure_empty_dir(&staging)?;
        let files = archive::unzip_to_dir(&zip_path, &staging, ZipExtractionLimits::standard())?;
        debug!("Unpacked {files} files from {}", package.file_name);
        let removed = take_removed_list(&staging)?;
        let content = self.root.join("content");
        if package.incremental {
            archive::merge_dir(&staging, &content)?;
        } else {
            archive::replace_dir(&staging, &content)?;
        }

        post_status(&self.relay, StatusPatch::state(UpdateState::Cleaning));
        for path in &removed {
            let target = content.join(path);
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            } else if target.exists() {
                fs::remove_file(&target)?;
            }
        }
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::remove_file(&zip_path)?;

        let installed = InstalledVersion {
            version: self.target.clone(),
            date: (metadata.latest == self.target).then(|| metadata.date.clone()),
        };
        write_installed(&self.root, &installed)?;
        Ok(installed)
    }

    fn fetch_metadata(&self) -> Result<UpdateInfo, PackageError> {
        let url = format!("{}/update.json", self.base_url);
        let response = http_client::agent()
            .get(&url)
            .call()
            .map_err(|err| PackageError::Http(http_client::describe_error(&err)))?;
        let bytes = http_client::read_response_bytes(response, MAX_METADATA_BYTES)?;
        parse_update_json(&bytes).map_err(|err| PackageError::Metadata(err.to_string()))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<(), PackageError> {
        debug!("Downloading {url}");
        let response = http_client::agent()
            .get(url)
            .call()
            .map_err(|err| PackageError::Http(http_client::describe_error(&err)))?;
        let mut file = File::create(dest)?;
        let mut last_percent = 0;
        http_client::copy_response_to_writer(
            response,
            &mut file,
            MAX_PACKAGE_BYTES,
            |done, expected| {
                let Some(expected) = expected.filter(|len| *len > 0) else {
                    return;
                };
                let percent = (done.saturating_mul(100) / expected).min(100) as i32;
                if percent > last_percent {
                    last_percent = percent;
                    post_status(
                        &self.relay,
                        StatusPatch::state(UpdateState::Downloading).with_progress(percent),
                    );
                }
            },
        )?;
        file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct PackageName {
    file_name: String,
    incremental: bool,
}

fn package_name(
    metadata: &UpdateInfo,
    installed: Option<&InstalledVersion>,
    target: &str,
) -> PackageName {
    if metadata.latest == target
        && let Some(installed) = installed
        && metadata.accepts_incremental_from(&installed.version)
    {
        return PackageName {
            file_name: format!("{}-{target}-updates.zip", installed.version),
            incremental: true,
        };
    }
    PackageName {
        file_name: format!("{target}-content.zip"),
        incremental: false,
    }
}

/// Pull the `removed` list out of an unpacked package.
fn take_removed_list(staging: &Path) -> Result<Vec<PathBuf>, PackageError> {
    let list = staging.join(REMOVED_LIST_NAME);
    if !list.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&list)?;
    fs::remove_file(&list)?;
    let mut paths = Vec::new();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match archive::sanitize_relative_path(line) {
            Ok(path) => paths.push(path),
            Err(err) => warn!("Skipping removed entry: {err}"),
        }
    }
    Ok(paths)
}

fn read_installed(root: &Path) -> Result<Option<InstalledVersion>, PackageError> {
    let path = root.join(INSTALLED_FILE_NAME);
    match fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(installed) => Ok(Some(installed)),
            Err(err) => {
                warn!("Ignoring unreadable {}: {err}", path.display());
                Ok(None)
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_installed(root: &Path, installed: &InstalledVersion) -> Result<(), PackageError> {
    let data = serde_json::to_vec_pretty(installed)?;
    atomic_write(&root.join(INSTALLED_FILE_NAME), &data)?;
    Ok(())
}

fn post_status(relay: &MessageRelay, patch: StatusPatch) {
    if !relay.post(WorkerMessage::UpdateStatus(patch)) {
        debug!("Coordinator gone; dropping worker status");
    }
}
