//! Offline content updates.
//!
//! [`OfflineCoordinator`] keeps the user's offline preferences, checks the
//! update endpoint, and drives a background worker that installs content
//! packages. The worker reports back through [`MessageRelay`]; its messages are
//! applied when the owner calls [`OfflineCoordinator::process_events`].

mod archive;
mod coordinator;
mod fetch;
mod package;
mod settings;
mod status;
mod timer;
mod worker;

pub use coordinator::{CoordinatorOptions, OfflineCoordinator};
pub use fetch::{
    HttpUpdateSource, UPDATE_CACHE_TTL, UpdateInfo, UpdateSource, parse_publish_date,
    parse_update_json,
};
pub use package::{InstalledVersion, PackageError, PackageWorkerHost};
pub use settings::{
    JsonFileStore, KeyValueStore, MemoryStore, SETTINGS_KEY, STORE_FILE_NAME, Settings,
    SettingsPatch, SettingsStore, StoreError,
};
pub use status::{StatusPatch, UpdateState, UpdateStatus};
pub use worker::{
    ClientMessage, CoordinatorEvent, MessageRelay, WORKER_SCRIPT_PATH, WorkerError, WorkerHost,
    WorkerMessage, WorkerScript, WorkerSupport,
};

/// Errors surfaced by the offline coordinator.
#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid update metadata: {0}")]
    InvalidMetadata(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
