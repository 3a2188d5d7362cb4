//! Seam between the coordinator and the background worker that installs
//! offline content.

use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

use super::status::StatusPatch;

/// Script path registered with the host.
pub const WORKER_SCRIPT_PATH: &str = "/service-worker.js";

/// Parameters a worker is registered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerScript {
    pub prefer_online: bool,
    /// Target content version; `None` keeps whatever is installed.
    pub version: Option<String>,
}

impl WorkerScript {
    /// Registration identifier, e.g. `/service-worker.js?preferOnline=false&version=abc`.
    ///
    /// An unknown version is spelled `undefined`, which workers treat as "no target".
    pub fn identifier(&self) -> String {
        let version = self.version.as_deref().unwrap_or("undefined");
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("preferOnline", if self.prefer_online { "true" } else { "false" })
            .append_pair("version", version)
            .finish();
        format!("{WORKER_SCRIPT_PATH}?{query}")
    }

    /// Inverse of [`WorkerScript::identifier`].
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        let (path, query) = identifier.split_once('?')?;
        if path != WORKER_SCRIPT_PATH {
            return None;
        }
        let mut prefer_online = false;
        let mut version = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "preferOnline" => prefer_online = value == "true",
                "version" if value != "undefined" && !value.is_empty() => {
                    version = Some(value.into_owned())
                }
                _ => {}
            }
        }
        Some(Self {
            prefer_online,
            version,
        })
    }
}

/// Messages a worker posts back to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    UpdateStatus(StatusPatch),
    Pong,
    #[serde(other)]
    Unknown,
}

impl WorkerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Messages the owner posts to the active worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Drop all offline content.
    Clear,
    Ping,
}

/// Events queued for the coordinator's owner thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    Worker(WorkerMessage),
    /// A scheduled auto-update came due; stale generations are ignored.
    AutoUpdateDue { generation: u64 },
}

/// Sending half handed to a registered worker.
#[derive(Debug, Clone)]
pub struct MessageRelay {
    tx: Sender<CoordinatorEvent>,
}

impl MessageRelay {
    pub(crate) fn new(tx: Sender<CoordinatorEvent>) -> Self {
        Self { tx }
    }

    /// Queue a message. Returns `false` once the coordinator is gone.
    pub fn post(&self, message: WorkerMessage) -> bool {
        self.tx.send(CoordinatorEvent::Worker(message)).is_ok()
    }

    /// Queue a raw JSON message; undecodable payloads are dropped with a warning.
    pub fn post_json(&self, text: &str) -> bool {
        match WorkerMessage::from_json(text) {
            Ok(message) => self.post(message),
            Err(err) => {
                tracing::warn!("Dropping malformed worker message: {err}");
                false
            }
        }
    }
}

/// Errors raised by a worker host.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker registration failed: {0}")]
    Register(String),
    #[error("Worker unregistration failed: {0}")]
    Unregister(String),
    #[error("No active worker to receive {0:?}")]
    NoActiveWorker(ClientMessage),
}

/// Host environment able to run a persistent background worker.
pub trait WorkerHost {
    /// Install a worker; `relay` carries its messages back.
    fn register(
        &mut self,
        script: &WorkerScript,
        scope: &str,
        relay: MessageRelay,
    ) -> Result<(), WorkerError>;

    /// Remove the current worker. Returns whether one was registered.
    fn unregister(&mut self) -> Result<bool, WorkerError>;

    /// Whether a worker is mid-install.
    fn is_installing(&self) -> bool;

    fn post_message(&mut self, message: ClientMessage) -> Result<(), WorkerError>;
}

/// Whether the host can run background workers at all.
pub enum WorkerSupport {
    Available(Box<dyn WorkerHost>),
    Unsupported,
}

impl WorkerSupport {
    pub fn available(host: impl WorkerHost + 'static) -> Self {
        Self::Available(Box::new(host))
    }

    pub(crate) fn host(&mut self) -> Option<&mut (dyn WorkerHost + 'static)> {
        match self {
            Self::Available(host) => Some(host.as_mut()),
            Self::Unsupported => None,
        }
    }

    pub(crate) fn host_ref(&self) -> Option<&(dyn WorkerHost + 'static)> {
        match self {
            Self::Available(host) => Some(host.as_ref()),
            Self::Unsupported => None,
        }
    }
}
