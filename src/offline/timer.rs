use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use super::worker::CoordinatorEvent;

/// One-shot timer that queues [`CoordinatorEvent::AutoUpdateDue`].
///
/// Dropping the handle cancels it; the sleeping thread wakes and exits.
#[derive(Debug)]
pub(crate) struct AutoUpdateTimer {
    generation: u64,
    _cancel: Sender<()>,
}

impl AutoUpdateTimer {
    pub(crate) fn schedule(
        delay: Duration,
        generation: u64,
        events: Sender<CoordinatorEvent>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("docsite-auto-update".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(delay) {
                    let _ = events.send(CoordinatorEvent::AutoUpdateDue { generation });
                }
            });
        if let Err(err) = spawned {
            tracing::warn!("Auto-update timer not started: {err}");
        }
        Self {
            generation,
            _cancel: cancel_tx,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}
