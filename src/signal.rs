//! Online/offline and update-availability signals
//!
//! The application observes both signals read-only. Its only way back into
//! the engine is [`StatusBridge::request_skip_waiting`], which queues a
//! control message for the registration's message pump.

use crate::error::{HavenError, HavenResult};
use crate::lifecycle::ControlMessage;
use crate::report::{EventKind, Reporter};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Connectivity change reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    Online,
    Offline,
}

pub struct StatusBridge {
    online: watch::Sender<bool>,
    update_available: watch::Sender<bool>,
    control: mpsc::UnboundedSender<ControlMessage>,
    reporter: Arc<Reporter>,
}

impl StatusBridge {
    pub fn new(
        online: bool,
        control: mpsc::UnboundedSender<ControlMessage>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            online: watch::Sender::new(online),
            update_available: watch::Sender::new(false),
            control,
            reporter,
        }
    }

    /// Feed a platform connectivity event; only real transitions are recorded
    pub async fn platform_event(&self, event: PlatformEvent) {
        let online = event == PlatformEvent::Online;
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if !changed {
            debug!(?event, "Connectivity unchanged");
            return;
        }
        let kind = if online {
            EventKind::OnlineMode
        } else {
            EventKind::OfflineMode
        };
        self.reporter.record(kind, serde_json::json!({})).await;
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn update_available(&self) -> bool {
        *self.update_available.borrow()
    }

    /// Receiver that starts at the current connectivity
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn subscribe_update(&self) -> watch::Receiver<bool> {
        self.update_available.subscribe()
    }

    /// Returns whether the value changed
    pub(crate) fn set_update_available(&self, available: bool) -> bool {
        self.update_available.send_if_modified(|current| {
            if *current == available {
                return false;
            }
            *current = available;
            true
        })
    }

    /// Ask the waiting worker to take over; handled asynchronously
    pub async fn request_skip_waiting(&self) -> HavenResult<()> {
        self.reporter
            .record(EventKind::SkipWaitingRequested, serde_json::json!({}))
            .await;
        self.control
            .send(ControlMessage::SkipWaiting)
            .map_err(|_| HavenError::Internal("registration message pump has stopped".to_string()))
    }
}
