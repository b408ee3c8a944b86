//! Per-scope registration: worker slots, clients and the update handoff

use crate::config::Config;
use crate::engine::{Engine, EngineDeps, InstallReport};
use crate::error::{HavenError, HavenResult};
use crate::http::{Request, Response};
use crate::lifecycle::{ControlMessage, LifecycleState};
use crate::manifest::WebAppManifest;
use crate::report::EventKind;
use crate::signal::StatusBridge;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Notification sent to a client whose controlling worker changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerChange {
    pub client: Uuid,
    pub worker: Uuid,
    pub version: String,
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<Engine>>,
    waiting: Option<Arc<Engine>>,
    active: Option<Arc<Engine>>,
}

pub struct Registration {
    scope: Url,
    deps: EngineDeps,
    slots: Mutex<Slots>,
    /// Client id -> controlling worker
    clients: Mutex<HashMap<Uuid, Option<Arc<Engine>>>>,
    transitions: tokio::sync::Mutex<()>,
    bridge: StatusBridge,
    messages: Mutex<Option<mpsc::UnboundedReceiver<ControlMessage>>>,
    controller_changes: broadcast::Sender<ControllerChange>,
}

impl Registration {
    pub fn new(scope: Url, deps: EngineDeps) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (controller_changes, _) = broadcast::channel(64);
        let bridge = StatusBridge::new(true, tx, deps.reporter.clone());

        Arc::new(Self {
            scope,
            deps,
            slots: Mutex::default(),
            clients: Mutex::default(),
            transitions: tokio::sync::Mutex::new(()),
            bridge,
            messages: Mutex::new(Some(rx)),
            controller_changes,
        })
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn bridge(&self) -> &StatusBridge {
        &self.bridge
    }

    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    /// Build a worker for this scope sharing the registration's store and network
    pub fn create_worker(
        &self,
        config: &Config,
        manifest: Option<&WebAppManifest>,
    ) -> HavenResult<Arc<Engine>> {
        let engine = Engine::new(config, manifest, self.deps.clone())?;
        if engine.scope() != &self.scope {
            return Err(HavenError::ScopeInvalid {
                scope: engine.scope().to_string(),
                reason: format!("registration scope is {}", self.scope),
            });
        }
        Ok(Arc::new(engine))
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clients(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Option<Arc<Engine>>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn installing(&self) -> Option<Arc<Engine>> {
        self.slots().installing.clone()
    }

    pub fn waiting(&self) -> Option<Arc<Engine>> {
        self.slots().waiting.clone()
    }

    pub fn active(&self) -> Option<Arc<Engine>> {
        self.slots().active.clone()
    }

    /// Install a worker, then activate it or park it as waiting
    ///
    /// The first worker of a scope activates at once. Later workers wait
    /// for a skip-waiting request unless configured to skip waiting.
    pub async fn register(&self, worker: Arc<Engine>) -> HavenResult<InstallReport> {
        let _transition = self.transitions.lock().await;

        self.slots().installing = Some(worker.clone());
        let installed = worker.install().await;
        self.slots().installing = None;
        let report = installed?;

        if self.active().is_none() || worker.skip_waiting() {
            self.promote(worker).await?;
            return Ok(report);
        }

        let replaced = self.slots().waiting.replace(worker.clone());
        if let Some(old) = replaced {
            info!(version = old.version(), "Replacing waiting worker");
            old.mark_redundant();
        }
        if self.bridge.set_update_available(true) {
            self.deps
                .reporter
                .record(
                    EventKind::UpdateAvailable,
                    serde_json::json!({ "version": worker.version() }),
                )
                .await;
        }
        Ok(report)
    }

    /// Hand control to the waiting worker
    pub async fn activate_waiting(&self) -> HavenResult<()> {
        let _transition = self.transitions.lock().await;
        let worker = self
            .slots()
            .waiting
            .take()
            .ok_or(HavenError::NoWaitingWorker)?;
        self.promote(worker).await
    }

    /// Caller holds `transitions`
    ///
    /// The previous worker is retired before the purge starts, so at most one
    /// worker is ever active and its late cache writes are dropped.
    async fn promote(&self, worker: Arc<Engine>) -> HavenResult<()> {
        if worker.state().is_terminal() {
            return Err(HavenError::InvalidTransition {
                version: worker.version().to_string(),
                from: worker.state().to_string(),
                to: LifecycleState::Activating.to_string(),
            });
        }

        let previous = {
            let mut slots = self.slots();
            let previous = slots.active.take();
            if let Some(previous) = &previous {
                previous.mark_redundant();
            }
            previous
        };

        worker.activate().await?;
        self.slots().active = Some(worker.clone());
        self.bridge.set_update_available(false);

        if let Some(previous) = previous {
            self.deps
                .reporter
                .record(
                    EventKind::UpdateActivated,
                    serde_json::json!({
                        "from": previous.version(),
                        "to": worker.version(),
                    }),
                )
                .await;

            let moved: Vec<Uuid> = {
                let mut clients = self.clients();
                clients
                    .iter_mut()
                    .filter(|(_, controller)| {
                        controller.as_ref().is_some_and(|c| c.id() == previous.id())
                    })
                    .map(|(id, controller)| {
                        *controller = Some(worker.clone());
                        *id
                    })
                    .collect()
            };
            for client in moved {
                self.notify(client, &worker).await;
            }
        }

        if worker.clients_claim() {
            self.claim_for(&worker).await;
        }
        Ok(())
    }

    /// Put every client not controlled by the active worker under its control
    pub async fn claim(&self) -> usize {
        match self.active() {
            Some(active) => self.claim_for(&active).await,
            None => {
                debug!("No active worker to claim clients");
                0
            }
        }
    }

    async fn claim_for(&self, worker: &Arc<Engine>) -> usize {
        let claimed: Vec<Uuid> = {
            let mut clients = self.clients();
            clients
                .iter_mut()
                .filter(|(_, controller)| {
                    controller.as_ref().map(|c| c.id()) != Some(worker.id())
                })
                .map(|(id, controller)| {
                    *controller = Some(worker.clone());
                    *id
                })
                .collect()
        };
        for client in &claimed {
            self.notify(*client, worker).await;
        }
        claimed.len()
    }

    async fn notify(&self, client: Uuid, worker: &Engine) {
        // Nobody listening is fine
        let _ = self.controller_changes.send(ControllerChange {
            client,
            worker: worker.id(),
            version: worker.version().to_string(),
        });
        self.deps
            .reporter
            .record(
                EventKind::ControllerChanged,
                serde_json::json!({ "client": client, "version": worker.version() }),
            )
            .await;
    }

    /// Open a new client; it starts under the active worker, if any
    pub fn connect_client(&self) -> Uuid {
        let id = Uuid::new_v4();
        let controller = self.active();
        self.clients().insert(id, controller);
        id
    }

    pub fn disconnect_client(&self, client: Uuid) {
        self.clients().remove(&client);
    }

    pub fn controller(&self, client: Uuid) -> Option<Arc<Engine>> {
        self.clients().get(&client).cloned().flatten()
    }

    /// Issue a request from a client; uncontrolled clients hit the network directly
    pub async fn fetch(&self, client: Uuid, request: &Request) -> HavenResult<Response> {
        match self.controller(client) {
            Some(worker) => worker.handle_fetch(request).await,
            None => self.deps.network.fetch(request).await,
        }
    }

    pub fn subscribe_controller_changes(&self) -> broadcast::Receiver<ControllerChange> {
        self.controller_changes.subscribe()
    }

    /// Handle a control message posted by the application
    pub async fn post_message(&self, message: ControlMessage) -> HavenResult<()> {
        debug!(?message, "Control message");
        match message {
            ControlMessage::SkipWaiting => match self.activate_waiting().await {
                Err(HavenError::NoWaitingWorker) => {
                    debug!("SKIP_WAITING with no waiting worker");
                    Ok(())
                }
                other => other,
            },
            ControlMessage::ClientsClaim => {
                self.claim().await;
                Ok(())
            }
        }
    }

    /// Handle a raw JSON message; unknown message types are ignored
    pub async fn post_json(&self, value: &serde_json::Value) -> HavenResult<()> {
        match ControlMessage::from_value(value) {
            Some(message) => self.post_message(message).await,
            None => Ok(()),
        }
    }

    /// Start processing messages queued through the status bridge
    ///
    /// Returns `None` if the pump is already running.
    pub fn start_message_pump(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self
            .messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let registration = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(registration) = registration.upgrade() else {
                    break;
                };
                if let Err(e) = registration.post_message(message).await {
                    warn!(?message, "Control message failed: {}", e);
                }
            }
        }))
    }
}
