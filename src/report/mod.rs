//! Analytics and error reporting
//!
//! Lifecycle and network-transition events are logged, kept in memory and
//! optionally appended to a JSON-lines journal. Errors the engine recovers
//! from locally all pass through [`Reporter::report_error`].

pub mod health;

use crate::error::HavenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Analytics event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Installed,
    Activated,
    UpdateAvailable,
    UpdateActivated,
    ControllerChanged,
    CachePurged,
    OfflineMode,
    OnlineMode,
    SkipWaitingRequested,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Activated => "activated",
            Self::UpdateAvailable => "update_available",
            Self::UpdateActivated => "update_activated",
            Self::ControllerChanged => "controller_changed",
            Self::CachePurged => "cache_purged",
            Self::OfflineMode => "offline_mode",
            Self::OnlineMode => "online_mode",
            Self::SkipWaitingRequested => "skip_waiting_requested",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analytics record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Where a swallowed error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorContext {
    CacheRead,
    CacheWrite,
    BackgroundRefresh,
    NetworkFallback,
    Precache,
    Purge,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CacheRead => "cache-read",
            Self::CacheWrite => "cache-write",
            Self::BackgroundRefresh => "background-refresh",
            Self::NetworkFallback => "network-fallback",
            Self::Precache => "precache",
            Self::Purge => "purge",
        };
        f.write_str(label)
    }
}

/// Append-only JSON-lines journal of events
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event; IO failures are logged and dropped
    pub async fn append(&self, event: &Event) {
        let mut line = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.write_line(&line).await {
            warn!("Failed to write event log {}: {}", self.path.display(), e);
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Event recorder and error sink shared by every engine component
#[derive(Default)]
pub struct Reporter {
    events: Mutex<Vec<Event>>,
    errors: Mutex<HashMap<ErrorContext, u64>>,
    journal: Option<EventLog>,
}

impl Reporter {
    /// In-memory reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter that also appends every event to a journal
    pub fn with_journal(journal: EventLog) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// Record an analytics event
    pub async fn record(&self, kind: EventKind, data: serde_json::Value) {
        info!(event = %kind, data = %data, "Recorded event");

        let event = Event {
            kind,
            timestamp: Utc::now(),
            data,
        };
        if let Some(journal) = &self.journal {
            journal.append(&event).await;
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    /// Log a recovered error and count it against its context
    pub fn report_error(&self, context: ErrorContext, error: &HavenError) {
        warn!(context = %context, "{}", error);
        *self
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(context)
            .or_default() += 1;
    }

    pub fn error_count(&self, context: ErrorContext) -> u64 {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&context)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_errors(&self) -> u64 {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    /// All recorded events, oldest first
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many events of one kind were recorded
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}
