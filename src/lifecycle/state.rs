//! Worker lifecycle states and control messages

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lifecycle state of one worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Active)
                | (Installing | Installed | Activating | Active, Redundant)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Redundant
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message posted by the application to the registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    ClientsClaim,
}

impl ControlMessage {
    /// Decode a posted message; anything unrecognised is ignored
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value.clone()) {
            Ok(message) => Some(message),
            Err(_) => {
                debug!(message = %value, "Ignoring unknown control message");
                None
            }
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        Self::from_value(&value)
    }
}
