//! Worker lifecycle
//!
//! ```text
//! installing -> installed -> activating -> active
//!      \            \             \          \
//!       +------------+-------------+----------+--> redundant
//! ```
//!
//! A [`Registration`] holds the installing, waiting and active workers of
//! one scope and moves clients between them.

mod registration;
mod state;

pub use registration::{ControllerChange, Registration};
pub use state::{ControlMessage, LifecycleState};

/// Application-side guard: reload at most once per update cycle
///
/// A page creates one guard when it loads. The first controller change asks
/// for a reload; later changes in the same page lifetime are ignored, so a
/// burst of notifications cannot cause a reload loop.
#[derive(Debug, Default)]
pub struct ReloadGuard {
    reloading: bool,
}

impl ReloadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the page should reload now
    pub fn on_controller_change(&mut self) -> bool {
        if self.reloading {
            return false;
        }
        self.reloading = true;
        true
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading
    }
}
