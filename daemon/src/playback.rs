//! Shared playback-control state.
//!
//! Every watcher and the render pump talk to one [`PlaybackControl`]. Pause
//! requests are holds keyed by reason: the engine is paused while at least one
//! hold exists and resumed when the last one goes away, so overlapping reasons
//! can be released in any order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Why playback is being held paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HoldReason {
    /// A program from the pause list is running.
    PauseList,
    /// The surface stopped receiving frame callbacks.
    AutoPause,
    /// The user paused the engine directly.
    User,
}

/// Effect of a hold or release on the overall decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldChange {
    /// The count went from zero to one: pause the engine.
    Engaged,
    /// The count went to zero: resume the engine.
    Released,
    /// The decision did not change.
    Unchanged,
}

pub struct PlaybackControl {
    holds: Mutex<BTreeSet<HoldReason>>,
    frame_delivered: AtomicBool,
    terminate: AtomicBool,
    stopping: AtomicBool,
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            holds: Mutex::new(BTreeSet::new()),
            frame_delivered: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    fn holds(&self) -> MutexGuard<'_, BTreeSet<HoldReason>> {
        self.holds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a hold. Holding the same reason twice counts once.
    pub fn hold(&self, reason: HoldReason) -> HoldChange {
        let mut holds = self.holds();
        let was_empty = holds.is_empty();
        if !holds.insert(reason) {
            return HoldChange::Unchanged;
        }
        log::debug!("Pause hold {:?} engaged (count {})", reason, holds.len());
        if was_empty {
            HoldChange::Engaged
        } else {
            HoldChange::Unchanged
        }
    }

    /// Drop a hold. Releasing a reason that is not held leaves the count alone.
    pub fn release(&self, reason: HoldReason) -> HoldChange {
        let mut holds = self.holds();
        if !holds.remove(&reason) {
            log::warn!(
                "Unpaired release of pause hold {:?} ignored (count {})",
                reason,
                holds.len()
            );
            return HoldChange::Unchanged;
        }
        log::debug!("Pause hold {:?} released (count {})", reason, holds.len());
        if holds.is_empty() {
            HoldChange::Released
        } else {
            HoldChange::Unchanged
        }
    }

    /// The engine reports it paused. Account for it if nobody here asked.
    pub fn engine_paused(&self) {
        let mut holds = self.holds();
        if holds.is_empty() {
            holds.insert(HoldReason::User);
            log::info!("Playback paused by the user");
        }
    }

    /// The engine reports it resumed.
    ///
    /// A user-only hold is cleared. Watcher holds stay registered but are not
    /// re-applied, so the user's choice wins until they are released.
    pub fn engine_unpaused(&self) {
        let mut holds = self.holds();
        if holds.remove(&HoldReason::User) {
            log::info!("Playback resumed by the user");
        }
        if !holds.is_empty() {
            log::debug!(
                "Engine resumed while {} watcher hold(s) remain",
                holds.len()
            );
        }
    }

    pub fn pause_count(&self) -> usize {
        self.holds().len()
    }

    pub fn is_held(&self) -> bool {
        !self.holds().is_empty()
    }

    pub fn is_held_for(&self, reason: HoldReason) -> bool {
        self.holds().contains(&reason)
    }

    /// Called by the pump on every frame callback.
    pub fn mark_frame_delivered(&self) {
        self.frame_delivered.store(true, Ordering::Release);
    }

    /// Called by the visibility watchers at the start of a grace window.
    pub fn clear_liveness(&self) {
        self.frame_delivered.store(false, Ordering::Release);
    }

    pub fn frame_delivered(&self) -> bool {
        self.frame_delivered.load(Ordering::Acquire)
    }

    /// Ask the render loop to exit.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Claim the stop-and-revive sequence. Only the first caller gets `true`.
    pub fn begin_stop(&self) -> bool {
        self.stopping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}
