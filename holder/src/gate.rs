//! Decides when the holder may revive the player.
//!
//! The stop list must be clear. With auto-stop on, the output must also be
//! on screen *after* the list cleared: two frame callbacks that arrive less
//! than [`FRESH_FRAME_MS`] apart. Frames seen while the list was blocked do
//! not count.

/// Maximum distance between two frame callbacks of a visible surface
pub const FRESH_FRAME_MS: u32 = 1000;

#[derive(Debug)]
pub struct RevivalGate {
    needs_visibility: bool,
    stop_list_clear: bool,
    /// Compositor timestamp of the previous frame since the list cleared
    last_frame: Option<u32>,
    ready: bool,
}

impl RevivalGate {
    pub fn new(needs_visibility: bool, stop_list_clear: bool) -> Self {
        Self {
            needs_visibility,
            stop_list_clear,
            last_frame: None,
            ready: stop_list_clear && !needs_visibility,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn stop_list_clear(&self) -> bool {
        self.stop_list_clear
    }

    /// Latest stop-list poll. Returns `true` when surfaces should ask for a
    /// frame to prove they are visible.
    pub fn on_stop_list(&mut self, clear: bool) -> bool {
        let cleared = clear && !self.stop_list_clear;
        self.stop_list_clear = clear;

        if !clear {
            self.last_frame = None;
            return false;
        }
        if !self.needs_visibility {
            self.ready = true;
            return false;
        }
        if cleared {
            log::info!("Stop list is clear, checking that the output is visible");
            self.last_frame = None;
        }
        cleared && !self.ready
    }

    /// A frame callback with the compositor's millisecond timestamp.
    /// Returns `true` if the surface should ask for another one.
    pub fn on_frame(&mut self, time_ms: u32) -> bool {
        if self.ready || !self.needs_visibility {
            return false;
        }
        if !self.stop_list_clear {
            self.last_frame = None;
            return false;
        }

        match self.last_frame {
            Some(previous) if time_ms.wrapping_sub(previous) < FRESH_FRAME_MS => {
                let gap = time_ms.wrapping_sub(previous);
                log::debug!("Frames {} ms apart, output is visible", gap);
                self.ready = true;
                false
            }
            _ => {
                self.last_frame = Some(time_ms);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_auto_stop_only_the_stop_list_matters() {
        let mut gate = RevivalGate::new(false, false);
        assert!(!gate.is_ready());
        assert!(!gate.on_frame(10));
        assert!(!gate.is_ready());

        assert!(!gate.on_stop_list(true));
        assert!(gate.is_ready());

        assert!(RevivalGate::new(false, true).is_ready());
    }

    #[test]
    fn test_consecutive_frames_prove_visibility() {
        let mut gate = RevivalGate::new(true, true);
        assert!(!gate.is_ready());

        assert!(gate.on_frame(5_000));
        assert!(!gate.is_ready());
        assert!(!gate.on_frame(5_016));
        assert!(gate.is_ready());
    }

    #[test]
    fn test_slow_frames_restart_the_window() {
        let mut gate = RevivalGate::new(true, true);
        assert!(gate.on_frame(0));
        assert!(gate.on_frame(1_500));
        assert!(gate.on_frame(3_000));
        assert!(!gate.is_ready());

        gate.on_frame(3_999);
        assert!(gate.is_ready());
    }

    #[test]
    fn test_visibility_before_the_list_clears_does_not_count() {
        let mut gate = RevivalGate::new(true, false);

        // Visible while a listed program runs
        assert!(!gate.on_frame(100));
        assert!(!gate.on_frame(116));
        assert!(!gate.is_ready());

        // The list clears: a fresh pair of frames is required
        assert!(gate.on_stop_list(true));
        assert!(!gate.is_ready());
        assert!(gate.on_frame(9_000));
        assert!(!gate.is_ready());
        gate.on_frame(9_016);
        assert!(gate.is_ready());
    }

    #[test]
    fn test_list_blocking_again_drops_the_first_frame() {
        let mut gate = RevivalGate::new(true, true);
        assert!(gate.on_frame(100));

        assert!(!gate.on_stop_list(false));
        assert!(gate.on_stop_list(true));
        // 116 would have been fresh against 100
        assert!(gate.on_frame(116));
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_repeated_clear_polls_request_one_check() {
        let mut gate = RevivalGate::new(true, false);
        assert!(gate.on_stop_list(true));
        assert!(!gate.on_stop_list(true));
        assert!(gate.stop_list_clear());
    }

    #[test]
    fn test_timestamp_wraparound() {
        let mut gate = RevivalGate::new(true, true);
        gate.on_frame(u32::MAX - 10);
        gate.on_frame(5);
        assert!(gate.is_ready());
    }
}
