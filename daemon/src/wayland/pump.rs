//! Frame pacing between the compositor and the engine.
//!
//! Two independent signals drive drawing: the compositor's frame callback
//! ("you may draw now") and the engine's new-frame wakeup ("there is
//! something new to draw"). [`FramePacing`] keeps at most one frame callback
//! outstanding per output and remembers a new frame that arrived while one
//! was pending, so a burst of decoded frames costs one render per callback.

/// What the pump should do next for one output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpAction {
    /// Draw the latest frame, request a callback and present
    Render,
    /// Request a callback and commit without drawing
    Probe,
    /// Nothing to do until the next signal
    Idle,
}

#[derive(Debug, Default)]
pub struct FramePacing {
    callback_pending: bool,
    redraw_needed: bool,
}

impl FramePacing {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine has a new frame.
    pub fn on_frame_ready(&mut self) -> PumpAction {
        if self.callback_pending {
            self.redraw_needed = true;
            return PumpAction::Idle;
        }
        PumpAction::Render
    }

    /// The compositor fired our frame callback.
    ///
    /// `held` says whether playback is paused. A paused engine produces no
    /// frames, so without a probe the surface would stop receiving callbacks
    /// and look hidden forever.
    pub fn on_frame_callback(&mut self, held: bool) -> PumpAction {
        self.callback_pending = false;
        if self.redraw_needed {
            PumpAction::Render
        } else if held {
            PumpAction::Probe
        } else {
            PumpAction::Idle
        }
    }

    /// Periodic check from the display loop.
    ///
    /// A hold can start after the last callback already fired idle, leaving
    /// nothing outstanding while the engine is paused. Probe to recover.
    pub fn on_idle_check(&self, held: bool) -> PumpAction {
        if held && !self.callback_pending {
            PumpAction::Probe
        } else {
            PumpAction::Idle
        }
    }

    /// Force the next opportunity to draw (first configure, resize).
    pub fn request_redraw(&mut self) -> PumpAction {
        self.on_frame_ready()
    }

    /// A frame was presented with a callback requested.
    pub fn rendered(&mut self) {
        self.callback_pending = true;
        self.redraw_needed = false;
    }

    /// A callback was requested without drawing.
    pub fn probed(&mut self) {
        self.callback_pending = true;
    }

    /// Drawing failed before a callback was requested.
    pub fn render_failed(&mut self) {
        self.callback_pending = false;
        self.redraw_needed = true;
    }

    pub fn callback_pending(&self) -> bool {
        self.callback_pending
    }

    pub fn redraw_needed(&self) -> bool {
        self.redraw_needed
    }
}
