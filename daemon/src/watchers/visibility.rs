use tokio::time::Instant;

use super::WatchContext;
use crate::playback::HoldReason;

/// What to do once the surface is presumed hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityAction {
    Pause,
    Stop,
}

/// Watch frame-callback liveness and pause or stop while it is missing.
pub async fn run(mut ctx: WatchContext, action: VisibilityAction) {
    log::info!(
        "Visibility watcher started ({:?} after {:?} without frames)",
        action,
        ctx.timing.visibility_grace
    );

    while let Some(visible) = watch_window(&mut ctx).await {
        match action {
            VisibilityAction::Pause => {
                let own_hold = ctx.control.is_held_for(HoldReason::AutoPause);
                if !visible && !ctx.control.is_held() {
                    log::info!("Surface appears hidden, pausing playback");
                    ctx.apply(ctx.control.hold(HoldReason::AutoPause));
                } else if visible && own_hold {
                    log::info!("Surface is visible again, releasing pause");
                    ctx.apply(ctx.control.release(HoldReason::AutoPause));
                }
            }
            VisibilityAction::Stop => {
                if !visible {
                    ctx.request_stop("surface is hidden".into());
                    return;
                }
            }
        }
    }

    log::debug!("Visibility watcher stopped");
}

/// Clear the liveness flag and watch it for one grace window.
///
/// Returns `Some(true)` as soon as a frame callback lands, `Some(false)` if
/// none did within the window and `None` on shutdown.
async fn watch_window(ctx: &mut WatchContext) -> Option<bool> {
    ctx.control.clear_liveness();
    let deadline = Instant::now() + ctx.timing.visibility_grace;

    while Instant::now() < deadline {
        if !ctx.sleep(ctx.timing.liveness_check).await {
            return None;
        }
        if ctx.control.frame_delivered() {
            return Some(true);
        }
    }
    Some(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackControl;
    use crate::watchers::testing::FakeEngine;
    use crate::watchers::{Lifecycle, WatcherSupervisor, WatcherTiming};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const GRACE: Duration = Duration::from_secs(2);
    const CHECK: Duration = Duration::from_millis(50);

    fn start(
        action: VisibilityAction,
    ) -> (
        WatcherSupervisor,
        mpsc::UnboundedReceiver<Lifecycle>,
        Arc<PlaybackControl>,
        Arc<FakeEngine>,
    ) {
        let control = Arc::new(PlaybackControl::new());
        let engine = Arc::new(FakeEngine::new());
        let (mut supervisor, rx) = WatcherSupervisor::new(
            Arc::clone(&control),
            engine.clone(),
            WatcherTiming::default(),
        );
        supervisor.spawn("visibility", move |ctx| run(ctx, action));
        (supervisor, rx, control, engine)
    }

    /// Stand-in for the render pump: deliver a callback every `period`
    fn pump(control: &Arc<PlaybackControl>, period: Duration) -> tokio::task::JoinHandle<()> {
        let control = Arc::clone(control);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                control.mark_frame_delivered();
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_surface_is_never_paused() {
        let (supervisor, _rx, control, engine) = start(VisibilityAction::Pause);
        let pump = pump(&control, Duration::from_millis(16));

        tokio::time::sleep(GRACE * 10).await;
        assert!(!control.is_held());
        assert_eq!(engine.pause_calls(), 0);

        pump.abort();
        supervisor.shutdown(CHECK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_surface_pauses_then_resumes() {
        let (supervisor, _rx, control, engine) = start(VisibilityAction::Pause);

        tokio::time::sleep(GRACE + CHECK * 2).await;
        assert!(control.is_held_for(HoldReason::AutoPause));
        assert_eq!(engine.pause_calls(), 1);

        // Still hidden: no second hold
        tokio::time::sleep(GRACE * 3).await;
        assert_eq!(control.pause_count(), 1);
        assert_eq!(engine.pause_calls(), 1);

        let pump = pump(&control, Duration::from_millis(16));
        tokio::time::sleep(GRACE + CHECK * 2).await;
        assert!(!control.is_held());
        assert_eq!(engine.resume_calls(), 1);

        pump.abort();
        supervisor.shutdown(CHECK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_hold_blocks_auto_pause() {
        let (supervisor, _rx, control, engine) = start(VisibilityAction::Pause);
        control.hold(HoldReason::PauseList);

        tokio::time::sleep(GRACE * 3).await;
        assert!(!control.is_held_for(HoldReason::AutoPause));
        assert_eq!(control.pause_count(), 1);
        assert_eq!(engine.pause_calls(), 0);

        supervisor.shutdown(CHECK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_callbacks_within_grace_keep_playing() {
        let (supervisor, _rx, control, _engine) = start(VisibilityAction::Pause);
        let pump = pump(&control, GRACE / 2);

        tokio::time::sleep(GRACE * 6).await;
        assert!(!control.is_held());

        pump.abort();
        supervisor.shutdown(CHECK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_surface_triggers_stop_once() {
        let (supervisor, mut rx, control, _engine) = start(VisibilityAction::Stop);

        tokio::time::sleep(GRACE + CHECK * 2).await;
        assert_eq!(
            rx.recv().await,
            Some(Lifecycle::Stop("surface is hidden".into()))
        );
        assert!(control.is_stopping());
        assert!(!control.is_held());

        tokio::time::sleep(GRACE * 3).await;
        assert!(rx.try_recv().is_err());

        supervisor.shutdown(CHECK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_surface_never_stops() {
        let (supervisor, mut rx, control, _engine) = start(VisibilityAction::Stop);
        let pump = pump(&control, Duration::from_millis(16));

        tokio::time::sleep(GRACE * 5).await;
        assert!(rx.try_recv().is_err());
        assert!(!control.is_stopping());

        pump.abort();
        supervisor.shutdown(CHECK).await;
    }
}
