use super::{WatchContext, interval};
use crate::engine::{Advance, EngineEvent};

/// Poll the engine for events and act on them.
pub async fn run(mut ctx: WatchContext) {
    let mut ticks = interval(ctx.timing.liveness_check);

    while ctx.tick(&mut ticks).await {
        for event in ctx.engine.poll_events() {
            if !handle(&ctx, event) {
                return;
            }
        }
    }

    log::debug!("Engine-event watcher stopped");
}

/// Returns `false` once the process is on its way out.
fn handle(ctx: &WatchContext, event: EngineEvent) -> bool {
    log::debug!("Engine event: {:?}", event);

    match event {
        EngineEvent::Paused => ctx.control.engine_paused(),
        EngineEvent::Unpaused => ctx.control.engine_unpaused(),
        EngineEvent::EndOfStream => return advance(ctx),
        EngineEvent::Error(message) => {
            log::warn!("Playback error, skipping to the next entry: {}", message);
            return advance(ctx);
        }
        EngineEvent::Shutdown => {
            log::info!("Engine shut down, exiting");
            ctx.request_exit();
            return false;
        }
    }
    true
}

fn advance(ctx: &WatchContext) -> bool {
    match ctx.engine.advance() {
        Ok(Advance::Continue) => true,
        Ok(Advance::Finished) => {
            log::info!("Playlist finished, exiting");
            ctx.request_exit();
            false
        }
        Err(e) => {
            log::error!("Failed to load the next entry: {:#}", e);
            ctx.request_exit();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MediaEngine;
    use crate::playback::{HoldReason, PlaybackControl};
    use crate::watchers::testing::FakeEngine;
    use crate::watchers::{Lifecycle, WatcherSupervisor, WatcherTiming};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TICK: Duration = Duration::from_millis(50);

    fn start() -> (
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
        supervisor.spawn("engine-event", run);
        (supervisor, rx, control, engine)
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_pause_is_accounted() {
        let (supervisor, _rx, control, engine) = start();

        engine.toggle_pause().unwrap();
        tokio::time::sleep(TICK * 2).await;
        assert!(control.is_held_for(HoldReason::User));
        assert_eq!(control.pause_count(), 1);

        engine.toggle_pause().unwrap();
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(control.pause_count(), 0);

        supervisor.shutdown(TICK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_pause_during_watcher_hold_adds_nothing() {
        let (supervisor, _rx, control, engine) = start();
        control.hold(HoldReason::PauseList);
        engine.pause().unwrap();

        engine.push_event(EngineEvent::Paused);
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(control.pause_count(), 1);
        assert!(!control.is_held_for(HoldReason::User));

        // Unpausing by hand leaves the watcher's hold registered
        engine.push_event(EngineEvent::Unpaused);
        tokio::time::sleep(TICK * 2).await;
        assert!(control.is_held_for(HoldReason::PauseList));

        supervisor.shutdown(TICK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_stream_advances() {
        let (supervisor, mut rx, _control, engine) = start();

        engine.push_event(EngineEvent::EndOfStream);
        engine.push_event(EngineEvent::Error("bad file".into()));
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(engine.advance_calls(), 2);
        assert!(rx.try_recv().is_err());

        supervisor.shutdown(TICK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_playlist_exits() {
        let (supervisor, mut rx, _control, engine) = start();

        engine.script_advance(Advance::Finished);
        engine.push_event(EngineEvent::EndOfStream);
        assert_eq!(rx.recv().await, Some(Lifecycle::Exit));

        // The watcher is done; later events stay queued
        engine.push_event(EngineEvent::EndOfStream);
        tokio::time::sleep(TICK * 4).await;
        assert_eq!(engine.advance_calls(), 1);

        supervisor.shutdown(TICK).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_event_exits() {
        let (supervisor, mut rx, _control, engine) = start();

        engine.push_event(EngineEvent::Shutdown);
        assert_eq!(rx.recv().await, Some(Lifecycle::Exit));

        supervisor.shutdown(TICK).await;
    }
}
