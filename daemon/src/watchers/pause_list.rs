use common::census::ProcessCensus;
use common::watchlist::WatchList;

use super::{CensusPoll, WatchContext, interval};
use crate::playback::HoldReason;

/// Hold playback while any program from `list` is running.
///
/// Holds at most once no matter how many listed programs run or how many
/// polls see them.
pub async fn run(mut ctx: WatchContext, list: WatchList, census: Box<dyn ProcessCensus>) {
    log::info!("Watching {} program(s) from the pause list", list.len());
    let mut census = CensusPoll::new(census, &list);
    let mut ticks = interval(ctx.timing.process_poll);

    while ctx.tick(&mut ticks).await {
        let running = census.find_running().await;
        let holding = ctx.control.is_held_for(HoldReason::PauseList);

        match running {
            Some(name) if !holding => {
                log::info!("'{}' is running, pausing playback", name);
                ctx.apply(ctx.control.hold(HoldReason::PauseList));
            }
            None if holding => {
                log::info!("No program from the pause list is running, releasing pause");
                ctx.apply(ctx.control.release(HoldReason::PauseList));
            }
            _ => {}
        }
    }

    log::debug!("Pause-list watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackControl;
    use crate::watchers::testing::{FakeCensus, FakeEngine};
    use crate::watchers::{WatcherSupervisor, WatcherTiming};
    use std::sync::Arc;
    use std::time::Duration;

    const POLL: Duration = Duration::from_secs(1);

    fn start(
        census: &FakeCensus,
    ) -> (WatcherSupervisor, Arc<PlaybackControl>, Arc<FakeEngine>) {
        let control = Arc::new(PlaybackControl::new());
        let engine = Arc::new(FakeEngine::new());
        let (mut supervisor, _rx) = WatcherSupervisor::new(
            Arc::clone(&control),
            engine.clone(),
            WatcherTiming::default(),
        );

        let census: Box<dyn ProcessCensus> = Box::new(census.clone());
        let list = WatchList::parse("steam obs");
        supervisor.spawn("pause-list", move |ctx| run(ctx, list, census));
        (supervisor, control, engine)
    }

    #[tokio::test(start_paused = true)]
    async fn test_holds_once_while_running() {
        let census = FakeCensus::new();
        census.start("steam");
        let (supervisor, control, engine) = start(&census);

        tokio::time::sleep(POLL * 5 + POLL / 2).await;
        assert!(census.polls() >= 5);
        assert_eq!(control.pause_count(), 1);
        assert_eq!(engine.pause_calls(), 1);

        // A second listed program does not add a second hold
        census.start("obs");
        tokio::time::sleep(POLL * 2).await;
        assert_eq!(control.pause_count(), 1);
        assert_eq!(engine.pause_calls(), 1);

        supervisor.shutdown(POLL).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_releases_when_last_program_exits() {
        let census = FakeCensus::new();
        census.start("steam");
        census.start("obs");
        let (supervisor, control, engine) = start(&census);

        tokio::time::sleep(POLL / 2).await;
        assert!(control.is_held_for(HoldReason::PauseList));

        census.stop("steam");
        tokio::time::sleep(POLL).await;
        assert!(control.is_held());
        assert_eq!(engine.resume_calls(), 0);

        census.stop("obs");
        tokio::time::sleep(POLL).await;
        assert!(!control.is_held());
        assert_eq!(engine.resume_calls(), 1);

        supervisor.shutdown(POLL).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_keeps_other_holds() {
        let census = FakeCensus::new();
        census.start("steam");
        let (supervisor, control, engine) = start(&census);

        tokio::time::sleep(POLL / 2).await;
        control.hold(HoldReason::AutoPause);

        census.stop("steam");
        tokio::time::sleep(POLL).await;
        assert_eq!(control.pause_count(), 1);
        assert!(control.is_held_for(HoldReason::AutoPause));
        assert_eq!(engine.resume_calls(), 0);

        supervisor.shutdown(POLL).await;
    }
}
