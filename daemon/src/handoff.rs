//! Stop-and-revive: hand the process over to the holder and come back later
//! at the same position.

use anyhow::{Context, Result};
use common::handoff::{HandoffEnvelope, ProcessReplacer, locate_binary};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::MediaEngine;
use crate::playback::PlaybackControl;
use crate::wayland::DisplayThread;
use crate::watchers::WatcherSupervisor;

pub struct HandoffController {
    engine: Arc<dyn MediaEngine>,
    control: Arc<PlaybackControl>,
    /// Arguments as received, without the program name
    args: Vec<String>,
    holder_override: Option<PathBuf>,
    replacer: Box<dyn ProcessReplacer>,
    shutdown_wait: Duration,
}

impl HandoffController {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        control: Arc<PlaybackControl>,
        args: Vec<String>,
        replacer: Box<dyn ProcessReplacer>,
    ) -> Self {
        Self {
            engine,
            control,
            args,
            holder_override: None,
            replacer,
            shutdown_wait: Duration::from_millis(100),
        }
    }

    pub fn with_holder(mut self, path: Option<PathBuf>) -> Self {
        self.holder_override = path;
        self
    }

    pub fn with_shutdown_wait(mut self, wait: Duration) -> Self {
        self.shutdown_wait = wait;
        self
    }

    /// Capture the position, tear everything down and exec the holder.
    ///
    /// Only returns if the replacement failed.
    pub async fn stop_and_revive(
        self,
        supervisor: WatcherSupervisor,
        display: DisplayThread,
    ) -> Result<Infallible> {
        let token = self.engine.position();
        let envelope = HandoffEnvelope::new(self.args.clone(), token);
        log::info!(
            "Handing off at entry {} / {:.3}s",
            token.index(),
            token.offset().as_secs_f64()
        );

        let holder = locate_binary(common::HOLDER_BINARY, self.holder_override.as_deref());
        self.teardown(supervisor, Some(display)).await;

        let holder = holder.context("Cannot hand off")?;
        Err(self
            .replacer
            .replace(&holder, &envelope.to_args())
            .into())
    }

    /// Stop watchers and the display thread, then make sure the engine is down.
    ///
    /// The display thread stops the engine itself before releasing its GPU
    /// context; the call here covers a display thread that did not exit in
    /// time. Pass `None` for a display thread that already exited.
    pub async fn teardown(&self, supervisor: WatcherSupervisor, display: Option<DisplayThread>) {
        self.control.request_terminate();

        let wait = self.shutdown_wait;
        let display_stopped = async move {
            match display {
                Some(display) => display.stop(wait).await,
                None => true,
            }
        };
        let ((), stopped) = tokio::join!(supervisor.shutdown(wait), display_stopped);
        if !stopped {
            log::warn!("Forcing teardown with the display thread still running");
        }

        self.engine.shutdown();
        log::info!("Playback stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchers::WatcherTiming;
    use crate::watchers::testing::FakeEngine;
    use common::handoff::ResumeToken;
    use std::path::Path;
    use std::sync::Mutex;

    type Recorded = Arc<Mutex<Option<(PathBuf, Vec<String>)>>>;

    /// Records the replacement instead of performing it
    struct RecordingReplacer {
        calls: Recorded,
    }

    impl ProcessReplacer for RecordingReplacer {
        fn replace(&self, program: &Path, args: &[String]) -> common::Error {
            *self.calls.lock().unwrap() = Some((program.to_path_buf(), args.to_vec()));
            common::Error::Exec {
                program: program.to_path_buf(),
                source: std::io::Error::other("recorded"),
            }
        }
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn controller(
        engine: &Arc<FakeEngine>,
        control: &Arc<PlaybackControl>,
        args: &[&str],
    ) -> (HandoffController, Recorded) {
        let calls: Recorded = Arc::default();
        let controller = HandoffController::new(
            engine.clone(),
            Arc::clone(control),
            strings(args),
            Box::new(RecordingReplacer {
                calls: Arc::clone(&calls),
            }),
        )
        .with_holder(Some(PathBuf::from("/usr/bin/vidpaper-holder")));
        (controller, calls)
    }

    fn supervisor(engine: &Arc<FakeEngine>, control: &Arc<PlaybackControl>) -> WatcherSupervisor {
        let (mut supervisor, _rx) = WatcherSupervisor::new(
            Arc::clone(control),
            engine.clone(),
            WatcherTiming::default(),
        );
        supervisor.spawn("idle", |mut ctx| async move {
            while ctx.sleep(Duration::from_secs(1)).await {}
        });
        supervisor
    }

    /// Display stand-in that exits once termination is requested
    fn display(control: &Arc<PlaybackControl>) -> DisplayThread {
        let control = Arc::clone(control);
        DisplayThread::from_task(tokio::spawn(async move {
            while !control.terminate_requested() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_execs_holder_with_envelope() {
        let engine = Arc::new(FakeEngine::new());
        engine.set_position(ResumeToken::new(Duration::from_millis(83_250), 2));
        let control = Arc::new(PlaybackControl::new());
        let (controller, calls) =
            controller(&engine, &control, &["-s", "DP-1", "/videos", "--resume", "1.000 0"]);

        let result = controller
            .stop_and_revive(supervisor(&engine, &control), display(&control))
            .await;
        assert!(result.is_err());

        let (program, args) = calls.lock().unwrap().clone().unwrap();
        assert_eq!(program, PathBuf::from("/usr/bin/vidpaper-holder"));
        assert_eq!(
            args,
            strings(&["-s", "DP-1", "/videos", "--resume", "83.250 2"])
        );

        assert!(control.terminate_requested());
        assert_eq!(engine.shutdown_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_display_does_not_block_handoff() {
        let engine = Arc::new(FakeEngine::new());
        let control = Arc::new(PlaybackControl::new());
        let (controller, calls) = controller(&engine, &control, &["DP-1", "a.mp4"]);

        let hung = DisplayThread::from_task(tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        }));

        let start = tokio::time::Instant::now();
        let result = controller
            .stop_and_revive(supervisor(&engine, &control), hung)
            .await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(1));

        assert!(calls.lock().unwrap().is_some());
        assert_eq!(engine.shutdown_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_without_handoff() {
        let engine = Arc::new(FakeEngine::new());
        let control = Arc::new(PlaybackControl::new());
        let (controller, calls) = controller(&engine, &control, &["DP-1", "a.mp4"]);

        controller
            .teardown(supervisor(&engine, &control), Some(display(&control)))
            .await;

        assert!(calls.lock().unwrap().is_none());
        assert_eq!(engine.shutdown_calls(), 1);
    }
}
