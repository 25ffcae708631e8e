//! Playback watchers
//!
//! Each watcher is a tokio task that observes one condition and merges its
//! opinion into the shared [`PlaybackControl`]:
//!
//! - pause_list: hold playback while a listed program runs
//! - stop_list: stop and hand off when a listed program starts
//! - visibility: pause or stop while the surface gets no frame callbacks
//! - engine_events: reconcile user pauses, advance the playlist, exit
//!
//! Decisions that end the process are sent to `main` as [`Lifecycle`]
//! messages. All watchers stop at their next sleep once the supervisor is
//! shut down.

mod engine_events;
mod pause_list;
mod stop_list;
#[cfg(test)]
pub(crate) mod testing;
mod visibility;

use common::census::ProcessCensus;
use common::config::WatcherSettings;
use common::watchlist::WatchList;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::engine::MediaEngine;
use crate::log_and_continue;
use crate::playback::{HoldChange, PlaybackControl};

pub use visibility::VisibilityAction;

/// Watcher cadences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherTiming {
    /// How often the process census is asked
    pub process_poll: Duration,
    /// How long a surface may go without frame callbacks before it counts as hidden
    pub visibility_grace: Duration,
    /// Liveness check cadence inside the grace window, also the engine event poll
    pub liveness_check: Duration,
}

impl Default for WatcherTiming {
    fn default() -> Self {
        Self {
            process_poll: Duration::from_secs(1),
            visibility_grace: Duration::from_secs(2),
            liveness_check: Duration::from_millis(50),
        }
    }
}

impl From<&WatcherSettings> for WatcherTiming {
    fn from(settings: &WatcherSettings) -> Self {
        Self {
            process_poll: settings.process_poll(),
            visibility_grace: settings.visibility_grace(),
            liveness_check: settings.liveness_check(),
        }
    }
}

/// Decisions only `main` can carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Stop and hand off to the holder
    Stop(String),
    /// Exit the process
    Exit,
}

/// Which watchers to run
#[derive(Debug, Default)]
pub struct WatcherPlan {
    pub pause_list: WatchList,
    pub stop_list: WatchList,
    pub visibility: Option<VisibilityAction>,
}

/// Everything a watcher task may touch
#[derive(Clone)]
pub struct WatchContext {
    pub control: Arc<PlaybackControl>,
    pub engine: Arc<dyn MediaEngine>,
    pub timing: WatcherTiming,
    lifecycle: mpsc::UnboundedSender<Lifecycle>,
    cancel: watch::Receiver<bool>,
}

impl WatchContext {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Sleep, returning `false` if the supervisor shut down meanwhile.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let woke = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancel.wait_for(|cancelled| *cancelled) => false,
        };
        woke && !self.is_cancelled()
    }

    /// Wait for the next tick, returning `false` on shutdown.
    pub async fn tick(&mut self, interval: &mut Interval) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let woke = tokio::select! {
            _ = interval.tick() => true,
            _ = self.cancel.wait_for(|cancelled| *cancelled) => false,
        };
        woke && !self.is_cancelled()
    }

    /// Carry a hold transition over to the engine.
    pub fn apply(&self, change: HoldChange) {
        match change {
            HoldChange::Engaged => log_and_continue!(self.engine.pause(), "pause playback"),
            HoldChange::Released => log_and_continue!(self.engine.resume(), "resume playback"),
            HoldChange::Unchanged => {}
        }
    }

    /// Claim the stop sequence and hand it to `main`. Only the first caller
    /// in the whole process gets through.
    pub fn request_stop(&self, reason: String) -> bool {
        if !self.control.begin_stop() {
            log::debug!("Stop already in progress, ignoring: {}", reason);
            return false;
        }
        log::info!("Stopping playback: {}", reason);
        if self.lifecycle.send(Lifecycle::Stop(reason)).is_err() {
            log::warn!("Lifecycle receiver is gone, stop request dropped");
        }
        true
    }

    pub fn request_exit(&self) {
        if self.lifecycle.send(Lifecycle::Exit).is_err() {
            log::warn!("Lifecycle receiver is gone, exit request dropped");
        }
    }
}

/// Build an interval that waits instead of bursting after a slow tick.
pub fn interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// A census bound to one watch list, polled on the blocking pool.
///
/// A full process-table scan must not stall the async workers.
pub struct CensusPoll {
    census: Option<Box<dyn ProcessCensus>>,
    names: Arc<[String]>,
}

impl CensusPoll {
    pub fn new(census: Box<dyn ProcessCensus>, list: &WatchList) -> Self {
        Self {
            census: Some(census),
            names: list.names().into(),
        }
    }

    /// The first listed program that is running, if any.
    pub async fn find_running(&mut self) -> Option<String> {
        let mut census = self.census.take()?;
        let names = Arc::clone(&self.names);

        let joined = tokio::task::spawn_blocking(move || {
            let found = census.find_running(&names);
            (census, found)
        })
        .await;

        match joined {
            Ok((census, found)) => {
                self.census = Some(census);
                found
            }
            Err(e) => {
                log::error!("Process census failed, no further polls: {}", e);
                None
            }
        }
    }
}

/// Owns the watcher tasks and stops them together
pub struct WatcherSupervisor {
    context: WatchContext,
    cancel: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl WatcherSupervisor {
    pub fn new(
        control: Arc<PlaybackControl>,
        engine: Arc<dyn MediaEngine>,
        timing: WatcherTiming,
    ) -> (Self, mpsc::UnboundedReceiver<Lifecycle>) {
        let (lifecycle, lifecycle_rx) = mpsc::unbounded_channel();
        let (cancel, cancel_rx) = watch::channel(false);

        let supervisor = Self {
            context: WatchContext {
                control,
                engine,
                timing,
                lifecycle,
                cancel: cancel_rx,
            },
            cancel,
            tasks: Vec::new(),
        };
        (supervisor, lifecycle_rx)
    }

    /// Context for work that runs outside a watcher but shares its channels
    pub fn context(&self) -> WatchContext {
        self.context.clone()
    }

    /// Run `watcher` as a task tied to this supervisor.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, watcher: F)
    where
        F: FnOnce(WatchContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        log::debug!("Starting {} watcher", name);
        let handle = tokio::spawn(watcher(self.context.clone()));
        self.tasks.push((name, handle));
    }

    /// Start every watcher the plan asks for, plus the engine-event watcher.
    ///
    /// `census` is called once per process watcher, each gets its own.
    pub fn start(
        &mut self,
        plan: WatcherPlan,
        mut census: impl FnMut() -> Box<dyn ProcessCensus>,
    ) {
        if !plan.pause_list.is_empty() {
            let census = census();
            let list = plan.pause_list;
            self.spawn("pause-list", move |ctx| pause_list::run(ctx, list, census));
        }

        if !plan.stop_list.is_empty() {
            let census = census();
            let list = plan.stop_list;
            self.spawn("stop-list", move |ctx| stop_list::run(ctx, list, census));
        }

        if let Some(action) = plan.visibility {
            self.spawn("visibility", move |ctx| visibility::run(ctx, action));
        }

        self.spawn("engine-event", engine_events::run);

        log::info!("{} watcher(s) running", self.tasks.len());
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every watcher and wait up to `wait` for each to finish.
    /// Stragglers are aborted.
    pub async fn shutdown(self, wait: Duration) {
        if self.cancel.send(true).is_err() {
            log::debug!("All watchers already finished");
        }

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(wait, &mut handle).await {
                Ok(Ok(())) => log::debug!("{} watcher stopped", name),
                Ok(Err(e)) => log::error!("{} watcher failed: {}", name, e),
                Err(_) => {
                    log::warn!("{} watcher did not stop in time, aborting", name);
                    handle.abort();
                }
            }
        }
    }
}
