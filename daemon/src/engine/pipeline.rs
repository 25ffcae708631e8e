//! GStreamer-backed engine
//!
//! `playbin` handles demuxing, decoding and audio. Video goes through
//! `videoconvert ! videoscale` into an `appsink` that hands RGBA frames to
//! the [`FrameStore`].

use anyhow::{Context, Result};
use common::handoff::ResumeToken;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{
    Advance, EngineEvent, EngineOptions, FrameSource, FrameStore, MediaEngine, VideoFrame,
    take_start_position,
};
use crate::playlist::{Playlist, PlaylistEntry};

/// How long to wait for a seekable preroll before giving up on the item
const PREROLL_TIMEOUT_SECS: u64 = 5;

/// Display time of the current item, excluding paused time
struct ItemClock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

impl ItemClock {
    fn start(paused: bool) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            paused_at: paused.then_some(now),
            paused_total: Duration::ZERO,
        }
    }

    fn pause(&mut self) {
        self.paused_at.get_or_insert_with(Instant::now);
    }

    fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += at.elapsed();
        }
    }

    fn shown_for(&self) -> Duration {
        let paused = self.paused_total
            + self.paused_at.map(|at| at.elapsed()).unwrap_or_default();
        self.started.elapsed().saturating_sub(paused)
    }
}

struct EngineState {
    playlist: Playlist,
    /// One-shot resume position, consumed by the first load
    start: Option<ResumeToken>,
    paused: bool,
    /// Events produced by our own commands, drained with the bus
    pending: Vec<EngineEvent>,
    clock: ItemClock,
    slideshow_done: bool,
    /// Consecutive items that failed without showing a frame
    failures: usize,
    frames_at_load: u64,
    shut_down: bool,
}

pub struct GstEngine {
    playbin: gst::Element,
    app_sink: gst_app::AppSink,
    frames: Arc<FrameStore>,
    options: EngineOptions,
    slideshow: Option<Duration>,
    state: Mutex<EngineState>,
}

impl GstEngine {
    /// Build the pipeline and start the first playlist item.
    ///
    /// `start` is applied to the first load only.
    pub fn new(
        playlist: Playlist,
        options: EngineOptions,
        slideshow: Option<Duration>,
        start: Option<ResumeToken>,
    ) -> Result<Self> {
        gst::init().context("Failed to initialize GStreamer")?;
        log::info!("GStreamer initialized ({})", gst::version_string());

        let playbin = gst::ElementFactory::make("playbin")
            .name("vidpaper")
            .build()
            .context("Failed to create playbin (is gst-plugins-base installed?)")?;

        let sink_bin = gst::parse::bin_from_description(
            "videoconvert ! videoscale ! appsink name=frames",
            true,
        )
        .context("Failed to create video sink")?;

        let app_sink = sink_bin
            .by_name("frames")
            .context("Failed to get appsink from video sink")?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("frames is not an AppSink"))?;

        let frames = Arc::new(FrameStore::new());
        configure_app_sink(&app_sink);
        setup_frame_callback(&app_sink, Arc::clone(&frames));

        playbin.set_property("video-sink", &sink_bin);
        playbin.set_property("mute", options.mute);
        playbin.set_property("volume", options.volume);

        log::debug!("Engine options: {:?}", options);

        let engine = Self {
            playbin,
            app_sink,
            frames,
            options,
            slideshow,
            state: Mutex::new(EngineState {
                playlist,
                start,
                paused: false,
                pending: Vec::new(),
                clock: ItemClock::start(false),
                slideshow_done: false,
                failures: 0,
                frames_at_load: 0,
                shut_down: false,
            }),
        };

        {
            let mut state = engine.lock();
            engine.load_current(&mut state)?;
        }

        Ok(engine)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the playlist's current entry from the top (or from the start
    /// override on the very first load)
    fn load_current(&self, state: &mut EngineState) -> Result<()> {
        let offset = take_start_position(&mut state.playlist, &mut state.start);
        let entry = state.playlist.current().clone();
        let uri = entry_uri(&entry)?;

        log::info!(
            "Loading {} ({}/{})",
            entry.display(),
            state.playlist.current_index() + 1,
            state.playlist.len()
        );

        self.playbin
            .set_state(gst::State::Null)
            .context("Failed to reset pipeline")?;
        self.playbin.set_property("uri", &uri);

        state.clock = ItemClock::start(state.paused);
        state.slideshow_done = false;
        state.frames_at_load = self.frames.delivered();

        let needs_seek = offset.is_some() || self.has_custom_speed();
        if needs_seek {
            self.preroll()?;
            self.seek_to(offset.unwrap_or_default())?;
        }

        let target = if state.paused {
            gst::State::Paused
        } else {
            gst::State::Playing
        };
        self.playbin
            .set_state(target)
            .with_context(|| format!("Failed to start {}", entry.display()))?;

        Ok(())
    }

    fn has_custom_speed(&self) -> bool {
        (self.options.speed - 1.0).abs() > f64::EPSILON
    }

    /// Bring the pipeline to Paused and wait until it can seek
    fn preroll(&self) -> Result<()> {
        self.playbin
            .set_state(gst::State::Paused)
            .context("Failed to preroll media")?;
        let (result, _current, _pending) = self
            .playbin
            .state(Some(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS)));
        result.context("Media did not preroll")?;
        Ok(())
    }

    fn seek_to(&self, offset: Duration) -> Result<()> {
        let position = gst::ClockTime::from_nseconds(offset.as_nanos() as u64);

        if self.has_custom_speed() {
            self.playbin
                .seek(
                    self.options.speed,
                    gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                    gst::SeekType::Set,
                    position,
                    gst::SeekType::None,
                    gst::ClockTime::NONE,
                )
                .context("Failed to set playback speed")?;
        } else {
            self.playbin
                .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, position)
                .context("Failed to seek")?;
        }

        log::debug!("Seeked to {:.3}s", offset.as_secs_f64());
        Ok(())
    }

    /// Restart the current item in place
    fn rewind(&self, state: &mut EngineState) -> Result<()> {
        log::debug!("Media reached EOS, looping...");
        self.seek_to(Duration::ZERO)?;
        state.clock = ItemClock::start(state.paused);
        state.slideshow_done = false;
        Ok(())
    }

    fn set_paused(&self, state: &mut EngineState, paused: bool) -> Result<()> {
        if state.shut_down || state.paused == paused {
            return Ok(());
        }

        let target = if paused {
            gst::State::Paused
        } else {
            gst::State::Playing
        };
        self.playbin
            .set_state(target)
            .with_context(|| format!("Failed to set pipeline to {:?}", target))?;

        state.paused = paused;
        if paused {
            state.clock.pause();
            log::info!("Playback paused");
        } else {
            state.clock.resume();
            log::info!("Playback resumed");
        }
        Ok(())
    }

    fn slideshow_elapsed(&self, state: &EngineState) -> bool {
        let Some(interval) = self.slideshow else {
            return false;
        };
        !state.slideshow_done
            && state.playlist.len() > 1
            && state.playlist.current().is_still()
            && state.clock.shown_for() >= interval
    }
}

impl MediaEngine for GstEngine {
    fn pause(&self) -> Result<()> {
        let mut state = self.lock();
        self.set_paused(&mut state, true)
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.lock();
        self.set_paused(&mut state, false)
    }

    fn toggle_pause(&self) -> Result<()> {
        let mut state = self.lock();
        let paused = !state.paused;
        self.set_paused(&mut state, paused)?;
        state.pending.push(if paused {
            EngineEvent::Paused
        } else {
            EngineEvent::Unpaused
        });
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn position(&self) -> ResumeToken {
        let state = self.lock();
        let offset = self
            .playbin
            .query_position::<gst::ClockTime>()
            .map(|position| Duration::from_nanos(position.nseconds()))
            .unwrap_or_default();
        ResumeToken::new(offset, state.playlist.current_index())
    }

    fn advance(&self) -> Result<Advance> {
        let mut state = self.lock();
        if state.shut_down {
            return Ok(Advance::Finished);
        }

        if self.options.loop_file {
            self.rewind(&mut state)?;
            return Ok(Advance::Continue);
        }

        let previous = state.playlist.current_index();
        let wrapped = state.playlist.next();
        if wrapped && !self.options.loop_playlist {
            log::info!("Playlist finished");
            return Ok(Advance::Finished);
        }

        if state.playlist.current_index() == previous && !state.playlist.current().is_still() {
            self.rewind(&mut state)?;
        } else {
            self.load_current(&mut state)?;
        }
        Ok(Advance::Continue)
    }

    fn poll_events(&self) -> Vec<EngineEvent> {
        let mut state = self.lock();
        let mut events = std::mem::take(&mut state.pending);
        if state.shut_down {
            return events;
        }

        // Drain all messages from the bus so none pile up
        if let Some(bus) = self.playbin.bus() {
            while let Some(msg) = bus.pop() {
                match msg.view() {
                    gst::MessageView::Eos(_) => {
                        if state.playlist.current().is_still() {
                            log::debug!("Still image decoded");
                        } else {
                            events.push(EngineEvent::EndOfStream);
                        }
                    }

                    gst::MessageView::Error(err) => {
                        let message = format!(
                            "{}: {} (debug: {:?})",
                            state.playlist.current().display(),
                            err.error(),
                            err.debug()
                        );

                        if self.frames.delivered() > state.frames_at_load {
                            state.failures = 0;
                        }
                        state.failures += 1;
                        state.frames_at_load = self.frames.delivered();

                        if state.failures >= state.playlist.len() {
                            log::error!("GStreamer error: {}", message);
                            log::error!("No playlist entry could be played");
                            events.push(EngineEvent::Shutdown);
                        } else {
                            events.push(EngineEvent::Error(message));
                        }
                    }

                    _ => {}
                }
            }
        }

        if self.slideshow_elapsed(&state) {
            state.slideshow_done = true;
            events.push(EngineEvent::EndOfStream);
        }

        events
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        log::info!("Stopping media engine");

        // Clear callbacks first to prevent new frames
        self.frames.clear_notifier();
        self.app_sink
            .set_callbacks(gst_app::AppSinkCallbacks::builder().build());

        match self.playbin.set_state(gst::State::Null) {
            Ok(_) => {
                let (result, current, _) =
                    self.playbin.state(Some(gst::ClockTime::from_seconds(2)));
                if let Err(e) = result {
                    log::warn!("Pipeline did not reach Null ({:?}): {:?}", current, e);
                }
            }
            Err(e) => log::warn!("Failed to set pipeline state to Null: {}", e),
        }

        if let Some(bus) = self.playbin.bus() {
            let mut drained = 0;
            while bus.pop().is_some() {
                drained += 1;
            }
            if drained > 0 {
                log::debug!("Drained {} pending messages from bus", drained);
            }
        }

        log::info!(
            "Media engine stopped ({} frames delivered)",
            self.frames.delivered()
        );
    }
}

impl FrameSource for GstEngine {
    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frames.latest()
    }

    fn set_frame_notifier(&self, notifier: Box<dyn Fn() + Send + Sync>) {
        self.frames.set_notifier(notifier);
    }

    fn close(&self) {
        MediaEngine::shutdown(self);
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Configure AppSink for low-latency frame delivery
///
/// - `sync=true`: frames arrive at their presentation time
/// - `max-buffers=1` + `drop=true`: never queue stale frames
fn configure_app_sink(app_sink: &gst_app::AppSink) {
    app_sink.set_caps(Some(
        &gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Rgba)
            .build(),
    ));
    app_sink.set_property("sync", true);
    app_sink.set_max_buffers(1);
    app_sink.set_drop(true);
}

/// Copy every sample into the frame store
fn setup_frame_callback(app_sink: &gst_app::AppSink, frames: Arc<FrameStore>) {
    app_sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let caps = sample.caps().ok_or(gst::FlowError::Error)?;
                let info =
                    gst_video::VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::Error)?;

                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                let stride = info.stride()[0].unsigned_abs();

                frames.push(
                    map.as_slice().to_vec(),
                    info.width(),
                    info.height(),
                    stride,
                    false,
                );

                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
}

fn entry_uri(entry: &PlaylistEntry) -> Result<String> {
    match entry {
        PlaylistEntry::Url(url) => Ok(url.clone()),
        PlaylistEntry::File(path) => {
            let absolute = std::path::absolute(path)
                .with_context(|| format!("Invalid media path {}", path.display()))?;
            let uri = gst::glib::filename_to_uri(&absolute, None)
                .with_context(|| format!("Invalid media path {}", absolute.display()))?;
            Ok(uri.to_string())
        }
    }
}
