use anyhow::{Context, Result};
use common::cli::SurfaceLayer;
use common::outputs::{Configured, OutputRegistry, Selection, Selector};
use smithay_client_toolkit::{
    compositor::CompositorState,
    output::{OutputInfo, OutputState},
    reexports::{
        calloop::{
            EventLoop,
            ping::{Ping, make_ping},
        },
        calloop_wayland_source::WaylandSource,
    },
    registry::RegistryState,
    shell::wlr_layer::LayerShell,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wayland_client::{
    Connection, QueueHandle,
    globals::registry_queue_init,
    protocol::{wl_output, wl_surface},
};

use super::pump::PumpAction;
use super::surface::{LayerFactory, OutputSurface, shell_layer};
use crate::engine::FrameSource;
use crate::error::SetupError;
use crate::playback::PlaybackControl;

/// How long one dispatch may block before the loop re-checks for termination
const DISPATCH_TIMEOUT: Duration = Duration::from_millis(50);

/// Main Wayland state, owned by the display thread.
pub struct VideoDaemon {
    pub(super) registry_state: RegistryState,
    pub(super) output_state: OutputState,
    pub(super) outputs: OutputRegistry<wl_output::WlOutput, OutputSurface>,
    pub(super) factory: LayerFactory,
    pub(super) frames: Arc<dyn FrameSource>,
    pub(super) control: Arc<PlaybackControl>,
    /// Matched outputs whose surface could not be created
    pub(super) failed_surfaces: usize,
    pub(super) exit: bool,
}

/// Lets other threads wake the display loop
pub struct DisplayHandle {
    wake: Ping,
}

impl DisplayHandle {
    /// Wake the loop so it notices a terminate request immediately
    pub fn wake(&self) {
        self.wake.ping();
    }
}

/// The display thread as seen from the async side
pub struct DisplayThread {
    handle: Option<DisplayHandle>,
    task: JoinHandle<Result<()>>,
}

impl DisplayThread {
    /// Start the display thread and wait until it is showing something.
    pub async fn spawn(
        options: DisplayOptions,
        frames: Arc<dyn FrameSource>,
        control: Arc<PlaybackControl>,
    ) -> Result<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut task =
            tokio::task::spawn_blocking(move || run(options, frames, control, ready_tx));

        match ready_rx.await {
            Ok(handle) => Ok(Self {
                handle: Some(handle),
                task,
            }),
            Err(_) => match (&mut task).await {
                Ok(Ok(())) => anyhow::bail!("Display thread exited during setup"),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(e).context("Display thread panicked during setup"),
            },
        }
    }

    /// Wrap a task that stands in for the display thread
    #[cfg(test)]
    pub fn from_task(task: JoinHandle<Result<()>>) -> Self {
        Self { handle: None, task }
    }

    /// Resolves when the display loop exits on its own.
    pub async fn finished(&mut self) -> Result<()> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(e).context("Display thread panicked"),
        }
    }

    /// Wake the loop and wait up to `wait` for it to exit.
    ///
    /// Termination must already be requested on the shared control. Returns
    /// `false` if the thread is still running after `wait`.
    pub async fn stop(mut self, wait: Duration) -> bool {
        if let Some(handle) = &self.handle {
            handle.wake();
        }

        match tokio::time::timeout(wait, &mut self.task).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                log::error!("Display thread failed: {:#}", e);
                true
            }
            Ok(Err(e)) => {
                log::error!("Display thread panicked: {}", e);
                true
            }
            Err(_) => {
                log::error!(
                    "Display thread did not stop within {:?}, continuing teardown",
                    wait
                );
                false
            }
        }
    }
}

/// What the display thread needs to know up front
pub struct DisplayOptions {
    pub selector: Selector,
    pub layer: SurfaceLayer,
}

/// Run the display session until termination is requested.
///
/// `ready` receives a [`DisplayHandle`] once at least one output has a
/// surface. If setup fails the sender is dropped and the error is returned.
fn run(
    options: DisplayOptions,
    frames: Arc<dyn FrameSource>,
    control: Arc<PlaybackControl>,
    ready: oneshot::Sender<DisplayHandle>,
) -> Result<()> {
    log::info!("Connecting to Wayland compositor...");

    let conn = Connection::connect_to_env().map_err(SetupError::from)?;
    let (globals, mut event_queue) =
        registry_queue_init(&conn).context("Failed to read compositor globals")?;
    let qh: QueueHandle<VideoDaemon> = event_queue.handle();

    let compositor =
        CompositorState::bind(&globals, &qh).map_err(|source| SetupError::MissingGlobal {
            interface: "wl_compositor",
            source,
        })?;
    let layer_shell =
        LayerShell::bind(&globals, &qh).map_err(|source| SetupError::MissingGlobal {
            interface: "zwlr_layer_shell_v1",
            source,
        })?;

    let target = options.selector.to_string();
    let mut daemon = VideoDaemon {
        registry_state: RegistryState::new(&globals),
        output_state: OutputState::new(&globals, &qh),
        outputs: OutputRegistry::new(options.selector),
        factory: LayerFactory {
            conn: conn.clone(),
            qh: qh.clone(),
            compositor,
            layer_shell,
            layer: shell_layer(options.layer),
            instance: wgpu::Instance::default(),
            gpu: None,
        },
        frames,
        control,
        failed_surfaces: 0,
        exit: false,
    };

    log::info!("Connected to Wayland compositor");

    // First roundtrip announces outputs, second delivers their configures
    event_queue.roundtrip(&mut daemon)?;
    event_queue.roundtrip(&mut daemon)?;

    log::info!(
        "Found {} output(s), {} selected, {} configured",
        daemon.output_state.outputs().count(),
        daemon.outputs.selected_count(),
        daemon
            .outputs
            .entries()
            .iter()
            .filter(|e| e.is_configured())
            .count()
    );

    if daemon.outputs.selected_count() == 0 {
        let error = if daemon.failed_surfaces > 0 {
            SetupError::NoDrawable(target)
        } else {
            SetupError::NoMatchingOutput(target)
        };
        return Err(error.into());
    }

    let mut event_loop: EventLoop<VideoDaemon> =
        EventLoop::try_new().context("Failed to create event loop")?;
    let handle = event_loop.handle();

    WaylandSource::new(conn.clone(), event_queue)
        .insert(handle.clone())
        .map_err(|e| anyhow::anyhow!("Failed to register Wayland source: {}", e.error))?;

    let (frame_ping, frame_source) = make_ping().context("Failed to create frame wakeup")?;
    handle
        .insert_source(frame_source, |_, _, daemon| daemon.on_frame_ready())
        .map_err(|e| anyhow::anyhow!("Failed to register frame wakeup: {}", e.error))?;

    let (wake_ping, wake_source) = make_ping().context("Failed to create terminate wakeup")?;
    handle
        .insert_source(wake_source, |_, _, daemon| {
            if daemon.control.terminate_requested() {
                daemon.exit = true;
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to register terminate wakeup: {}", e.error))?;

    daemon
        .frames
        .set_frame_notifier(Box::new(move || frame_ping.ping()));

    // Frames decoded during setup would otherwise wait for the next one
    daemon.on_frame_ready();

    if ready.send(DisplayHandle { wake: wake_ping }).is_err() {
        log::warn!("Nobody is waiting for the display thread");
    }

    let result = loop {
        if let Err(e) = event_loop.dispatch(DISPATCH_TIMEOUT, &mut daemon) {
            break Err(anyhow::Error::from(e).context("Wayland event loop failed"));
        }

        daemon.keep_alive();

        if daemon.control.terminate_requested() {
            daemon.exit = true;
        }

        if daemon.exit {
            log::info!("Exiting Wayland event loop");
            break Ok(());
        }
    };

    daemon.teardown();
    result
}

impl VideoDaemon {
    /// The engine has a new frame: draw it wherever no callback is pending
    pub(super) fn on_frame_ready(&mut self) {
        let frames = Arc::clone(&self.frames);
        let qh = self.factory.qh.clone();

        for entry in self.outputs.entries_mut() {
            if let Some(surface) = entry.surface_mut()
                && surface.is_configured()
            {
                let action = surface.pacing.on_frame_ready();
                pump(surface, action, frames.as_ref(), &qh);
            }
        }
    }

    /// Make sure held surfaces keep a frame callback outstanding
    fn keep_alive(&mut self) {
        let held = self.control.is_held();
        if !held {
            return;
        }
        let frames = Arc::clone(&self.frames);
        let qh = self.factory.qh.clone();

        for entry in self.outputs.entries_mut() {
            if let Some(surface) = entry.surface_mut()
                && surface.is_configured()
            {
                let action = surface.pacing.on_idle_check(held);
                pump(surface, action, frames.as_ref(), &qh);
            }
        }
    }

    /// The compositor granted a new frame to `wl_surface`
    pub(super) fn on_frame_callback(&mut self, wl_surface: &wl_surface::WlSurface) {
        self.control.mark_frame_delivered();
        let held = self.control.is_held();
        let frames = Arc::clone(&self.frames);
        let qh = self.factory.qh.clone();

        if let Some(surface) = self
            .outputs
            .find_mut(|s| s.owns(wl_surface))
            .and_then(|entry| entry.surface_mut())
        {
            let action = surface.pacing.on_frame_callback(held);
            log::trace!("Frame callback on {}: {:?}", surface.label(), action);
            pump(surface, action, frames.as_ref(), &qh);
        }
    }

    /// A configure (or scale change) may need a fresh frame at the new size
    pub(super) fn redraw(&mut self, is_target: impl Fn(&OutputSurface) -> bool) {
        let frames = Arc::clone(&self.frames);
        let qh = self.factory.qh.clone();

        if let Some(surface) = self
            .outputs
            .find_mut(is_target)
            .and_then(|entry| entry.surface_mut())
        {
            let action = surface.pacing.request_redraw();
            pump(surface, action, frames.as_ref(), &qh);
        }
    }

    pub(super) fn on_configure(
        &mut self,
        is_target: impl Fn(&OutputSurface) -> bool + Copy,
        width: u32,
        height: u32,
    ) {
        match self.outputs.on_configure(is_target, width, height) {
            Some((_, Configured::First | Configured::Resized)) => self.redraw(is_target),
            Some((_, Configured::Unchanged)) => {}
            None => log::debug!("Configure for an unknown surface ignored"),
        }
    }

    /// Feed the latest output info into the registry
    pub(super) fn sync_output(&mut self, output: &wl_output::WlOutput) {
        let Some(info) = self.output_state.info(output) else {
            log::warn!("Output updated but no info available");
            return;
        };

        let (size, scale) = output_size(&info);
        self.outputs.on_geometry(output, size, scale);

        let name = self
            .outputs
            .on_name(output, info.name.clone(), &mut self.factory);
        let description =
            self.outputs
                .on_description(output, info.description.clone(), &mut self.factory);

        if let Some(Selection::Failed) = name.or(description) {
            self.failed_surfaces += 1;
        }
    }

    /// Release every surface, stop the engine, then drop the GPU context
    fn teardown(&mut self) {
        log::info!("Releasing {} output(s)", self.outputs.entries().len());
        let outputs = &mut self.outputs;
        release_session(
            self.frames.as_ref(),
            || outputs.clear(),
            self.factory.gpu.take(),
        );
    }
}

/// Logical size and integer scale of an output
pub(super) fn output_size(info: &OutputInfo) -> ((u32, u32), u32) {
    let scale = info.scale_factor.max(1) as u32;
    let size = info
        .logical_size
        .map(|(w, h)| (w.max(0) as u32, h.max(0) as u32))
        .or_else(|| {
            info.modes.iter().find(|m| m.current).map(|m| {
                (
                    m.dimensions.0.max(0) as u32 / scale,
                    m.dimensions.1.max(0) as u32 / scale,
                )
            })
        })
        .unwrap_or_default();
    (size, scale)
}

/// End of a display session. The frame wakeup goes first and the GPU
/// context last; the engine stops while the context is still alive.
fn release_session<G>(frames: &dyn FrameSource, clear_surfaces: impl FnOnce(), gpu: G) {
    frames.set_frame_notifier(Box::new(|| {}));
    clear_surfaces();
    frames.close();
    drop(gpu);
}

/// Carry out one pacing decision for a surface
fn pump(
    surface: &mut OutputSurface,
    action: PumpAction,
    frames: &dyn FrameSource,
    qh: &QueueHandle<VideoDaemon>,
) {
    match action {
        PumpAction::Render => {
            let frame = frames.latest_frame();
            match surface.render(frame.as_deref(), qh) {
                Ok(()) => surface.pacing.rendered(),
                Err(e) => {
                    log::warn!("Failed to render on {}: {:#}", surface.label(), e);
                    surface.pacing.render_failed();
                }
            }
        }
        PumpAction::Probe => {
            surface.probe(qh);
            surface.pacing.probed();
        }
        PumpAction::Idle => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::VideoFrame;
    use std::sync::Mutex;

    type Steps = Arc<Mutex<Vec<&'static str>>>;

    struct RecordingFrames {
        steps: Steps,
    }

    impl FrameSource for RecordingFrames {
        fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
            None
        }

        fn set_frame_notifier(&self, _notifier: Box<dyn Fn() + Send + Sync>) {
            self.steps.lock().unwrap().push("notifier");
        }

        fn close(&self) {
            self.steps.lock().unwrap().push("engine");
        }
    }

    /// Stands in for the GPU context, records when it is dropped
    struct RecordingGpu {
        steps: Steps,
    }

    impl Drop for RecordingGpu {
        fn drop(&mut self) {
            self.steps.lock().unwrap().push("gpu");
        }
    }

    #[test]
    fn test_engine_stops_before_gpu_is_released() {
        let steps: Steps = Arc::default();
        let frames = RecordingFrames {
            steps: Arc::clone(&steps),
        };
        let gpu = Some(RecordingGpu {
            steps: Arc::clone(&steps),
        });

        release_session(&frames, || steps.lock().unwrap().push("surfaces"), gpu);

        assert_eq!(
            *steps.lock().unwrap(),
            ["notifier", "surfaces", "engine", "gpu"]
        );
    }
}
