//! Dormant display session: keep a transparent surface on the selected
//! output until nothing on the stop list is running and, with auto-stop,
//! the output is shown again.

use anyhow::{Context, Result};
use common::census::ProcessCensus;
use common::cli::{Args, SurfaceLayer};
use common::config::Config;
use common::outputs::{ManagedSurface, OutputGeometry, OutputRegistry, Selector, SurfaceFactory};
use common::watchlist::WatchList;
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry, delegate_shm,
    output::{OutputHandler, OutputState},
    reexports::{
        calloop::{
            EventLoop,
            timer::{TimeoutAction, Timer},
        },
        calloop_wayland_source::WaylandSource,
    },
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::{
        WaylandSurface,
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
    },
    shm::{Shm, ShmHandler},
};
use std::time::Duration;
use wayland_client::{
    Connection, Dispatch, QueueHandle,
    globals::registry_queue_init,
    protocol::{wl_buffer, wl_output, wl_shm_pool, wl_surface},
};

use crate::buffer::ShmBuffer;
use crate::gate::RevivalGate;

const NAMESPACE: &str = "vidpaper-holder";

#[derive(Debug)]
pub struct HolderOptions {
    pub selector: Selector,
    pub layer: SurfaceLayer,
    /// Wait for the output to be shown again before reviving
    pub needs_visibility: bool,
    /// Stop-list poll cadence, shared with the player
    pub stop_poll: Duration,
}

impl HolderOptions {
    pub fn new(args: &Args, config: &Config) -> Self {
        Self {
            selector: Selector::parse(args.output()),
            layer: config.surface_layer(args.layer),
            needs_visibility: args.auto_stop,
            stop_poll: config.watchers.process_poll(),
        }
    }
}

struct HolderSurface {
    layer: Option<LayerSurface>,
    buffer: Option<ShmBuffer>,
    qh: QueueHandle<HolderState>,
    configured: bool,
}

impl HolderSurface {
    fn is(&self, layer: &LayerSurface) -> bool {
        self.layer.as_ref() == Some(layer)
    }

    fn owns(&self, wl_surface: &wl_surface::WlSurface) -> bool {
        self.layer
            .as_ref()
            .is_some_and(|layer| layer.wl_surface() == wl_surface)
    }

    /// Commit the buffer again with a frame callback attached
    fn request_frame(&self) {
        let (true, Some(layer), Some(buffer)) = (self.configured, &self.layer, &self.buffer) else {
            return;
        };
        let wl_surface = layer.wl_surface();
        wl_surface.attach(Some(buffer.buffer()), 0, 0);
        wl_surface.damage_buffer(0, 0, buffer.width() as i32, buffer.height() as i32);
        wl_surface.frame(&self.qh, wl_surface.clone());
        wl_surface.commit();
    }
}

impl ManagedSurface for HolderSurface {
    fn configure(&mut self, _width: u32, _height: u32, _scale: u32) {
        self.configured = true;
        self.request_frame();
    }

    fn destroy(mut self) {
        drop(self.layer.take());
        drop(self.buffer.take());
    }
}

struct HolderFactory {
    qh: QueueHandle<HolderState>,
    compositor: CompositorState,
    layer_shell: LayerShell,
    shm: Shm,
    layer: Layer,
}

impl SurfaceFactory<wl_output::WlOutput> for HolderFactory {
    type Surface = HolderSurface;
    type Error = anyhow::Error;

    fn create_surface(
        &mut self,
        output: &wl_output::WlOutput,
        geometry: &OutputGeometry,
    ) -> Result<HolderSurface> {
        let buffer = ShmBuffer::transparent(self.shm.wl_shm(), 1, 1, &self.qh)?;

        let wl_surface = self.compositor.create_surface(&self.qh);
        let layer = self.layer_shell.create_layer_surface(
            &self.qh,
            wl_surface,
            self.layer,
            Some(NAMESPACE),
            Some(output),
        );
        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.set_size(0, 0);
        layer.commit();

        log::info!("Holding {}", geometry.label);
        Ok(HolderSurface {
            layer: Some(layer),
            buffer: Some(buffer),
            qh: self.qh.clone(),
            configured: false,
        })
    }
}

pub struct HolderState {
    registry_state: RegistryState,
    output_state: OutputState,
    outputs: OutputRegistry<wl_output::WlOutput, HolderSurface>,
    factory: HolderFactory,
    gate: RevivalGate,
}

/// Block until the player may come back.
pub fn wait_for_revival(
    options: HolderOptions,
    stop_list: WatchList,
    mut census: Box<dyn ProcessCensus>,
) -> Result<()> {
    let HolderOptions {
        selector,
        layer,
        needs_visibility,
        stop_poll,
    } = options;

    let conn = Connection::connect_to_env().context("Failed to connect to Wayland compositor")?;
    let (globals, mut event_queue) =
        registry_queue_init(&conn).context("Failed to read compositor globals")?;
    let qh: QueueHandle<HolderState> = event_queue.handle();

    let layer = match layer {
        SurfaceLayer::Background => Layer::Background,
        SurfaceLayer::Bottom => Layer::Bottom,
        SurfaceLayer::Top => Layer::Top,
        SurfaceLayer::Overlay => Layer::Overlay,
    };

    let mut state = HolderState {
        registry_state: RegistryState::new(&globals),
        output_state: OutputState::new(&globals, &qh),
        outputs: OutputRegistry::new(selector),
        factory: HolderFactory {
            qh: qh.clone(),
            compositor: CompositorState::bind(&globals, &qh)
                .context("Compositor does not provide wl_compositor")?,
            layer_shell: LayerShell::bind(&globals, &qh)
                .context("Compositor does not provide zwlr_layer_shell_v1")?,
            shm: Shm::bind(&globals, &qh).context("Compositor does not provide wl_shm")?,
            layer,
        },
        gate: RevivalGate::new(needs_visibility, stop_list.is_empty()),
    };

    event_queue.roundtrip(&mut state)?;
    event_queue.roundtrip(&mut state)?;

    if state.outputs.selected_count() == 0 {
        log::info!(
            "No output matches {} yet, waiting for one",
            state.outputs.selector()
        );
    }

    let mut event_loop: EventLoop<HolderState> =
        EventLoop::try_new().context("Failed to create event loop")?;
    let handle = event_loop.handle();

    WaylandSource::new(conn.clone(), event_queue)
        .insert(handle.clone())
        .map_err(|e| anyhow::anyhow!("Failed to register Wayland source: {}", e.error))?;

    if !stop_list.is_empty() {
        handle
            .insert_source(Timer::immediate(), move |_, _, state| {
                let running = census.find_running(stop_list.names());
                if let Some(name) = &running {
                    log::debug!("'{}' is still running", name);
                }
                if state.gate.on_stop_list(running.is_none()) {
                    state.request_frames();
                }
                TimeoutAction::ToDuration(stop_poll)
            })
            .map_err(|e| anyhow::anyhow!("Failed to register stop-list timer: {}", e.error))?;
    }

    if !state.gate.stop_list_clear() {
        log::info!("Waiting for the stop list to clear");
    } else if needs_visibility {
        log::info!("Waiting for the output to become visible");
    }
    while !state.gate.is_ready() {
        event_loop
            .dispatch(stop_poll, &mut state)
            .context("Wayland event loop failed")?;
    }

    log::info!("Ready to revive the player");
    state.outputs.clear();
    conn.flush().context("Failed to flush Wayland connection")?;
    Ok(())
}

impl CompositorHandler for HolderState {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        time: u32,
    ) {
        log::trace!("Frame callback at {} ms", time);
        if self.gate.on_frame(time)
            && let Some(holder) = self
                .outputs
                .find_mut(|s| s.owns(surface))
                .and_then(|entry| entry.surface())
        {
            holder.request_frame();
        }
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl HolderState {
    fn request_frames(&self) {
        for entry in self.outputs.entries() {
            if let Some(surface) = entry.surface() {
                surface.request_frame();
            }
        }
    }

    fn sync_output(&mut self, output: &wl_output::WlOutput) {
        let Some(info) = self.output_state.info(output) else {
            return;
        };
        let scale = info.scale_factor.max(1) as u32;
        let size = info
            .logical_size
            .map(|(w, h)| (w.max(0) as u32, h.max(0) as u32))
            .unwrap_or_default();
        self.outputs.on_geometry(output, size, scale);

        self.outputs
            .on_name(output, info.name.clone(), &mut self.factory);
        self.outputs
            .on_description(output, info.description.clone(), &mut self.factory);
    }
}

impl OutputHandler for HolderState {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.outputs.on_output_announced(output.clone());
        self.sync_output(&output);
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.sync_output(&output);
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.outputs.on_output_withdrawn(&output);
    }
}

impl LayerShellHandler for HolderState {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, layer: &LayerSurface) {
        if let Some(output) = self
            .outputs
            .find_mut(|s| s.is(layer))
            .map(|entry| entry.handle().clone())
        {
            log::info!("Compositor closed the holder surface");
            self.outputs.on_output_withdrawn(&output);
        }
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let (width, height) = configure.new_size;
        self.outputs.on_configure(|s| s.is(layer), width, height);
    }
}

impl ShmHandler for HolderState {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.factory.shm
    }
}

impl ProvidesRegistryState for HolderState {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState];
}

impl Dispatch<wl_buffer::WlBuffer, ()> for HolderState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_buffer::WlBuffer,
        _event: wl_buffer::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
        // The buffer is never redrawn, release needs no handling
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ()> for HolderState {
    fn event(
        _state: &mut Self,
        _proxy: &wl_shm_pool::WlShmPool,
        _event: wl_shm_pool::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
    }
}

delegate_compositor!(HolderState);
delegate_output!(HolderState);
delegate_layer!(HolderState);
delegate_shm!(HolderState);
delegate_registry!(HolderState);
