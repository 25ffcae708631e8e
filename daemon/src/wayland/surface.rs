//! Per-output surfaces: a full-screen layer surface with a GPU drawable.

use anyhow::{Context, Result};
use common::cli::SurfaceLayer;
use common::outputs::{ManagedSurface, OutputGeometry, SurfaceFactory};
use smithay_client_toolkit::{
    compositor::CompositorState,
    shell::{
        WaylandSurface,
        wlr_layer::{Anchor, KeyboardInteractivity, Layer, LayerShell, LayerSurface},
    },
};
use std::sync::Arc;
use wayland_client::{Connection, QueueHandle, protocol::wl_output};

use super::VideoDaemon;
use super::pump::FramePacing;
use crate::gpu::{Drawable, GpuContext, create_wgpu_surface};

/// Layer-shell namespace, visible to compositor rules
pub const NAMESPACE: &str = "vidpaper";

pub fn shell_layer(layer: SurfaceLayer) -> Layer {
    match layer {
        SurfaceLayer::Background => Layer::Background,
        SurfaceLayer::Bottom => Layer::Bottom,
        SurfaceLayer::Top => Layer::Top,
        SurfaceLayer::Overlay => Layer::Overlay,
    }
}

pub struct OutputSurface {
    label: String,
    /// Dropped first, see `destroy`
    layer: Option<LayerSurface>,
    drawable: Option<Drawable>,
    width: u32,
    height: u32,
    scale: u32,
    configured: bool,
    pub(super) pacing: FramePacing,
}

impl OutputSurface {
    pub fn is(&self, layer: &LayerSurface) -> bool {
        self.layer.as_ref() == Some(layer)
    }

    pub fn owns(&self, surface: &wayland_client::protocol::wl_surface::WlSurface) -> bool {
        self.layer
            .as_ref()
            .is_some_and(|layer| layer.wl_surface() == surface)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Buffer size in pixels
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width * self.scale, self.height * self.scale)
    }

    /// Draw `frame`, request the next frame callback and present.
    pub fn render(
        &mut self,
        frame: Option<&crate::engine::VideoFrame>,
        qh: &QueueHandle<VideoDaemon>,
    ) -> Result<()> {
        let (Some(layer), Some(drawable)) = (self.layer.as_ref(), self.drawable.as_mut()) else {
            anyhow::bail!("Surface for {} is already destroyed", self.label);
        };

        let wl_surface = layer.wl_surface();
        drawable.render(frame, || {
            wl_surface.frame(qh, wl_surface.clone());
        })
    }

    /// Ask for a frame callback without drawing anything.
    pub fn probe(&self, qh: &QueueHandle<VideoDaemon>) {
        if let Some(layer) = &self.layer {
            let wl_surface = layer.wl_surface();
            wl_surface.frame(qh, wl_surface.clone());
            wl_surface.commit();
        }
    }
}

impl ManagedSurface for OutputSurface {
    fn configure(&mut self, width: u32, height: u32, scale: u32) {
        self.width = width;
        self.height = height;
        self.scale = scale.max(1);
        self.configured = true;

        if let Some(layer) = &self.layer {
            layer.wl_surface().set_buffer_scale(self.scale as i32);
        }
        let (pixel_width, pixel_height) = self.pixel_size();
        if let Some(drawable) = self.drawable.as_mut() {
            drawable.resize(pixel_width, pixel_height);
        }
    }

    fn destroy(mut self) {
        log::debug!("Destroying surface for {}", self.label);
        // Compositor objects first, then the GPU side
        drop(self.layer.take());
        drop(self.drawable.take());
    }
}

/// Creates layer surfaces and their drawables for selected outputs
pub struct LayerFactory {
    pub(super) conn: Connection,
    pub(super) qh: QueueHandle<VideoDaemon>,
    pub(super) compositor: CompositorState,
    pub(super) layer_shell: LayerShell,
    pub(super) layer: Layer,
    pub(super) instance: wgpu::Instance,
    /// Created with the first drawable, shared by all of them
    pub(super) gpu: Option<Arc<GpuContext>>,
}

impl LayerFactory {
    fn build(
        &mut self,
        output: &wl_output::WlOutput,
        geometry: &OutputGeometry,
    ) -> Result<OutputSurface> {
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

        // SAFETY: the drawable is dropped no later than the display thread
        // that owns both the connection and the layer surface.
        let surface =
            unsafe { create_wgpu_surface(&self.instance, &self.conn, layer.wl_surface()) }?;

        let gpu = match &self.gpu {
            Some(gpu) => Arc::clone(gpu),
            None => {
                let gpu = Arc::new(GpuContext::new(&self.instance, &surface)?);
                self.gpu = Some(Arc::clone(&gpu));
                gpu
            }
        };

        let drawable = Drawable::new(gpu, surface)
            .with_context(|| format!("Failed to create drawable for {}", geometry.label))?;

        // Initial commit without a buffer asks the compositor to configure us
        layer.commit();

        log::info!(
            "Layer surface created for {} ({}x{} @{}x)",
            geometry.label,
            geometry.width,
            geometry.height,
            geometry.scale
        );

        Ok(OutputSurface {
            label: geometry.label.clone(),
            layer: Some(layer),
            drawable: Some(drawable),
            width: geometry.width,
            height: geometry.height,
            scale: geometry.scale.max(1),
            configured: false,
            pacing: FramePacing::new(),
        })
    }
}

impl SurfaceFactory<wl_output::WlOutput> for LayerFactory {
    type Surface = OutputSurface;
    type Error = anyhow::Error;

    fn create_surface(
        &mut self,
        handle: &wl_output::WlOutput,
        output: &OutputGeometry,
    ) -> Result<OutputSurface> {
        self.build(handle, output)
    }
}
