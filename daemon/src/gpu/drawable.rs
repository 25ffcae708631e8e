//! Per-output GPU drawable: a wgpu surface on top of a Wayland surface, plus
//! the texture the latest video frame is uploaded into.

use anyhow::{Context, Result};
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, WaylandDisplayHandle, WaylandWindowHandle,
};
use std::ptr::NonNull;
use std::sync::Arc;
use wayland_client::{Connection, Proxy, protocol::wl_surface};
use wgpu::util::DeviceExt;

use super::GpuContext;
use super::pipeline_builder::{PipelineBuilder, PipelineConfig, create_pipeline_layout};
use crate::engine::VideoFrame;

/// Shader parameters, laid out to match `Params` in video.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameParams {
    uv_scale: [f32; 2],
    uv_offset: [f32; 2],
    flip_y: f32,
    _pad: [f32; 3],
}

impl FrameParams {
    /// Crop the frame so it covers the target without distortion
    fn cover(frame: (u32, u32), target: (u32, u32), flipped: bool) -> Self {
        let (fw, fh) = (frame.0.max(1) as f32, frame.1.max(1) as f32);
        let (tw, th) = (target.0.max(1) as f32, target.1.max(1) as f32);
        let frame_aspect = fw / fh;
        let target_aspect = tw / th;

        let uv_scale = if frame_aspect > target_aspect {
            [target_aspect / frame_aspect, 1.0]
        } else {
            [1.0, frame_aspect / target_aspect]
        };

        Self {
            uv_scale,
            uv_offset: [(1.0 - uv_scale[0]) / 2.0, (1.0 - uv_scale[1]) / 2.0],
            flip_y: if flipped { 1.0 } else { 0.0 },
            _pad: [0.0; 3],
        }
    }
}

struct FrameTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

pub struct Drawable {
    gpu: Arc<GpuContext>,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    configured: bool,
    pipeline: wgpu::RenderPipeline,
    params: wgpu::Buffer,
    params_value: FrameParams,
    frame: Option<FrameTexture>,
    /// Sequence number of the frame currently in `frame`
    uploaded: u64,
}

/// Create a wgpu surface for a Wayland surface
///
/// # Safety
///
/// `wl_surface` and `conn` must outlive the returned surface.
pub unsafe fn create_wgpu_surface(
    instance: &wgpu::Instance,
    conn: &Connection,
    wl_surface: &wl_surface::WlSurface,
) -> Result<wgpu::Surface<'static>> {
    let display = NonNull::new(conn.backend().display_ptr() as *mut _)
        .context("Wayland display pointer is null")?;
    let window = NonNull::new(wl_surface.id().as_ptr() as *mut _)
        .context("Wayland surface pointer is null")?;

    let target = wgpu::SurfaceTargetUnsafe::RawHandle {
        raw_display_handle: RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display)),
        raw_window_handle: RawWindowHandle::Wayland(WaylandWindowHandle::new(window)),
    };

    unsafe { instance.create_surface_unsafe(target) }.context("Failed to create GPU surface")
}

impl Drawable {
    pub fn new(gpu: Arc<GpuContext>, surface: wgpu::Surface<'static>) -> Result<Self> {
        let caps = surface.get_capabilities(&gpu.adapter);

        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("GPU surface supports no formats")?;

        // Mailbox never blocks when the compositor stops consuming frames
        let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        let alpha_mode = if caps.alpha_modes.contains(&wgpu::CompositeAlphaMode::Opaque) {
            wgpu::CompositeAlphaMode::Opaque
        } else {
            caps.alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: 1,
            height: 1,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let layout = create_pipeline_layout(
            &gpu.device,
            "Video Pipeline Layout",
            &[&gpu.frame_layout],
        );
        let pipeline = PipelineBuilder::new(
            &gpu.device,
            &gpu.shader,
            PipelineConfig::for_surface(format),
        )
        .with_label("Video Pipeline")
        .with_layout(&layout)
        .build();

        let params_value = FrameParams::cover((1, 1), (1, 1), false);
        let params = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frame Params"),
                contents: bytemuck::bytes_of(&params_value),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        log::debug!(
            "Drawable created (format {:?}, present mode {:?})",
            format,
            present_mode
        );

        Ok(Self {
            gpu,
            surface,
            config,
            configured: false,
            pipeline,
            params,
            params_value,
            frame: None,
            uploaded: 0,
        })
    }

    /// Resize the swapchain in place
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if self.configured && self.config.width == width && self.config.height == height {
            return;
        }

        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.gpu.device, &self.config);
        self.configured = true;
        // Crop parameters depend on the target size
        self.uploaded = 0;
        log::debug!("Drawable resized to {}x{}", width, height);
    }

    /// Draw the newest frame and present it.
    ///
    /// `before_present` runs after the GPU work is submitted and before the
    /// surface is committed, which is where the next frame callback must be
    /// requested.
    pub fn render(
        &mut self,
        frame: Option<&VideoFrame>,
        before_present: impl FnOnce(),
    ) -> Result<()> {
        if !self.configured {
            anyhow::bail!("Drawable is not configured yet");
        }

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                log::debug!("Surface {:?}, reconfiguring", e);
                self.surface.configure(&self.gpu.device, &self.config);
                return Err(e).context("Failed to acquire frame");
            }
            Err(e) => return Err(e).context("Failed to acquire frame"),
        };

        if let Some(frame) = frame {
            self.upload(frame)?;
        }

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Video Render Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Video Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_viewport(
                0.0,
                0.0,
                self.config.width as f32,
                self.config.height as f32,
                0.0,
                1.0,
            );

            if let Some(texture) = &self.frame {
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &texture.bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        before_present();
        output.present();

        Ok(())
    }

    /// Copy a frame into the texture unless it is already there
    fn upload(&mut self, frame: &VideoFrame) -> Result<()> {
        if frame.sequence == self.uploaded && self.frame.is_some() {
            return Ok(());
        }

        let row_bytes = frame.width as usize * 4;
        let needed = (frame.stride as usize) * (frame.height.max(1) as usize - 1) + row_bytes;
        if frame.width == 0 || frame.height == 0 || frame.data.len() < needed {
            anyhow::bail!(
                "Frame #{} is truncated ({}x{}, stride {}, {} bytes)",
                frame.sequence,
                frame.width,
                frame.height,
                frame.stride,
                frame.data.len()
            );
        }

        let recreate = self
            .frame
            .as_ref()
            .is_none_or(|t| t.width != frame.width || t.height != frame.height);
        if recreate {
            self.frame = Some(self.create_frame_texture(frame.width, frame.height));
            log::debug!("Frame texture sized {}x{}", frame.width, frame.height);
        }

        if let Some(texture) = &self.frame {
            self.gpu.queue.write_texture(
                texture.texture.as_image_copy(),
                &frame.data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(frame.stride),
                    rows_per_image: Some(frame.height),
                },
                wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        let params = FrameParams::cover(
            (frame.width, frame.height),
            (self.config.width, self.config.height),
            frame.flipped,
        );
        if params != self.params_value {
            self.gpu
                .queue
                .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
            self.params_value = params;
        }

        self.uploaded = frame.sequence;
        log::trace!("Uploaded frame #{}", frame.sequence);
        Ok(())
    }

    fn create_frame_texture(&self, width: u32, height: u32) -> FrameTexture {
        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Video Frame Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = self
            .gpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Video Frame Bind Group"),
                layout: &self.gpu.frame_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.gpu.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.params.as_entire_binding(),
                    },
                ],
            });

        FrameTexture {
            texture,
            bind_group,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cover_crops_wide_frames_horizontally() {
        let params = FrameParams::cover((3840, 1080), (1920, 1080), false);
        assert_eq!(params.uv_scale, [0.5, 1.0]);
        assert_eq!(params.uv_offset, [0.25, 0.0]);
        assert_eq!(params.flip_y, 0.0);
    }

    #[test]
    fn test_cover_crops_tall_frames_vertically() {
        let params = FrameParams::cover((1000, 1000), (2000, 1000), true);
        assert_eq!(params.uv_scale, [1.0, 0.5]);
        assert_eq!(params.uv_offset, [0.0, 0.25]);
        assert_eq!(params.flip_y, 1.0);
    }

    #[test]
    fn test_cover_matching_aspect_is_identity() {
        let params = FrameParams::cover((1280, 720), (2560, 1440), false);
        assert_eq!(params.uv_scale, [1.0, 1.0]);
        assert_eq!(params.uv_offset, [0.0, 0.0]);
    }

    #[test]
    fn test_params_match_uniform_layout() {
        assert_eq!(std::mem::size_of::<FrameParams>(), 32);
    }
}
