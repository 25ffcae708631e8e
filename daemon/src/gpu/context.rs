/// GPU context management - handles wgpu device/queue initialization
use anyhow::{Context, Result};

use super::pipeline_builder::bind_group_entries;

/// GPU context shared by every output's drawable
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    /// Frame texture + sampler + params uniform
    pub frame_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    pub shader: wgpu::ShaderModule,
}

impl GpuContext {
    /// Create a new GPU context able to present to `surface`
    ///
    /// On Linux, this will typically use Vulkan.
    pub fn new(instance: &wgpu::Instance, surface: &wgpu::Surface<'_>) -> Result<Self> {
        log::info!("Initializing GPU context...");

        let adapter = pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: Some(surface),
                force_fallback_adapter: false,
            },
        ))
        .context("Failed to find suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("vidpaper GPU device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                ..Default::default()
            },
        ))
        .context("Failed to create GPU device")?;

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Bind Group Layout"),
            entries: &[
                bind_group_entries::texture(0),
                bind_group_entries::sampler(1),
                bind_group_entries::uniform_buffer(2),
            ],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Video Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/video.wgsl").into()),
        });

        log::info!(
            "GPU context initialized (max texture size {})",
            device.limits().max_texture_dimension_2d
        );

        Ok(Self {
            adapter,
            device,
            queue,
            adapter_info,
            frame_layout,
            sampler,
            shader,
        })
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}
