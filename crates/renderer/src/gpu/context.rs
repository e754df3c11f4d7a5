use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;

use crate::types::GpuPowerPreference;

pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    pub surface_format: wgpu::TextureFormat,
    pub max_dimension: u32,
}

/// Extents for one resize: the surface follows the window, the offscreen
/// target follows the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BufferSizes {
    pub surface: PhysicalSize<u32>,
    pub target: PhysicalSize<u32>,
}

impl BufferSizes {
    pub fn new(
        window: PhysicalSize<u32>,
        backing: PhysicalSize<u32>,
        max_dimension: u32,
    ) -> Self {
        Self {
            surface: clamp_size(window, max_dimension),
            target: clamp_size(backing, max_dimension),
        }
    }
}

impl GpuContext {
    pub(crate) fn new<T>(
        target: &T,
        initial_size: PhysicalSize<u32>,
        gpu_power: GpuPowerPreference,
    ) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;

        // The caller keeps the window alive for as long as the context exists.
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let power_preference = match gpu_power {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let max_dimension = limits.max_texture_dimension_2d;
        let size = clamp_size(initial_size, max_dimension);

        let surface_caps = surface.get_capabilities(&adapter);
        let fallback_format = *surface_caps
            .formats
            .first()
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or_else(|| {
                tracing::warn!(
                    ?fallback_format,
                    "no linear (non-sRGB) surface format available; colors may be brighter than authored"
                );
                fallback_format
            });

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("shaderfield device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .or_else(|| surface_caps.present_modes.first().copied())
            .unwrap_or(wgpu::PresentMode::Fifo);

        let alpha_mode = surface_caps
            .alpha_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::CompositeAlphaMode::PreMultiplied)
            .or_else(|| surface_caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        tracing::debug!(?present_mode, ?alpha_mode, format = ?surface_format, "configuring surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            surface,
            device,
            queue,
            config,
            size,
            surface_format,
            max_dimension,
        })
    }

    /// Reconfigures the surface to the window's physical size and returns
    /// the extents to use for the surface and the offscreen target.
    pub(crate) fn resize(
        &mut self,
        window: PhysicalSize<u32>,
        backing: PhysicalSize<u32>,
    ) -> BufferSizes {
        let sizes = BufferSizes::new(window, backing, self.max_dimension);
        if sizes.target != backing {
            tracing::warn!(
                requested_width = backing.width,
                requested_height = backing.height,
                max = self.max_dimension,
                "drawing buffer clamped to GPU limits"
            );
        }
        let size = sizes.surface;
        self.size = size;
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);
        sizes
    }
}

fn clamp_size(size: PhysicalSize<u32>, max_dimension: u32) -> PhysicalSize<u32> {
    PhysicalSize::new(
        size.width.clamp(1, max_dimension.max(1)),
        size.height.clamp(1, max_dimension.max(1)),
    )
}
