use std::collections::HashMap;
use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::backend::{
    GraphicsBackend, ProgramId, ShaderId, TextureId, UniformLocation, UniformUpload,
};
use crate::compile;
use crate::error::{BackendError, EngineError, ShaderStage};
use crate::textures::DecodedImage;
use crate::types::{GpuPowerPreference, TextureUnit};

use super::context::GpuContext;
use super::pipeline::{create_uniform_layout, GpuProgram};
use super::target::{Blitter, OffscreenTarget};
use super::textures::TextureStore;

struct CompiledStage {
    stage: ShaderStage,
    source: String,
}

/// [`GraphicsBackend`] on top of `wgpu`, drawing into a winit window.
pub struct WgpuBackend {
    // Declared before the window so the surface is dropped first.
    context: GpuContext,
    uniform_layout: wgpu::BindGroupLayout,
    blitter: Blitter,
    target: OffscreenTarget,
    textures: TextureStore,
    shaders: HashMap<ShaderId, CompiledStage>,
    programs: HashMap<ProgramId, GpuProgram>,
    current: Option<ProgramId>,
    viewport: PhysicalSize<u32>,
    pending_clear: bool,
    next_id: u32,
    window: Arc<Window>,
}

impl WgpuBackend {
    pub fn new(window: Arc<Window>, power: GpuPowerPreference) -> Result<Self, EngineError> {
        let size = window.inner_size();
        let context = GpuContext::new(window.as_ref(), size, power)
            .map_err(|err| EngineError::ContextUnavailable(format!("{err:#}")))?;
        let uniform_layout = create_uniform_layout(&context.device);
        let textures = TextureStore::new(&context.device, &context.queue);
        let blitter = Blitter::new(&context.device, context.surface_format);
        let target = OffscreenTarget::new(&context.device, &blitter, context.size);
        let viewport = context.size;

        Ok(Self {
            context,
            uniform_layout,
            blitter,
            target,
            textures,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            current: None,
            viewport,
            pending_clear: true,
            next_id: 0,
            window,
        })
    }

    pub fn surface_size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn acquire_frame(&self) -> Result<wgpu::SurfaceTexture, BackendError> {
        self.context
            .surface
            .get_current_texture()
            .map_err(surface_error)
    }
}

impl GraphicsBackend for WgpuBackend {
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderId, BackendError> {
        compile::compile_stage(source, stage).map_err(BackendError::Diagnostic)?;
        let id = ShaderId(self.allocate());
        self.shaders.insert(
            id,
            CompiledStage {
                stage,
                source: source.to_string(),
            },
        );
        Ok(id)
    }

    fn release_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader);
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<ProgramId, BackendError> {
        let (vertex_source, fragment_source) =
            match (self.shaders.get(&vertex), self.shaders.get(&fragment)) {
                (Some(v), Some(f))
                    if v.stage == ShaderStage::Vertex && f.stage == ShaderStage::Fragment =>
                {
                    (v.source.clone(), f.source.clone())
                }
                _ => {
                    return Err(BackendError::Diagnostic(
                        "link requires one compiled vertex and one compiled fragment shader"
                            .into(),
                    ))
                }
            };

        let (vertex, fragment) = compile::link_stages(&vertex_source, &fragment_source)
            .map_err(BackendError::Diagnostic)?;
        let program = GpuProgram::link(
            &self.context.device,
            &self.uniform_layout,
            self.textures.layout(),
            self.context.surface_format,
            &vertex,
            &fragment,
        )
        .map_err(BackendError::Diagnostic)?;

        let id = ProgramId(self.allocate());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn use_program(&mut self, program: ProgramId) {
        if self.programs.contains_key(&program) {
            self.current = Some(program);
        }
    }

    fn release_program(&mut self, program: ProgramId) {
        if let Some(program_state) = self.programs.remove(&program) {
            program_state.destroy();
        }
        if self.current == Some(program) {
            self.current = None;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let index = self.programs.get(&program)?.location(name)?;
        Some(UniformLocation { program, index })
    }

    fn upload_uniform(
        &mut self,
        location: UniformLocation,
        value: UniformUpload<'_>,
    ) -> Result<(), BackendError> {
        let program = self.programs.get_mut(&location.program).ok_or_else(|| {
            BackendError::Diagnostic(format!("unknown program {}", location.program.0))
        })?;
        program
            .write(location.index, value)
            .map_err(BackendError::Diagnostic)
    }

    fn create_texture(&mut self, unit: TextureUnit) -> Result<TextureId, BackendError> {
        Ok(self
            .textures
            .create(&self.context.device, &self.context.queue, unit))
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        image: &DecodedImage,
    ) -> Result<(), BackendError> {
        self.textures
            .upload(&self.context.device, &self.context.queue, texture, image)
            .map_err(BackendError::Diagnostic)
    }

    fn bind_texture(
        &mut self,
        unit: TextureUnit,
        texture: TextureId,
        _location: Option<UniformLocation>,
    ) {
        self.textures.bind(unit, texture);
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.textures.release(texture);
    }

    fn resize_buffers(&mut self, size: PhysicalSize<u32>) -> Result<(), BackendError> {
        let sizes = self.context.resize(self.window.inner_size(), size);
        tracing::debug!(
            surface_width = sizes.surface.width,
            surface_height = sizes.surface.height,
            target_width = sizes.target.width,
            target_height = sizes.target.height,
            "resized buffers"
        );
        self.target = OffscreenTarget::new(&self.context.device, &self.blitter, sizes.target);
        self.pending_clear = true;
        Ok(())
    }

    fn set_viewport(&mut self, size: PhysicalSize<u32>) {
        self.viewport = size;
    }

    fn clear(&mut self) {
        self.pending_clear = true;
    }

    fn draw_fullscreen(&mut self) -> Result<(), BackendError> {
        let Some(program_id) = self.current else {
            return Err(BackendError::Diagnostic("no program in use".into()));
        };

        let device = &self.context.device;
        let queue = &self.context.queue;
        let texture_group = self.textures.bind_group(device);
        let program = self
            .programs
            .get_mut(&program_id)
            .ok_or_else(|| BackendError::Diagnostic(format!("unknown program {}", program_id.0)))?;
        program.flush(queue);

        let view = &self.target.view;
        let extent = self.target.size;

        let load = if self.pending_clear {
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
        } else {
            wgpu::LoadOp::Load
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("effect encoder"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("effect pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            let width = self.viewport.width.clamp(1, extent.width.max(1));
            let height = self.viewport.height.clamp(1, extent.height.max(1));
            render_pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &program.uniform_bind_group, &[]);
            render_pass.set_bind_group(1, texture_group, &[]);
            render_pass.draw(0..program.vertex_count(), 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
        self.pending_clear = false;
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        let frame = self.acquire_frame()?;
        let frame_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("present encoder"),
                });
        self.target.blit_to(&self.blitter, &mut encoder, &frame_view);
        self.context
            .queue
            .submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        for (_, program) in self.programs.drain() {
            program.destroy();
        }
    }
}

fn surface_error(err: wgpu::SurfaceError) -> BackendError {
    match err {
        wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => BackendError::SurfaceLost,
        wgpu::SurfaceError::Timeout => {
            tracing::debug!("surface timeout; retrying next frame");
            BackendError::SurfaceLost
        }
        other => {
            tracing::warn!(error = %other, "surface error; reconfiguring");
            BackendError::SurfaceLost
        }
    }
}
