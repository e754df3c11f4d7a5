//! Seam between the engine and the GPU API.
//!
//! The engine never touches `wgpu` directly. Every GPU side effect goes
//! through [`GraphicsBackend`], which keeps the frame sequencing testable with
//! a recording backend and lets [`WgpuBackend`](crate::gpu::WgpuBackend) own
//! all device state.

use winit::dpi::PhysicalSize;

use crate::error::{BackendError, ShaderStage};
use crate::textures::DecodedImage;
use crate::types::TextureUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Resolved uniform slot inside one linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub program: ProgramId,
    pub index: u32,
}

/// Value shapes a backend must be able to upload.
///
/// `Vec3Array` carries the vector-major flattened floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformUpload<'a> {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    FloatArray(&'a [f32]),
    Vec3Array(&'a [f32]),
}

impl UniformUpload<'_> {
    pub fn shape(&self) -> &'static str {
        match self {
            UniformUpload::Float(_) => "float",
            UniformUpload::Vec2(_) => "vec2",
            UniformUpload::Vec3(_) => "vec3",
            UniformUpload::FloatArray(_) => "float[]",
            UniformUpload::Vec3Array(_) => "vec3[]",
        }
    }
}

pub trait GraphicsBackend {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str)
        -> Result<ShaderId, BackendError>;
    fn release_shader(&mut self, shader: ShaderId);
    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<ProgramId, BackendError>;
    fn use_program(&mut self, program: ProgramId);
    fn release_program(&mut self, program: ProgramId);

    /// Returns `None` when the program does not declare (or never uses) `name`.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn upload_uniform(
        &mut self,
        location: UniformLocation,
        value: UniformUpload<'_>,
    ) -> Result<(), BackendError>;

    /// Allocates an empty texture with clamp-to-edge wrapping and linear filtering.
    fn create_texture(&mut self, unit: TextureUnit) -> Result<TextureId, BackendError>;
    fn upload_texture(
        &mut self,
        texture: TextureId,
        image: &DecodedImage,
    ) -> Result<(), BackendError>;
    fn bind_texture(
        &mut self,
        unit: TextureUnit,
        texture: TextureId,
        location: Option<UniformLocation>,
    );
    fn release_texture(&mut self, texture: TextureId);

    /// Sizes the drawing buffer to `size` backing pixels. The visible surface
    /// keeps tracking the window's own physical size.
    fn resize_buffers(&mut self, size: PhysicalSize<u32>) -> Result<(), BackendError>;
    fn set_viewport(&mut self, size: PhysicalSize<u32>);
    fn clear(&mut self);
    fn draw_fullscreen(&mut self) -> Result<(), BackendError>;
    /// Scales the drawing buffer onto the visible surface.
    fn present(&mut self) -> Result<(), BackendError>;
}
