//! In-memory [`GraphicsBackend`] that records every call for assertions.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use winit::dpi::PhysicalSize;

use crate::backend::{
    GraphicsBackend, ProgramId, ShaderId, TextureId, UniformLocation, UniformUpload,
};
use crate::error::{BackendError, ShaderStage};
use crate::textures::DecodedImage;
use crate::types::TextureUnit;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Recorded {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    FloatArray(Vec<f32>),
    Vec3Array(Vec<f32>),
}

impl From<UniformUpload<'_>> for Recorded {
    fn from(value: UniformUpload<'_>) -> Self {
        match value {
            UniformUpload::Float(value) => Recorded::Float(value),
            UniformUpload::Vec2(value) => Recorded::Vec2(value),
            UniformUpload::Vec3(value) => Recorded::Vec3(value),
            UniformUpload::FloatArray(values) => Recorded::FloatArray(values.to_vec()),
            UniformUpload::Vec3Array(values) => Recorded::Vec3Array(values.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CompileShader(ShaderStage, ShaderId),
    ReleaseShader(ShaderId),
    LinkProgram {
        vertex: ShaderId,
        fragment: ShaderId,
    },
    UseProgram(ProgramId),
    ReleaseProgram(ProgramId),
    Upload {
        name: String,
        value: Recorded,
    },
    CreateTexture(TextureUnit, TextureId),
    UploadTexture {
        texture: TextureId,
        width: u32,
        height: u32,
    },
    BindTexture(TextureUnit, TextureId),
    ReleaseTexture(TextureId),
    ResizeBuffers(PhysicalSize<u32>),
    Viewport(PhysicalSize<u32>),
    Clear,
    Draw,
    Present,
}

impl Call {
    pub fn float(name: &str, value: f32) -> Self {
        Call::Upload {
            name: name.to_string(),
            value: Recorded::Float(value),
        }
    }

    pub fn vec2(name: &str, value: [f32; 2]) -> Self {
        Call::Upload {
            name: name.to_string(),
            value: Recorded::Vec2(value),
        }
    }

    pub fn vec3(name: &str, value: [f32; 3]) -> Self {
        Call::Upload {
            name: name.to_string(),
            value: Recorded::Vec3(value),
        }
    }

    pub fn float_array(name: &str, values: &[f32]) -> Self {
        Call::Upload {
            name: name.to_string(),
            value: Recorded::FloatArray(values.to_vec()),
        }
    }

    pub fn vec3_array(name: &str, values: &[f32]) -> Self {
        Call::Upload {
            name: name.to_string(),
            value: Recorded::Vec3Array(values.to_vec()),
        }
    }

    pub fn is_upload_of(&self, uniform: &str) -> bool {
        matches!(self, Call::Upload { name, .. } if name == uniform)
    }
}

/// Shared handle to a backend's call log; stays readable after the engine drops.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn since(&self, mark: usize) -> Vec<Call> {
        self.0.borrow()[mark..].to_vec()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.0.borrow().iter().filter(|call| predicate(call)).count()
    }

    pub fn draws(&self) -> usize {
        self.count(|call| matches!(call, Call::Draw))
    }

    fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    log: CallLog,
    next_id: u32,
    compile_failure: Option<(ShaderStage, String)>,
    link_failure: Option<String>,
    active: Option<BTreeSet<String>>,
    rejected: BTreeSet<String>,
    locations: RefCell<Vec<String>>,
    present_failures: VecDeque<BackendError>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts which uniform names resolve to a location; all do by default.
    pub fn with_active_uniforms<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn rejecting_uniform(mut self, name: &str) -> Self {
        self.rejected.insert(name.to_string());
        self
    }

    pub fn failing_compile(mut self, stage: ShaderStage, diagnostic: &str) -> Self {
        self.compile_failure = Some((stage, diagnostic.to_string()));
        self
    }

    pub fn failing_link(mut self, diagnostic: &str) -> Self {
        self.link_failure = Some(diagnostic.to_string());
        self
    }

    pub fn failing_present(mut self, error: BackendError) -> Self {
        self.present_failures.push_back(error);
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.calls()
    }

    pub fn last_upload(&self, name: &str) -> Option<Call> {
        self.log
            .calls()
            .into_iter()
            .rev()
            .find(|call| call.is_upload_of(name))
    }

    pub fn fake_program(&mut self) -> ProgramId {
        ProgramId(self.allocate())
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl GraphicsBackend for RecordingBackend {
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        _source: &str,
    ) -> Result<ShaderId, BackendError> {
        if let Some((failing, diagnostic)) = &self.compile_failure {
            if *failing == stage {
                return Err(BackendError::Diagnostic(diagnostic.clone()));
            }
        }
        let id = ShaderId(self.allocate());
        self.log.push(Call::CompileShader(stage, id));
        Ok(id)
    }

    fn release_shader(&mut self, shader: ShaderId) {
        self.log.push(Call::ReleaseShader(shader));
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
    ) -> Result<ProgramId, BackendError> {
        self.log.push(Call::LinkProgram { vertex, fragment });
        if let Some(diagnostic) = &self.link_failure {
            return Err(BackendError::Diagnostic(diagnostic.clone()));
        }
        Ok(ProgramId(self.allocate()))
    }

    fn use_program(&mut self, program: ProgramId) {
        self.log.push(Call::UseProgram(program));
    }

    fn release_program(&mut self, program: ProgramId) {
        self.log.push(Call::ReleaseProgram(program));
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        if let Some(active) = &self.active {
            if !active.contains(name) {
                return None;
            }
        }
        let mut locations = self.locations.borrow_mut();
        let index = match locations.iter().position(|known| known == name) {
            Some(index) => index,
            None => {
                locations.push(name.to_string());
                locations.len() - 1
            }
        };
        Some(UniformLocation {
            program,
            index: index as u32,
        })
    }

    fn upload_uniform(
        &mut self,
        location: UniformLocation,
        value: UniformUpload<'_>,
    ) -> Result<(), BackendError> {
        let name = self
            .locations
            .borrow()
            .get(location.index as usize)
            .cloned()
            .unwrap_or_default();
        if self.rejected.contains(&name) {
            return Err(BackendError::Diagnostic(format!(
                "uniform '{name}' cannot accept {}",
                value.shape()
            )));
        }
        self.log.push(Call::Upload {
            name,
            value: value.into(),
        });
        Ok(())
    }

    fn create_texture(&mut self, unit: TextureUnit) -> Result<TextureId, BackendError> {
        let id = TextureId(self.allocate());
        self.log.push(Call::CreateTexture(unit, id));
        Ok(id)
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        image: &DecodedImage,
    ) -> Result<(), BackendError> {
        self.log.push(Call::UploadTexture {
            texture,
            width: image.width,
            height: image.height,
        });
        Ok(())
    }

    fn bind_texture(
        &mut self,
        unit: TextureUnit,
        texture: TextureId,
        _location: Option<UniformLocation>,
    ) {
        self.log.push(Call::BindTexture(unit, texture));
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.log.push(Call::ReleaseTexture(texture));
    }

    fn resize_buffers(&mut self, size: PhysicalSize<u32>) -> Result<(), BackendError> {
        self.log.push(Call::ResizeBuffers(size));
        Ok(())
    }

    fn set_viewport(&mut self, size: PhysicalSize<u32>) {
        self.log.push(Call::Viewport(size));
    }

    fn clear(&mut self) {
        self.log.push(Call::Clear);
    }

    fn draw_fullscreen(&mut self) -> Result<(), BackendError> {
        self.log.push(Call::Draw);
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        if let Some(err) = self.present_failures.pop_front() {
            return Err(err);
        }
        self.log.push(Call::Present);
        Ok(())
    }
}
