//! Uniform binding protocol: typed values to backend upload calls.

use crate::backend::{GraphicsBackend, ProgramId, UniformUpload};
use crate::types::{Uniform, UniformMap};

pub const TIME_UNIFORM: &str = "u_time";
pub const SCROLL_UNIFORM: &str = "u_scroll";
pub const EVENT_TIME_UNIFORM: &str = "u_event_time";
pub const RESOLUTION_UNIFORM: &str = "u_resolution";

/// Names the engine recomputes on every drawn frame.
pub const ENGINE_UNIFORMS: [&str; 4] = [
    TIME_UNIFORM,
    SCROLL_UNIFORM,
    EVENT_TIME_UNIFORM,
    RESOLUTION_UNIFORM,
];

/// Flattens `[[a, b, c], [d, e, f]]` into `[a, b, c, d, e, f]`.
pub fn flatten_vec3(values: &[[f32; 3]]) -> Vec<f32> {
    values.iter().flat_map(|vector| vector.iter().copied()).collect()
}

/// Uploads a single raw value; returns `false` when nothing was written.
///
/// Names without a location are skipped silently. Shape mismatches are
/// logged and skipped.
pub fn upload<B>(backend: &mut B, program: ProgramId, name: &str, value: UniformUpload<'_>) -> bool
where
    B: GraphicsBackend + ?Sized,
{
    let Some(location) = backend.uniform_location(program, name) else {
        tracing::trace!(uniform = name, "uniform not active in program; skipping");
        return false;
    };
    match backend.upload_uniform(location, value) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                uniform = name,
                shape = value.shape(),
                error = %err,
                "uniform upload rejected; skipping"
            );
            false
        }
    }
}

/// Dispatches a typed uniform to the matching upload call.
pub fn apply_uniform<B>(backend: &mut B, program: ProgramId, name: &str, value: &Uniform) -> bool
where
    B: GraphicsBackend + ?Sized,
{
    match value {
        Uniform::Scalar(value) => upload(backend, program, name, UniformUpload::Float(*value)),
        Uniform::Vector3(value) => upload(backend, program, name, UniformUpload::Vec3(*value)),
        Uniform::ScalarArray(values) => {
            upload(backend, program, name, UniformUpload::FloatArray(values))
        }
        Uniform::Vector3Array(values) => {
            let flat = flatten_vec3(values);
            upload(backend, program, name, UniformUpload::Vec3Array(&flat))
        }
    }
}

/// Uploads every uniform in `uniforms`; returns how many reached the GPU.
pub fn apply_uniforms<B>(backend: &mut B, program: ProgramId, uniforms: &UniformMap) -> usize
where
    B: GraphicsBackend + ?Sized,
{
    backend.use_program(program);
    let mut uploaded = 0;
    for (name, value) in uniforms {
        if apply_uniform(backend, program, name, value) {
            uploaded += 1;
        }
    }
    uploaded
}
