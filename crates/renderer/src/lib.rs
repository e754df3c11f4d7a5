//! Renderer crate for shaderfield.
//!
//! An [`Engine`] compiles an effect's fragment shader against a full-screen
//! quad, uploads its static uniforms, loads its textures in the background,
//! and then draws on every eligible tick of the host loop. The overall flow:
//!
//! ```text
//!   CLI / shaderfield
//!          │ EngineConfig
//!          ▼
//!   run_window ──▶ Engine<WgpuBackend> ──▶ winit event loop ──▶ Engine::tick()
//!                       │                                          │
//!                       └─▶ resize() on Resized/ScaleFactorChanged └─▶ per-frame uniforms ─▶ draw
//! ```
//!
//! All GPU traffic goes through [`GraphicsBackend`], so the engine can be
//! driven by [`WgpuBackend`] in a window or by an in-memory backend in tests.
//! Effect shaders are written in the ES 3.00 dialect and translated at link
//! time into Vulkan GLSL that `wgpu` accepts.

pub mod backend;
pub mod clock;
pub mod compile;
pub mod engine;
pub mod error;
mod gpu;
pub mod program;
pub mod resize;
pub mod scheduler;
pub mod textures;
pub mod types;
pub mod uniforms;
mod window;

#[cfg(test)]
mod testing;

pub use backend::{GraphicsBackend, ProgramId, ShaderId, TextureId, UniformLocation, UniformUpload};
pub use clock::{Clock, ClockState, ManualClock, SystemClock};
pub use compile::{check_effect, VERTEX_SHADER_GLSL};
pub use engine::{Engine, EngineStatus, TextureSlot, TickOutcome};
pub use error::{BackendError, EngineError, ShaderStage};
pub use gpu::WgpuBackend;
pub use resize::{ResizeCoordinator, SurfaceMetrics};
pub use scheduler::{FrameBudget, SkipReason};
pub use textures::{DecodedImage, DefaultTextureSource, TextureSource};
pub use types::{
    EngineConfig, GpuPowerPreference, LoopState, TextureUnit, Uniform, UniformKind, UniformMap,
    MAX_TEXTURE_UNITS,
};
pub use window::{run_window, ReloadFn, WindowOptions};
