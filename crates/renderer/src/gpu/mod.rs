//! `wgpu` implementation of the graphics backend.
//!
//! - `context` owns instance/device/surface wiring and reconfigures the
//!   swapchain to the window's physical size when it resizes.
//! - `target` is the persistent offscreen color buffer frames are drawn into
//!   at backing resolution, and the blit that scales it onto the surface.
//! - `textures` keeps effect textures and the set 1 bind group.
//! - `pipeline` links translated GLSL into render pipelines and mirrors the
//!   engine and effect uniform blocks on the CPU.
//! - `backend` glues everything together behind
//!   [`GraphicsBackend`](crate::backend::GraphicsBackend).

mod backend;
mod context;
mod pipeline;
mod target;
mod textures;

pub use backend::WgpuBackend;
