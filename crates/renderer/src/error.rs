use std::fmt;

/// Programmable pipeline stage a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Terminal failures of an engine instance.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{stage} shader failed to compile:\n{diagnostic}")]
    Compile {
        stage: ShaderStage,
        diagnostic: String,
    },
    #[error("shader program failed to link:\n{diagnostic}")]
    Link { diagnostic: String },
    #[error("graphics context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("texture {index} ({locator}) failed to load: {message}")]
    TextureLoad {
        index: usize,
        locator: String,
        message: String,
    },
    #[error("texture unit {index} is outside the supported range 0-15")]
    TextureUnitRange { index: usize },
    #[error("failed to present frame: {0}")]
    Presentation(String),
}

/// Errors reported by a [`GraphicsBackend`](crate::backend::GraphicsBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Compiler, linker, or validation output meant for humans.
    #[error("{0}")]
    Diagnostic(String),
    /// The presentation surface must be reconfigured before the next frame.
    #[error("presentation surface lost or outdated")]
    SurfaceLost,
    #[error("GPU is out of memory")]
    OutOfMemory,
}
