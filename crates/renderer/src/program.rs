use crate::backend::{GraphicsBackend, ProgramId};
use crate::error::{BackendError, EngineError, ShaderStage};

/// Compiles both stages, links them, and activates the resulting program.
///
/// Intermediate shader objects are always released. On failure nothing stays
/// bound and the diagnostic is returned with the failing stage.
pub fn build_program<B>(
    backend: &mut B,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<ProgramId, EngineError>
where
    B: GraphicsBackend + ?Sized,
{
    let vertex = backend
        .compile_shader(ShaderStage::Vertex, vertex_source)
        .map_err(|err| compile_error(ShaderStage::Vertex, err))?;

    let fragment = match backend.compile_shader(ShaderStage::Fragment, fragment_source) {
        Ok(fragment) => fragment,
        Err(err) => {
            backend.release_shader(vertex);
            return Err(compile_error(ShaderStage::Fragment, err));
        }
    };

    let linked = backend.link_program(vertex, fragment);
    backend.release_shader(vertex);
    backend.release_shader(fragment);

    let program = linked.map_err(|err| EngineError::Link {
        diagnostic: err.to_string(),
    })?;
    backend.use_program(program);
    tracing::debug!(program = program.0, "shader program linked");
    Ok(program)
}

fn compile_error(stage: ShaderStage, err: BackendError) -> EngineError {
    EngineError::Compile {
        stage,
        diagnostic: err.to_string(),
    }
}
