use std::collections::BTreeMap;
use std::fmt;

/// Texture units addressable by an effect (`u_texture_0` through `u_texture_15`).
pub const MAX_TEXTURE_UNITS: usize = 16;

/// A typed uniform value supplied by the host.
///
/// The variant is the type tag, so a value can never disagree with the upload
/// call used for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Uniform {
    Scalar(f32),
    Vector3([f32; 3]),
    ScalarArray(Vec<f32>),
    Vector3Array(Vec<[f32; 3]>),
}

impl Uniform {
    pub fn kind(&self) -> UniformKind {
        match self {
            Uniform::Scalar(_) => UniformKind::Scalar,
            Uniform::Vector3(_) => UniformKind::Vector3,
            Uniform::ScalarArray(_) => UniformKind::ScalarArray,
            Uniform::Vector3Array(_) => UniformKind::Vector3Array,
        }
    }
}

/// Type tags accepted in effect manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Scalar,
    Vector3,
    ScalarArray,
    Vector3Array,
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformKind::Scalar => f.write_str("scalar"),
            UniformKind::Vector3 => f.write_str("vec3"),
            UniformKind::ScalarArray => f.write_str("scalar-array"),
            UniformKind::Vector3Array => f.write_str("vec3-array"),
        }
    }
}

/// Static uniforms keyed by their GLSL name.
pub type UniformMap = BTreeMap<String, Uniform>;

/// Whether the render loop should draw on eligible ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    #[default]
    Playing,
    Paused,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Playing => f.write_str("playing"),
            LoopState::Paused => f.write_str("paused"),
        }
    }
}

/// Index of a texture unit, guaranteed to be below [`MAX_TEXTURE_UNITS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureUnit(u8);

impl TextureUnit {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Uniform name the unit is bound to in effect shaders.
    pub fn uniform_name(self) -> String {
        format!("u_texture_{}", self.0)
    }
}

impl TryFrom<usize> for TextureUnit {
    type Error = usize;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        if index < MAX_TEXTURE_UNITS {
            Ok(Self(index as u8))
        } else {
            Err(index)
        }
    }
}

impl fmt::Display for TextureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the engine needs to bring an effect to the screen.
///
/// `textures[i]` is loaded into texture unit `i`; locators are filesystem
/// paths or `http(s)://` URLs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// GLSL ES 3.00 style fragment shader source.
    pub fragment_source: String,
    /// Uniforms uploaded once after the program links.
    pub uniforms: UniformMap,
    /// Image locators, one per texture unit in order.
    pub textures: Vec<String>,
    /// Frame-rate ceiling; `None`, zero, or non-finite means unbounded.
    pub max_fps: Option<f32>,
    /// Loop state the engine starts in.
    pub initial_state: LoopState,
}

impl EngineConfig {
    pub fn new(fragment_source: impl Into<String>) -> Self {
        Self {
            fragment_source: fragment_source.into(),
            ..Self::default()
        }
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: Uniform) -> Self {
        self.uniforms.insert(name.into(), value);
        self
    }

    pub fn with_texture(mut self, locator: impl Into<String>) -> Self {
        self.textures.push(locator.into());
        self
    }

    pub fn with_max_fps(mut self, max_fps: f32) -> Self {
        self.max_fps = Some(max_fps);
        self
    }

    pub fn with_initial_state(mut self, state: LoopState) -> Self {
        self.initial_state = state;
        self
    }
}

/// GPU adapter preference forwarded to `wgpu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    #[default]
    Low,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_unit_accepts_sixteen_slots() {
        assert_eq!(TextureUnit::try_from(0).map(TextureUnit::index), Ok(0));
        assert_eq!(TextureUnit::try_from(15).map(TextureUnit::index), Ok(15));
        assert_eq!(TextureUnit::try_from(16), Err(16));
    }

    #[test]
    fn texture_unit_names_follow_index() {
        let unit = TextureUnit::try_from(7).unwrap();
        assert_eq!(unit.uniform_name(), "u_texture_7");
    }

    #[test]
    fn builder_collects_uniforms_and_textures() {
        let config = EngineConfig::new("void main() {}")
            .with_uniform("u_dot_size", Uniform::Scalar(2.0))
            .with_texture("noise.png")
            .with_max_fps(30.0)
            .with_initial_state(LoopState::Paused);

        assert_eq!(config.uniforms.len(), 1);
        assert_eq!(config.textures, vec!["noise.png".to_string()]);
        assert_eq!(config.max_fps, Some(30.0));
        assert_eq!(config.initial_state, LoopState::Paused);
        assert_eq!(
            config.uniforms.get("u_dot_size").map(Uniform::kind),
            Some(UniformKind::Scalar)
        );
    }
}
