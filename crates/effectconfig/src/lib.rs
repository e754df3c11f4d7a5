//! Effect manifests.
//!
//! A manifest names one effect, points at its fragment shader (or describes a
//! generated dot field), and lists the static uniforms and textures the
//! renderer should hand to it. Manifests are plain TOML and are validated as
//! a whole before anything touches the GPU.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Texture units available to one effect.
pub const MAX_TEXTURES: usize = 16;

const ENGINE_UNIFORMS: [&str; 4] = ["u_time", "u_resolution", "u_scroll", "u_event_time"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialState {
    #[default]
    Playing,
    Paused,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EffectManifest {
    pub name: String,
    #[serde(default)]
    pub shader: Option<PathBuf>,
    #[serde(default)]
    pub dots: Option<DotsSection>,
    #[serde(default)]
    pub max_fps: Option<f32>,
    #[serde(default)]
    pub initial_state: InitialState,
    #[serde(default)]
    pub textures: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub fire_event_every: Option<Duration>,
    #[serde(default)]
    pub uniforms: BTreeMap<String, UniformEntry>,
}

/// Where an effect's fragment shader comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EffectSource<'a> {
    Shader(&'a Path),
    Dots(&'a DotsSection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotsPreset {
    #[default]
    Default,
    Hover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

/// Overrides for the generated dot-field effect. Unset fields keep the
/// preset's values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DotsSection {
    #[serde(default)]
    pub preset: DotsPreset,
    /// RGB triples in the 0-255 range.
    pub colors: Option<Vec<[f32; 3]>>,
    pub opacities: Option<Vec<f32>>,
    pub total_size: Option<f32>,
    pub dot_size: Option<f32>,
    pub center: Option<Vec<Axis>>,
    pub init: Option<String>,
    pub shader: Option<String>,
}

/// Dot-field opacity table length.
pub const DOTS_OPACITY_COUNT: usize = 10;
/// Most colours a dot field blends between.
pub const DOTS_MAX_COLORS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct UniformEntry {
    #[serde(rename = "type")]
    pub tag: String,
    pub value: toml::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformTag {
    Scalar,
    Vector3,
    ScalarArray,
    Vector3Array,
}

impl UniformTag {
    /// Parses a manifest tag; the WebGL call names are accepted as aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scalar" | "float" | "uniform1f" => Some(Self::Scalar),
            "vec3" | "uniform3f" => Some(Self::Vector3),
            "scalar-array" | "uniform1fv" => Some(Self::ScalarArray),
            "vec3-array" | "uniform3fv" => Some(Self::Vector3Array),
            _ => None,
        }
    }
}

impl fmt::Display for UniformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformTag::Scalar => f.write_str("scalar"),
            UniformTag::Vector3 => f.write_str("vec3"),
            UniformTag::ScalarArray => f.write_str("scalar-array"),
            UniformTag::Vector3Array => f.write_str("vec3-array"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vector3([f32; 3]),
    ScalarArray(Vec<f32>),
    Vector3Array(Vec<[f32; 3]>),
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl EffectManifest {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: EffectManifest = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Reads and validates a manifest, resolving relative paths against the
    /// manifest's own directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::from_toml_str(&input)?;
        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        Ok(manifest)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        if let Some(shader) = self.shader.as_mut() {
            if shader.is_relative() {
                *shader = base.join(&*shader);
            }
        }
        for locator in &mut self.textures {
            if is_remote(locator) || Path::new(locator.as_str()).is_absolute() {
                continue;
            }
            *locator = base.join(locator.as_str()).to_string_lossy().into_owned();
        }
    }

    pub fn source(&self) -> Option<EffectSource<'_>> {
        match (&self.shader, &self.dots) {
            (Some(path), None) => Some(EffectSource::Shader(path)),
            (None, Some(dots)) => Some(EffectSource::Dots(dots)),
            _ => None,
        }
    }

    /// Zero means unbounded, as does leaving the field out.
    pub fn frame_limit(&self) -> Option<f32> {
        self.max_fps.filter(|fps| *fps > 0.0)
    }

    pub fn uniform_values(&self) -> Result<BTreeMap<String, UniformValue>, ConfigError> {
        self.uniforms
            .iter()
            .map(|(name, spec)| Ok((name.clone(), spec.resolve(name)?)))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("effect name may not be empty".into()));
        }

        match (&self.shader, &self.dots) {
            (None, None) => {
                return Err(ConfigError::Invalid(format!(
                    "effect '{}' must set either `shader` or a [dots] table",
                    self.name
                )))
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "effect '{}' sets both `shader` and [dots]; choose one",
                    self.name
                )))
            }
            (Some(path), None) if path.as_os_str().is_empty() => {
                return Err(ConfigError::Invalid("shader path may not be empty".into()))
            }
            _ => {}
        }

        if let Some(fps) = self.max_fps {
            if fps.is_nan() || fps < 0.0 {
                return Err(ConfigError::Invalid("max_fps must be >= 0".into()));
            }
        }

        if self.textures.len() > MAX_TEXTURES {
            return Err(ConfigError::Invalid(format!(
                "effect '{}' lists {} textures; at most {MAX_TEXTURES} are supported",
                self.name,
                self.textures.len()
            )));
        }
        if let Some(index) = self.textures.iter().position(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "texture {index} has an empty locator"
            )));
        }

        if let Some(every) = self.fire_event_every {
            if every.is_zero() {
                return Err(ConfigError::Invalid(
                    "fire_event_every must be greater than zero".into(),
                ));
            }
        }

        for name in self.uniforms.keys() {
            validate_uniform_name(name)?;
        }
        self.uniform_values()?;

        if let Some(dots) = &self.dots {
            dots.validate()?;
        }

        Ok(())
    }
}

impl UniformEntry {
    pub fn resolve(&self, name: &str) -> Result<UniformValue, ConfigError> {
        let tag = UniformTag::parse(&self.tag).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "uniform '{name}' has unknown type '{}'; expected scalar, vec3, scalar-array or vec3-array",
                self.tag
            ))
        })?;
        let mismatch = || {
            ConfigError::Invalid(format!(
                "uniform '{name}' value does not match its type '{tag}'"
            ))
        };

        let value = match tag {
            UniformTag::Scalar => UniformValue::Scalar(number(&self.value).ok_or_else(mismatch)?),
            UniformTag::Vector3 => UniformValue::Vector3(vec3(&self.value).ok_or_else(mismatch)?),
            UniformTag::ScalarArray => {
                let items = self.value.as_array().ok_or_else(mismatch)?;
                UniformValue::ScalarArray(
                    items
                        .iter()
                        .map(number)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(mismatch)?,
                )
            }
            UniformTag::Vector3Array => {
                let items = self.value.as_array().ok_or_else(mismatch)?;
                UniformValue::Vector3Array(
                    items
                        .iter()
                        .map(vec3)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(mismatch)?,
                )
            }
        };

        let (empty, finite) = match &value {
            UniformValue::Scalar(v) => (false, v.is_finite()),
            UniformValue::Vector3(v) => (false, v.iter().all(|c| c.is_finite())),
            UniformValue::ScalarArray(v) => (v.is_empty(), v.iter().all(|c| c.is_finite())),
            UniformValue::Vector3Array(v) => (
                v.is_empty(),
                v.iter().flatten().all(|c| c.is_finite()),
            ),
        };
        if empty {
            return Err(ConfigError::Invalid(format!(
                "uniform '{name}' array may not be empty"
            )));
        }
        if !finite {
            return Err(ConfigError::Invalid(format!(
                "uniform '{name}' contains a non-finite value"
            )));
        }
        Ok(value)
    }
}

impl DotsSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(colors) = &self.colors {
            if colors.is_empty() || colors.len() > DOTS_MAX_COLORS {
                return Err(ConfigError::Invalid(format!(
                    "dots.colors must hold between 1 and {DOTS_MAX_COLORS} colours"
                )));
            }
            if colors
                .iter()
                .flatten()
                .any(|c| !c.is_finite() || !(0.0..=255.0).contains(c))
            {
                return Err(ConfigError::Invalid(
                    "dots.colors channels must be within 0-255".into(),
                ));
            }
        }
        if let Some(opacities) = &self.opacities {
            if opacities.len() != DOTS_OPACITY_COUNT {
                return Err(ConfigError::Invalid(format!(
                    "dots.opacities must hold exactly {DOTS_OPACITY_COUNT} values"
                )));
            }
            if opacities.iter().any(|o| !o.is_finite()) {
                return Err(ConfigError::Invalid(
                    "dots.opacities contains a non-finite value".into(),
                ));
            }
        }
        if let Some(total) = self.total_size {
            if !total.is_finite() || total <= 0.0 {
                return Err(ConfigError::Invalid("dots.total_size must be > 0".into()));
            }
        }
        if let Some(dot) = self.dot_size {
            if !dot.is_finite() || dot < 0.0 {
                return Err(ConfigError::Invalid("dots.dot_size must be >= 0".into()));
            }
        }
        Ok(())
    }
}

fn validate_uniform_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ConfigError::Invalid(format!(
            "uniform name '{name}' is not a valid GLSL identifier"
        )));
    }
    if ENGINE_UNIFORMS.contains(&name) || name.starts_with("u_texture_") {
        return Err(ConfigError::Invalid(format!(
            "uniform '{name}' is supplied by the renderer and may not be set"
        )));
    }
    Ok(())
}

fn number(value: &toml::Value) -> Option<f32> {
    match value {
        toml::Value::Float(v) => Some(*v as f32),
        toml::Value::Integer(v) => Some(*v as f32),
        _ => None,
    }
}

fn vec3(value: &toml::Value) -> Option<[f32; 3]> {
    match value.as_array()?.as_slice() {
        [x, y, z] => Some([number(x)?, number(y)?, number(z)?]),
        _ => None,
    }
}

fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}
