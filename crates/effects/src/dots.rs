//! Animated dot field.
//!
//! The screen is tiled into `total_size` pixel cells, each holding one
//! `dot_size` square dot. Every few seconds each dot picks a new opacity from
//! a ten-entry table and keeps a colour chosen from up to three.

use std::fmt::Write as _;

use effectconfig::{Axis, ConfigError, DotsPreset, DotsSection, DOTS_OPACITY_COUNT};
use renderer::{EngineConfig, Uniform, UniformMap};

/// Slots in the shader's colour table.
pub const COLOR_SLOTS: usize = 6;
pub const DEFAULT_MAX_FPS: f32 = 60.0;

const HOVER_INTRO: &str = "float intro_offset = distance(u_resolution / 2.0 / u_total_size, st2) * 0.01 + (random(st2) * 0.15); \
opacity *= step(intro_offset, u_time); \
opacity *= clamp((1.0 - step(intro_offset + 0.1, u_time)) * 1.25, 1.0, 1.25);";

#[derive(Debug, Clone, PartialEq)]
pub struct DotsSettings {
    /// RGB triples in the 0-255 range; one to three entries.
    pub colors: Vec<[f32; 3]>,
    pub opacities: [f32; DOTS_OPACITY_COUNT],
    /// Cell size in pixels.
    pub total_size: f32,
    pub dot_size: f32,
    /// Axes along which the grid is centred in the surface.
    pub center: Vec<Axis>,
    /// GLSL inserted after the uniform declarations.
    pub init: String,
    /// GLSL inserted after `color` and `opacity` are computed.
    pub shader: String,
    pub max_fps: f32,
}

impl Default for DotsSettings {
    fn default() -> Self {
        Self {
            colors: vec![[0.0, 0.0, 0.0]],
            opacities: [0.04, 0.04, 0.04, 0.04, 0.04, 0.08, 0.08, 0.08, 0.08, 0.14],
            total_size: 4.0,
            dot_size: 2.0,
            center: vec![Axis::X, Axis::Y],
            init: String::new(),
            shader: String::new(),
            max_fps: DEFAULT_MAX_FPS,
        }
    }
}

impl DotsSettings {
    /// Brighter, sparser dots that fade in from the centre of the surface.
    pub fn hover() -> Self {
        Self {
            opacities: [0.3, 0.3, 0.3, 0.5, 0.5, 0.5, 0.8, 0.8, 0.8, 1.0],
            total_size: 3.0,
            dot_size: 1.0,
            center: vec![Axis::X],
            shader: HOVER_INTRO.to_string(),
            ..Self::default()
        }
    }

    /// Starts from the section's preset and applies every field it sets.
    pub fn from_section(section: &DotsSection) -> Result<Self, ConfigError> {
        section.validate()?;
        let mut settings = match section.preset {
            DotsPreset::Default => Self::default(),
            DotsPreset::Hover => Self::hover(),
        };

        if let Some(colors) = &section.colors {
            settings.colors = colors.clone();
        }
        if let Some(opacities) = &section.opacities {
            settings.opacities = opacities.as_slice().try_into().map_err(|_| {
                ConfigError::Invalid(format!(
                    "dots.opacities must hold exactly {DOTS_OPACITY_COUNT} values"
                ))
            })?;
        }
        if let Some(total_size) = section.total_size {
            settings.total_size = total_size;
        }
        if let Some(dot_size) = section.dot_size {
            settings.dot_size = dot_size;
        }
        if let Some(center) = &section.center {
            settings.center = center.clone();
        }
        if let Some(init) = &section.init {
            settings.init = init.clone();
        }
        if let Some(shader) = &section.shader {
            settings.shader = shader.clone();
        }
        Ok(settings)
    }

    /// Spreads the configured colours over the six table slots and
    /// normalizes them to 0-1.
    pub fn expanded_colors(&self) -> Vec<[f32; 3]> {
        let slots: [usize; COLOR_SLOTS] = match self.colors.len() {
            2 => [0, 0, 0, 1, 1, 1],
            3 => [0, 0, 1, 1, 2, 2],
            _ => [0; COLOR_SLOTS],
        };
        let first = self.colors.first().copied().unwrap_or([0.0; 3]);
        slots
            .iter()
            .map(|&slot| {
                let [r, g, b] = self.colors.get(slot).copied().unwrap_or(first);
                [r / 255.0, g / 255.0, b / 255.0]
            })
            .collect()
    }

    pub fn uniforms(&self) -> UniformMap {
        let mut uniforms = UniformMap::new();
        uniforms.insert("u_colors".into(), Uniform::Vector3Array(self.expanded_colors()));
        uniforms.insert(
            "u_opacities".into(),
            Uniform::ScalarArray(self.opacities.to_vec()),
        );
        uniforms.insert("u_total_size".into(), Uniform::Scalar(self.total_size));
        uniforms.insert("u_dot_size".into(), Uniform::Scalar(self.dot_size));
        uniforms
    }

    pub fn shader_source(&self) -> String {
        let mut centering = String::new();
        if self.center.contains(&Axis::X) {
            centering.push_str(
                "    st.x -= abs(floor((mod(u_resolution.x, u_total_size) - u_dot_size) * 0.5));\n",
            );
        }
        if self.center.contains(&Axis::Y) {
            centering.push_str(
                "    st.y -= abs(floor((mod(u_resolution.y, u_total_size) - u_dot_size) * 0.5));\n",
            );
        }

        let mut source = String::with_capacity(2048);
        source.push_str(
            "#version 300 es
precision mediump float;

in vec2 fragCoord;

uniform float u_time;
uniform float u_opacities[10];
uniform vec3 u_colors[6];
uniform float u_total_size;
uniform float u_dot_size;
uniform vec2 u_resolution;
",
        );
        let _ = writeln!(source, "{}", self.init);
        source.push_str(
            "
out vec4 fragColor;

const float PHI = 1.61803398874989484820459;
float random(vec2 xy) {
    return fract(tan(distance(xy * PHI, xy) * 0.5) * xy.x);
}

float map(float value, float min1, float max1, float min2, float max2) {
    return min2 + (value - min1) * (max2 - min2) / (max1 - min1);
}

void main() {
    vec2 st = fragCoord.xy;

",
        );
        source.push_str(&centering);
        source.push_str(
            "
    float opacity = step(0.0, st.x);
    opacity *= step(0.0, st.y);

    vec2 st2 = vec2(float(int(st.x / u_total_size)), float(int(st.y / u_total_size)));

    float frequency = 5.0;
    float show_offset = random(st2);
    float rand = random(st2 * floor((u_time / frequency) + show_offset + frequency) + 1.0);
    opacity *= u_opacities[int(rand * 10.0)];
    opacity *= 1.0 - step(u_dot_size / u_total_size, fract(st.x / u_total_size));
    opacity *= 1.0 - step(u_dot_size / u_total_size, fract(st.y / u_total_size));

    vec3 color = u_colors[int(show_offset * 6.0)];

",
        );
        let _ = writeln!(source, "    {}", self.shader);
        source.push_str(
            "
    fragColor = vec4(color, opacity);
    fragColor.rgb *= fragColor.a;
}
",
        );
        source
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fragment_source: self.shader_source(),
            uniforms: self.uniforms(),
            max_fps: Some(self.max_fps),
            ..EngineConfig::default()
        }
    }
}
