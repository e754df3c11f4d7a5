//! Translation of ES-style effect GLSL into Vulkan GLSL that `wgpu` accepts.
//!
//! Effects are written against loose uniforms (`uniform float u_time;`), a
//! `precision` statement, and unlocated `in`/`out` varyings. Vulkan GLSL wants
//! every resource in a block with an explicit set and binding, so each
//! declaration is rewritten line by line:
//!
//! 1. `#version` and `precision` lines are blanked so line numbers survive.
//! 2. Engine uniforms (`u_time`, `u_scroll`, `u_event_time`, `u_resolution`)
//!    are routed to the shared engine block at set 0, binding 0.
//! 3. Every other float/vec2/vec3 uniform becomes a member of the effect block
//!    at set 0, binding 1, laid out with std140 rules.
//! 4. `sampler2D u_texture_N` splits into a `texture2D`/`sampler` pair at
//!    set 1, bindings `2N` and `2N + 1`.
//! 5. Top-level `in`/`out` declarations receive explicit locations.
//!
//! Original names are kept alive through `#define`, so effect code compiles
//! unchanged.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use wgpu::naga;

use crate::backend::UniformUpload;
use crate::error::{EngineError, ShaderStage};
use crate::types::TextureUnit;
use crate::uniforms::{EVENT_TIME_UNIFORM, RESOLUTION_UNIFORM, SCROLL_UNIFORM, TIME_UNIFORM};

/// Full-screen quad drawn as a four-vertex triangle strip.
///
/// Written in the same dialect as effects and translated like them.
/// `fragCoord` is in backing-store pixels with the origin at the top left.
pub const VERTEX_SHADER_GLSL: &str = r"#version 300 es
precision highp float;

uniform vec2 u_resolution;
out vec2 fragCoord;

void main() {
    int vertex = int(gl_VertexID);
    vec2 pos = vec2(
        float(vertex & 1) * 2.0 - 1.0,
        float((vertex >> 1) & 1) * 2.0 - 1.0
    );
    fragCoord = (pos + 1.0) * 0.5 * u_resolution;
    fragCoord.y = u_resolution.y - fragCoord.y;
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Vertices issued per full-screen draw.
pub const FULLSCREEN_VERTICES: u32 = 4;

/// Size in bytes of the std140 engine block.
pub const ENGINE_BLOCK_SIZE: u64 = 32;

/// The smallest uniform buffer bound for the effect block.
pub const MIN_EFFECT_BLOCK_SIZE: u64 = 16;

const ENGINE_BLOCK: &str = r"layout(std140, set = 0, binding = 0) uniform ShaderfieldEngine {
    vec2 resolution;
    float time;
    float scroll;
    float event_time;
} shaderfield_engine;
";

/// Uniforms owned by the engine and refreshed every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineField {
    Resolution,
    Time,
    Scroll,
    EventTime,
}

impl EngineField {
    pub const ALL: [EngineField; 4] = [
        EngineField::Resolution,
        EngineField::Time,
        EngineField::Scroll,
        EngineField::EventTime,
    ];

    pub fn from_uniform(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.uniform_name() == name)
    }

    pub fn uniform_name(self) -> &'static str {
        match self {
            EngineField::Resolution => RESOLUTION_UNIFORM,
            EngineField::Time => TIME_UNIFORM,
            EngineField::Scroll => SCROLL_UNIFORM,
            EngineField::EventTime => EVENT_TIME_UNIFORM,
        }
    }

    fn member(self) -> &'static str {
        match self {
            EngineField::Resolution => "resolution",
            EngineField::Time => "time",
            EngineField::Scroll => "scroll",
            EngineField::EventTime => "event_time",
        }
    }

    fn kind(self) -> MemberKind {
        match self {
            EngineField::Resolution => MemberKind::Vec2,
            _ => MemberKind::Float,
        }
    }
}

/// Scalar or vector type of a uniform member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Float,
    Vec2,
    Vec3,
}

impl MemberKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "float" => Some(MemberKind::Float),
            "vec2" => Some(MemberKind::Vec2),
            "vec3" => Some(MemberKind::Vec3),
            _ => None,
        }
    }

    pub fn glsl(self) -> &'static str {
        match self {
            MemberKind::Float => "float",
            MemberKind::Vec2 => "vec2",
            MemberKind::Vec3 => "vec3",
        }
    }

    pub fn components(self) -> usize {
        match self {
            MemberKind::Float => 1,
            MemberKind::Vec2 => 2,
            MemberKind::Vec3 => 3,
        }
    }

    fn align(self) -> u64 {
        match self {
            MemberKind::Float => 4,
            MemberKind::Vec2 => 8,
            MemberKind::Vec3 => 16,
        }
    }
}

/// One member of the effect uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectMember {
    pub name: String,
    pub kind: MemberKind,
    /// Element count for arrays.
    pub count: Option<u32>,
    /// Byte offset inside the block.
    pub offset: u64,
}

impl EffectMember {
    fn stride(&self) -> u64 {
        match self.count {
            Some(_) => 16,
            None => self.kind.components() as u64 * 4,
        }
    }

    fn size(&self) -> u64 {
        match self.count {
            Some(count) => 16 * count as u64,
            None => self.kind.components() as u64 * 4,
        }
    }

    pub fn type_name(&self) -> String {
        match self.count {
            Some(count) => format!("{}[{count}]", self.kind.glsl()),
            None => self.kind.glsl().to_string(),
        }
    }

    /// Writes `value` into the std140 image of the block.
    ///
    /// Array uploads may be shorter than the declared array; the remaining
    /// elements keep their previous contents.
    pub fn write(&self, block: &mut [u8], value: UniformUpload<'_>) -> Result<(), String> {
        let (kind, data): (MemberKind, &[f32]) = match &value {
            UniformUpload::Float(value) => (MemberKind::Float, std::slice::from_ref(value)),
            UniformUpload::Vec2(value) => (MemberKind::Vec2, &value[..]),
            UniformUpload::Vec3(value) => (MemberKind::Vec3, &value[..]),
            UniformUpload::FloatArray(values) => (MemberKind::Float, values),
            UniformUpload::Vec3Array(values) => (MemberKind::Vec3, values),
        };
        if kind != self.kind {
            return Err(format!(
                "uniform '{}' is declared as {} but received {}",
                self.name,
                self.type_name(),
                value.shape()
            ));
        }

        let components = kind.components();
        if data.len() % components != 0 {
            return Err(format!(
                "uniform '{}' received {} floats, not a multiple of {components}",
                self.name,
                data.len()
            ));
        }
        let elements = data.len() / components;
        let capacity = self.count.unwrap_or(1) as usize;
        if elements > capacity {
            return Err(format!(
                "uniform '{}' holds {capacity} element(s) but received {elements}",
                self.name
            ));
        }

        for (index, chunk) in data.chunks_exact(components).enumerate() {
            let start = (self.offset + index as u64 * self.stride()) as usize;
            let bytes: &[u8] = bytemuck::cast_slice(chunk);
            let target = block
                .get_mut(start..start + bytes.len())
                .ok_or_else(|| format!("uniform '{}' lies outside the block", self.name))?;
            target.copy_from_slice(bytes);
        }
        Ok(())
    }
}

/// std140 layout of the effect block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectLayout {
    pub members: Vec<EffectMember>,
    size: u64,
}

impl EffectLayout {
    fn push(&mut self, name: &str, kind: MemberKind, count: Option<u32>) {
        let align = if count.is_some() { 16 } else { kind.align() };
        let offset = self.size.next_multiple_of(align);
        let member = EffectMember {
            name: name.to_string(),
            kind,
            count,
            offset,
        };
        self.size = offset + member.size();
        self.members.push(member);
    }

    pub fn member(&self, name: &str) -> Option<(usize, &EffectMember)> {
        self.members
            .iter()
            .enumerate()
            .find(|(_, member)| member.name == name)
    }

    /// Size of the uniform buffer backing the block.
    pub fn buffer_size(&self) -> u64 {
        self.size.next_multiple_of(16).max(MIN_EFFECT_BLOCK_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A stage input or output with its assigned location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Varying {
    pub name: String,
    pub ty: String,
    pub location: u32,
}

/// Result of translating one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedShader {
    pub stage: ShaderStage,
    pub source: String,
    pub inputs: Vec<Varying>,
    pub outputs: Vec<Varying>,
    pub engine_fields: Vec<EngineField>,
    pub effect: EffectLayout,
    pub textures: Vec<TextureUnit>,
}

impl TranslatedShader {
    pub fn naga_stage(&self) -> naga::ShaderStage {
        match self.stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// Translates one stage. `input_locations` pins fragment inputs to the
/// locations of the matching vertex outputs; unknown names are numbered
/// after them.
pub fn translate(
    source: &str,
    stage: ShaderStage,
    input_locations: &BTreeMap<String, u32>,
) -> Result<TranslatedShader, String> {
    let mut diagnostics = Vec::new();
    let mut body = String::with_capacity(source.len());
    let mut declarations = String::new();
    let mut defines = String::new();
    let mut engine_fields = Vec::new();
    let mut effect = EffectLayout::default();
    let mut textures = Vec::new();
    let mut inputs = Vec::new();
    let mut outputs: Vec<Varying> = Vec::new();
    let mut next_input = input_locations.values().max().map_or(0, |max| max + 1);
    let mut depth: i32 = 0;

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let code = strip_precision_qualifiers(strip_line_comment(raw));
        let trimmed = code.trim();
        let at_top_level = depth == 0;
        depth += brace_delta(trimmed);

        if trimmed.starts_with("#version") || trimmed.starts_with("precision ") {
            body.push('\n');
            continue;
        }

        if at_top_level && trimmed.starts_with("uniform ") {
            match parse_uniform(trimmed) {
                Ok((ty, names)) => {
                    for (name, count) in names {
                        let routed = route_uniform(
                            stage,
                            &ty,
                            &name,
                            count,
                            &mut engine_fields,
                            &mut effect,
                            &mut textures,
                            &mut declarations,
                            &mut defines,
                        );
                        if let Err(message) = routed {
                            diagnostics.push(format!("{stage} shader line {line_no}: {message}"));
                        }
                    }
                }
                Err(message) => {
                    diagnostics.push(format!("{stage} shader line {line_no}: {message}"));
                }
            }
            body.push('\n');
            continue;
        }

        if at_top_level {
            if let Some(varying) = parse_varying(trimmed) {
                let location = match (varying.explicit, varying.direction) {
                    (Some(location), _) => location,
                    (None, Direction::In) => match input_locations.get(&varying.name) {
                        Some(location) => *location,
                        None => {
                            let location = next_input;
                            next_input += 1;
                            location
                        }
                    },
                    (None, Direction::Out) => outputs.len() as u32,
                };
                let record = Varying {
                    name: varying.name,
                    ty: varying.ty,
                    location,
                };
                if varying.explicit.is_some() {
                    body.push_str(&code);
                } else {
                    let _ = write!(body, "layout(location = {location}) {trimmed}");
                }
                body.push('\n');
                match varying.direction {
                    Direction::In => inputs.push(record),
                    Direction::Out => outputs.push(record),
                }
                continue;
            }
        }

        body.push_str(&code);
        body.push('\n');
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics.join("\n"));
    }

    let mut translated = String::with_capacity(body.len() + 2048);
    translated.push_str("#version 450\n");
    if stage == ShaderStage::Vertex {
        translated.push_str("#define gl_VertexID gl_VertexIndex\n");
    }
    translated.push_str(ENGINE_BLOCK);
    if !effect.is_empty() {
        translated.push_str("layout(std140, set = 0, binding = 1) uniform ShaderfieldEffect {\n");
        for member in &effect.members {
            let array = member.count.map(|count| format!("[{count}]")).unwrap_or_default();
            let _ = writeln!(translated, "    {} fx_{}{array};", member.kind.glsl(), member.name);
        }
        translated.push_str("} shaderfield_effect;\n");
    }
    translated.push_str(&declarations);
    translated.push_str(&defines);
    translated.push_str("#line 1\n");
    translated.push_str(&body);

    Ok(TranslatedShader {
        stage,
        source: translated,
        inputs,
        outputs,
        engine_fields,
        effect,
        textures,
    })
}

#[allow(clippy::too_many_arguments)]
fn route_uniform(
    stage: ShaderStage,
    ty: &str,
    name: &str,
    count: Option<u32>,
    engine_fields: &mut Vec<EngineField>,
    effect: &mut EffectLayout,
    textures: &mut Vec<TextureUnit>,
    declarations: &mut String,
    defines: &mut String,
) -> Result<(), String> {
    if let Some(field) = EngineField::from_uniform(name) {
        if ty != field.kind().glsl() || count.is_some() {
            return Err(format!(
                "engine uniform '{name}' must be declared as {}",
                field.kind().glsl()
            ));
        }
        if !engine_fields.contains(&field) {
            engine_fields.push(field);
            let _ = writeln!(defines, "#define {name} shaderfield_engine.{}", field.member());
        }
        return Ok(());
    }

    if ty == "sampler2D" {
        if stage != ShaderStage::Fragment {
            return Err(format!("sampler '{name}' is only available to fragment shaders"));
        }
        let unit = parse_texture_unit(name)?;
        if count.is_some() {
            return Err(format!("sampler '{name}' cannot be an array"));
        }
        if textures.contains(&unit) {
            return Err(format!("sampler '{name}' is declared twice"));
        }
        textures.push(unit);
        let texture_binding = unit.index() * 2;
        let sampler_binding = texture_binding + 1;
        let _ = writeln!(
            declarations,
            "layout(set = 1, binding = {texture_binding}) uniform texture2D shaderfield_texture{0};\n\
             layout(set = 1, binding = {sampler_binding}) uniform sampler shaderfield_sampler{0};",
            unit.index()
        );
        let _ = writeln!(
            defines,
            "#define {name} sampler2D(shaderfield_texture{0}, shaderfield_sampler{0})",
            unit.index()
        );
        return Ok(());
    }

    let kind = MemberKind::parse(ty)
        .ok_or_else(|| format!("uniform '{name}' has unsupported type '{ty}'"))?;
    if stage != ShaderStage::Fragment {
        return Err(format!(
            "effect uniform '{name}' is only available to fragment shaders"
        ));
    }
    if kind == MemberKind::Vec2 && count.is_some() {
        return Err(format!("uniform '{name}' has unsupported type 'vec2[]'"));
    }
    if effect.member(name).is_some() {
        return Err(format!("uniform '{name}' is declared twice"));
    }
    effect.push(name, kind, count);
    let _ = writeln!(defines, "#define {name} shaderfield_effect.fx_{name}");
    Ok(())
}

fn parse_texture_unit(name: &str) -> Result<TextureUnit, String> {
    let index = name
        .strip_prefix("u_texture_")
        .and_then(|suffix| suffix.parse::<usize>().ok())
        .ok_or_else(|| format!("sampler '{name}' must be named u_texture_<unit>"))?;
    TextureUnit::try_from(index)
        .map_err(|index| format!("sampler '{name}' uses texture unit {index}, outside 0-15"))
}

/// Parses `uniform <type> a, b[4];` into its type and declarators.
fn parse_uniform(line: &str) -> Result<(String, Vec<(String, Option<u32>)>), String> {
    let rest = line
        .strip_prefix("uniform ")
        .and_then(|rest| rest.trim_end().strip_suffix(';'))
        .ok_or_else(|| "uniform declarations must fit on one line and end with ';'".to_string())?;
    let rest = rest.trim();
    let (ty, declarators) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("malformed uniform declaration '{line}'"))?;

    let mut names = Vec::new();
    for declarator in declarators.split(',') {
        let declarator: String = declarator.chars().filter(|c| !c.is_whitespace()).collect();
        let parsed = match declarator.split_once('[') {
            Some((name, size)) => {
                let count = size
                    .strip_suffix(']')
                    .and_then(|size| size.parse::<u32>().ok())
                    .filter(|count| *count > 0)
                    .ok_or_else(|| format!("array size of '{name}' must be a positive literal"))?;
                (name.to_string(), Some(count))
            }
            None => (declarator, None),
        };
        if !is_identifier(&parsed.0) {
            return Err(format!("malformed uniform name '{}'", parsed.0));
        }
        names.push(parsed);
    }
    Ok((ty.to_string(), names))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

struct ParsedVarying {
    direction: Direction,
    ty: String,
    name: String,
    explicit: Option<u32>,
}

fn parse_varying(line: &str) -> Option<ParsedVarying> {
    let (explicit, rest) = match line.strip_prefix("layout") {
        Some(rest) => {
            let rest = rest.trim_start().strip_prefix('(')?;
            let (qualifiers, rest) = rest.split_once(')')?;
            let location = qualifiers.split(',').find_map(|qualifier| {
                let (key, value) = qualifier.split_once('=')?;
                (key.trim() == "location")
                    .then(|| value.trim().parse::<u32>().ok())
                    .flatten()
            })?;
            (Some(location), rest.trim_start())
        }
        None => (None, line),
    };

    let rest = rest.strip_suffix(';')?.trim();
    let mut tokens = rest.split_whitespace();
    let mut direction = None;
    for token in tokens.by_ref() {
        match token {
            "in" => {
                direction = Some(Direction::In);
                break;
            }
            "out" => {
                direction = Some(Direction::Out);
                break;
            }
            "flat" | "smooth" | "noperspective" | "centroid" => {}
            _ => return None,
        }
    }
    let direction = direction?;
    let ty = tokens.next()?.to_string();
    let name = tokens.next()?.to_string();
    if tokens.next().is_some() || !is_identifier(&name) {
        return None;
    }
    Some(ParsedVarying {
        direction,
        ty,
        name,
        explicit,
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(index) => &line[..index],
        None => line,
    }
}

fn strip_precision_qualifiers(line: &str) -> String {
    if line.trim_start().starts_with("precision ") {
        return line.to_string();
    }
    line.split_inclusive(char::is_whitespace)
        .filter(|token| !matches!(token.trim(), "lowp" | "mediump" | "highp"))
        .collect()
}

fn brace_delta(line: &str) -> i32 {
    line.chars().fold(0, |delta, c| match c {
        '{' => delta + 1,
        '}' => delta - 1,
        _ => delta,
    })
}

/// Parses and validates a translated stage with naga.
pub fn validate(shader: &TranslatedShader) -> Result<naga::Module, String> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(shader.naga_stage());
    let module = frontend
        .parse(&options, &shader.source)
        .map_err(|err| err.emit_to_string(&shader.source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| err.emit_to_string(&shader.source))?;
    Ok(module)
}

/// Checks that every fragment input is produced by the vertex stage and that
/// the fragment stage writes a color.
pub fn check_interface(
    vertex: &TranslatedShader,
    fragment: &TranslatedShader,
) -> Result<(), String> {
    let mut problems = Vec::new();
    for input in &fragment.inputs {
        match vertex.outputs.iter().find(|output| output.name == input.name) {
            None => problems.push(format!(
                "fragment input '{}' is not written by the vertex shader",
                input.name
            )),
            Some(output) if output.ty != input.ty => problems.push(format!(
                "fragment input '{}' is {} but the vertex shader writes {}",
                input.name, input.ty, output.ty
            )),
            Some(output) if output.location != input.location => problems.push(format!(
                "fragment input '{}' uses location {} but the vertex shader writes location {}",
                input.name, input.location, output.location
            )),
            Some(_) => {}
        }
    }
    if fragment.outputs.is_empty() {
        problems.push("fragment shader declares no color output".to_string());
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("\n"))
    }
}

/// Translates and validates a stage on its own, as a compile step does.
pub fn compile_stage(source: &str, stage: ShaderStage) -> Result<TranslatedShader, String> {
    let translated = translate(source, stage, &BTreeMap::new())?;
    validate(&translated)?;
    Ok(translated)
}

/// Translates both stages with matched varying locations and checks that
/// they link.
pub fn link_stages(
    vertex_source: &str,
    fragment_source: &str,
) -> Result<(TranslatedShader, TranslatedShader), String> {
    let vertex = translate(vertex_source, ShaderStage::Vertex, &BTreeMap::new())?;
    let locations = vertex
        .outputs
        .iter()
        .map(|output| (output.name.clone(), output.location))
        .collect();
    let fragment = translate(fragment_source, ShaderStage::Fragment, &locations)?;
    check_interface(&vertex, &fragment)?;
    Ok((vertex, fragment))
}

/// Compiles and links an effect fragment shader against the engine's vertex
/// shader without touching a GPU.
pub fn check_effect(fragment_source: &str) -> Result<(), EngineError> {
    compile_stage(VERTEX_SHADER_GLSL, ShaderStage::Vertex).map_err(|diagnostic| {
        EngineError::Compile {
            stage: ShaderStage::Vertex,
            diagnostic,
        }
    })?;
    compile_stage(fragment_source, ShaderStage::Fragment).map_err(|diagnostic| {
        EngineError::Compile {
            stage: ShaderStage::Fragment,
            diagnostic,
        }
    })?;
    let (vertex, fragment) = link_stages(VERTEX_SHADER_GLSL, fragment_source)
        .map_err(|diagnostic| EngineError::Link { diagnostic })?;
    validate(&vertex)
        .and_then(|_| validate(&fragment))
        .map_err(|diagnostic| EngineError::Link { diagnostic })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EFFECT: &str = r"#version 300 es
precision mediump float;
in vec2 fragCoord;
uniform float u_time;
uniform vec2 u_resolution;
uniform float u_opacities[10];
uniform vec3 u_colors[6];
uniform mediump float u_total_size, u_dot_size;
uniform sampler2D u_texture_3;
out vec4 fragColor;

void main() {
    vec2 uv = fragCoord / u_resolution;
    vec3 color = u_colors[int(uv.x * 5.0)] * u_opacities[0];
    vec4 tex = texture(u_texture_3, uv);
    fragColor = vec4(color + tex.rgb * u_dot_size / u_total_size, abs(sin(u_time)));
}
";

    fn fragment(source: &str) -> TranslatedShader {
        translate(source, ShaderStage::Fragment, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn routes_uniforms_to_blocks() {
        let shader = fragment(EFFECT);

        assert_eq!(
            shader.engine_fields,
            vec![EngineField::Time, EngineField::Resolution]
        );
        assert!(shader.source.starts_with("#version 450\n"));
        assert!(shader.source.contains("#define u_time shaderfield_engine.time"));
        assert!(shader
            .source
            .contains("#define u_colors shaderfield_effect.fx_u_colors"));
        assert!(shader.source.contains("    vec3 fx_u_colors[6];"));
        assert!(!shader.source.contains("precision mediump"));
        assert!(!shader.source.contains("#version 300 es"));
        assert!(!shader.source.contains("uniform float u_time;"));
    }

    #[test]
    fn effect_block_follows_std140() {
        let shader = fragment(EFFECT);
        let offsets: Vec<(&str, u64)> = shader
            .effect
            .members
            .iter()
            .map(|member| (member.name.as_str(), member.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("u_opacities", 0),
                ("u_colors", 160),
                ("u_total_size", 256),
                ("u_dot_size", 260),
            ]
        );
        assert_eq!(shader.effect.buffer_size(), 272);
    }

    #[test]
    fn scalars_pack_and_vectors_realign() {
        let shader = fragment(
            "uniform float a;\nuniform vec2 b;\nuniform float c;\nuniform vec3 d;\nout vec4 o;\nvoid main() { o = vec4(d, a + b.x + c); }\n",
        );
        let offsets: Vec<u64> = shader.effect.members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16, 32]);
        assert_eq!(shader.effect.buffer_size(), 48);
    }

    #[test]
    fn samplers_split_into_texture_and_sampler_bindings() {
        let shader = fragment(EFFECT);
        assert_eq!(shader.textures, vec![TextureUnit::try_from(3).unwrap()]);
        assert!(shader
            .source
            .contains("layout(set = 1, binding = 6) uniform texture2D shaderfield_texture3;"));
        assert!(shader
            .source
            .contains("layout(set = 1, binding = 7) uniform sampler shaderfield_sampler3;"));
        assert!(shader.source.contains(
            "#define u_texture_3 sampler2D(shaderfield_texture3, shaderfield_sampler3)"
        ));
    }

    #[test]
    fn varyings_receive_locations() {
        let mut locations = BTreeMap::new();
        locations.insert("fragCoord".to_string(), 2);
        let shader = translate(EFFECT, ShaderStage::Fragment, &locations).unwrap();

        assert!(shader
            .source
            .contains("layout(location = 2) in vec2 fragCoord;"));
        assert!(shader
            .source
            .contains("layout(location = 0) out vec4 fragColor;"));
        assert_eq!(shader.inputs[0].location, 2);
        assert_eq!(shader.outputs[0].name, "fragColor");
    }

    #[test]
    fn explicit_locations_are_kept() {
        let shader = fragment("layout(location = 1) out vec4 color;\nvoid main() { color = vec4(1.0); }\n");
        assert_eq!(shader.outputs[0].location, 1);
        assert!(shader.source.contains("layout(location = 1) out vec4 color;"));
    }

    #[test]
    fn nested_declarations_are_left_alone() {
        let shader = fragment(
            "out vec4 o;\nvoid main() {\n    float in_range = 1.0;\n    o = vec4(in_range);\n}\n",
        );
        assert!(shader.inputs.is_empty());
        assert_eq!(shader.outputs.len(), 1);
    }

    #[test]
    fn line_numbers_are_preserved() {
        let shader = fragment(EFFECT);
        let body = shader.source.split("#line 1\n").nth(1).unwrap();
        assert_eq!(body.lines().count(), EFFECT.lines().count());
        let main_line = EFFECT.lines().position(|line| line.starts_with("void main")).unwrap();
        assert_eq!(body.lines().nth(main_line), Some("void main() {"));
    }

    #[test]
    fn bad_declarations_are_diagnosed() {
        let err = translate(
            "uniform sampler2D u_noise;\nuniform mat4 u_matrix;\nuniform vec3 u_time;\n",
            ShaderStage::Fragment,
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(err.contains("line 1: sampler 'u_noise' must be named u_texture_<unit>"));
        assert!(err.contains("line 2: uniform 'u_matrix' has unsupported type 'mat4'"));
        assert!(err.contains("line 3: engine uniform 'u_time' must be declared as float"));
    }

    #[test]
    fn texture_units_beyond_range_are_rejected() {
        let err = translate(
            "uniform sampler2D u_texture_16;\n",
            ShaderStage::Fragment,
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(err.contains("outside 0-15"));
    }

    #[test]
    fn vertex_stage_rejects_effect_uniforms() {
        let err = translate(
            "uniform float u_speed;\n",
            ShaderStage::Vertex,
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(err.contains("only available to fragment shaders"));
    }

    #[test]
    fn interface_mismatch_is_reported() {
        let err = link_stages(
            VERTEX_SHADER_GLSL,
            "in vec2 v_uv;\nout vec4 o;\nvoid main() { o = vec4(v_uv, 0.0, 1.0); }\n",
        )
        .unwrap_err();
        assert!(err.contains("'v_uv' is not written by the vertex shader"));

        let err = link_stages(VERTEX_SHADER_GLSL, "in vec3 fragCoord;\nvoid main() {}\n")
            .unwrap_err();
        assert!(err.contains("'fragCoord' is vec3"));
        assert!(err.contains("declares no color output"));
    }

    #[test]
    fn member_writes_follow_layout() {
        let shader = fragment(EFFECT);
        let mut block = vec![0u8; shader.effect.buffer_size() as usize];
        let (_, colors) = shader.effect.member("u_colors").unwrap();
        colors
            .write(
                &mut block,
                UniformUpload::Vec3Array(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            )
            .unwrap();

        let floats: &[f32] = bytemuck::cast_slice(&block);
        assert_eq!(&floats[40..43], &[1.0, 2.0, 3.0]);
        assert_eq!(floats[43], 0.0);
        assert_eq!(&floats[44..47], &[4.0, 5.0, 6.0]);

        let (_, dot) = shader.effect.member("u_dot_size").unwrap();
        dot.write(&mut block, UniformUpload::Float(2.0)).unwrap();
        let floats: &[f32] = bytemuck::cast_slice(&block);
        assert_eq!(floats[65], 2.0);
    }

    #[test]
    fn member_writes_reject_wrong_shapes() {
        let shader = fragment(EFFECT);
        let mut block = vec![0u8; shader.effect.buffer_size() as usize];
        let (_, opacities) = shader.effect.member("u_opacities").unwrap();
        let err = opacities
            .write(&mut block, UniformUpload::Vec3([1.0, 1.0, 1.0]))
            .unwrap_err();
        assert!(err.contains("float[10]"));
        let err = opacities
            .write(&mut block, UniformUpload::FloatArray(&[0.5; 11]))
            .unwrap_err();
        assert!(err.contains("holds 10"));
        assert!(block.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn engine_vertex_shader_validates() {
        let vertex = compile_stage(VERTEX_SHADER_GLSL, ShaderStage::Vertex).unwrap();
        assert_eq!(vertex.outputs[0].name, "fragCoord");
        assert_eq!(vertex.engine_fields, vec![EngineField::Resolution]);
    }

    #[test]
    fn effect_compiles_and_links() {
        check_effect(EFFECT).unwrap();
    }

    #[test]
    fn syntax_errors_fail_compilation() {
        let err = check_effect("out vec4 o;\nvoid main() { o = vec4(1.0) }\n").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Compile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
    }
}
