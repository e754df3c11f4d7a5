use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use effectconfig::{EffectManifest, EffectSource, InitialState, UniformValue};
use effects::DotsSettings;
use renderer::{EngineConfig, LoopState, Uniform, MAX_TEXTURE_UNITS};
use tracing::debug;

use crate::cli::RunArgs;
use crate::paths::AppPaths;

const MANIFEST_FILE: &str = "effect.toml";

/// Where an effect comes from once its reference has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectTarget {
    Manifest(PathBuf),
    Fragment(PathBuf),
    Dots(DotsSettings),
}

/// An effect ready to hand to the engine.
#[derive(Debug, Clone)]
pub struct EffectPlan {
    pub name: String,
    pub config: EngineConfig,
    pub fire_every: Option<Duration>,
}

/// Resolves an effect reference: an existing file or directory, then a name
/// under the user effect directories, then a built-in.
pub fn resolve_effect(reference: Option<&str>, paths: &AppPaths) -> Result<EffectTarget> {
    let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(EffectTarget::Dots(DotsSettings::default()));
    };

    let direct = Path::new(reference);
    if direct.is_file() {
        return Ok(classify_file(direct));
    }
    if direct.is_dir() {
        let manifest = direct.join(MANIFEST_FILE);
        if manifest.is_file() {
            return Ok(EffectTarget::Manifest(manifest));
        }
        bail!("directory {} has no {MANIFEST_FILE}", direct.display());
    }

    let searched = paths.effect_dirs();
    for root in &searched {
        let candidates = [
            root.join(reference).join(MANIFEST_FILE),
            root.join(format!("{reference}.toml")),
            root.join(format!("{reference}.frag")),
        ];
        if let Some(found) = candidates.iter().find(|candidate| candidate.is_file()) {
            debug!(path = %found.display(), "resolved effect by name");
            return Ok(classify_file(found));
        }
    }

    match reference {
        "dots" => Ok(EffectTarget::Dots(DotsSettings::default())),
        "dots-hover" => Ok(EffectTarget::Dots(DotsSettings::hover())),
        _ => {
            let roots = searched
                .iter()
                .map(|root| root.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            bail!("effect '{reference}' not found as a path or under {roots}")
        }
    }
}

fn classify_file(path: &Path) -> EffectTarget {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => EffectTarget::Manifest(path.to_path_buf()),
        _ => EffectTarget::Fragment(path.to_path_buf()),
    }
}

pub fn load_effect(target: &EffectTarget) -> Result<EffectPlan> {
    match target {
        EffectTarget::Dots(settings) => Ok(EffectPlan {
            name: "dots".into(),
            config: settings.engine_config(),
            fire_every: None,
        }),
        EffectTarget::Fragment(path) => {
            let source = read_shader(path)?;
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "effect".into());
            Ok(EffectPlan {
                name,
                config: EngineConfig::new(source),
                fire_every: None,
            })
        }
        EffectTarget::Manifest(path) => load_manifest(path),
    }
}

fn load_manifest(path: &Path) -> Result<EffectPlan> {
    let manifest = EffectManifest::load(path)
        .with_context(|| format!("failed to load effect manifest {}", path.display()))?;

    let mut config = match manifest.source() {
        Some(EffectSource::Shader(shader)) => EngineConfig::new(read_shader(shader)?),
        Some(EffectSource::Dots(section)) => DotsSettings::from_section(section)
            .with_context(|| format!("invalid [dots] table in {}", path.display()))?
            .engine_config(),
        None => bail!("effect manifest {} names no shader source", path.display()),
    };

    let uniforms = manifest
        .uniform_values()
        .with_context(|| format!("invalid uniforms in {}", path.display()))?;
    for (name, value) in uniforms {
        config.uniforms.insert(name, to_uniform(value));
    }
    config.textures = manifest.textures.clone();
    if manifest.max_fps.is_some() {
        config.max_fps = manifest.frame_limit();
    }
    config.initial_state = match manifest.initial_state {
        InitialState::Playing => LoopState::Playing,
        InitialState::Paused => LoopState::Paused,
    };

    Ok(EffectPlan {
        name: manifest.name.clone(),
        config,
        fire_every: manifest.fire_event_every,
    })
}

fn read_shader(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read shader {}", path.display()))
}

fn to_uniform(value: UniformValue) -> Uniform {
    match value {
        UniformValue::Scalar(v) => Uniform::Scalar(v),
        UniformValue::Vector3(v) => Uniform::Vector3(v),
        UniformValue::ScalarArray(v) => Uniform::ScalarArray(v),
        UniformValue::Vector3Array(v) => Uniform::Vector3Array(v),
    }
}

/// Applies command-line overrides on top of what the effect asked for.
pub fn apply_overrides(plan: &mut EffectPlan, args: &RunArgs) -> Result<()> {
    if let Some(fps) = args.fps {
        if fps.is_nan() || fps < 0.0 {
            bail!("--fps must be >= 0");
        }
        plan.config.max_fps = (fps > 0.0).then_some(fps);
    }
    if args.paused {
        plan.config.initial_state = LoopState::Paused;
    }
    plan.config.textures.extend(args.textures.iter().cloned());
    if plan.config.textures.len() > MAX_TEXTURE_UNITS {
        bail!(
            "effect '{}' uses {} textures; at most {MAX_TEXTURE_UNITS} are supported",
            plan.name,
            plan.config.textures.len()
        );
    }
    if args.fire_every.is_some() {
        plan.fire_every = args.fire_every;
    }
    Ok(())
}

pub fn parse_surface_size(spec: &str) -> Result<(u32, u32)> {
    let trimmed = spec.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| anyhow::anyhow!("expected WxH format, e.g. 1920x1080"))?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid width in size specification"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid height in size specification"))?;

    if width == 0 || height == 0 {
        bail!("surface dimensions must be greater than zero");
    }

    Ok((width, height))
}
