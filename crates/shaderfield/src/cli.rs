use std::time::Duration;

use clap::{Parser, Subcommand};
use renderer::GpuPowerPreference;

#[derive(Parser, Debug)]
#[command(
    name = "shaderfield",
    author,
    version,
    about = "Runs GLSL fragment-shader effects in a window",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct RunArgs {
    /// Effect manifest, `.frag` file, or effect name (defaults to the built-in dot field).
    #[arg(value_name = "EFFECT")]
    pub effect: Option<String>,

    /// Frame-rate ceiling (0 = uncapped); overrides the manifest.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Start with playback paused.
    #[arg(long)]
    pub paused: bool,

    /// Initial window size in logical pixels (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub size: Option<String>,

    /// Extra texture bound after the manifest's own; may be repeated.
    #[arg(long = "texture", value_name = "LOCATOR")]
    pub textures: Vec<String>,

    /// GPU adapter preference: `low` or `high`.
    #[arg(
        long,
        value_name = "PREFERENCE",
        value_parser = parse_power,
        default_value = "low"
    )]
    pub power: GpuPowerPreference,

    /// Fire an event on a fixed period (e.g. `4s`, `750ms`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub fire_every: Option<Duration>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile and link an effect without opening a window.
    Check(CheckArgs),
    /// Print resolved configuration and data directories.
    Where,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Effect manifest, `.frag` file, or effect name.
    #[arg(value_name = "EFFECT")]
    pub effect: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_power(value: &str) -> Result<GpuPowerPreference, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("power preference must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "low" | "low-power" | "integrated" => Ok(GpuPowerPreference::Low),
        "high" | "high-performance" | "discrete" => Ok(GpuPowerPreference::High),
        other => Err(format!(
            "unknown power preference '{other}'; expected low or high"
        )),
    }
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    let duration = match trimmed.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Duration::from_secs_f64(seconds),
        Ok(_) => return Err("duration must be non-negative".to_string()),
        Err(_) => humantime::parse_duration(trimmed)
            .map_err(|err| format!("invalid duration '{trimmed}': {err}"))?,
    };
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
