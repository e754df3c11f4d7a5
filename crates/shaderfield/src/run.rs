use std::path::Path;

use anyhow::{bail, Context, Result};
use renderer::{textures::is_remote, ReloadFn, WindowOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::{
    apply_overrides, load_effect, parse_surface_size, resolve_effect, EffectPlan, EffectTarget,
};
use crate::cli::{CheckArgs, Cli, Command, RunArgs};
use crate::paths::AppPaths;

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    tracing::debug!(
        config = %paths.config_dir().display(),
        data = %paths.data_dir().display(),
        "resolved shaderfield paths"
    );

    match cli.command {
        Some(Command::Where) => {
            print_where(&paths);
            Ok(())
        }
        Some(Command::Check(args)) => run_check(&args, &paths),
        None => run_window(cli.run, &paths),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_where(paths: &AppPaths) {
    println!("config: {}", paths.config_dir().display());
    println!("data:   {}", paths.data_dir().display());
    for dir in paths.effect_dirs() {
        let marker = if dir.is_dir() { "" } else { " (missing)" };
        println!("effects: {}{marker}", dir.display());
    }
}

fn run_check(args: &CheckArgs, paths: &AppPaths) -> Result<()> {
    let target = resolve_effect(args.effect.as_deref(), paths)?;
    let plan = load_effect(&target)?;

    renderer::check_effect(&plan.config.fragment_source)
        .with_context(|| format!("effect '{}' failed validation", plan.name))?;

    for (index, locator) in plan.config.textures.iter().enumerate() {
        if !is_remote(locator) && !Path::new(locator).is_file() {
            bail!("texture {index} ({locator}) does not exist");
        }
    }

    println!(
        "ok: {} ({} uniforms, {} textures)",
        plan.name,
        plan.config.uniforms.len(),
        plan.config.textures.len()
    );
    Ok(())
}

fn run_window(args: RunArgs, paths: &AppPaths) -> Result<()> {
    let target = resolve_effect(args.effect.as_deref(), paths)?;
    let plan = prepare(&target, &args)?;

    let size = match args.size.as_deref() {
        Some(spec) => parse_surface_size(spec).context("invalid --size")?,
        None => WindowOptions::default().size,
    };
    let options = WindowOptions {
        title: format!("shaderfield: {}", plan.name),
        size,
        power: args.power,
        fire_every: plan.fire_every,
    };
    info!(
        effect = %plan.name,
        fps = ?plan.config.max_fps,
        textures = plan.config.textures.len(),
        "starting effect"
    );

    let reload: ReloadFn = {
        let args = args.clone();
        let target = target.clone();
        let fire_every = plan.fire_every;
        Box::new(move || {
            let plan = prepare(&target, &args)?;
            if plan.fire_every != fire_every {
                warn!("fire_event_every changes take effect after a restart");
            }
            info!(effect = %plan.name, "reloading effect");
            Ok(plan.config)
        })
    };

    renderer::run_window(plan.config, options, Some(reload))
}

fn prepare(target: &EffectTarget, args: &RunArgs) -> Result<EffectPlan> {
    let mut plan = load_effect(target)?;
    apply_overrides(&mut plan, args)?;
    Ok(plan)
}
