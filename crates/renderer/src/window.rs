use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use tracing::{error, info};

use crate::engine::{Engine, EngineStatus, TickOutcome};
use crate::error::EngineError;
use crate::gpu::WgpuBackend;
use crate::resize::SurfaceMetrics;
use crate::types::{EngineConfig, GpuPowerPreference, LoopState};

/// Tick spacing while paused or waiting on textures.
const IDLE_INTERVAL: Duration = Duration::from_millis(16);
/// Scroll distance of one wheel notch, in logical pixels.
const LINE_SCROLL: f64 = 40.0;

/// Produces a fresh effect configuration when the user asks for a reload.
pub type ReloadFn = Box<dyn FnMut() -> Result<EngineConfig>>;

#[derive(Debug, Clone)]
pub struct WindowOptions {
    pub title: String,
    /// Initial inner size in logical pixels.
    pub size: (u32, u32),
    pub power: GpuPowerPreference,
    /// Fires `u_event_time` on a fixed period, if set.
    pub fire_every: Option<Duration>,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "shaderfield".into(),
            size: (800, 600),
            power: GpuPowerPreference::default(),
            fire_every: None,
        }
    }
}

/// Opens a window and drives `config` until the window closes.
///
/// Space toggles playback, Enter or a left click fires an event, the mouse
/// wheel scrolls, `R` reloads through `reload`, and Escape quits.
pub fn run_window(
    config: EngineConfig,
    options: WindowOptions,
    mut reload: Option<ReloadFn>,
) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(options.title.as_str())
        .with_inner_size(LogicalSize::new(options.size.0, options.size.1))
        .with_transparent(true)
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let backend = WgpuBackend::new(Arc::clone(&window), options.power)?;
    let metrics = SurfaceMetrics::from_physical(window.inner_size(), window.scale_factor());
    let mut engine = Engine::new(backend, config, metrics)?;

    let failure: Rc<RefCell<Option<EngineError>>> = Rc::new(RefCell::new(None));
    let loop_failure = Rc::clone(&failure);
    let mut idle_until = Instant::now();
    let mut next_fire = options.fire_every.map(|every| Instant::now() + every);

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                engine.teardown();
                elwt.exit();
            }
            WindowEvent::Resized(size) => {
                engine.resize(SurfaceMetrics::from_physical(size, window.scale_factor()));
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                engine.resize(SurfaceMetrics::from_physical(window.inner_size(), scale_factor));
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                match event.logical_key {
                    Key::Named(NamedKey::Space) => {
                        let state = engine.toggle();
                        info!(%state, "playback toggled");
                    }
                    Key::Named(NamedKey::Enter) => engine.fire_event(),
                    Key::Named(NamedKey::Escape) => {
                        engine.teardown();
                        elwt.exit();
                    }
                    Key::Character(ref value) if value.eq_ignore_ascii_case("r") => {
                        let Some(reload) = reload.as_mut() else {
                            return;
                        };
                        match reload() {
                            Ok(config) => match engine.reinitialize(config) {
                                Ok(()) => info!("effect reloaded"),
                                Err(err) => error!(error = %err, "reloaded effect failed to start"),
                            },
                            Err(err) => error!("failed to reload effect: {err:#}"),
                        }
                    }
                    _ => {}
                }
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => engine.fire_event(),
            WindowEvent::MouseWheel { delta, .. } => {
                let dy = match delta {
                    MouseScrollDelta::LineDelta(_, lines) => lines as f64 * LINE_SCROLL,
                    MouseScrollDelta::PixelDelta(position) => position.y,
                };
                let scroll = (engine.scroll() as f64 - dy).max(0.0);
                engine.set_scroll(scroll as f32);
            }
            WindowEvent::RedrawRequested => {
                if engine.tick() == TickOutcome::Halted {
                    if let Some(err) = engine.error() {
                        error!(error = %err, "render loop stopped");
                        loop_failure.replace(Some(err.clone()));
                        elwt.exit();
                    }
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if let (Some(every), Some(deadline)) = (options.fire_every, next_fire) {
                if now >= deadline {
                    engine.fire_event();
                    next_fire = Some(now + every);
                }
            }
            if !engine.is_scheduled() {
                elwt.set_control_flow(ControlFlow::Wait);
                return;
            }

            let idle = engine.status() == EngineStatus::Loading
                || engine.loop_state() == LoopState::Paused;
            let wake = if idle {
                if now >= idle_until {
                    window.request_redraw();
                    idle_until = now + IDLE_INTERVAL;
                }
                Some(idle_until)
            } else {
                match engine.frame_wait() {
                    None => {
                        tracing::trace!("scheduler: issuing redraw now");
                        window.request_redraw();
                        None
                    }
                    Some(wait) => Some(now + wait),
                }
            };

            match (wake, next_fire) {
                (Some(wake), Some(fire)) => elwt.set_control_flow(ControlFlow::WaitUntil(wake.min(fire))),
                (Some(deadline), None) | (None, Some(deadline)) => {
                    elwt.set_control_flow(ControlFlow::WaitUntil(deadline))
                }
                (None, None) => elwt.set_control_flow(ControlFlow::Wait),
            }
        }
        Event::LoopExiting => engine.teardown(),
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))?;
    match failure.take() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
