//! The engine ties the program manager, uniform protocol, texture loader,
//! frame scheduler, and resize coordinator together.
//!
//! ```text
//!   Engine::new ──▶ build_program ──▶ resize_buffers + u_resolution
//!                        │
//!                        ▼
//!                 static uniforms ──▶ TextureLoad (optional)
//!                                          │ all slots committed
//!                                          ▼
//!   tick() ──▶ advance() ──▶ per-frame uniforms ──▶ bind slots ──▶ draw ──▶ present
//! ```
//!
//! All GPU work happens on the caller's thread inside these methods. Texture
//! workers only hand back decoded pixels.

use std::sync::Arc;
use std::time::Duration;

use winit::dpi::PhysicalSize;

use crate::backend::{GraphicsBackend, ProgramId, TextureId, UniformLocation, UniformUpload};
use crate::clock::{Clock, ClockState, SystemClock};
use crate::compile::VERTEX_SHADER_GLSL;
use crate::error::{BackendError, EngineError};
use crate::program::build_program;
use crate::resize::{ResizeCoordinator, SurfaceMetrics};
use crate::scheduler::{self, FrameBudget, SkipReason, TickDecision};
use crate::textures::{DefaultTextureSource, PendingTexture, TextureLoad, TextureSource};
use crate::types::{EngineConfig, LoopState, TextureUnit};
use crate::uniforms::{
    self, EVENT_TIME_UNIFORM, RESOLUTION_UNIFORM, SCROLL_UNIFORM, TIME_UNIFORM,
};

const STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Program is linked; waiting for every texture slot to be committed.
    Loading,
    Running,
    /// A terminal error occurred; see [`Engine::error`].
    Failed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Drew,
    Skipped(SkipReason),
    /// The loop has stopped; no GPU work was issued.
    Halted,
}

/// A committed texture bound to a fixed unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureSlot {
    pub unit: TextureUnit,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
    pub location: Option<UniformLocation>,
}

#[derive(Debug, Default)]
struct FrameStats {
    window_start: Option<Duration>,
    drawn: u32,
    skipped: u32,
}

impl FrameStats {
    fn record(&mut self, now: Duration, drew: bool, time: f32) {
        let start = *self.window_start.get_or_insert(now);
        if drew {
            self.drawn += 1;
        } else {
            self.skipped += 1;
        }
        let elapsed = now.saturating_sub(start);
        if elapsed >= STATS_INTERVAL {
            let seconds = elapsed.as_secs_f32();
            tracing::debug!(
                fps = (self.drawn as f32 / seconds).round(),
                skipped = self.skipped,
                time,
                "render stats"
            );
            *self = Self {
                window_start: Some(now),
                ..Self::default()
            };
        }
    }
}

pub struct Engine<B: GraphicsBackend> {
    backend: B,
    config: EngineConfig,
    budget: FrameBudget,
    loop_state: LoopState,
    status: EngineStatus,
    error: Option<EngineError>,
    program: Option<ProgramId>,
    clock: Box<dyn Clock>,
    clock_state: ClockState,
    texture_source: Arc<dyn TextureSource>,
    loader: Option<TextureLoad>,
    textures: Vec<TextureId>,
    slots: Vec<TextureSlot>,
    resize: ResizeCoordinator,
    scroll: f32,
    stats: FrameStats,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Builds an engine on the system clock, loading textures from disk or HTTP.
    pub fn new(backend: B, config: EngineConfig, metrics: SurfaceMetrics) -> Result<Self, EngineError> {
        Self::with_parts(
            backend,
            config,
            metrics,
            Box::new(SystemClock::new()),
            Arc::new(DefaultTextureSource),
        )
    }

    pub fn with_parts(
        backend: B,
        config: EngineConfig,
        metrics: SurfaceMetrics,
        clock: Box<dyn Clock>,
        texture_source: Arc<dyn TextureSource>,
    ) -> Result<Self, EngineError> {
        let mut engine = Self {
            backend,
            budget: FrameBudget::from_max_fps(config.max_fps),
            loop_state: config.initial_state,
            config,
            status: EngineStatus::Loading,
            error: None,
            program: None,
            clock,
            clock_state: ClockState::default(),
            texture_source,
            loader: None,
            textures: Vec::new(),
            slots: Vec::new(),
            resize: ResizeCoordinator::new(metrics),
            scroll: 0.0,
            stats: FrameStats::default(),
        };

        if let Err(err) = engine.initialize() {
            tracing::error!(error = %err, "engine initialisation failed");
            engine.teardown();
            return Err(err);
        }
        Ok(engine)
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        for index in 0..self.config.textures.len() {
            TextureUnit::try_from(index)
                .map_err(|index| EngineError::TextureUnitRange { index })?;
        }

        let program = build_program(
            &mut self.backend,
            VERTEX_SHADER_GLSL,
            &self.config.fragment_source,
        )?;
        self.program = Some(program);

        self.apply_backing_size(self.resize.backing())?;

        let uploaded = uniforms::apply_uniforms(&mut self.backend, program, &self.config.uniforms);
        tracing::debug!(
            uploaded,
            declared = self.config.uniforms.len(),
            "static uniforms uploaded"
        );

        if self.config.textures.is_empty() {
            self.status = EngineStatus::Running;
        } else {
            self.start_texture_load()?;
            self.status = EngineStatus::Loading;
        }

        let backing = self.resize.backing();
        tracing::info!(
            width = backing.width,
            height = backing.height,
            textures = self.config.textures.len(),
            fps = ?self.budget.interval().map(|interval| (1.0 / interval.as_secs_f64()).round()),
            state = %self.loop_state,
            "engine initialised"
        );
        Ok(())
    }

    fn start_texture_load(&mut self) -> Result<(), EngineError> {
        let mut pending = Vec::with_capacity(self.config.textures.len());
        for (index, locator) in self.config.textures.iter().enumerate() {
            let unit = TextureUnit::try_from(index)
                .map_err(|index| EngineError::TextureUnitRange { index })?;
            let texture =
                self.backend
                    .create_texture(unit)
                    .map_err(|err| EngineError::TextureLoad {
                        index,
                        locator: locator.clone(),
                        message: err.to_string(),
                    })?;
            self.textures.push(texture);
            pending.push(PendingTexture {
                index,
                unit,
                locator: locator.clone(),
                texture,
            });
        }
        tracing::debug!(count = pending.len(), "loading textures");
        self.loader = Some(TextureLoad::start(
            pending,
            Arc::clone(&self.texture_source),
        )?);
        Ok(())
    }

    /// Advances the render loop by one host tick.
    pub fn tick(&mut self) -> TickOutcome {
        match self.status {
            EngineStatus::Failed | EngineStatus::Released => return TickOutcome::Halted,
            EngineStatus::Loading => {
                if let Err(err) = self.poll_textures() {
                    self.fail(err);
                    return TickOutcome::Halted;
                }
                if self.status == EngineStatus::Loading {
                    return TickOutcome::Skipped(SkipReason::LoadingTextures);
                }
            }
            EngineStatus::Running => {}
        }

        let now = self.clock.now();
        let outcome = match scheduler::advance(
            now,
            self.loop_state,
            self.budget,
            self.clock_state.last_frame,
        ) {
            TickDecision::Skip(reason) => TickOutcome::Skipped(reason),
            TickDecision::Draw { last_frame } => {
                self.clock_state.last_frame = Some(last_frame);
                let start = *self.clock_state.start.get_or_insert(now);
                self.clock_state.current = now.saturating_sub(start).as_secs_f32();
                self.draw_frame()
            }
        };

        if outcome != TickOutcome::Halted {
            self.stats.record(
                now,
                outcome == TickOutcome::Drew,
                self.clock_state.current,
            );
        }
        outcome
    }

    fn draw_frame(&mut self) -> TickOutcome {
        let Some(program) = self.program else {
            return TickOutcome::Halted;
        };
        let backing = self.resize.backing();

        self.backend.use_program(program);
        uniforms::upload(
            &mut self.backend,
            program,
            TIME_UNIFORM,
            UniformUpload::Float(self.clock_state.current),
        );
        uniforms::upload(
            &mut self.backend,
            program,
            SCROLL_UNIFORM,
            UniformUpload::Float(self.scroll),
        );
        uniforms::upload(
            &mut self.backend,
            program,
            EVENT_TIME_UNIFORM,
            UniformUpload::Float(self.clock_state.event),
        );
        uniforms::upload(
            &mut self.backend,
            program,
            RESOLUTION_UNIFORM,
            resolution_upload(backing),
        );

        self.backend.set_viewport(backing);
        self.backend.clear();
        for slot in &self.slots {
            self.backend.bind_texture(slot.unit, slot.texture, slot.location);
        }

        let presented = self
            .backend
            .draw_fullscreen()
            .and_then(|()| self.backend.present());
        match presented {
            Ok(()) => TickOutcome::Drew,
            Err(BackendError::SurfaceLost) => {
                tracing::warn!("surface lost; reconfiguring");
                match self.backend.resize_buffers(backing) {
                    Ok(()) => TickOutcome::Skipped(SkipReason::SurfaceLost),
                    Err(err) => {
                        self.fail(EngineError::Presentation(err.to_string()));
                        TickOutcome::Halted
                    }
                }
            }
            Err(err) => {
                self.fail(EngineError::Presentation(err.to_string()));
                TickOutcome::Halted
            }
        }
    }

    fn poll_textures(&mut self) -> Result<(), EngineError> {
        let Some(loader) = self.loader.as_mut() else {
            self.status = EngineStatus::Running;
            return Ok(());
        };

        for (entry, image) in loader.poll()? {
            self.backend
                .upload_texture(entry.texture, &image)
                .map_err(|err| EngineError::TextureLoad {
                    index: entry.index,
                    locator: entry.locator.clone(),
                    message: err.to_string(),
                })?;
            let location = self
                .program
                .and_then(|program| self.backend.uniform_location(program, &entry.unit.uniform_name()));
            tracing::debug!(
                index = entry.index,
                locator = %entry.locator,
                width = image.width,
                height = image.height,
                "texture committed"
            );
            self.slots.push(TextureSlot {
                unit: entry.unit,
                texture: entry.texture,
                width: image.width,
                height: image.height,
                location,
            });
        }

        let complete = loader.is_complete();
        if complete {
            self.loader = None;
            self.status = EngineStatus::Running;
            tracing::info!(count = self.slots.len(), "textures loaded; starting render loop");
        }
        Ok(())
    }

    fn apply_backing_size(&mut self, size: PhysicalSize<u32>) -> Result<(), EngineError> {
        self.backend
            .resize_buffers(size)
            .map_err(|err| EngineError::Presentation(err.to_string()))?;
        if let Some(program) = self.program {
            self.backend.use_program(program);
            uniforms::upload(
                &mut self.backend,
                program,
                RESOLUTION_UNIFORM,
                resolution_upload(size),
            );
        }
        tracing::debug!(width = size.width, height = size.height, "backing buffers resized");
        Ok(())
    }

    fn fail(&mut self, err: EngineError) {
        tracing::error!(error = %err, "render loop halted");
        if let Some(loader) = self.loader.take() {
            loader.cancel();
        }
        self.status = EngineStatus::Failed;
        self.error = Some(err);
    }

    pub fn play(&mut self) {
        self.set_loop_state(LoopState::Playing);
    }

    pub fn pause(&mut self) {
        self.set_loop_state(LoopState::Paused);
    }

    pub fn toggle(&mut self) -> LoopState {
        let next = match self.loop_state {
            LoopState::Playing => LoopState::Paused,
            LoopState::Paused => LoopState::Playing,
        };
        self.set_loop_state(next);
        next
    }

    fn set_loop_state(&mut self, state: LoopState) {
        if self.loop_state != state {
            tracing::debug!(%state, "loop state changed");
        }
        self.loop_state = state;
    }

    /// Snapshots the current elapsed time into `u_event_time`.
    pub fn fire_event(&mut self) {
        let now = self.clock.now();
        self.clock_state.event = self.clock_state.elapsed_at(now);
        tracing::debug!(event_time = self.clock_state.event, "event fired");
    }

    pub fn set_scroll(&mut self, scroll: f32) {
        self.scroll = scroll;
    }

    pub fn scroll(&self) -> f32 {
        self.scroll
    }

    /// Applies a new displayed size right away, outside the frame path.
    pub fn resize(&mut self, metrics: SurfaceMetrics) {
        if self.status == EngineStatus::Released {
            tracing::debug!("resize after teardown ignored");
            return;
        }
        let Some(size) = self.resize.observe(metrics) else {
            return;
        };
        if self.status == EngineStatus::Failed {
            return;
        }
        if let Err(err) = self.apply_backing_size(size) {
            self.fail(err);
        }
    }

    /// Replaces the effect, releasing every GPU object and resetting the clock.
    pub fn reinitialize(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        if self.status == EngineStatus::Released {
            return Err(EngineError::ContextUnavailable(
                "engine has been torn down".into(),
            ));
        }
        self.release_gpu_objects();
        self.budget = FrameBudget::from_max_fps(config.max_fps);
        self.loop_state = config.initial_state;
        self.config = config;
        self.clock_state = ClockState::default();
        self.stats = FrameStats::default();
        self.error = None;
        self.status = EngineStatus::Loading;

        if let Err(err) = self.initialize() {
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Stops the loop and releases every GPU object. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.status == EngineStatus::Released {
            return;
        }
        if self.resize.detach() {
            tracing::debug!("resize watch detached");
        }
        self.release_gpu_objects();
        self.status = EngineStatus::Released;
        tracing::debug!("engine torn down");
    }

    fn release_gpu_objects(&mut self) {
        if let Some(loader) = self.loader.take() {
            loader.cancel();
        }
        self.slots.clear();
        for texture in self.textures.drain(..) {
            self.backend.release_texture(texture);
        }
        if let Some(program) = self.program.take() {
            self.backend.release_program(program);
        }
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub fn clock(&self) -> &ClockState {
        &self.clock_state
    }

    pub fn backing_size(&self) -> PhysicalSize<u32> {
        self.resize.backing()
    }

    pub fn texture_slots(&self) -> &[TextureSlot] {
        &self.slots
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether the host should keep delivering ticks.
    pub fn is_scheduled(&self) -> bool {
        matches!(self.status, EngineStatus::Loading | EngineStatus::Running)
    }

    /// Time left until the frame budget allows the next draw; `None` when
    /// the next tick may draw immediately.
    pub fn frame_wait(&self) -> Option<Duration> {
        let deadline = scheduler::next_deadline(self.budget, self.clock_state.last_frame)?;
        let wait = deadline.saturating_sub(self.clock.now());
        (!wait.is_zero()).then_some(wait)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GraphicsBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn resolution_upload(size: PhysicalSize<u32>) -> UniformUpload<'static> {
    UniformUpload::Vec2([size.width as f32, size.height as f32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    use crate::clock::ManualClock;
    use crate::error::ShaderStage;
    use crate::testing::{Call, CallLog, Recorded, RecordingBackend};
    use crate::textures::DecodedImage;
    use crate::types::Uniform;

    #[derive(Default)]
    struct StaticSource {
        failures: HashMap<String, String>,
        fetched: Arc<Mutex<Vec<String>>>,
    }

    impl StaticSource {
        fn ok() -> Self {
            Self::default()
        }

        fn failing(locator: &str, message: &str) -> Self {
            let mut source = Self::default();
            source
                .failures
                .insert(locator.to_string(), message.to_string());
            source
        }

        fn fetch_log(&self) -> Arc<Mutex<Vec<String>>> {
            Arc::clone(&self.fetched)
        }
    }

    impl TextureSource for StaticSource {
        fn fetch(&self, locator: &str) -> anyhow::Result<DecodedImage> {
            self.fetched.lock().unwrap().push(locator.to_string());
            if let Some(message) = self.failures.get(locator) {
                anyhow::bail!("{message}");
            }
            Ok(DecodedImage {
                width: 4,
                height: 2,
                pixels: vec![128; 4 * 2 * 4],
            })
        }
    }

    fn metrics(width: f64, height: f64, ratio: f64) -> SurfaceMetrics {
        SurfaceMetrics::new(width, height, ratio)
    }

    fn build(
        backend: RecordingBackend,
        config: EngineConfig,
        source: StaticSource,
    ) -> (Engine<RecordingBackend>, ManualClock, CallLog) {
        let clock = ManualClock::new();
        let log = backend.log();
        let engine = Engine::with_parts(
            backend,
            config,
            metrics(100.0, 100.0, 1.0),
            Box::new(clock.clone()),
            Arc::new(source),
        )
        .expect("engine initialises");
        (engine, clock, log)
    }

    fn settle(engine: &mut Engine<RecordingBackend>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.status() == EngineStatus::Loading {
            let outcome = engine.tick();
            if engine.status() == EngineStatus::Loading {
                assert_eq!(outcome, TickOutcome::Skipped(SkipReason::LoadingTextures));
            }
            assert!(Instant::now() < deadline, "textures never settled");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn uploaded_floats(calls: &[Call], name: &str) -> Vec<f32> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::Upload {
                    name: uploaded,
                    value: Recorded::Float(value),
                } if uploaded == name => Some(*value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn static_uniforms_precede_first_draw() {
        let config = EngineConfig::new("fs")
            .with_uniform("u_dot_size", Uniform::Scalar(2.0))
            .with_uniform(
                "u_colors",
                Uniform::Vector3Array(vec![[1.0, 0.0, 0.0], [0.0, 0.5, 1.0]]),
            );
        let (mut engine, _clock, log) = build(RecordingBackend::new(), config, StaticSource::ok());

        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(engine.tick(), TickOutcome::Drew);

        let calls = log.calls();
        let first_draw = calls.iter().position(|call| *call == Call::Draw).unwrap();
        let dot_size = calls
            .iter()
            .position(|call| *call == Call::float("u_dot_size", 2.0))
            .unwrap();
        let colors = calls
            .iter()
            .position(|call| {
                *call == Call::vec3_array("u_colors", &[1.0, 0.0, 0.0, 0.0, 0.5, 1.0])
            })
            .unwrap();
        assert!(dot_size < first_draw);
        assert!(colors < first_draw);
    }

    #[test]
    fn frame_sequence_follows_uniforms_viewport_clear_draw_present() {
        let (mut engine, _clock, log) = build(
            RecordingBackend::new(),
            EngineConfig::new("fs"),
            StaticSource::ok(),
        );
        let mark = log.len();
        assert_eq!(engine.tick(), TickOutcome::Drew);

        let frame = log.since(mark);
        let position = |wanted: &Call| frame.iter().position(|call| call == wanted).unwrap();
        let time = frame
            .iter()
            .position(|call| call.is_upload_of(TIME_UNIFORM))
            .unwrap();
        let viewport = position(&Call::Viewport(PhysicalSize::new(100, 100)));
        let clear = position(&Call::Clear);
        let draw = position(&Call::Draw);
        let present = position(&Call::Present);
        assert!(matches!(frame[0], Call::UseProgram(_)));
        assert!(time < viewport && viewport < clear && clear < draw && draw < present);
    }

    #[test]
    fn thirty_fps_ceiling_spaces_draws() {
        let config = EngineConfig::new("fs").with_max_fps(30.0);
        let (mut engine, clock, _log) = build(RecordingBackend::new(), config, StaticSource::ok());

        let mut drawn_at = Vec::new();
        for _ in 0..200 {
            if engine.tick() == TickOutcome::Drew {
                drawn_at.push(clock.now());
            }
            clock.advance(Duration::from_millis(5));
        }

        assert!(drawn_at.len() > 20);
        let min_gap = Duration::from_secs_f64(1.0 / 30.0);
        for pair in drawn_at.windows(2) {
            assert!(pair[1] - pair[0] >= min_gap, "{:?} too close", pair);
        }
    }

    #[test]
    fn paused_loop_issues_no_draws_or_time_uploads() {
        let (mut engine, clock, log) = build(
            RecordingBackend::new(),
            EngineConfig::new("fs"),
            StaticSource::ok(),
        );
        assert_eq!(engine.tick(), TickOutcome::Drew);
        clock.advance(Duration::from_millis(500));
        assert_eq!(engine.tick(), TickOutcome::Drew);
        let before = uploaded_floats(&log.calls(), TIME_UNIFORM);

        engine.pause();
        let mark = log.len();
        for _ in 0..10 {
            clock.advance(Duration::from_millis(16));
            assert_eq!(engine.tick(), TickOutcome::Skipped(SkipReason::Paused));
        }
        let paused = log.since(mark);
        assert!(!paused.contains(&Call::Draw));
        assert!(uploaded_floats(&paused, TIME_UNIFORM).is_empty());
        assert!(engine.is_scheduled());

        engine.play();
        assert_eq!(engine.tick(), TickOutcome::Drew);
        let after = uploaded_floats(&log.since(mark), TIME_UNIFORM);
        assert_eq!(after.len(), 1);
        assert!(after[0] > *before.last().unwrap());
    }

    #[test]
    fn initial_paused_state_and_last_call_wins() {
        let config = EngineConfig::new("fs").with_initial_state(LoopState::Paused);
        let (mut engine, _clock, log) = build(RecordingBackend::new(), config, StaticSource::ok());
        assert_eq!(engine.tick(), TickOutcome::Skipped(SkipReason::Paused));

        engine.play();
        engine.pause();
        engine.play();
        engine.pause();
        assert_eq!(engine.loop_state(), LoopState::Paused);
        assert_eq!(engine.tick(), TickOutcome::Skipped(SkipReason::Paused));
        assert_eq!(engine.toggle(), LoopState::Playing);
        assert_eq!(engine.tick(), TickOutcome::Drew);
        assert_eq!(log.draws(), 1);
    }

    #[test]
    fn fired_event_is_stable_until_fired_again() {
        let (mut engine, clock, log) = build(
            RecordingBackend::new(),
            EngineConfig::new("fs"),
            StaticSource::ok(),
        );
        engine.fire_event();
        assert_eq!(engine.clock().event, 0.0);

        assert_eq!(engine.tick(), TickOutcome::Drew);
        clock.advance(Duration::from_secs(2));
        engine.fire_event();
        let mark = log.len();
        for _ in 0..3 {
            assert_eq!(engine.tick(), TickOutcome::Drew);
            clock.advance(Duration::from_millis(250));
        }
        let events = uploaded_floats(&log.since(mark), EVENT_TIME_UNIFORM);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|value| (value - 2.0).abs() < 1e-6));
    }

    #[test]
    fn scroll_is_uploaded_each_frame() {
        let (mut engine, _clock, log) = build(
            RecordingBackend::new(),
            EngineConfig::new("fs"),
            StaticSource::ok(),
        );
        engine.set_scroll(240.0);
        assert_eq!(engine.tick(), TickOutcome::Drew);
        assert_eq!(uploaded_floats(&log.calls(), SCROLL_UNIFORM), vec![240.0]);
    }

    #[test]
    fn textures_bind_before_every_draw() {
        let config = EngineConfig::new("fs")
            .with_texture("a.png")
            .with_texture("b.png");
        let (mut engine, _clock, log) = build(RecordingBackend::new(), config, StaticSource::ok());
        settle(&mut engine);

        assert_eq!(engine.status(), EngineStatus::Running);
        let slots = engine.texture_slots().to_vec();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].unit.index(), 0);
        assert_eq!(slots[1].unit.index(), 1);
        assert_eq!((slots[0].width, slots[0].height), (4, 2));
        assert!(slots.iter().all(|slot| slot.location.is_some()));

        let mark = log.len();
        assert_eq!(engine.tick(), TickOutcome::Drew);
        let frame = log.since(mark);
        let draw = frame.iter().position(|call| *call == Call::Draw).unwrap();
        for slot in &slots {
            let bind = frame
                .iter()
                .position(|call| *call == Call::BindTexture(slot.unit, slot.texture))
                .unwrap();
            assert!(bind < draw);
        }
    }

    #[test]
    fn failing_texture_halts_before_any_draw() {
        let config = EngineConfig::new("fs")
            .with_texture("a.png")
            .with_texture("b.png")
            .with_texture("c.png");
        let source = StaticSource::failing("b.png", "404 not found");
        let fetched = source.fetch_log();
        let (mut engine, _clock, log) = build(RecordingBackend::new(), config, source);
        settle(&mut engine);
        // The failing fetch is the loader's last act before it exits.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(*fetched.lock().unwrap(), vec!["a.png", "b.png"]);

        assert_eq!(engine.status(), EngineStatus::Failed);
        assert!(matches!(
            engine.error(),
            Some(EngineError::TextureLoad { index: 1, .. })
        ));
        assert!(engine.texture_slots().iter().all(|slot| slot.unit.index() < 1));
        assert_eq!(engine.tick(), TickOutcome::Halted);
        assert!(!engine.is_scheduled());
        assert_eq!(log.draws(), 0);

        let third = log
            .calls()
            .iter()
            .find_map(|call| match call {
                Call::CreateTexture(unit, texture) if unit.index() == 2 => Some(*texture),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            log.count(|call| matches!(call, Call::UploadTexture { texture, .. } if *texture == third)),
            0
        );
    }

    #[test]
    fn too_many_textures_are_rejected_before_compiling() {
        let mut config = EngineConfig::new("fs");
        for index in 0..17 {
            config.textures.push(format!("{index}.png"));
        }
        let backend = RecordingBackend::new();
        let log = backend.log();
        let result = Engine::with_parts(
            backend,
            config,
            metrics(10.0, 10.0, 1.0),
            Box::new(ManualClock::new()),
            Arc::new(StaticSource::ok()),
        );

        assert!(matches!(
            result,
            Err(EngineError::TextureUnitRange { index: 16 })
        ));
        assert_eq!(
            log.count(|call| matches!(call, Call::CompileShader(..))),
            0
        );
    }

    #[test]
    fn compile_error_never_draws() {
        let backend = RecordingBackend::new()
            .failing_compile(ShaderStage::Fragment, "ERROR: 0:12: 'colour' : undeclared identifier");
        let log = backend.log();
        let result = Engine::with_parts(
            backend,
            EngineConfig::new("broken"),
            metrics(10.0, 10.0, 1.0),
            Box::new(ManualClock::new()),
            Arc::new(StaticSource::ok()),
        );

        match result {
            Err(EngineError::Compile { stage, diagnostic }) => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(diagnostic.contains("colour"));
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("engine should not initialise"),
        }
        assert_eq!(log.count(|call| matches!(call, Call::LinkProgram { .. })), 0);
        assert_eq!(log.draws(), 0);
    }

    #[test]
    fn resize_updates_resolution_before_next_draw() {
        let (mut engine, _clock, log) = build(
            RecordingBackend::new(),
            EngineConfig::new("fs"),
            StaticSource::ok(),
        );
        assert_eq!(engine.backing_size(), PhysicalSize::new(100, 100));
        assert!(log
            .calls()
            .contains(&Call::vec2(RESOLUTION_UNIFORM, [100.0, 100.0])));

        let mark = log.len();
        engine.resize(metrics(200.0, 50.0, 1.5));
        let resized = log.since(mark);
        assert_eq!(
            resized.first(),
            Some(&Call::ResizeBuffers(PhysicalSize::new(300, 75)))
        );
        assert!(resized.contains(&Call::vec2(RESOLUTION_UNIFORM, [300.0, 75.0])));
        assert!(!resized.contains(&Call::Draw));

        assert_eq!(engine.tick(), TickOutcome::Drew);
        assert!(log
            .since(mark)
            .contains(&Call::Viewport(PhysicalSize::new(300, 75))));
    }

    #[test]
    fn unchanged_size_does_not_resize() {
        let (mut engine, _clock, log) = build(
            RecordingBackend::new(),
            EngineConfig::new("fs"),
            StaticSource::ok(),
        );
        let mark = log.len();
        engine.resize(metrics(50.0, 50.0, 2.0));
        assert!(log.since(mark).is_empty());
    }

    #[test]
    fn lost_surface_is_reconfigured() {
        let backend = RecordingBackend::new().failing_present(BackendError::SurfaceLost);
        let (mut engine, _clock, log) = build(backend, EngineConfig::new("fs"), StaticSource::ok());

        let mark = log.len();
        assert_eq!(
            engine.tick(),
            TickOutcome::Skipped(SkipReason::SurfaceLost)
        );
        assert!(log
            .since(mark)
            .contains(&Call::ResizeBuffers(PhysicalSize::new(100, 100))));
        assert_eq!(engine.tick(), TickOutcome::Drew);
    }

    #[test]
    fn out_of_memory_is_terminal() {
        let backend = RecordingBackend::new().failing_present(BackendError::OutOfMemory);
        let (mut engine, _clock, _log) =
            build(backend, EngineConfig::new("fs"), StaticSource::ok());
        assert_eq!(engine.tick(), TickOutcome::Halted);
        assert!(matches!(engine.error(), Some(EngineError::Presentation(_))));
    }

    #[test]
    fn teardown_is_idempotent_and_final() {
        let config = EngineConfig::new("fs").with_texture("a.png");
        let (mut engine, _clock, log) = build(RecordingBackend::new(), config, StaticSource::ok());
        settle(&mut engine);

        engine.teardown();
        engine.teardown();
        assert_eq!(engine.status(), EngineStatus::Released);
        assert_eq!(
            log.count(|call| matches!(call, Call::ReleaseProgram(_))),
            1
        );
        assert_eq!(
            log.count(|call| matches!(call, Call::ReleaseTexture(_))),
            1
        );

        let mark = log.len();
        assert_eq!(engine.tick(), TickOutcome::Halted);
        engine.resize(metrics(640.0, 480.0, 1.0));
        drop(engine);
        assert!(log.since(mark).is_empty());
    }

    #[test]
    fn reinitialize_resets_clock_and_rebuilds_program() {
        let (mut engine, clock, log) = build(
            RecordingBackend::new(),
            EngineConfig::new("fs"),
            StaticSource::ok(),
        );
        assert_eq!(engine.tick(), TickOutcome::Drew);
        clock.advance(Duration::from_secs(3));
        assert_eq!(engine.tick(), TickOutcome::Drew);
        assert!(engine.clock().current >= 3.0);

        engine
            .reinitialize(EngineConfig::new("fs2").with_max_fps(10.0))
            .unwrap();
        assert_eq!(
            log.count(|call| matches!(call, Call::ReleaseProgram(_))),
            1
        );
        let mark = log.len();
        assert_eq!(engine.tick(), TickOutcome::Drew);
        assert_eq!(uploaded_floats(&log.since(mark), TIME_UNIFORM), vec![0.0]);
        assert_eq!(engine.frame_wait(), Some(Duration::from_millis(100)));
    }
}
