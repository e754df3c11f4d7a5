use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Abstraction over where frame timestamps originate from.
pub trait Clock: Send {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
}

/// Clock backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward; saturates at the largest representable reading.
    pub fn advance(&self, step: Duration) {
        let step = saturating_nanos(step);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |nanos| {
                Some(nanos.saturating_add(step))
            });
    }

    pub fn set(&self, now: Duration) {
        self.nanos.store(saturating_nanos(now), Ordering::SeqCst);
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Time bookkeeping for the shader time uniforms.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockState {
    /// Clock reading of the first accepted frame.
    pub start: Option<Duration>,
    /// Seconds since `start`, refreshed on every drawn frame.
    pub current: f32,
    /// Value of `current` captured by the last `fire_event`.
    pub event: f32,
    /// Clock reading of the last drawn frame.
    pub last_frame: Option<Duration>,
}

impl ClockState {
    /// Seconds elapsed at `now`, or zero before the first frame.
    pub fn elapsed_at(&self, now: Duration) -> f32 {
        self.start
            .map(|start| now.saturating_sub(start).as_secs_f32())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let observer = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(observer.now(), Duration::from_millis(250));
        clock.set(Duration::from_secs(3));
        assert_eq!(observer.now(), Duration::from_secs(3));
    }

    #[test]
    fn huge_steps_saturate_instead_of_wrapping() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(1));
        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), Duration::from_nanos(u64::MAX));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_nanos(u64::MAX));

        clock.set(Duration::from_secs(u64::MAX));
        assert_eq!(clock.now(), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn elapsed_is_zero_before_start() {
        let state = ClockState::default();
        assert_eq!(state.elapsed_at(Duration::from_secs(10)), 0.0);

        let started = ClockState {
            start: Some(Duration::from_secs(2)),
            ..ClockState::default()
        };
        assert!((started.elapsed_at(Duration::from_millis(3500)) - 1.5).abs() < 1e-6);
    }
}
