//! Frame pacing for the render loop.
//!
//! [`advance`] is a pure function of the clock reading and loop state; the
//! engine owns the state and applies the decision.

use std::fmt;
use std::time::Duration;

use crate::types::LoopState;

/// Minimum spacing between drawn frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameBudget {
    Unbounded,
    Every(Duration),
}

impl FrameBudget {
    /// Non-positive, NaN, or infinite ceilings disable the cap.
    pub fn from_max_fps(max_fps: Option<f32>) -> Self {
        match max_fps {
            Some(fps) if fps.is_finite() && fps > 0.0 => {
                FrameBudget::Every(Duration::from_secs_f64(1.0 / fps as f64))
            }
            _ => FrameBudget::Unbounded,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            FrameBudget::Unbounded => None,
            FrameBudget::Every(interval) => Some(*interval),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    FrameBudget,
    LoadingTextures,
    SurfaceLost,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Paused => f.write_str("paused"),
            SkipReason::FrameBudget => f.write_str("frame budget"),
            SkipReason::LoadingTextures => f.write_str("loading textures"),
            SkipReason::SurfaceLost => f.write_str("surface lost"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Draw now; `last_frame` is the new frame timestamp to record.
    Draw { last_frame: Duration },
    Skip(SkipReason),
}

/// Decides whether the tick at `now` should draw.
///
/// Skipped frames are dropped, never queued.
pub fn advance(
    now: Duration,
    state: LoopState,
    budget: FrameBudget,
    last_frame: Option<Duration>,
) -> TickDecision {
    if state == LoopState::Paused {
        return TickDecision::Skip(SkipReason::Paused);
    }

    if let (FrameBudget::Every(interval), Some(last)) = (budget, last_frame) {
        if now.saturating_sub(last) < interval {
            return TickDecision::Skip(SkipReason::FrameBudget);
        }
    }

    TickDecision::Draw { last_frame: now }
}

/// Earliest clock reading at which [`advance`] may draw again.
pub fn next_deadline(budget: FrameBudget, last_frame: Option<Duration>) -> Option<Duration> {
    match (budget, last_frame) {
        (FrameBudget::Every(interval), Some(last)) => Some(last + interval),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn unbounded_budget_draws_every_tick() {
        let budget = FrameBudget::from_max_fps(None);
        assert_eq!(budget, FrameBudget::Unbounded);
        assert_eq!(
            advance(ms(1), LoopState::Playing, budget, Some(ms(1))),
            TickDecision::Draw { last_frame: ms(1) }
        );
    }

    #[test]
    fn degenerate_ceilings_are_unbounded() {
        for fps in [0.0, -5.0, f32::NAN, f32::INFINITY] {
            assert_eq!(FrameBudget::from_max_fps(Some(fps)), FrameBudget::Unbounded);
        }
    }

    #[test]
    fn capped_budget_drops_early_ticks() {
        let budget = FrameBudget::from_max_fps(Some(30.0));
        let last = Some(ms(100));
        assert_eq!(
            advance(ms(120), LoopState::Playing, budget, last),
            TickDecision::Skip(SkipReason::FrameBudget)
        );
        assert_eq!(
            advance(ms(134), LoopState::Playing, budget, last),
            TickDecision::Draw { last_frame: ms(134) }
        );
    }

    #[test]
    fn first_frame_is_never_throttled() {
        let budget = FrameBudget::from_max_fps(Some(1.0));
        assert_eq!(
            advance(Duration::ZERO, LoopState::Playing, budget, None),
            TickDecision::Draw {
                last_frame: Duration::ZERO
            }
        );
    }

    #[test]
    fn paused_wins_over_budget() {
        let budget = FrameBudget::from_max_fps(Some(60.0));
        assert_eq!(
            advance(ms(10_000), LoopState::Paused, budget, None),
            TickDecision::Skip(SkipReason::Paused)
        );
    }

    #[test]
    fn deadline_follows_last_frame() {
        let budget = FrameBudget::Every(ms(50));
        assert_eq!(next_deadline(budget, Some(ms(20))), Some(ms(70)));
        assert_eq!(next_deadline(budget, None), None);
        assert_eq!(next_deadline(FrameBudget::Unbounded, Some(ms(20))), None);
    }
}
