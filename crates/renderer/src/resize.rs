use winit::dpi::PhysicalSize;

pub const MIN_PIXEL_RATIO: f64 = 1.0;
pub const MAX_PIXEL_RATIO: f64 = 2.0;

/// Displayed size of the host element in logical pixels plus its pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMetrics {
    pub width: f64,
    pub height: f64,
    pub pixel_ratio: f64,
}

impl SurfaceMetrics {
    pub fn new(width: f64, height: f64, pixel_ratio: f64) -> Self {
        Self {
            width,
            height,
            pixel_ratio,
        }
    }

    /// Converts a window's physical size and scale factor back to logical units.
    pub fn from_physical(size: PhysicalSize<u32>, scale_factor: f64) -> Self {
        let scale = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        Self {
            width: size.width as f64 / scale,
            height: size.height as f64 / scale,
            pixel_ratio: scale,
        }
    }

    /// Backing buffer size: displayed size times the clamped pixel ratio.
    pub fn backing_size(&self) -> PhysicalSize<u32> {
        let ratio = clamp_pixel_ratio(self.pixel_ratio);
        PhysicalSize::new(
            scale_axis(self.width, ratio),
            scale_axis(self.height, ratio),
        )
    }
}

pub fn clamp_pixel_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return MIN_PIXEL_RATIO;
    }
    ratio.clamp(MIN_PIXEL_RATIO, MAX_PIXEL_RATIO)
}

fn scale_axis(logical: f64, ratio: f64) -> u32 {
    let scaled = (logical.max(0.0) * ratio).round();
    if scaled.is_finite() {
        (scaled as u32).max(1)
    } else {
        1
    }
}

/// Tracks the backing size and whether the resize watch is still attached.
#[derive(Debug, Clone)]
pub struct ResizeCoordinator {
    backing: PhysicalSize<u32>,
    attached: bool,
}

impl ResizeCoordinator {
    pub fn new(metrics: SurfaceMetrics) -> Self {
        Self {
            backing: metrics.backing_size(),
            attached: true,
        }
    }

    pub fn backing(&self) -> PhysicalSize<u32> {
        self.backing
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Records new metrics; returns the backing size when it changed.
    pub fn observe(&mut self, metrics: SurfaceMetrics) -> Option<PhysicalSize<u32>> {
        if !self.attached {
            return None;
        }
        let next = metrics.backing_size();
        if next == self.backing {
            return None;
        }
        self.backing = next;
        Some(next)
    }

    /// Detaches the watch; returns `true` only on the first call.
    pub fn detach(&mut self) -> bool {
        std::mem::replace(&mut self.attached, false)
    }
}
