//! Preview sizing, zoom and on-screen placement

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

/// Integer pixel size
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Intrinsic document size in CSS pixels, possibly fractional
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceSize {
    pub width: f32,
    pub height: f32,
}

impl SourceSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }
}

/// Visible extent of the editing surface
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Top-left offset of the preview inside the viewport
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Viewport corner the preview is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl Corner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Corner::TopLeft => "Top Left",
            Corner::TopRight => "Top Right",
            Corner::BottomLeft => "Bottom Left",
            Corner::BottomRight => "Bottom Right",
        }
    }
}

/// Scale `source` down (or up) so it fits a square `envelope`, keeping aspect
#[must_use]
pub fn fit_to_envelope(source: SourceSize, envelope: u32) -> Size {
    if source.is_degenerate() {
        return Size::square(envelope);
    }

    // The limiting side takes the envelope exactly; only the other is scaled.
    let env = f64::from(envelope);
    let (w, h) = (f64::from(source.width), f64::from(source.height));
    let (width, height) = if w >= h {
        (env, (h * env / w).floor())
    } else {
        ((w * env / h).floor(), env)
    };
    let side = |v: f64| (v as u32).clamp(1, envelope.max(1));

    Size::new(side(width), side(height))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct FitKey {
    width_bits: u32,
    height_bits: u32,
    envelope: u32,
}

impl FitKey {
    fn new(source: SourceSize, envelope: u32) -> Self {
        Self {
            width_bits: source.width.to_bits(),
            height_bits: source.height.to_bits(),
            envelope,
        }
    }
}

/// Memo for [`fit_to_envelope`] keyed by `(source, envelope)`
pub struct FitCache {
    cache: LruCache<FitKey, Size>,
    misses: u64,
}

impl Default for FitCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl FitCache {
    pub const DEFAULT_CAPACITY: usize = 16;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ),
            misses: 0,
        }
    }

    pub fn fit(&mut self, source: SourceSize, envelope: u32) -> Size {
        let key = FitKey::new(source, envelope);
        if let Some(size) = self.cache.get(&key) {
            return *size;
        }
        self.misses += 1;
        let size = fit_to_envelope(source, envelope);
        self.cache.put(key, size);
        size
    }

    /// Number of computations that were not served from the memo
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Presentation-only zoom applied on top of the rendered size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zoom {
    factor: f32,
}

impl Default for Zoom {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl Zoom {
    pub const MIN: f32 = 0.5;
    pub const MAX: f32 = 4.0;
    pub const STEP: f32 = 0.25;

    #[must_use]
    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn step_in(&mut self) {
        self.factor = Self::clamp_factor(self.factor + Self::STEP);
    }

    pub fn step_out(&mut self) {
        self.factor = Self::clamp_factor(self.factor - Self::STEP);
    }

    pub fn set(&mut self, factor: f32) {
        self.factor = Self::clamp_factor(factor);
    }

    pub fn reset(&mut self) {
        self.factor = 1.0;
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        (self.factor - 1.0).abs() < f32::EPSILON
    }

    /// Snap to the 0.25 grid and clamp to `[MIN, MAX]`, handling NaN/Inf
    pub fn clamp_factor(factor: f32) -> f32 {
        if !factor.is_finite() {
            return 1.0;
        }
        let snapped = (factor / Self::STEP).round() * Self::STEP;
        snapped.clamp(Self::MIN, Self::MAX)
    }
}

/// Scale a rendered size by a zoom factor
#[must_use]
pub fn apply_zoom(base: Size, factor: f32) -> Size {
    let factor = Zoom::clamp_factor(factor);
    let scale = |side: u32| ((side as f32 * factor).round() as u32).max(1);
    if base.is_empty() {
        return base;
    }
    Size::new(scale(base.width), scale(base.height))
}

/// Offset of a `display`-sized preview anchored at `corner`, `margin` px from the edges.
///
/// Returns `None` when there is nothing to place.
#[must_use]
pub fn place(display: Size, viewport: Viewport, corner: Corner, margin: u32) -> Option<Point> {
    if display.is_empty() {
        return None;
    }

    let w = f64::from(display.width);
    let h = f64::from(display.height);
    let m = f64::from(margin);

    let (x, y) = match corner {
        Corner::TopLeft => (m, m),
        Corner::TopRight => (viewport.width - w - m, m),
        Corner::BottomLeft => (m, viewport.height - h - m),
        Corner::BottomRight => (viewport.width - w - m, viewport.height - h - m),
    };

    Some(Point { x, y })
}

/// Display zoom in percent for a monitor DPI, rounded up to the nearest 25%
#[must_use]
pub fn dpi_zoom_percent(dpi: f32) -> u32 {
    const BASELINE: f32 = 96.0;
    if !dpi.is_finite() || dpi <= 0.0 || (dpi - BASELINE).abs() < f32::EPSILON {
        return 100;
    }

    let scale = dpi * ((dpi - BASELINE) / BASELINE + 1.0);
    ((scale / 25.0).ceil() as u32) * 25
}
