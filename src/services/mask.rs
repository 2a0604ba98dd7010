//! Mask service — brush/eraser compositing for inpainting masks.
//!
//! DESIGN
//! ======
//! A mask is an 8-bit grayscale bitmap the size of the base image; 255 marks
//! pixels to repaint. Input points arrive in screen space (relative to the
//! canvas origin) and pass through a [`ViewTransform`] before touching the
//! bitmap, so pan and zoom never change which pixels a stroke covers.
//!
//! Strokes stamp filled discs along each segment at a spacing of at most
//! half the brush radius, so a fast drag that skips many pixels between
//! pointer events still leaves a continuous line.

use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use serde::Deserialize;

use crate::services::imaging::{DataUrl, ImagingError, encode_png};

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 5.0;
pub const DEFAULT_BRUSH_SIZE: u32 = 20;

const PAINTED: u8 = 255;
const OVERLAY_RED: [u8; 3] = [255, 0, 0];

// =============================================================================
// VIEW TRANSFORM
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    zoom: f32,
    pub pan_x: f32,
    pub pan_y: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self { zoom: 1.0, pan_x: 0.0, pan_y: 0.0 }
    }
}

impl ViewTransform {
    #[must_use]
    pub fn new(zoom: f32, pan_x: f32, pan_y: f32) -> Self {
        let mut view = Self { zoom: 1.0, pan_x, pan_y };
        view.set_zoom(zoom);
        view
    }

    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Set zoom, clamped to `[MIN_ZOOM, MAX_ZOOM]`. NaN resets to 1.
    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = if zoom.is_nan() { 1.0 } else { zoom.clamp(MIN_ZOOM, MAX_ZOOM) };
    }

    #[must_use]
    pub fn screen_to_image(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pan_x) / self.zoom, (y - self.pan_y) / self.zoom)
    }

    #[must_use]
    pub fn image_to_screen(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.zoom + self.pan_x, y * self.zoom + self.pan_y)
    }
}

// =============================================================================
// MASK CANVAS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
}

impl Tool {
    fn value(self) -> u8 {
        match self {
            Self::Brush => PAINTED,
            Self::Eraser => 0,
        }
    }
}

/// A recorded pointer drag in screen coordinates, replayed by
/// [`MaskCanvas::replay`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    #[serde(default)]
    pub tool: Tool,
    #[serde(default)]
    pub brush_size: Option<u32>,
    /// Wipe the canvas before replaying, as the editor's Clear button does.
    #[serde(default)]
    pub clear_first: bool,
    #[serde(default)]
    pub points: Vec<(f32, f32)>,
}

#[derive(Debug, Clone)]
pub struct MaskCanvas {
    mask: GrayImage,
    pub view: ViewTransform,
    pub tool: Tool,
    brush_size: u32,
    last_point: Option<(f32, f32)>,
}

impl MaskCanvas {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
            view: ViewTransform::default(),
            tool: Tool::default(),
            brush_size: DEFAULT_BRUSH_SIZE,
            last_point: None,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    #[must_use]
    pub fn brush_size(&self) -> u32 {
        self.brush_size
    }

    /// Brush diameter in image pixels. Zero is raised to one.
    pub fn set_brush_size(&mut self, size: u32) {
        self.brush_size = size.max(1);
    }

    #[must_use]
    pub fn bitmap(&self) -> &GrayImage {
        &self.mask
    }

    // -------------------------------------------------------------------------
    // Strokes (screen space)
    // -------------------------------------------------------------------------

    /// Start a stroke at a screen point and stamp once.
    pub fn begin_stroke(&mut self, screen_x: f32, screen_y: f32) {
        let point = self.view.screen_to_image(screen_x, screen_y);
        self.stamp(point);
        self.last_point = Some(point);
    }

    /// Extend the active stroke. Ignored when no stroke is active.
    pub fn continue_stroke(&mut self, screen_x: f32, screen_y: f32) {
        let Some(from) = self.last_point else {
            return;
        };
        let to = self.view.screen_to_image(screen_x, screen_y);
        self.stamp_segment(from, to);
        self.last_point = Some(to);
    }

    pub fn end_stroke(&mut self) {
        self.last_point = None;
    }

    /// Replay a recorded stroke with its own tool and brush size. The
    /// canvas tool and brush are restored afterwards.
    pub fn replay(&mut self, stroke: &Stroke) {
        if stroke.clear_first {
            self.clear();
        }
        let (tool, brush) = (self.tool, self.brush_size);
        self.tool = stroke.tool;
        if let Some(size) = stroke.brush_size {
            self.set_brush_size(size);
        }
        let mut points = stroke.points.iter();
        if let Some(&(x, y)) = points.next() {
            self.begin_stroke(x, y);
            for &(x, y) in points {
                self.continue_stroke(x, y);
            }
            self.end_stroke();
        }
        self.tool = tool;
        self.brush_size = brush;
    }

    // -------------------------------------------------------------------------
    // Compositing (image space)
    // -------------------------------------------------------------------------

    /// Stamp discs from `from` to `to` in image coordinates. Only the part of
    /// the segment within one radius of the bitmap is stepped.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn stamp_segment(&mut self, from: (f32, f32), to: (f32, f32)) {
        let radius = self.radius();
        let (width, height) = self.mask.dimensions();
        let bounds = (-radius, -radius, width as f32 + radius, height as f32 + radius);
        let Some((from, to)) = clip_segment(from, to, bounds) else {
            return;
        };
        let spacing = (radius / 2.0).max(0.5);
        let distance = (to.0 - from.0).hypot(to.1 - from.1);
        let steps = (distance / spacing).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.stamp((from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn radius(&self) -> f32 {
        self.brush_size as f32 / 2.0
    }

    /// Fill one disc centered at `center`, clipped to the bitmap.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn stamp(&mut self, center: (f32, f32)) {
        let (width, height) = self.mask.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let radius = self.radius();
        let r2 = radius * radius;
        let value = self.tool.value();

        let x0 = (center.0 - radius).floor().max(0.0);
        let y0 = (center.1 - radius).floor().max(0.0);
        let x1 = (center.0 + radius).ceil().min(width as f32 - 1.0);
        let y1 = (center.1 + radius).ceil().min(height as f32 - 1.0);
        if x0 > x1 || y0 > y1 {
            return;
        }

        for y in (y0 as u32)..=(y1 as u32) {
            for x in (x0 as u32)..=(x1 as u32) {
                let dx = x as f32 + 0.5 - center.0;
                let dy = y as f32 + 0.5 - center.1;
                if dx * dx + dy * dy <= r2 {
                    self.mask.put_pixel(x, y, Luma([value]));
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries & export
    // -------------------------------------------------------------------------

    pub fn clear(&mut self) {
        self.mask.pixels_mut().for_each(|p| *p = Luma([0]));
        self.last_point = None;
    }

    /// Bounding box of painted pixels as `(x, y, width, height)` in image space.
    #[must_use]
    pub fn painted_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in self.mask.enumerate_pixels() {
            if p.0[0] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
    }

    /// [`painted_bounds`](Self::painted_bounds) mapped through the view, as
    /// `(x, y, width, height)` in screen space.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn screen_bounds(&self) -> Option<(f32, f32, f32, f32)> {
        let (x, y, w, h) = self.painted_bounds()?;
        let (sx, sy) = self.view.image_to_screen(x as f32, y as f32);
        let (ex, ey) = self.view.image_to_screen((x + w) as f32, (y + h) as f32);
        Some((sx, sy, ex - sx, ey - sy))
    }

    /// Fraction of pixels marked for repaint, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        let total = u64::from(self.mask.width()) * u64::from(self.mask.height());
        if total == 0 {
            return 0.0;
        }
        let painted = self.mask.pixels().filter(|p| p.0[0] > 0).count();
        painted as f64 / total as f64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mask.pixels().all(|p| p.0[0] == 0)
    }

    /// PNG data URL suitable for the img2img `mask` field.
    ///
    /// # Errors
    ///
    /// Returns an error if PNG encoding fails.
    pub fn to_png_data_url(&self) -> Result<String, ImagingError> {
        let png = encode_png(&DynamicImage::ImageLuma8(self.mask.clone()))?;
        Ok(DataUrl::encode("image/png", &png))
    }

    /// Composite the mask in red over `base` at `opacity` (clamped to
    /// `[0, 1]`). Base pixels outside the mask are left unchanged.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn overlay_preview(&self, base: &RgbaImage, opacity: f32) -> RgbaImage {
        let opacity = if opacity.is_nan() { 0.0 } else { opacity.clamp(0.0, 1.0) };
        let mut out = base.clone();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let Some(mask) = self.mask.get_pixel_checked(x, y) else {
                continue;
            };
            if mask.0[0] == 0 {
                continue;
            }
            let alpha = opacity * f32::from(mask.0[0]) / 255.0;
            let Rgba([r, g, b, a]) = *pixel;
            let blend = |src: u8, over: u8| (f32::from(src) * (1.0 - alpha) + f32::from(over) * alpha).round() as u8;
            *pixel = Rgba([blend(r, OVERLAY_RED[0]), blend(g, OVERLAY_RED[1]), blend(b, OVERLAY_RED[2]), a]);
        }
        out
    }
}

/// Liang-Barsky clip of `from..to` to `(min_x, min_y, max_x, max_y)`.
/// `None` when the segment misses the box or has a non-finite endpoint.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn clip_segment(from: (f32, f32), to: (f32, f32), bounds: (f32, f32, f32, f32)) -> Option<((f32, f32), (f32, f32))> {
    if ![from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (x0, y0) = (f64::from(from.0), f64::from(from.1));
    let (dx, dy) = (f64::from(to.0) - x0, f64::from(to.1) - y0);
    let (min_x, min_y, max_x, max_y) =
        (f64::from(bounds.0), f64::from(bounds.1), f64::from(bounds.2), f64::from(bounds.3));

    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dx, x0 - min_x), (dx, max_x - x0), (-dy, y0 - min_y), (dy, max_y - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    let at = |t: f64| ((x0 + dx * t) as f32, (y0 + dy * t) as f32);
    Some((at(t0), at(t1)))
}

#[cfg(test)]
#[path = "mask_test.rs"]
mod tests;
