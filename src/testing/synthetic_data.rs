//! Synthetic camera frames and detector masks
//!
//! Frames mimic an overhead camera looking up at a nozzle tip: a bright,
//! evenly lit background with a dark circular tip. Edges are anti-aliased so
//! sub-pixel motion of the tip changes the rendered image.

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Background brightness of synthetic frames
pub const BACKGROUND_LEVEL: u8 = 200;
/// Brightness of the fiducial itself
pub const FIDUCIAL_LEVEL: u8 = 40;

const SUPERSAMPLE: usize = 4;

/// A dark disc to render, in pixel index coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fiducial {
    pub u: f64,
    pub v: f64,
    pub radius: f64,
}

impl Fiducial {
    pub fn new(u: f64, v: f64, radius: f64) -> Self {
        Self { u, v, radius }
    }

    /// Fraction of pixel `(x, y)` covered by the disc.
    fn coverage(&self, x: u32, y: u32) -> f64 {
        let (dx0, dy0) = (x as f64 - self.u, y as f64 - self.v);
        let reach = self.radius + 1.0;
        if dx0.abs() > reach || dy0.abs() > reach {
            return 0.0;
        }
        let r2 = self.radius * self.radius;
        let step = 1.0 / SUPERSAMPLE as f64;
        let mut hits = 0usize;
        for sy in 0..SUPERSAMPLE {
            for sx in 0..SUPERSAMPLE {
                let dx = dx0 + (sx as f64 + 0.5) * step - 0.5;
                let dy = dy0 + (sy as f64 + 0.5) * step - 0.5;
                if dx * dx + dy * dy <= r2 {
                    hits += 1;
                }
            }
        }
        hits as f64 / (SUPERSAMPLE * SUPERSAMPLE) as f64
    }
}

/// Render any number of fiducials onto a uniform background.
pub fn render_fiducials(width: u32, height: u32, fiducials: &[Fiducial]) -> RgbImage {
    let bg = BACKGROUND_LEVEL as f64;
    let fg = FIDUCIAL_LEVEL as f64;
    RgbImage::from_fn(width, height, |x, y| {
        let covered = fiducials
            .iter()
            .map(|f| f.coverage(x, y))
            .fold(0.0f64, f64::max);
        let level = (bg + (fg - bg) * covered).round() as u8;
        Rgb([level, level, level])
    })
}

/// A frame with a single dark fiducial centered at `(u, v)`.
pub fn synthetic_fiducial_frame(width: u32, height: u32, u: f64, v: f64, radius: f64) -> RgbImage {
    render_fiducials(width, height, &[Fiducial::new(u, v, radius)])
}

/// Shapes drawn into a binary detector mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaskShape {
    Disc { u: f64, v: f64, radius: f64 },
    Rect { x: u32, y: u32, width: u32, height: u32 },
}

impl MaskShape {
    pub fn disc(u: f64, v: f64, radius: f64) -> Self {
        MaskShape::Disc { u, v, radius }
    }

    pub fn rect(x: u32, y: u32, width: u32, height: u32) -> Self {
        MaskShape::Rect {
            x,
            y,
            width,
            height,
        }
    }

    fn contains(&self, px: u32, py: u32) -> bool {
        match *self {
            MaskShape::Disc { u, v, radius } => {
                let (dx, dy) = (px as f64 - u, py as f64 - v);
                dx * dx + dy * dy <= radius * radius
            }
            MaskShape::Rect {
                x,
                y,
                width,
                height,
            } => px >= x && px < x + width && py >= y && py < y + height,
        }
    }
}

/// A preprocessed-style mask: 255 background, 0 inside every shape.
pub fn synthetic_blob_mask(width: u32, height: u32, shapes: &[MaskShape]) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        if shapes.iter().any(|s| s.contains(x, y)) {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}
