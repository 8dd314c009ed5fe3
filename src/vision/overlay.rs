//! Preview overlays: center crosshair, detection markers and readouts.

use crate::types::DetectedFeature;
use image::{GrayImage, Rgb, RgbImage};

/// Crosshair half-length in pixels.
pub const CROSSHAIR_SIZE: u32 = 50;

pub const CROSSHAIR_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MARKER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Draw a green cross centered in the frame.
pub fn draw_crosshair(image: &mut RgbImage) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let (cx, cy) = (w / 2, h / 2);
    for x in cx.saturating_sub(CROSSHAIR_SIZE)..=(cx + CROSSHAIR_SIZE).min(w - 1) {
        image.put_pixel(x, cy, CROSSHAIR_COLOR);
    }
    for y in cy.saturating_sub(CROSSHAIR_SIZE)..=(cy + CROSSHAIR_SIZE).min(h - 1) {
        image.put_pixel(cx, y, CROSSHAIR_COLOR);
    }
}

/// Outline a detected feature with a circle and mark its center.
pub fn draw_feature(image: &mut RgbImage, feature: &DetectedFeature) {
    let (w, h) = image.dimensions();
    let mut plot = |x: f64, y: f64| {
        let (xi, yi) = (x.round() as i64, y.round() as i64);
        if xi >= 0 && yi >= 0 && (xi as u32) < w && (yi as u32) < h {
            image.put_pixel(xi as u32, yi as u32, MARKER_COLOR);
        }
    };

    let r = feature.radius.max(1.0);
    let steps = (2.0 * std::f64::consts::PI * r).ceil().max(8.0) as usize;
    for i in 0..steps {
        let a = i as f64 / steps as f64 * std::f64::consts::TAU;
        plot(feature.center.u + r * a.cos(), feature.center.v + r * a.sin());
    }
    for d in -2..=2 {
        plot(feature.center.u + d as f64, feature.center.v);
        plot(feature.center.u, feature.center.v + d as f64);
    }
}

/// Expand a binary detector image to RGB for display.
pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Position readout shown while previewing, e.g. `"U320 V240 R15"`.
pub fn readout(feature: &DetectedFeature) -> String {
    format!(
        "U{:3.0} V{:3.0} R{:2.0}",
        feature.center.u, feature.center.v, feature.radius
    )
}
