//! Camera calibration: the fixed sweep, rounding rules and the quadratic
//! pixel to machine fit.

pub mod solver;

pub use solver::{CalibrationSolver, TransformMatrix};

use crate::types::{MachineXY, NormalizedPoint, PixelPoint};

/// Number of samples a transform fit consumes.
pub const CALIBRATION_SAMPLES: usize = 10;

/// Radius of the calibration sweep circle in millimeters.
pub const SWEEP_RADIUS_MM: f64 = 0.5;

/// Relative moves tracing a 0.5 mm circle around the starting position.
pub const SWEEP_POINTS: [MachineXY; CALIBRATION_SAMPLES] = [
    MachineXY { x: 0.0, y: -0.5 },
    MachineXY { x: 0.294, y: -0.405 },
    MachineXY { x: 0.476, y: -0.155 },
    MachineXY { x: 0.476, y: 0.155 },
    MachineXY { x: 0.294, y: 0.405 },
    MachineXY { x: 0.0, y: 0.5 },
    MachineXY { x: -0.294, y: 0.405 },
    MachineXY { x: -0.476, y: 0.155 },
    MachineXY { x: -0.476, y: -0.155 },
    MachineXY { x: -0.294, y: -0.405 },
];

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[inline]
pub fn round3(value: f64) -> f64 {
    round_to(value, 3)
}

#[inline]
pub fn round4(value: f64) -> f64 {
    round_to(value, 4)
}

/// Euclidean distance between two pixel positions, rounded to 3 decimals.
pub fn pixel_distance(a: PixelPoint, b: PixelPoint) -> f64 {
    round3((a.u - b.u).hypot(a.v - b.v))
}

/// Millimeters per pixel from the first sweep displacement. `None` when the
/// fiducial did not move.
pub fn mpp_from_displacement(first: PixelPoint, second: PixelPoint) -> Option<f64> {
    let distance = pixel_distance(first, second);
    if distance > 0.0 {
        Some(round4(SWEEP_RADIUS_MM / distance))
    } else {
        None
    }
}

/// Quadratic feature vector `[x², y², xy, x, y, constant]`.
///
/// Fitting uses a constant of 1 so the fit absorbs the absolute position.
/// Corrections use 0 so only the displacement terms contribute.
pub fn feature_vector(p: NormalizedPoint, constant: f64) -> [f64; 6] {
    [p.x * p.x, p.y * p.y, p.x * p.y, p.x, p.y, constant]
}
