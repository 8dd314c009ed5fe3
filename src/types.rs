//! Core data types shared by the pipeline stages.

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A captured color frame. Immutable once produced by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    /// Monotonic capture time relative to the frame source clock.
    pub timestamp_us: u64,
    pub captured_at: DateTime<Utc>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(sequence: u64, timestamp_us: u64, image: RgbImage) -> Self {
        Self {
            sequence,
            timestamp_us,
            captured_at: Utc::now(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.width(), self.height())
    }
}

/// Frame dimensions used to normalize pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Map a pixel position to `[-0.5, 0.5]` per axis, frame center at the origin.
    pub fn normalize(&self, pixel: PixelPoint) -> NormalizedPoint {
        NormalizedPoint {
            x: pixel.u / self.width as f64 - 0.5,
            y: pixel.v / self.height as f64 - 0.5,
        }
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub u: f64,
    pub v: f64,
}

impl PixelPoint {
    pub fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

/// A circular blob found in a preprocessed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedFeature {
    pub center: PixelPoint,
    pub radius: f64,
}

impl DetectedFeature {
    pub fn new(u: f64, v: f64, radius: f64) -> Self {
        Self {
            center: PixelPoint::new(u, v),
            radius,
        }
    }
}

/// Read-only snapshot of the machine position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MachinePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub tool: Option<u32>,
}

impl MachinePosition {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            tool: None,
        }
    }

    pub fn with_tool(mut self, tool: u32) -> Self {
        self.tool = Some(tool);
        self
    }
}

/// An XY pair in machine space (mm), used for offsets and displacements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MachineXY {
    pub x: f64,
    pub y: f64,
}

impl MachineXY {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

/// One calibration sweep observation: where the machine was, where the
/// fiducial appeared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub machine: MachineXY,
    pub pixel: NormalizedPoint,
}

impl CalibrationSample {
    pub fn new(machine: MachineXY, pixel: NormalizedPoint) -> Self {
        Self { machine, pixel }
    }
}

/// Final result of one tool's convergence loop. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolOffsetResult {
    pub tool: u32,
    pub cycle: u32,
    pub mpp: f64,
    pub x: f64,
    pub y: f64,
    pub elapsed: Duration,
}
