//! Frame preprocessing: raw color frame in, binary detector input out.

use super::filters::{self, BorderMode};
use image::{GrayImage, RgbImage};

pub const GAMMA: f64 = 1.2;
pub const BLUR_KERNEL: usize = 7;
pub const BLUR_SIGMA: f64 = 6.0;
pub const THRESHOLD_BLOCK: usize = 35;
pub const THRESHOLD_OFFSET: f64 = 1.0;

/// Fixed preprocessing pipeline: gamma, luma, blur, adaptive threshold and
/// optional inversion. Lookup tables and kernels are built once.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    gamma_table: [u8; 256],
    blur_kernel: Vec<f32>,
    invert: bool,
}

impl Preprocessor {
    pub fn new(invert: bool) -> Self {
        Self {
            gamma_table: filters::gamma_lut(GAMMA),
            blur_kernel: filters::gaussian_kernel(BLUR_KERNEL, BLUR_SIGMA),
            invert,
        }
    }

    pub fn invert(&self) -> bool {
        self.invert
    }

    pub fn set_invert(&mut self, invert: bool) {
        self.invert = invert;
    }

    pub fn process(&self, frame: &RgbImage) -> GrayImage {
        let corrected = filters::apply_lut(frame, &self.gamma_table);
        let gray = filters::luma(&corrected);
        let blurred = filters::separable_filter(&gray, &self.blur_kernel, BorderMode::Reflect101);
        let mut binary = filters::adaptive_threshold(&blurred, THRESHOLD_BLOCK, THRESHOLD_OFFSET);
        if self.invert {
            filters::invert(&mut binary);
        }
        binary
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(false)
    }
}
