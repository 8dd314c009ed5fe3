//! Fiducial vision: preprocessing, blob detection and preview overlays.

pub mod blob;
pub mod filters;
pub mod overlay;
pub mod preprocess;

pub use blob::{BlobCandidate, CircleDetector, DetectorParams};
pub use preprocess::Preprocessor;

use crate::config::DetectorConfig;
use crate::types::DetectedFeature;
use image::{GrayImage, RgbImage};

/// Preprocessor and detector driven from one [`DetectorConfig`].
#[derive(Debug, Clone)]
pub struct VisionPipeline {
    preprocessor: Preprocessor,
    detector: CircleDetector,
    config: DetectorConfig,
}

/// Everything one pass over a frame produced.
#[derive(Debug, Clone)]
pub struct Detection {
    pub binary: GrayImage,
    pub features: Vec<DetectedFeature>,
}

impl VisionPipeline {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            preprocessor: Preprocessor::new(config.invert),
            detector: CircleDetector::new(DetectorParams::from(config)),
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Apply new detector settings. The detector rebuilds its scan plan
    /// lazily, only if the derived parameters differ.
    pub fn configure(&mut self, config: &DetectorConfig) {
        self.preprocessor.set_invert(config.invert);
        self.detector.set_params(DetectorParams::from(config));
        self.config = config.clone();
    }

    pub fn detector(&self) -> &CircleDetector {
        &self.detector
    }

    pub fn analyze(&mut self, frame: &RgbImage) -> Detection {
        let binary = self.preprocessor.process(frame);
        let features = self.detector.detect(&binary);
        log::trace!("{} candidate(s) in frame", features.len());
        Detection { binary, features }
    }
}
