//! Configuration management for CrabAlign
//!
//! One explicit configuration value owned by the worker and handed to every
//! stage that needs it: camera source and resolution, blob detector
//! parameters, and the alignment session plan.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides, e.g. `CRABALIGN_ALIGNMENT__CYCLES=3`.
pub const ENV_PREFIX: &str = "CRABALIGN";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignConfig {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub alignment: AlignmentConfig,
}

/// Camera-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device identifier passed to `CameraDevice::open`
    pub source: String,
    /// Requested resolution [width, height]
    pub resolution: [u32; 2],
    /// Requested frames per second
    pub fps: u32,
    /// Delay before retrying after a failed read, in milliseconds
    pub reopen_delay_ms: u64,
    /// Initial brightness; negative leaves the device default untouched
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub hue: f64,
}

/// Blob detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub min_threshold: u8,
    pub max_threshold: u8,
    pub threshold_step: u8,
    /// Minimum blob area in square pixels
    pub min_area: f64,
    pub min_circularity: f64,
    /// Circularity floor used while `loose` is enabled
    pub loose_circularity: f64,
    pub min_convexity: f64,
    pub min_inertia_ratio: f64,
    /// Blobs closer than this across thresholds are merged
    pub min_dist_between_blobs: f64,
    /// Number of thresholds a blob must survive to be reported
    pub min_repeatability: usize,
    pub loose: bool,
    /// Invert the thresholded image before detection
    pub invert: bool,
}

/// Machine-space reference position all offsets are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlledPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Alignment session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    pub controlled_point: ControlledPoint,
    pub num_tools: u32,
    pub cycles: u32,
    /// Single-frame detections averaged per position estimate
    pub position_samples: usize,
    /// Under-relaxation gain applied to correction moves
    pub damping: f64,
    /// Correction moves allowed per tool before giving up
    pub max_convergence_moves: u32,
    /// Consecutive empty detections before a "no fiducial" advisory
    pub no_detection_limit: u32,
    pub idle_poll_ms: u64,
    pub idle_timeout_ms: u64,
    pub sweep_feedrate: f64,
    pub center_feedrate: f64,
    /// Reuse the first tool's camera calibration for the rest of the session
    pub reuse_transform: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            resolution: [640, 480],
            fps: 30,
            reopen_delay_ms: 100,
            brightness: -1.0,
            contrast: -1.0,
            saturation: -1.0,
            hue: -1.0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_threshold: 1,
            max_threshold: 50,
            threshold_step: 1,
            min_area: 300.0,
            min_circularity: 0.7,
            loose_circularity: 0.6,
            min_convexity: 0.3,
            min_inertia_ratio: 0.3,
            min_dist_between_blobs: 10.0,
            min_repeatability: 2,
            loose: false,
            invert: false,
        }
    }
}

impl DetectorConfig {
    /// Circularity floor currently in effect.
    pub fn effective_min_circularity(&self) -> f64 {
        if self.loose {
            self.loose_circularity
        } else {
            self.min_circularity
        }
    }

    /// Number of binarization thresholds scanned per frame.
    pub fn threshold_count(&self) -> usize {
        if self.threshold_step == 0 || self.max_threshold <= self.min_threshold {
            return 0;
        }
        let span = (self.max_threshold - self.min_threshold) as usize;
        span.div_ceil(self.threshold_step as usize)
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            controlled_point: ControlledPoint {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            num_tools: 1,
            cycles: 1,
            position_samples: 5,
            damping: 0.55,
            max_convergence_moves: 50,
            no_detection_limit: 25,
            idle_poll_ms: 20,
            idle_timeout_ms: 120_000,
            sweep_feedrate: 3000.0,
            center_feedrate: 1000.0,
            reuse_transform: false,
        }
    }
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            detector: DetectorConfig::default(),
            alignment: AlignmentConfig::default(),
        }
    }
}

impl AlignConfig {
    /// Load configuration from a TOML file layered over the defaults, with
    /// `CRABALIGN_*` environment overrides on top. A missing file is not an
    /// error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let defaults = config::Config::try_from(&AlignConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        let config: AlignConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Parse configuration directly from a TOML string, without overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AlignConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ConfigError::Io(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        fs::write(path, self.to_toml_string()?)
            .map_err(|e| ConfigError::Io(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabalign.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.camera.resolution[0] == 0 || self.camera.resolution[1] == 0 {
            return invalid("camera resolution must be non-zero");
        }
        if self.camera.fps == 0 || self.camera.fps > 240 {
            return invalid("camera fps must be between 1 and 240");
        }

        let d = &self.detector;
        if d.threshold_step == 0 {
            return invalid("threshold step must be positive");
        }
        if d.min_threshold >= d.max_threshold {
            return invalid("min threshold must be below max threshold");
        }
        if d.threshold_count() < d.min_repeatability {
            return invalid("threshold scan is shorter than the repeatability requirement");
        }
        if d.min_area <= 0.0 {
            return invalid("minimum blob area must be positive");
        }
        for (name, value) in [
            ("min circularity", d.min_circularity),
            ("loose circularity", d.loose_circularity),
            ("min convexity", d.min_convexity),
            ("min inertia ratio", d.min_inertia_ratio),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        let a = &self.alignment;
        if a.num_tools == 0 {
            return invalid("at least one tool is required");
        }
        if a.cycles == 0 {
            return invalid("at least one cycle is required");
        }
        if a.position_samples == 0 {
            return invalid("position samples must be positive");
        }
        if !(a.damping > 0.0 && a.damping <= 1.0) {
            return invalid("damping must be in (0, 1]");
        }
        if a.max_convergence_moves == 0 {
            return invalid("max convergence moves must be positive");
        }
        if a.sweep_feedrate <= 0.0 || a.center_feedrate <= 0.0 {
            return invalid("feedrates must be positive");
        }

        Ok(())
    }
}
