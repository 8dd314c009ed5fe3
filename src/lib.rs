//! CrabAlign: camera-driven XY tool offset alignment for multi-tool machines
//!
//! An upward-looking camera watches each tool's nozzle tip. The crate finds
//! the tip in every frame, calibrates the camera against machine motion with
//! a ten-point sweep and a quadratic pixel-to-machine fit, then walks the tip
//! onto the camera's optical center with damped correction moves. The final
//! machine position yields the tool's offset.
//!
//! # Features
//! - Sub-pixel fiducial detection (adaptive threshold + multi-threshold blob grouping)
//! - Least-squares camera calibration with degeneracy checks
//! - Pure, hardware-free alignment state machine
//! - Worker thread owning camera and machine, with broadcast events
//! - Simulated rig for closed-loop testing
//!
//! # Usage
//! ```rust,no_run
//! use crabalign::alignment::AlignmentWorker;
//! use crabalign::config::AlignConfig;
//! use crabalign::testing::SimulatedRig;
//!
//! let rig = SimulatedRig::builder().build();
//! let worker = AlignmentWorker::spawn(
//!     AlignConfig::default(),
//!     Box::new(rig.camera()),
//!     Box::new(rig.machine()),
//! )?;
//! let mut events = worker.subscribe();
//! worker.start_alignment();
//! # let _ = events.try_recv();
//! # Ok::<(), std::io::Error>(())
//! ```
pub mod alignment;
pub mod calibration;
pub mod camera;
pub mod config;
pub mod errors;
pub mod events;
pub mod invariant_ppt;
pub mod motion;
pub mod results;
pub mod timing;
pub mod types;
pub mod vision;

// Testing utilities - synthetic frames and a simulated rig
pub mod testing;

// Re-exports for convenience
pub use alignment::{AlignmentWorker, Phase, WorkerCommand, WorkerHandle};
pub use calibration::{CalibrationSolver, TransformMatrix};
pub use camera::{CameraDevice, CameraProperty, FrameSource};
pub use config::AlignConfig;
pub use errors::{AlignmentError, ErrorKind, SessionError};
pub use events::{AlignmentEvent, EventBus};
pub use motion::{MotionCommand, MotionInterface};
pub use results::{ResultAggregator, ResultRecord};
pub use types::{DetectedFeature, MachinePosition, MachineXY, PixelPoint, ToolOffsetResult};
pub use vision::VisionPipeline;

/// Initialize logging. `RUST_LOG` wins when set.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabalign=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        native_camera: cfg!(feature = "native-camera"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub native_camera: bool,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabalign");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
