//! Testing utilities
//!
//! Synthetic frames and masks for the vision stages, plus a closed-loop
//! simulated camera and machine for driving whole alignment sessions without
//! hardware.

pub mod simulator;
pub mod synthetic_data;

pub use simulator::{SimulatedCamera, SimulatedMachine, SimulatedRig, SimulatedRigBuilder};
pub use synthetic_data::{
    render_fiducials, synthetic_blob_mask, synthetic_fiducial_frame, Fiducial, MaskShape,
};
