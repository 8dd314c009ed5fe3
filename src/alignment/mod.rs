//! Tool alignment: detection gate, per-tool state machine, session driver
//! and the worker thread that runs them.

pub mod gate;
pub mod session;
pub mod state;
pub mod station;
pub mod worker;

pub use gate::{DetectionGate, GateOutcome, PositionAverager};
pub use session::Aligner;
pub use state::{
    compute_tool_offset, transition, AlignmentState, CalibrationContext, Effect, Observation, Phase,
};
pub use station::{
    Control, DisplayOptions, Station, AMBIGUOUS_MESSAGE, NO_DETECTION_MESSAGE, SEARCHING_MESSAGE,
};
pub use worker::{AlignmentWorker, WorkerCommand, WorkerHandle};
