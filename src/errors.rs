//! Error taxonomy for the alignment pipeline.
//!
//! Recoverable conditions (camera hiccups, empty or ambiguous detections) are
//! handled inside the worker loop and only surface as advisory events. Fatal
//! conditions unwind the active session and are reported once, wrapped in a
//! [`SessionError`] carrying the tool, cycle and phase they happened in.

use crate::alignment::Phase;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Coarse classification used for reporting and unwinding decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Acquisition,
    DetectionEmpty,
    DetectionAmbiguous,
    SolverFailure,
    Motion,
    ConvergenceLimit,
    Cancelled,
    Config,
}

impl ErrorKind {
    /// Whether an error of this kind terminates the running session.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            ErrorKind::Acquisition | ErrorKind::DetectionEmpty | ErrorKind::DetectionAmbiguous
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Camera control error: {0}")]
    ControlError(String),
    #[error("Camera is not open")]
    NotOpen,
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl CameraError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Acquisition
    }
}

/// Advisory detection outcomes. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionError {
    #[error("no fiducial found after {misses} consecutive frames")]
    Empty { misses: u32 },
    #[error("{count} candidates found - clean the fiducial")]
    Ambiguous { count: usize },
}

impl DetectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectionError::Empty { .. } => ErrorKind::DetectionEmpty,
            DetectionError::Ambiguous { .. } => ErrorKind::DetectionAmbiguous,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("expected {expected} calibration samples, got {got}")]
    SampleCount { expected: usize, got: usize },
    #[error("degenerate calibration fit (design matrix rank {rank} < 6)")]
    Degenerate { rank: usize },
    #[error("calibration samples contain non-finite values")]
    NonFinite,
    #[error("fiducial did not move during the calibration sweep")]
    NoDisplacement,
}

impl SolverError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SolverFailure
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MotionError {
    #[error("command `{command}` rejected: {reason}")]
    Rejected { command: String, reason: String },
    #[error("machine query failed: {0}")]
    Query(String),
    #[error("machine did not report idle within {waited_ms} ms")]
    Timeout { waited_ms: u64 },
    #[error("machine connection lost: {0}")]
    Disconnected(String),
}

impl MotionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Motion
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Failed to serialize config: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result export and import failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExportError {
    #[error("Failed to access results file: {0}")]
    Io(String),
    #[error("Malformed results data: {0}")]
    Format(String),
}

/// Everything that can stop an alignment session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignmentError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("calibration failed: {0}")]
    Solver(#[from] SolverError),
    #[error("motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("no convergence after {moves} correction moves")]
    ConvergenceLimit { moves: u32 },
    #[error("session cancelled")]
    Cancelled,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AlignmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlignmentError::Camera(e) => e.kind(),
            AlignmentError::Solver(e) => e.kind(),
            AlignmentError::Motion(e) => e.kind(),
            AlignmentError::ConvergenceLimit { .. } => ErrorKind::ConvergenceLimit,
            AlignmentError::Cancelled => ErrorKind::Cancelled,
            AlignmentError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    /// Attach the session position the error surfaced at.
    pub fn in_context(self, context: SessionContext) -> SessionError {
        SessionError {
            context,
            error: self,
        }
    }
}

/// Where in a session an error happened, enough to resume by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub tool: Option<u32>,
    pub cycle: Option<u32>,
    pub phase: Phase,
}

impl SessionContext {
    pub fn new(tool: Option<u32>, cycle: Option<u32>, phase: Phase) -> Self {
        Self { tool, cycle, phase }
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tool {
            Some(tool) => write!(f, "T{}", tool)?,
            None => write!(f, "T-")?,
        }
        match self.cycle {
            Some(cycle) => write!(f, ", cycle {}", cycle)?,
            None => write!(f, ", cycle -")?,
        }
        write!(f, ", phase {}", self.phase)
    }
}

/// A fatal [`AlignmentError`] tagged with its [`SessionContext`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} ({context})")]
pub struct SessionError {
    pub context: SessionContext,
    #[source]
    pub error: AlignmentError,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
