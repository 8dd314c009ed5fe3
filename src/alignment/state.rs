//! Per-tool alignment state machine.
//!
//! [`transition`] is pure: given the current [`AlignmentState`], one
//! confirmed position [`Observation`] and the [`CalibrationContext`], it
//! returns the next state and the [`Effect`]s the driver must carry out.
//! Nothing here touches hardware, so the whole calibration and convergence
//! sequence can be exercised with synthetic observations.
//!
//! ```text
//! IDLE -> CAM_CAL_INIT -> CAM_CAL_SWEEP(1..9) -> TRANSFORM_SOLVE -> CONVERGING -> DONE
//! ```

use crate::calibration::{
    mpp_from_displacement, round3, CalibrationSolver, TransformMatrix, CALIBRATION_SAMPLES,
    SWEEP_POINTS,
};
use crate::config::AlignmentConfig;
use crate::errors::{AlignmentError, SolverError};
use crate::motion::MotionCommand;
use crate::types::{CalibrationSample, FrameGeometry, MachinePosition, MachineXY, PixelPoint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    CamCalInit,
    /// Collecting sweep sample `1..=9`.
    CamCalSweep(u8),
    TransformSolve,
    Converging,
    Done,
    Aborted,
}

impl Phase {
    /// Numeric state code, where one exists.
    pub fn code(self) -> Option<u32> {
        match self {
            Phase::CamCalInit => Some(0),
            Phase::CamCalSweep(step) => Some(step as u32),
            Phase::Converging => Some(200),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("IDLE"),
            Phase::CamCalInit => f.write_str("CAM_CAL_INIT"),
            Phase::CamCalSweep(step) => write!(f, "CAM_CAL_SWEEP({})", step),
            Phase::TransformSolve => f.write_str("TRANSFORM_SOLVE"),
            Phase::Converging => f.write_str("CONVERGING"),
            Phase::Done => f.write_str("DONE"),
            Phase::Aborted => f.write_str("ABORTED"),
        }
    }
}

/// A confirmed, averaged fiducial position paired with where the machine was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub pixel: PixelPoint,
    pub geometry: FrameGeometry,
    pub machine: MachinePosition,
}

impl Observation {
    pub fn new(pixel: PixelPoint, geometry: FrameGeometry, machine: MachinePosition) -> Self {
        Self {
            pixel,
            geometry,
            machine,
        }
    }

    pub fn machine_xy(&self) -> MachineXY {
        MachineXY::new(self.machine.x, self.machine.y)
    }
}

/// Everything the state machine needs from outside, injected per tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationContext {
    pub controlled_point: MachineXY,
    /// G10 offset of the tool at the start of its run.
    pub tool_offset: MachineXY,
    pub damping: f64,
    pub max_convergence_moves: u32,
    pub sweep_feedrate: f64,
    pub center_feedrate: f64,
}

impl CalibrationContext {
    pub fn from_config(config: &AlignmentConfig, tool_offset: MachineXY) -> Self {
        Self {
            controlled_point: MachineXY::new(config.controlled_point.x, config.controlled_point.y),
            tool_offset,
            damping: config.damping,
            max_convergence_moves: config.max_convergence_moves,
            sweep_feedrate: config.sweep_feedrate,
            center_feedrate: config.center_feedrate,
        }
    }
}

/// Side effects requested by a transition, in the order they must happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Issue a motion command and wait for the machine to settle.
    Move(MotionCommand),
    MppMeasured(f64),
    TransformSolved(TransformMatrix),
    /// Restart the per-tool stopwatch.
    ResetTimer,
    Status(String),
    /// Alignment finished with the final machine-space offset.
    Complete { offset: MachineXY, mpp: f64 },
}

/// Mutable progress of one tool's alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentState {
    pub phase: Phase,
    pub samples: Vec<CalibrationSample>,
    first_pixel: Option<PixelPoint>,
    pub mpp: Option<f64>,
    pub transform: Option<TransformMatrix>,
    /// Correction moves issued while converging.
    pub moves: u32,
}

impl AlignmentState {
    pub fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            samples: Vec::with_capacity(CALIBRATION_SAMPLES),
            first_pixel: None,
            mpp: None,
            transform: None,
            moves: 0,
        }
    }

    /// Begin with a camera calibration sweep.
    pub fn calibrate() -> Self {
        Self {
            phase: Phase::CamCalInit,
            ..Self::idle()
        }
    }

    /// Skip calibration and converge with a transform from an earlier tool.
    pub fn with_transform(transform: TransformMatrix) -> Self {
        Self {
            phase: Phase::Converging,
            mpp: Some(transform.mpp),
            transform: Some(transform),
            ..Self::idle()
        }
    }

    pub fn abort(mut self) -> Self {
        self.phase = Phase::Aborted;
        self
    }
}

impl Default for AlignmentState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Final offset: `(controlled point + current G10 offset) - tool position`,
/// rounded to 3 decimals.
pub fn compute_tool_offset(
    controlled_point: MachineXY,
    tool_offset: MachineXY,
    position: MachineXY,
) -> MachineXY {
    MachineXY::new(
        round3(controlled_point.x + tool_offset.x - position.x),
        round3(controlled_point.y + tool_offset.y - position.y),
    )
}

/// Advance the state machine by one confirmed observation.
pub fn transition(
    mut state: AlignmentState,
    obs: &Observation,
    ctx: &CalibrationContext,
) -> Result<(AlignmentState, Vec<Effect>), AlignmentError> {
    let mut effects = Vec::new();
    let normalized = obs.geometry.normalize(obs.pixel);

    match state.phase {
        Phase::Idle | Phase::Done | Phase::Aborted | Phase::TransformSolve => {}

        Phase::CamCalInit => {
            state.samples.clear();
            state
                .samples
                .push(CalibrationSample::new(obs.machine_xy(), normalized));
            state.first_pixel = Some(obs.pixel);
            effects.push(Effect::Status("Calibrating camera".to_string()));
            effects.push(Effect::Move(MotionCommand::move_by(
                SWEEP_POINTS[0],
                ctx.sweep_feedrate,
            )));
            state.phase = Phase::CamCalSweep(1);
        }

        Phase::CamCalSweep(step) => {
            let k = step as usize;
            crate::assert_invariant!(
                state.samples.len() == k,
                "Sweep samples are collected in sweep order",
                "alignment::transition"
            );
            state
                .samples
                .push(CalibrationSample::new(obs.machine_xy(), normalized));

            if k == 1 {
                let first = state.first_pixel.ok_or(SolverError::NoDisplacement)?;
                let mpp = mpp_from_displacement(first, obs.pixel)
                    .ok_or(SolverError::NoDisplacement)?;
                state.mpp = Some(mpp);
                effects.push(Effect::MppMeasured(mpp));
            }

            if k < CALIBRATION_SAMPLES - 1 {
                let delta = MachineXY::new(
                    round3(SWEEP_POINTS[k].x - SWEEP_POINTS[k - 1].x),
                    round3(SWEEP_POINTS[k].y - SWEEP_POINTS[k - 1].y),
                );
                effects.push(Effect::Move(MotionCommand::move_by(delta, ctx.sweep_feedrate)));
                state.phase = Phase::CamCalSweep(step + 1);
            } else {
                state.phase = Phase::TransformSolve;
                crate::assert_invariant!(
                    state.samples.len() == CALIBRATION_SAMPLES,
                    "Transform fit uses exactly ten samples",
                    "alignment::transition"
                );
                let mpp = state.mpp.unwrap_or_default();
                let transform = CalibrationSolver::new().solve(&state.samples, mpp)?;
                let center = transform.center();
                log::info!(
                    "Camera calibrated: mpp {:.4}, center ({:.3}, {:.3}), residual {:.2e}",
                    mpp,
                    center.x,
                    center.y,
                    transform.residual
                );
                state.transform = Some(transform);
                effects.push(Effect::TransformSolved(transform));
                effects.push(Effect::Move(MotionCommand::move_xy(
                    MachineXY::new(round3(center.x), round3(center.y)),
                    ctx.center_feedrate,
                )));
                effects.push(Effect::ResetTimer);
                state.moves = 0;
                state.phase = Phase::Converging;
            }
        }

        Phase::Converging => {
            let transform = match state.transform {
                Some(t) => t,
                None => {
                    return Err(SolverError::SampleCount {
                        expected: CALIBRATION_SAMPLES,
                        got: state.samples.len(),
                    }
                    .into())
                }
            };
            let correction = transform.correction(normalized, ctx.damping);
            if correction.is_zero() {
                let offset =
                    compute_tool_offset(ctx.controlled_point, ctx.tool_offset, obs.machine_xy());
                effects.push(Effect::Complete {
                    offset,
                    mpp: transform.mpp,
                });
                state.phase = Phase::Done;
            } else if state.moves >= ctx.max_convergence_moves {
                return Err(AlignmentError::ConvergenceLimit { moves: state.moves });
            } else {
                state.moves += 1;
                log::debug!(
                    "Correction {} : ({:.3}, {:.3})",
                    state.moves,
                    correction.x,
                    correction.y
                );
                effects.push(Effect::Move(MotionCommand::move_by(correction, ctx.center_feedrate)));
            }
        }
    }

    Ok((state, effects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariant_ppt::{clear_invariant_log, contract_test};

    fn ctx() -> CalibrationContext {
        CalibrationContext {
            controlled_point: MachineXY::new(100.0, 100.0),
            tool_offset: MachineXY::new(0.0, 0.0),
            damping: 0.55,
            max_convergence_moves: 50,
            sweep_feedrate: 3000.0,
            center_feedrate: 1000.0,
        }
    }

    #[test]
    fn test_phase_codes_and_names() {
        assert_eq!(Phase::CamCalInit.code(), Some(0));
        assert_eq!(Phase::CamCalSweep(4).code(), Some(4));
        assert_eq!(Phase::Converging.code(), Some(200));
        assert_eq!(Phase::Idle.code(), None);
        assert_eq!(Phase::TransformSolve.to_string(), "TRANSFORM_SOLVE");
        assert_eq!(Phase::CamCalSweep(3).to_string(), "CAM_CAL_SWEEP(3)");
    }

    #[test]
    fn test_end_to_end_offset() {
        let offset = compute_tool_offset(
            MachineXY::new(100.0, 100.0),
            MachineXY::new(0.0, 0.0),
            MachineXY::new(98.5, 101.2),
        );
        assert_eq!(offset, MachineXY::new(1.5, -1.2));
    }

    #[test]
    fn test_init_records_origin_and_moves_to_first_point() {
        let geometry = FrameGeometry::new(640, 480);
        let obs = Observation::new(
            PixelPoint::new(320.0, 240.0),
            geometry,
            MachinePosition::new(100.0, 100.0, 5.0),
        );
        let (state, effects) = transition(AlignmentState::calibrate(), &obs, &ctx()).unwrap();
        assert_eq!(state.phase, Phase::CamCalSweep(1));
        assert_eq!(state.samples.len(), 1);
        assert!(effects.contains(&Effect::Move(MotionCommand::move_by(
            SWEEP_POINTS[0],
            3000.0
        ))));
    }

    #[test]
    fn test_stuck_fiducial_fails_mpp() {
        clear_invariant_log();
        let geometry = FrameGeometry::new(640, 480);
        let obs = Observation::new(
            PixelPoint::new(320.0, 240.0),
            geometry,
            MachinePosition::new(100.0, 100.0, 5.0),
        );
        let (state, _) = transition(AlignmentState::calibrate(), &obs, &ctx()).unwrap();
        let err = transition(state, &obs, &ctx()).unwrap_err();
        assert_eq!(err, AlignmentError::Solver(SolverError::NoDisplacement));
        contract_test("sweep order", &["Sweep samples are collected in sweep order"]);
    }

    #[test]
    fn test_idle_ignores_observations() {
        let obs = Observation::new(
            PixelPoint::new(1.0, 1.0),
            FrameGeometry::new(10, 10),
            MachinePosition::default(),
        );
        let (state, effects) = transition(AlignmentState::idle(), &obs, &ctx()).unwrap();
        assert_eq!(state.phase, Phase::Idle);
        assert!(effects.is_empty());
    }
}
