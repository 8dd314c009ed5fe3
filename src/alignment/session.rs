//! Session driver: cycles over tools, feeds observations through the state
//! machine, carries out its effects and unwinds on fatal errors.

use super::state::{transition, AlignmentState, CalibrationContext, Effect, Phase};
use super::station::Station;
use crate::calibration::TransformMatrix;
use crate::errors::{AlignmentError, SessionContext, SessionError};
use crate::events::AlignmentEvent;
use crate::motion::{MotionCommand, MotionInterface};
use crate::results::{ResultAggregator, ResultRecord};
use crate::timing::{format_elapsed, ToolTimer};
use crate::types::{MachinePosition, MachineXY, ToolOffsetResult};
use uuid::Uuid;

/// Owns the station and the motion interface for the worker's lifetime.
pub struct Aligner {
    station: Station,
    motion: Box<dyn MotionInterface>,
    results: ResultAggregator,
    cached_transform: Option<(u64, TransformMatrix)>,
    last_position: Option<MachinePosition>,
    context: SessionContext,
    session_id: Uuid,
}

impl Aligner {
    pub fn new(station: Station, motion: Box<dyn MotionInterface>) -> Self {
        Self {
            station,
            motion,
            results: ResultAggregator::new(),
            cached_transform: None,
            last_position: None,
            context: SessionContext::new(None, None, Phase::Idle),
            session_id: Uuid::nil(),
        }
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    pub fn station_mut(&mut self) -> &mut Station {
        &mut self.station
    }

    pub fn results(&self) -> &ResultAggregator {
        &self.results
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Align every tool for every configured cycle.
    pub fn run_session(&mut self) -> Result<Vec<ToolOffsetResult>, SessionError> {
        self.session_id = Uuid::new_v4();
        self.results.clear();
        self.cached_transform = None;
        self.last_position = None;
        self.context = SessionContext::new(None, None, Phase::Idle);
        self.station.set_running(true);
        log::info!("Alignment session {} started", self.session_id);

        let outcome = self.drive_session();
        self.station.set_running(false);

        match outcome {
            Ok(()) => {
                let records = self.results.records();
                self.station.bus().publish(AlignmentEvent::SessionComplete {
                    session_id: self.session_id,
                    results: records,
                });
                self.station.bus().status("Alignment complete");
                self.context.phase = Phase::Done;
                Ok(self.results.results().to_vec())
            }
            Err(error) => Err(self.abort(error)),
        }
    }

    fn drive_session(&mut self) -> Result<(), AlignmentError> {
        let alignment = self.station.config().alignment.clone();
        let available = self.motion.tool_count()?;
        let tools = if alignment.num_tools > available {
            log::warn!(
                "{} tools configured but the machine reports {}",
                alignment.num_tools,
                available
            );
            available
        } else {
            alignment.num_tools
        };

        for cycle in 1..=alignment.cycles {
            self.context.cycle = Some(cycle);
            for tool in 0..tools {
                self.context.tool = Some(tool);
                self.context.phase = Phase::Idle;
                self.station.bus().status(format!(
                    "Calibrating T{}, cycle: {}/{}",
                    tool, cycle, alignment.cycles
                ));

                let result = self.align_tool(tool, cycle)?;
                log::info!(
                    "T{} cycle {}: offset ({:.3}, {:.3}), mpp {:.4}, {}",
                    tool,
                    cycle,
                    result.x,
                    result.y,
                    result.mpp,
                    format_elapsed(result.elapsed)
                );
                self.results.push(result);
                self.station
                    .bus()
                    .publish(AlignmentEvent::Result(ResultRecord::from(&result)));
                self.motion.send_command(&MotionCommand::SetToolOffset {
                    tool,
                    x: result.x,
                    y: result.y,
                })?;
            }
        }

        self.context.phase = Phase::Done;
        let cp = alignment.controlled_point;
        self.motion.send_command(&MotionCommand::UnloadTool)?;
        self.station.wait_idle(self.motion.as_mut())?;
        self.motion.send_command(&MotionCommand::MoveAbsolute {
            x: Some(cp.x),
            y: Some(cp.y),
            z: Some(cp.z),
            feedrate: None,
        })?;
        self.station.wait_idle(self.motion.as_mut())?;
        Ok(())
    }

    fn align_tool(&mut self, tool: u32, cycle: u32) -> Result<ToolOffsetResult, AlignmentError> {
        let alignment = self.station.config().alignment.clone();
        let cp = alignment.controlled_point;

        self.motion.send_command(&MotionCommand::SelectTool(tool))?;
        self.station.wait_idle(self.motion.as_mut())?;
        self.motion.send_command(&MotionCommand::MoveAbsolute {
            x: Some(cp.x),
            y: Some(cp.y),
            z: Some(cp.z),
            feedrate: None,
        })?;
        self.station.wait_idle(self.motion.as_mut())?;

        let g10 = self.motion.tool_offset(tool)?;
        let ctx = CalibrationContext::from_config(&alignment, g10);

        let generation = self.station.detector_generation();
        let mut state = match self.cached_transform {
            Some((cached_at, transform))
                if alignment.reuse_transform && cached_at == generation =>
            {
                log::info!("Reusing camera calibration for T{}", tool);
                AlignmentState::with_transform(transform)
            }
            _ => AlignmentState::calibrate(),
        };
        let mut timer = ToolTimer::start();

        loop {
            self.context.phase = state.phase;
            let observation = self.station.observe(self.motion.as_mut())?;
            self.last_position = Some(observation.machine);

            let solving = state.phase == Phase::CamCalSweep(9);
            let (next, effects) = transition(state, &observation, &ctx).map_err(|e| {
                if solving {
                    self.context.phase = Phase::TransformSolve;
                }
                e
            })?;
            state = next;

            for effect in effects {
                match effect {
                    Effect::Move(command) => {
                        log::debug!("T{}: {}", tool, command);
                        self.motion.send_command(&command)?;
                        self.station.wait_idle(self.motion.as_mut())?;
                    }
                    Effect::MppMeasured(mpp) => {
                        self.station.bus().message(format!("mpp: {:.4}", mpp));
                    }
                    Effect::TransformSolved(transform) => {
                        self.cached_transform = Some((generation, transform));
                    }
                    Effect::ResetTimer => timer = ToolTimer::start(),
                    Effect::Status(text) => self.station.bus().message(text),
                    Effect::Complete { offset, mpp } => {
                        return Ok(ToolOffsetResult {
                            tool,
                            cycle,
                            mpp,
                            x: offset.x,
                            y: offset.y,
                            elapsed: timer.elapsed(),
                        });
                    }
                }
            }
        }
    }

    /// Unwind a failed session once: best-effort machine recovery, camera
    /// release and a single abort event.
    fn abort(&mut self, error: AlignmentError) -> SessionError {
        let context = self.context;
        log::error!("Session aborted: {} ({})", error, context);

        match &error {
            AlignmentError::Cancelled => {
                let target = self
                    .motion
                    .position()
                    .ok()
                    .or(self.last_position)
                    .map(|p| MachineXY::new(p.x, p.y));
                self.recover_machine(target);
            }
            AlignmentError::Motion(_) | AlignmentError::ConvergenceLimit { .. } => {
                let cp = self.station.config().alignment.controlled_point;
                self.recover_machine(Some(MachineXY::new(cp.x, cp.y)));
            }
            // Leave the machine at its last commanded position.
            AlignmentError::Solver(_) | AlignmentError::Camera(_) | AlignmentError::Config(_) => {}
        }

        self.station.release_camera();
        self.station.bus().publish(AlignmentEvent::SessionAborted {
            session_id: self.session_id,
            context,
            message: error.to_string(),
        });
        error.in_context(context)
    }

    fn recover_machine(&mut self, target: Option<MachineXY>) {
        if let Err(e) = self.motion.send_command(&MotionCommand::UnloadTool) {
            log::warn!("Tool unload failed during recovery: {}", e);
            return;
        }
        if let Err(e) = self.station.settle(self.motion.as_mut()) {
            log::warn!("{}", e);
        }
        if let Some(target) = target {
            let feedrate = self.station.config().alignment.center_feedrate;
            if let Err(e) = self
                .motion
                .send_command(&MotionCommand::move_xy(target, feedrate))
            {
                log::warn!("Return move failed during recovery: {}", e);
            }
        }
    }

    /// Detection-only preview. Stopping is not an error here.
    pub fn run_detection(&mut self) -> Result<(), AlignmentError> {
        self.station.set_running(true);
        let outcome = self.station.run_preview_detection();
        self.station.set_running(false);
        match outcome {
            Err(AlignmentError::Cancelled) => {
                log::info!("Detection stopped");
                Ok(())
            }
            other => other,
        }
    }
}
