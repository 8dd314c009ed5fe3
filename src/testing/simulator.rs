//! Closed-loop simulated rig: a camera looking up at the active tool's tip
//! and a motion controller that moves it.
//!
//! Both halves share one state behind a mutex, so a move sent to the
//! [`SimulatedMachine`] shows up in the next [`SimulatedCamera`] frame.
//!
//! Geometry: the tip of tool `t` sits at
//! `position + true_offset[t] - g10_offset[t]`. The camera sees it at
//! `frame_center + R * (tip - camera_center) / mpp`, with `R` a small
//! rotation. Aligning a tool therefore converges on
//! `camera_center - true_offset[t] + g10_offset[t]`, and with the camera
//! centered on the controlled point the reported offset equals the tool's
//! true offset.

use super::synthetic_data::{render_fiducials, Fiducial};
use crate::camera::{CameraDevice, CameraProperty, PropertySet};
use crate::errors::{CameraError, MotionError};
use crate::motion::{MotionCommand, MotionInterface, MotionState};
use crate::types::{MachinePosition, MachineXY, PixelPoint};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct RigState {
    mpp: f64,
    width: u32,
    height: u32,
    radius: f64,
    rotation: f64,
    camera_center: MachineXY,
    true_offsets: Vec<MachineXY>,
    g10_offsets: Vec<MachineXY>,
    position: MachinePosition,
    active_tool: Option<u32>,
    busy_until: Option<Instant>,
    idle_latency: Duration,
    fiducial_visible: bool,
    frozen_tip: Option<PixelPoint>,
    debris: Vec<Fiducial>,
    reject_moves: bool,
    failing_reads: u32,
    camera_open: bool,
    camera_source: Option<String>,
    properties: PropertySet,
    commands: Vec<String>,
    frames_rendered: u64,
}

impl RigState {
    fn tip_pixel(&self) -> Option<PixelPoint> {
        let tool = self.active_tool? as usize;
        if let Some(frozen) = self.frozen_tip {
            return Some(frozen);
        }
        let true_offset = self.true_offsets.get(tool).copied().unwrap_or_default();
        let g10 = self.g10_offsets.get(tool).copied().unwrap_or_default();
        let dx = self.position.x + true_offset.x - g10.x - self.camera_center.x;
        let dy = self.position.y + true_offset.y - g10.y - self.camera_center.y;
        let (sin, cos) = self.rotation.sin_cos();
        Some(PixelPoint::new(
            self.width as f64 / 2.0 + (cos * dx - sin * dy) / self.mpp,
            self.height as f64 / 2.0 + (sin * dx + cos * dy) / self.mpp,
        ))
    }

    fn render(&mut self) -> RgbImage {
        self.frames_rendered += 1;
        let mut fiducials = self.debris.clone();
        if self.fiducial_visible {
            if let Some(tip) = self.tip_pixel() {
                fiducials.push(Fiducial::new(tip.u, tip.v, self.radius));
            }
        }
        render_fiducials(self.width, self.height, &fiducials)
    }

    fn start_motion(&mut self) {
        self.busy_until = if self.idle_latency.is_zero() {
            None
        } else {
            Some(Instant::now() + self.idle_latency)
        };
    }

    fn execute(&mut self, command: &MotionCommand) -> Result<(), MotionError> {
        let tool_count = self.true_offsets.len() as u32;
        match command {
            MotionCommand::SelectTool(tool) => {
                if *tool >= tool_count {
                    return Err(MotionError::Rejected {
                        command: command.to_gcode(),
                        reason: format!("no tool {}", tool),
                    });
                }
                self.active_tool = Some(*tool);
                self.start_motion();
            }
            MotionCommand::UnloadTool => {
                self.active_tool = None;
                self.start_motion();
            }
            MotionCommand::MoveAbsolute { x, y, z, .. } => {
                self.check_moves(command)?;
                self.position.x = x.unwrap_or(self.position.x);
                self.position.y = y.unwrap_or(self.position.y);
                self.position.z = z.unwrap_or(self.position.z);
                self.start_motion();
            }
            MotionCommand::MoveRelative { dx, dy, .. } => {
                self.check_moves(command)?;
                self.position.x += dx;
                self.position.y += dy;
                self.start_motion();
            }
            MotionCommand::SetToolOffset { tool, x, y } => {
                match self.g10_offsets.get_mut(*tool as usize) {
                    Some(offset) => *offset = MachineXY::new(*x, *y),
                    None => {
                        return Err(MotionError::Rejected {
                            command: command.to_gcode(),
                            reason: format!("no tool {}", tool),
                        })
                    }
                }
            }
            MotionCommand::Raw(_) => {}
        }
        Ok(())
    }

    fn check_moves(&self, command: &MotionCommand) -> Result<(), MotionError> {
        if self.reject_moves {
            return Err(MotionError::Rejected {
                command: command.to_gcode(),
                reason: "axes not homed".to_string(),
            });
        }
        Ok(())
    }

    fn is_idle(&mut self) -> bool {
        match self.busy_until {
            Some(until) if Instant::now() < until => false,
            _ => {
                self.busy_until = None;
                true
            }
        }
    }
}

/// Builder for [`SimulatedRig`].
#[derive(Debug, Clone)]
pub struct SimulatedRigBuilder {
    mpp: f64,
    width: u32,
    height: u32,
    radius: f64,
    rotation_deg: f64,
    camera_center: MachineXY,
    tool_offsets: Vec<MachineXY>,
    idle_latency: Duration,
}

impl Default for SimulatedRigBuilder {
    fn default() -> Self {
        Self {
            mpp: 0.005,
            width: 400,
            height: 300,
            radius: 13.0,
            rotation_deg: 0.0,
            camera_center: MachineXY::new(0.0, 0.0),
            tool_offsets: vec![MachineXY::new(0.0, 0.0)],
            idle_latency: Duration::ZERO,
        }
    }
}

impl SimulatedRigBuilder {
    /// Millimeters per pixel of the simulated optics.
    pub fn mpp(mut self, mpp: f64) -> Self {
        self.mpp = mpp;
        self
    }

    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Rendered tip radius in pixels.
    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Camera rotation relative to the machine axes.
    pub fn rotation_deg(mut self, degrees: f64) -> Self {
        self.rotation_deg = degrees;
        self
    }

    /// Machine position the camera axis points at.
    pub fn camera_center(mut self, center: MachineXY) -> Self {
        self.camera_center = center;
        self
    }

    /// True physical tip offset of every tool. Also sets the tool count.
    pub fn tool_offsets(mut self, offsets: Vec<MachineXY>) -> Self {
        self.tool_offsets = offsets;
        self
    }

    /// How long the machine reports busy after each move.
    pub fn idle_latency(mut self, latency: Duration) -> Self {
        self.idle_latency = latency;
        self
    }

    pub fn build(self) -> SimulatedRig {
        let mut properties = PropertySet::default();
        properties.set(CameraProperty::Brightness, 128.0);
        properties.set(CameraProperty::Contrast, 32.0);
        properties.set(CameraProperty::Saturation, 64.0);
        properties.set(CameraProperty::Hue, 0.0);

        let tools = self.tool_offsets.len();
        SimulatedRig {
            state: Arc::new(Mutex::new(RigState {
                mpp: self.mpp,
                width: self.width,
                height: self.height,
                radius: self.radius,
                rotation: self.rotation_deg.to_radians(),
                camera_center: self.camera_center,
                true_offsets: self.tool_offsets,
                g10_offsets: vec![MachineXY::default(); tools],
                position: MachinePosition::default(),
                active_tool: None,
                busy_until: None,
                idle_latency: self.idle_latency,
                fiducial_visible: true,
                frozen_tip: None,
                debris: Vec::new(),
                reject_moves: false,
                failing_reads: 0,
                camera_open: false,
                camera_source: None,
                properties,
                commands: Vec::new(),
                frames_rendered: 0,
            })),
        }
    }
}

/// Handle on the shared simulation. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    state: Arc<Mutex<RigState>>,
}

impl SimulatedRig {
    pub fn builder() -> SimulatedRigBuilder {
        SimulatedRigBuilder::default()
    }

    pub fn camera(&self) -> SimulatedCamera {
        SimulatedCamera {
            state: self.state.clone(),
        }
    }

    pub fn machine(&self) -> SimulatedMachine {
        SimulatedMachine {
            state: self.state.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        // Test helper: a poisoned rig means a test already panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` frame reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.lock().failing_reads = count;
    }

    /// Injected read failures not yet consumed.
    pub fn pending_read_failures(&self) -> u32 {
        self.lock().failing_reads
    }

    /// Hide or show the tool tip in rendered frames.
    pub fn set_fiducial_visible(&self, visible: bool) {
        self.lock().fiducial_visible = visible;
    }

    /// Pin the tip to a fixed pixel no matter where the machine moves.
    pub fn freeze_tip(&self, pixel: Option<PixelPoint>) {
        self.lock().frozen_tip = pixel;
    }

    /// Add a stray dark disc that stays put in every frame.
    pub fn add_debris(&self, u: f64, v: f64, radius: f64) {
        self.lock().debris.push(Fiducial::new(u, v, radius));
    }

    /// Reject every move with a motion error.
    pub fn reject_moves(&self, reject: bool) {
        self.lock().reject_moves = reject;
    }

    pub fn camera_source(&self) -> Option<String> {
        self.lock().camera_source.clone()
    }

    pub fn camera_open(&self) -> bool {
        self.lock().camera_open
    }

    pub fn position(&self) -> MachinePosition {
        let state = self.lock();
        let mut position = state.position;
        position.tool = state.active_tool;
        position
    }

    pub fn active_tool(&self) -> Option<u32> {
        self.lock().active_tool
    }

    pub fn g10_offset(&self, tool: u32) -> Option<MachineXY> {
        self.lock().g10_offsets.get(tool as usize).copied()
    }

    /// Every accepted command as G-code, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.lock().frames_rendered
    }
}

fn camera_lock(state: &Mutex<RigState>) -> Result<MutexGuard<'_, RigState>, CameraError> {
    state
        .lock()
        .map_err(|_| CameraError::CaptureError("simulated rig state poisoned".to_string()))
}

fn motion_lock(state: &Mutex<RigState>) -> Result<MutexGuard<'_, RigState>, MotionError> {
    state
        .lock()
        .map_err(|_| MotionError::Disconnected("simulated rig state poisoned".to_string()))
}

/// Camera half of the rig.
#[derive(Debug)]
pub struct SimulatedCamera {
    state: Arc<Mutex<RigState>>,
}

impl CameraDevice for SimulatedCamera {
    fn open(&mut self, source: &str) -> Result<(), CameraError> {
        let mut state = camera_lock(&self.state)?;
        state.camera_open = true;
        state.camera_source = Some(source.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.camera_open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().map(|s| s.camera_open).unwrap_or(false)
    }

    fn read_frame(&mut self) -> Result<RgbImage, CameraError> {
        let mut state = camera_lock(&self.state)?;
        if !state.camera_open {
            return Err(CameraError::NotOpen);
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(CameraError::CaptureError("simulated read failure".to_string()));
        }
        Ok(state.render())
    }

    fn property(&self, property: CameraProperty) -> Result<f64, CameraError> {
        camera_lock(&self.state)?
            .properties
            .get(property)
            .ok_or_else(|| CameraError::UnsupportedOperation(property.to_string()))
    }

    fn set_property(&mut self, property: CameraProperty, value: f64) -> Result<(), CameraError> {
        camera_lock(&self.state)?.properties.set(property, value);
        Ok(())
    }

    fn set_resolution(&mut self, _width: u32, _height: u32) -> Result<(), CameraError> {
        Err(CameraError::UnsupportedOperation(
            "simulated camera has a fixed resolution".to_string(),
        ))
    }

    fn resolution(&self) -> (u32, u32) {
        self.state
            .lock()
            .map(|s| (s.width, s.height))
            .unwrap_or((0, 0))
    }

    fn fps(&self) -> u32 {
        100
    }
}

/// Motion half of the rig.
#[derive(Debug)]
pub struct SimulatedMachine {
    state: Arc<Mutex<RigState>>,
}

impl MotionInterface for SimulatedMachine {
    fn send_command(&mut self, command: &MotionCommand) -> Result<(), MotionError> {
        let mut state = motion_lock(&self.state)?;
        state.execute(command)?;
        state.commands.push(command.to_gcode());
        Ok(())
    }

    fn position(&mut self) -> Result<MachinePosition, MotionError> {
        let state = motion_lock(&self.state)?;
        let mut position = state.position;
        position.tool = state.active_tool;
        Ok(position)
    }

    fn motion_state(&mut self) -> Result<MotionState, MotionError> {
        let mut state = motion_lock(&self.state)?;
        Ok(if state.is_idle() {
            MotionState::Idle
        } else {
            MotionState::Moving
        })
    }

    fn active_tool(&mut self) -> Result<Option<u32>, MotionError> {
        Ok(motion_lock(&self.state)?.active_tool)
    }

    fn tool_offset(&mut self, tool: u32) -> Result<MachineXY, MotionError> {
        motion_lock(&self.state)?
            .g10_offsets
            .get(tool as usize)
            .copied()
            .ok_or_else(|| MotionError::Query(format!("no tool {}", tool)))
    }

    fn tool_count(&mut self) -> Result<u32, MotionError> {
        Ok(motion_lock(&self.state)?.true_offsets.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tip_follows_moves() {
        let rig = SimulatedRig::builder().build();
        let mut machine = rig.machine();
        machine.send_command(&MotionCommand::SelectTool(0)).unwrap();
        let before = rig.lock().tip_pixel().unwrap();
        assert_eq!(before, PixelPoint::new(200.0, 150.0));

        machine
            .send_command(&MotionCommand::move_by(MachineXY::new(0.1, 0.0), 3000.0))
            .unwrap();
        let after = rig.lock().tip_pixel().unwrap();
        assert!((after.u - 220.0).abs() < 1e-9);
        assert!((after.v - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_tip_without_tool() {
        let rig = SimulatedRig::builder().build();
        assert!(rig.lock().tip_pixel().is_none());
    }

    #[test]
    fn test_g10_offset_compensates_true_offset() {
        let rig = SimulatedRig::builder()
            .tool_offsets(vec![MachineXY::new(0.05, -0.02)])
            .build();
        let mut machine = rig.machine();
        machine.send_command(&MotionCommand::SelectTool(0)).unwrap();
        let shifted = rig.lock().tip_pixel().unwrap();
        assert!((shifted.u - 210.0).abs() < 1e-9);

        machine
            .send_command(&MotionCommand::SetToolOffset {
                tool: 0,
                x: 0.05,
                y: -0.02,
            })
            .unwrap();
        let centered = rig.lock().tip_pixel().unwrap();
        assert!((centered.u - 200.0).abs() < 1e-9);
        assert!((centered.v - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_latency() {
        let rig = SimulatedRig::builder()
            .idle_latency(Duration::from_millis(30))
            .build();
        let mut machine = rig.machine();
        machine
            .send_command(&MotionCommand::move_xy(MachineXY::new(1.0, 1.0), 1000.0))
            .unwrap();
        assert!(!machine.is_idle().unwrap());
        std::thread::sleep(Duration::from_millis(40));
        assert!(machine.is_idle().unwrap());
    }

    #[test]
    fn test_rejected_moves_are_not_recorded() {
        let rig = SimulatedRig::builder().build();
        rig.reject_moves(true);
        let mut machine = rig.machine();
        let err = machine
            .send_command(&MotionCommand::move_xy(MachineXY::new(1.0, 1.0), 1000.0))
            .unwrap_err();
        assert!(matches!(err, MotionError::Rejected { .. }));
        assert!(rig.commands().is_empty());
        assert!(machine.send_command(&MotionCommand::SelectTool(3)).is_err());
    }
}
