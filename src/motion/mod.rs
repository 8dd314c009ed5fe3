//! Motion controller interface
//!
//! The alignment engine is the only issuer of motion commands. It talks to the
//! machine through [`MotionInterface`], so any transport (serial, HTTP, a
//! simulator) can sit behind it.

use crate::errors::MotionError;
use crate::types::{MachinePosition, MachineXY};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the machine is executing motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionState {
    Idle,
    Moving,
}

/// Typed motion commands, rendered as RepRap-flavored G-code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MotionCommand {
    SelectTool(u32),
    UnloadTool,
    MoveAbsolute {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feedrate: Option<f64>,
    },
    MoveRelative {
        dx: f64,
        dy: f64,
        feedrate: Option<f64>,
    },
    SetToolOffset {
        tool: u32,
        x: f64,
        y: f64,
    },
    Raw(String),
}

impl MotionCommand {
    pub fn move_xy(target: MachineXY, feedrate: f64) -> Self {
        MotionCommand::MoveAbsolute {
            x: Some(target.x),
            y: Some(target.y),
            z: None,
            feedrate: Some(feedrate),
        }
    }

    pub fn move_by(delta: MachineXY, feedrate: f64) -> Self {
        MotionCommand::MoveRelative {
            dx: delta.x,
            dy: delta.y,
            feedrate: Some(feedrate),
        }
    }

    pub fn to_gcode(&self) -> String {
        match self {
            MotionCommand::SelectTool(tool) => format!("T{}", tool),
            MotionCommand::UnloadTool => "T-1".to_string(),
            MotionCommand::MoveAbsolute { x, y, z, feedrate } => {
                let mut code = "G90 G1".to_string();
                for (axis, value) in [("X", x), ("Y", y), ("Z", z)] {
                    if let Some(v) = value {
                        code.push_str(&format!(" {}{:.3}", axis, v));
                    }
                }
                if let Some(f) = feedrate {
                    code.push_str(&format!(" F{:.0}", f));
                }
                code
            }
            MotionCommand::MoveRelative { dx, dy, feedrate } => {
                let mut code = format!("G91 G1 X{:.3} Y{:.3}", dx, dy);
                if let Some(f) = feedrate {
                    code.push_str(&format!(" F{:.0}", f));
                }
                code.push_str(" G90");
                code
            }
            MotionCommand::SetToolOffset { tool, x, y } => {
                format!("G10 P{} X{:.3} Y{:.3}", tool, x, y)
            }
            MotionCommand::Raw(code) => code.clone(),
        }
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_gcode())
    }
}

/// Logical operations the alignment engine needs from a motion controller.
///
/// Calls block until the controller answers; waiting for motion to finish is
/// the caller's job (poll [`MotionInterface::is_idle`]).
pub trait MotionInterface: Send {
    fn send_command(&mut self, command: &MotionCommand) -> Result<(), MotionError>;

    fn position(&mut self) -> Result<MachinePosition, MotionError>;

    fn motion_state(&mut self) -> Result<MotionState, MotionError>;

    fn is_idle(&mut self) -> Result<bool, MotionError> {
        Ok(self.motion_state()? == MotionState::Idle)
    }

    /// Currently loaded tool, `None` when no tool is loaded.
    fn active_tool(&mut self) -> Result<Option<u32>, MotionError>;

    /// The G10 offset currently applied to `tool`.
    fn tool_offset(&mut self, tool: u32) -> Result<MachineXY, MotionError>;

    fn tool_count(&mut self) -> Result<u32, MotionError>;
}

impl<M: MotionInterface + ?Sized> MotionInterface for Box<M> {
    fn send_command(&mut self, command: &MotionCommand) -> Result<(), MotionError> {
        (**self).send_command(command)
    }

    fn position(&mut self) -> Result<MachinePosition, MotionError> {
        (**self).position()
    }

    fn motion_state(&mut self) -> Result<MotionState, MotionError> {
        (**self).motion_state()
    }

    fn is_idle(&mut self) -> Result<bool, MotionError> {
        (**self).is_idle()
    }

    fn active_tool(&mut self) -> Result<Option<u32>, MotionError> {
        (**self).active_tool()
    }

    fn tool_offset(&mut self, tool: u32) -> Result<MachineXY, MotionError> {
        (**self).tool_offset(tool)
    }

    fn tool_count(&mut self) -> Result<u32, MotionError> {
        (**self).tool_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcode_rendering() {
        assert_eq!(MotionCommand::SelectTool(2).to_gcode(), "T2");
        assert_eq!(MotionCommand::UnloadTool.to_gcode(), "T-1");
        assert_eq!(
            MotionCommand::move_by(MachineXY::new(0.294, -0.405), 3000.0).to_gcode(),
            "G91 G1 X0.294 Y-0.405 F3000 G90"
        );
        assert_eq!(
            MotionCommand::move_xy(MachineXY::new(100.0, 99.5), 1000.0).to_gcode(),
            "G90 G1 X100.000 Y99.500 F1000"
        );
        assert_eq!(
            MotionCommand::SetToolOffset {
                tool: 1,
                x: 1.5,
                y: -1.2
            }
            .to_gcode(),
            "G10 P1 X1.500 Y-1.200"
        );
    }

    #[test]
    fn test_absolute_move_skips_missing_axes() {
        let cmd = MotionCommand::MoveAbsolute {
            x: None,
            y: None,
            z: Some(5.0),
            feedrate: None,
        };
        assert_eq!(cmd.to_gcode(), "G90 G1 Z5.000");
        assert_eq!(cmd.to_string(), "G90 G1 Z5.000");
    }
}
