//! Message types at the fleet-driver boundary.
//!
//! This module defines the data structures exchanged with fleet drivers:
//! - Telemetry messages (inbound): per-fleet batches of robot state
//! - Command messages (outbound): timed path requests and mode requests
//! - Control-plane messages: lane closures, speed limits, interrupts
//!
//! Bit-compatibility with any particular transport is not required; the
//! field semantics are what matter. Task-id echoing is the acknowledgement
//! mechanism: a driver repeats the `task_id` of the command it is currently
//! executing in every state message.

use serde::{Deserialize, Serialize};

/// Operating mode reported by a fleet driver for one robot
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotMode {
    Idle,
    Charging,
    Moving,
    Paused,
    Waiting,
    Emergency,
    GoingHome,
    Docking,
    /// The driver has diverged from the plan and asks the adapter to replan
    AdapterError,
    Cleaning,
}

/// A timed position on a named map
///
/// `t` is seconds since the epoch. For path requests, an optional speed
/// limit applies to the approach toward this location.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    #[serde(default)]
    pub level_name: String,
    /// Minimum over the approach lanes' speed limits, if any carry one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach_speed_limit: Option<f64>,
}

impl Location {
    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.yaw]
    }
}

/// State of one robot as reported by its fleet driver
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RobotState {
    pub name: String,
    /// Echo of the task-id of the command the driver is executing
    #[serde(default)]
    pub task_id: String,
    pub mode: RobotMode,
    /// Battery percentage in [0, 100]; values outside the range are dropped
    pub battery_percent: f64,
    pub location: Location,
    /// Remaining locations the driver has not yet reached
    #[serde(default)]
    pub path: Vec<Location>,
}

/// A batch of robot states for one fleet
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FleetState {
    pub name: String,
    pub robots: Vec<RobotState>,
}

/// Command asking a robot to follow a timed path
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PathRequest {
    pub fleet_name: String,
    pub robot_name: String,
    pub task_id: String,
    pub path: Vec<Location>,
}

/// Named parameter attached to a mode request
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ModeParameter {
    pub name: String,
    pub value: String,
}

/// Requested operating mode for a mode request
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    Idle,
    Paused,
    Moving,
    Docking,
}

impl Default for RequestedMode {
    fn default() -> Self {
        RequestedMode::Idle
    }
}

/// Command asking a robot to switch modes (e.g. begin a docking maneuver)
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ModeRequest {
    pub fleet_name: String,
    pub robot_name: String,
    pub task_id: String,
    pub mode: RequestedMode,
    #[serde(default)]
    pub parameters: Vec<ModeParameter>,
}

/// Request to close and/or reopen lanes for a fleet
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LaneRequest {
    pub fleet_name: String,
    #[serde(default)]
    pub open_lanes: Vec<usize>,
    #[serde(default)]
    pub close_lanes: Vec<usize>,
}

/// Status message carrying the full set of currently closed lanes
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClosedLanes {
    pub fleet_name: String,
    pub closed_lanes: Vec<usize>,
}

/// One (lane, limit) pair for a speed limit request
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimit {
    pub lane_index: usize,
    pub speed_limit: f64,
}

/// Request to impose or remove lane speed limits
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SpeedLimitRequest {
    pub fleet_name: String,
    #[serde(default)]
    pub speed_limits: Vec<SpeedLimit>,
    #[serde(default)]
    pub remove_limits: Vec<usize>,
}

/// Two-message interruption protocol: INTERRUPT registers, RESUME releases
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    Interrupt,
    Resume,
}

/// Request to interrupt or resume a single robot
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InterruptRequest {
    pub fleet_name: String,
    pub robot_name: String,
    /// Opaque identifier pairing an INTERRUPT with its RESUME
    pub interrupt_id: String,
    pub r#type: InterruptType,
    #[serde(default)]
    pub labels: Vec<String>,
}
