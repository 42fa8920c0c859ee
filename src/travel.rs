//! Per-robot travel state: the active plan and its progress callbacks.

use crate::graph::LaneEvent;
use crate::planner::{ArrivalCheckpoint, RobotUpdater};
use std::time::Duration;

/// One waypoint of a planner-issued path
#[derive(Debug, Clone)]
pub struct PlanWaypoint {
    /// Target pose (x, y, yaw)
    pub position: [f64; 3],
    /// Time the planner expects the robot to arrive, seconds since epoch
    pub time: f64,
    /// Graph waypoint this plan waypoint sits on, if any
    pub graph_index: Option<usize>,
    /// Event to perform on arrival, if any
    pub event: Option<LaneEvent>,
    /// Lanes traversed to reach this waypoint
    pub approach_lanes: Vec<usize>,
    /// Schedule checkpoints that count as reached once the robot arrives
    pub arrival_checkpoints: Vec<ArrivalCheckpoint>,
}

/// Reports the estimated time remaining to reach a plan waypoint
pub type ArrivalEstimator = Box<dyn FnMut(usize, Duration) + Send>;

/// Invoked exactly once when a command has fully completed
pub type RequestCompleted = Box<dyn FnOnce() + Send>;

/// Mutable record of what one robot is currently doing with its plan
///
/// Reset by every `follow_new_path`, `stop`, or `dock`. The updater handle
/// lives here because every estimation step ends by reporting through it.
pub struct TravelState {
    /// The active waypoint sequence
    pub waypoints: Vec<PlanWaypoint>,

    /// Next waypoint the robot is expected to reach; `None` until the
    /// estimator fills it in for the current telemetry
    pub target_plan_index: Option<usize>,

    pub next_arrival_estimator: Option<ArrivalEstimator>,

    pub path_finished_callback: Option<RequestCompleted>,

    /// Last graph waypoint the robot was known to be on
    pub last_known_waypoint: Option<usize>,

    /// The robot's interface into the planner and schedule
    pub updater: Box<dyn RobotUpdater>,
}

impl TravelState {
    pub fn new(updater: Box<dyn RobotUpdater>) -> Self {
        Self {
            waypoints: Vec::new(),
            target_plan_index: None,
            next_arrival_estimator: None,
            path_finished_callback: None,
            last_known_waypoint: None,
            updater,
        }
    }

    /// Drop any pending completion callbacks from a superseded command
    pub fn clear_command(&mut self) {
        self.next_arrival_estimator = None;
        self.path_finished_callback = None;
    }

    /// Whether a path command is currently in flight
    pub fn is_following(&self) -> bool {
        self.path_finished_callback.is_some()
    }
}
