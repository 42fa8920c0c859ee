//! Interfaces to the traffic planner and shared schedule.
//!
//! The adapter core never talks to the planner, negotiator, or schedule
//! database directly; it drives them through the traits in this module.
//! Production wires these to the real planner integration, tests wire them
//! to recording mocks. One `RobotUpdater` exists per registered robot and
//! is owned by that robot's travel state; the `FleetPlanner` is owned by
//! the fleet coordinator.

use crate::config::{FinishingRequest, FleetConfig};
use crate::vehicle::Route;
use std::time::Duration;

/// A possible starting condition the planner may extend a route from
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStart {
    /// Graph waypoint the start is anchored to
    pub waypoint: usize,
    /// Orientation of the robot at the start (radians)
    pub orientation: f64,
    /// Time at which this start is valid, seconds since the epoch
    pub time: f64,
    /// Physical location when the robot is not exactly on the waypoint
    pub location: Option<[f64; 2]>,
    /// Lane the robot is currently traversing, if any
    pub lane: Option<usize>,
}

/// How a position estimate relates to the navigation graph
#[derive(Debug, Clone, PartialEq)]
pub enum PositionHint {
    /// The robot is on this graph waypoint
    Waypoint(usize),
    /// The robot is traversing these lanes
    Lanes(Vec<usize>),
    /// Off-lane pose anchored to the waypoint it is nearest or headed to
    Target(usize),
    /// The pose could not be related to the graph at all
    OffGrid { map: String },
}

/// A (route, checkpoint) pair marking progress along a scheduled itinerary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrivalCheckpoint {
    pub route_id: u64,
    pub checkpoint_id: u64,
}

/// Resume handle returned when a robot is interrupted
///
/// Consumed by resuming; an interruption cannot be resumed twice.
pub trait InterruptionHandle: Send {
    fn resume(self: Box<Self>, labels: Vec<String>);
}

/// Completion notifier for a teleop action being performed by a robot
pub struct ActionExecution {
    finished: Box<dyn FnOnce() + Send>,
}

impl ActionExecution {
    pub fn new(finished: Box<dyn FnOnce() + Send>) -> Self {
        Self { finished }
    }

    /// Tell the planner the action is done
    pub fn finished(self) {
        (self.finished)()
    }
}

impl std::fmt::Debug for ActionExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ActionExecution")
    }
}

/// Installed per robot; the planner invokes it when a teleop task starts
pub type ActionExecutor = Box<dyn Fn(ActionExecution) + Send>;

/// Advisory on whether a robot may enter a lift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftDecision {
    Clear,
    Crowded,
    Undefined,
}

/// Map a raw clearance service decision code onto [`LiftDecision`]
///
/// Unknown codes are reported and treated as undefined.
pub fn convert_decision(decision: u32) -> LiftDecision {
    match decision {
        1 => LiftDecision::Clear,
        2 => LiftDecision::Crowded,
        other => {
            log::error!(
                "Fleet: received undefined value [{}] from the lift clearance service",
                other
            );
            LiftDecision::Undefined
        }
    }
}

/// Advisory callback deciding whether a robot may enter the named lift
pub type LiftWatchdog = Box<dyn Fn(&str) -> LiftDecision + Send>;

/// External lift clearance service
pub trait LiftWatchdogService: Send + Sync {
    /// Raw decision code for `robot_name` entering `lift_name`
    ///
    /// An `Err` means the service was unreachable; callers must degrade to
    /// [`LiftDecision::Undefined`].
    fn request_clearance(&self, robot_name: &str, lift_name: &str) -> crate::Result<u32>;
}

/// One robot's slot in the shared traffic schedule
pub trait ScheduleParticipant {
    /// Reserve a fresh plan-id for the next itinerary version
    fn assign_plan_id(&mut self) -> u64;

    /// Replace the robot's published itinerary
    fn set_itinerary(&mut self, plan_id: u64, routes: Vec<Route>);
}

/// Per-robot interface into the planner
///
/// `mark_arrival` must be monotonic and idempotent: re-marking an already
/// reached checkpoint is a no-op on the schedule side.
pub trait RobotUpdater: Send {
    /// Report state of charge as a fraction in [0, 1]
    fn update_battery_soc(&mut self, soc: f64);

    /// Report the estimated position and its relation to the graph
    fn update_position(&mut self, position: [f64; 3], hint: PositionHint);

    /// Ask the planner to produce a new plan from the current estimate
    fn replan(&mut self);

    /// Register an interruption; `on_interrupted` fires once it takes hold
    fn interrupt(
        &mut self,
        labels: Vec<String>,
        on_interrupted: Box<dyn FnOnce() + Send>,
    ) -> Box<dyn InterruptionHandle>;

    /// Whether an idle robot should periodically replan to yield to others
    fn enable_responsive_wait(&mut self, enabled: bool);

    /// Install the executor invoked when a teleop task starts
    fn set_action_executor(&mut self, executor: ActionExecutor);

    /// Install the advisory consulted before the robot enters a lift
    fn set_lift_entry_watchdog(&mut self, watchdog: LiftWatchdog);

    /// Mark a schedule checkpoint as reached
    fn mark_arrival(&mut self, checkpoint: ArrivalCheckpoint);

    /// The robot's slot in the shared traffic schedule
    fn schedule_participant(&mut self) -> &mut dyn ScheduleParticipant;
}

/// Task categories the fleet is willing to accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    Loop,
    Delivery,
    Clean,
}

/// Startup parameters handed to the planner once per fleet
#[derive(Debug, Clone)]
pub struct FleetPlannerConfig {
    pub battery_voltage: f64,
    pub battery_capacity: f64,
    pub charging_current: f64,
    pub mass: f64,
    pub moment_of_inertia: f64,
    pub friction_coefficient: f64,
    pub ambient_drain_watts: f64,
    pub tool_drain_watts: f64,
    pub drain_battery: bool,
    pub recharge_threshold: f64,
    pub recharge_soc: f64,
    pub finishing_request: FinishingRequest,
    pub accepted_tasks: Vec<TaskType>,
    /// Actions the fleet will perform on request; always includes teleop
    pub performable_actions: Vec<String>,
    pub maximum_delay: Option<Duration>,
    pub server_uri: Option<String>,
}

impl FleetPlannerConfig {
    /// Assemble planner parameters from the fleet configuration
    pub fn from_fleet_config(config: &FleetConfig) -> Self {
        let mut accepted_tasks = Vec::new();
        if config.perform_loop {
            accepted_tasks.push(TaskType::Loop);
        }
        if config.perform_deliveries {
            accepted_tasks.push(TaskType::Delivery);
        }
        if config.perform_cleaning {
            accepted_tasks.push(TaskType::Clean);
        }

        Self {
            battery_voltage: config.battery.voltage,
            battery_capacity: config.battery.capacity,
            charging_current: config.battery.charging_current,
            mass: config.mechanical.mass,
            moment_of_inertia: config.mechanical.moment_of_inertia,
            friction_coefficient: config.mechanical.friction_coefficient,
            ambient_drain_watts: config.power.ambient_drain_watts,
            tool_drain_watts: config.power.tool_drain_watts,
            drain_battery: config.battery.drain_battery,
            recharge_threshold: config.battery.recharge_threshold,
            recharge_soc: config.battery.recharge_soc,
            finishing_request: config.finishing_request(),
            accepted_tasks,
            performable_actions: vec!["teleop".to_string()],
            maximum_delay: config.delay_threshold(),
            server_uri: config.server_uri.clone(),
        }
    }
}

/// Fleet-level interface into the planner
pub trait FleetPlanner: Send {
    /// Forward startup parameters (battery model, task policy, delays)
    fn configure(&mut self, config: FleetPlannerConfig);

    /// Possible plan starts for a reported pose, empty when the pose
    /// cannot be related to the graph
    fn compute_plan_starts(
        &self,
        graph: &crate::graph::NavGraph,
        map: &str,
        position: [f64; 3],
        time: f64,
    ) -> Vec<PlanStart>;

    /// Register a robot and obtain its updater
    fn add_robot(&mut self, name: &str, starts: Vec<PlanStart>) -> Box<dyn RobotUpdater>;

    fn open_lanes(&mut self, lanes: &[usize]);

    fn close_lanes(&mut self, lanes: &[usize]);

    fn limit_lane_speeds(&mut self, limits: &[crate::messages::SpeedLimit]);

    fn remove_speed_limits(&mut self, lanes: &[usize]);
}
