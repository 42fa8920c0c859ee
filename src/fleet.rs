//! Fleet coordinator: owns every robot handle and fans out fleet events.
//!
//! The coordinator is single-owner state driven from one worker thread
//! (see `app`). It registers robots on their first locatable telemetry,
//! routes telemetry and control-plane events to the matching handle, and
//! maintains the authoritative set of closed lanes for the fleet.

use crate::app::CommandPublisher;
use crate::config::FleetConfig;
use crate::graph::{GraphElement, NavGraph};
use crate::handle::RobotCommandHandle;
use crate::messages::{
    ClosedLanes, FleetState, InterruptRequest, LaneRequest, Location, ModeRequest, RequestedMode,
    RobotState, SpeedLimitRequest,
};
use crate::planner::{
    convert_decision, ActionExecution, FleetPlanner, FleetPlannerConfig, LiftDecision,
    LiftWatchdogService,
};
use crossbeam_channel::Sender;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Everything the fleet worker reacts to, serialized through one channel
pub enum FleetEvent {
    /// Telemetry batch from the fleet driver
    FleetState(FleetState),
    /// Lane closure / reopening request
    LaneClosure(LaneRequest),
    /// Lane speed limit request
    SpeedLimit(SpeedLimitRequest),
    /// Robot interruption protocol message
    Interrupt(InterruptRequest),
    /// Mode notice ending a teleop action when it reports Idle
    ActionNotice(ModeRequest),
    /// The planner started a teleop action on this robot
    ActionExecution {
        robot: String,
        execution: ActionExecution,
    },
    /// Live update of the responsive-wait setting
    SetResponsiveWait(bool),
}

/// Owns the robot handles of one fleet and the fleet-wide closed-lane set
pub struct FleetCoordinator {
    fleet_name: String,
    graph: Arc<NavGraph>,
    config: FleetConfig,
    planner: Box<dyn FleetPlanner>,
    publisher: Arc<dyn CommandPublisher>,
    lift_watchdog: Option<Arc<dyn LiftWatchdogService>>,
    robots: HashMap<String, RobotCommandHandle>,
    closed_lanes: BTreeSet<usize>,
    responsive_wait: bool,
    /// Feedback channel so planner callbacks re-enter through the worker
    events: Sender<FleetEvent>,
}

impl FleetCoordinator {
    pub fn new(
        config: FleetConfig,
        graph: Arc<NavGraph>,
        mut planner: Box<dyn FleetPlanner>,
        publisher: Arc<dyn CommandPublisher>,
        lift_watchdog: Option<Arc<dyn LiftWatchdogService>>,
        events: Sender<FleetEvent>,
    ) -> Self {
        planner.configure(FleetPlannerConfig::from_fleet_config(&config));
        graph.log_inventory();

        let responsive_wait = config.enable_responsive_wait;
        Self {
            fleet_name: config.fleet_name.clone(),
            graph,
            config,
            planner,
            publisher,
            lift_watchdog,
            robots: HashMap::new(),
            closed_lanes: BTreeSet::new(),
            responsive_wait,
            events,
        }
    }

    pub fn fleet_name(&self) -> &str {
        &self.fleet_name
    }

    pub fn robot_count(&self) -> usize {
        self.robots.len()
    }

    pub fn robot(&self, name: &str) -> Option<&RobotCommandHandle> {
        self.robots.get(name)
    }

    pub fn robot_mut(&mut self, name: &str) -> Option<&mut RobotCommandHandle> {
        self.robots.get_mut(name)
    }

    pub fn closed_lanes(&self) -> &BTreeSet<usize> {
        &self.closed_lanes
    }

    /// Dispatch one fleet event; the single entry point of the worker loop
    pub fn handle_event(&mut self, event: FleetEvent, now: Instant) {
        match event {
            FleetEvent::FleetState(msg) => self.handle_fleet_state(msg, now),
            FleetEvent::LaneClosure(request) => self.handle_lane_closure(request),
            FleetEvent::SpeedLimit(request) => self.handle_speed_limit(request),
            FleetEvent::Interrupt(request) => self.handle_interrupt(request),
            FleetEvent::ActionNotice(notice) => self.handle_action_notice(notice),
            FleetEvent::ActionExecution { robot, execution } => {
                match self.robots.get_mut(&robot) {
                    Some(handle) => handle.set_action_execution(execution),
                    None => log::warn!(
                        "Fleet: received an action execution for unknown robot [{}]",
                        robot
                    ),
                }
            }
            FleetEvent::SetResponsiveWait(enabled) => self.set_responsive_wait(enabled),
        }
    }

    /// Run the per-robot stall watchdogs; driven by the worker tick
    pub fn check_stalls(&mut self, now: Instant) {
        for handle in self.robots.values_mut() {
            handle.check_stall(now);
        }
    }

    fn handle_fleet_state(&mut self, msg: FleetState, now: Instant) {
        if msg.name != self.fleet_name {
            return;
        }

        for state in msg.robots {
            if !self.robots.contains_key(&state.name) {
                // First telemetry from an unseen robot; registration fails
                // when the pose cannot be related to the graph, and is
                // retried on every subsequent telemetry.
                self.add_robot(&state, now);
            }

            if let Some(handle) = self.robots.get_mut(&state.name) {
                handle.update_state(state, now);
            }
        }
    }

    fn add_robot(&mut self, state: &RobotState, now: Instant) {
        let location = &state.location;
        let starts = self.planner.compute_plan_starts(
            &self.graph,
            &location.level_name,
            location.position(),
            location.t,
        );

        if starts.is_empty() {
            log::error!(
                "Fleet: unable to compute a plan start for robot [{}] using map [{}] and \
                 location [{:.2}, {:.2}, {:.2}]; the robot will not be added to fleet [{}]. {}",
                state.name,
                location.level_name,
                location.x,
                location.y,
                location.yaw,
                self.fleet_name,
                self.unlocatable_hint(location)
            );
            return;
        }

        let mut updater = self.planner.add_robot(&state.name, starts);
        updater.enable_responsive_wait(self.responsive_wait);

        // Teleop executions must re-enter through the worker so the
        // execution slot is only ever touched on this thread.
        let events = self.events.clone();
        let robot = state.name.clone();
        updater.set_action_executor(Box::new(move |execution| {
            let event = FleetEvent::ActionExecution {
                robot: robot.clone(),
                execution,
            };
            if events.send(event).is_err() {
                log::error!(
                    "Fleet: dropped an action execution for [{}]; the fleet worker is gone",
                    robot
                );
            }
        }));

        if let Some(service) = &self.lift_watchdog {
            let service = Arc::clone(service);
            let robot = state.name.clone();
            updater.set_lift_entry_watchdog(Box::new(move |lift_name| {
                match service.request_clearance(&robot, lift_name) {
                    Ok(code) => convert_decision(code),
                    Err(e) => {
                        log::error!("Fleet: failed to get lift clearance: {}", e);
                        LiftDecision::Undefined
                    }
                }
            }));
        }

        let handle = RobotCommandHandle::new(
            &self.fleet_name,
            &state.name,
            Arc::clone(&self.graph),
            self.config.vehicle,
            Arc::clone(&self.publisher),
            self.config.timing.clone(),
            updater,
            now,
        );

        log::info!(
            "Fleet: added robot [{}] to fleet [{}]",
            state.name,
            self.fleet_name
        );
        self.robots.insert(state.name.clone(), handle);
    }

    /// Diagnostic naming the nearest graph element and its distance
    fn unlocatable_hint(&self, location: &Location) -> String {
        match self.graph.nearest(&location.level_name, [location.x, location.y]) {
            None => format!(
                "None of the waypoints in the graph are on a map called [{}].",
                location.level_name
            ),
            Some(hit) if hit.kind == GraphElement::Lane => {
                let lane = &self.graph.lanes[hit.index];
                format!(
                    "The closest lane on the graph [{}] connects waypoint [{}] to [{}] and \
                     is a distance of [{:.2}m] from the robot.",
                    hit.index,
                    self.graph.waypoint_name(lane.entry),
                    self.graph.waypoint_name(lane.exit),
                    hit.distance
                )
            }
            Some(hit) => format!(
                "The closest waypoint on the graph [{}] is a distance of [{:.2}m] from the robot.",
                self.graph.waypoint_name(hit.index),
                hit.distance
            ),
        }
    }

    fn handle_lane_closure(&mut self, request: LaneRequest) {
        if request.fleet_name != self.fleet_name || request.fleet_name.is_empty() {
            return;
        }

        self.planner.open_lanes(&request.open_lanes);
        self.planner.close_lanes(&request.close_lanes);

        let mut newly_closed = BTreeSet::new();
        for &lane in &request.close_lanes {
            if self.closed_lanes.insert(lane) {
                newly_closed.insert(lane);
            }
        }
        for lane in &request.open_lanes {
            self.closed_lanes.remove(lane);
        }

        for handle in self.robots.values_mut() {
            handle.newly_closed_lanes(&newly_closed);
        }

        let status = ClosedLanes {
            fleet_name: self.fleet_name.clone(),
            closed_lanes: self.closed_lanes.iter().copied().collect(),
        };
        if let Err(e) = self.publisher.publish_closed_lanes(&status) {
            log::error!("Fleet: failed to publish closed lane status: {}", e);
        }
    }

    fn handle_speed_limit(&mut self, request: SpeedLimitRequest) {
        if request.fleet_name != self.fleet_name || request.fleet_name.is_empty() {
            return;
        }

        self.planner.limit_lane_speeds(&request.speed_limits);
        self.planner.remove_speed_limits(&request.remove_limits);
    }

    fn handle_interrupt(&mut self, request: InterruptRequest) {
        if request.fleet_name != self.fleet_name {
            return;
        }

        match self.robots.get_mut(&request.robot_name) {
            Some(handle) => handle.handle_interrupt_request(&request),
            None => log::warn!(
                "Fleet: could not find robot [{}] in fleet [{}]",
                request.robot_name,
                self.fleet_name
            ),
        }
    }

    fn handle_action_notice(&mut self, notice: ModeRequest) {
        if notice.fleet_name.is_empty()
            || notice.fleet_name != self.fleet_name
            || notice.robot_name.is_empty()
        {
            return;
        }

        if notice.mode != RequestedMode::Idle {
            return;
        }

        if let Some(handle) = self.robots.get_mut(&notice.robot_name) {
            handle.complete_robot_action();
        }
    }

    fn set_responsive_wait(&mut self, enabled: bool) {
        self.responsive_wait = enabled;
        for handle in self.robots.values_mut() {
            handle.enable_responsive_wait(enabled);
        }
    }
}
