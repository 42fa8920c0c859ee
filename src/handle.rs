//! Per-robot command handle: the state machine between planner and driver.
//!
//! One handle exists per registered robot. The planner drives it through
//! `follow_new_path` / `stop` / `dock`; the fleet coordinator feeds it
//! telemetry through `update_state` and control-plane events through
//! `newly_closed_lanes`, `handle_interrupt_request`, and
//! `complete_robot_action`.
//!
//! The handle is in exactly one of four states: Idle (no completion
//! callback pending), Following (a path-finished callback is set), Docking
//! (a dock-finished callback is set), or Teleop (an action execution slot
//! is occupied). An `interrupted` flag can additionally be set while
//! Following, once per command, when the driver reports divergence.
//!
//! All mutation happens on the fleet worker thread, so the handle carries
//! no locks; commands to the driver are ordered by a strictly increasing
//! task-id and rebroadcast until the driver echoes it back.

use crate::app::CommandPublisher;
use crate::config::TimingConfig;
use crate::estimation;
use crate::graph::NavGraph;
use crate::messages::{
    InterruptRequest, InterruptType, Location, ModeParameter, ModeRequest, PathRequest,
    RequestedMode, RobotMode, RobotState,
};
use crate::planner::{ActionExecution, InterruptionHandle, RobotUpdater};
use crate::travel::{ArrivalEstimator, PlanWaypoint, RequestCompleted, TravelState};
use crate::vehicle::{Route, VehicleTraits};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Command and reconciliation state machine for a single robot
pub struct RobotCommandHandle {
    robot_name: String,

    graph: Arc<NavGraph>,
    traits: VehicleTraits,
    publisher: Arc<dyn CommandPublisher>,
    timing: TimingConfig,

    travel: TravelState,
    last_known_state: Option<RobotState>,
    interrupted: bool,

    current_path_request: PathRequest,
    path_requested_at: Option<Instant>,

    current_dock_request: ModeRequest,
    dock_requested_at: Option<Instant>,
    dock_target_waypoint: Option<usize>,
    dock_finished_callback: Option<RequestCompleted>,
    dock_schedule_pushed_at: Option<Instant>,

    /// Active interruptions keyed by their opaque id
    interruptions: HashMap<String, Box<dyn InterruptionHandle>>,

    /// Occupied while the robot performs a teleop action
    action_execution: Option<ActionExecution>,

    /// Strictly increasing across every command transmission
    next_task_id: u64,

    /// Refreshed whenever the active command makes observable progress
    last_progress_at: Instant,
}

impl RobotCommandHandle {
    pub fn new(
        fleet_name: &str,
        robot_name: &str,
        graph: Arc<NavGraph>,
        traits: VehicleTraits,
        publisher: Arc<dyn CommandPublisher>,
        timing: TimingConfig,
        updater: Box<dyn RobotUpdater>,
        now: Instant,
    ) -> Self {
        let current_path_request = PathRequest {
            fleet_name: fleet_name.to_string(),
            robot_name: robot_name.to_string(),
            ..PathRequest::default()
        };

        let current_dock_request = ModeRequest {
            fleet_name: fleet_name.to_string(),
            robot_name: robot_name.to_string(),
            mode: RequestedMode::Docking,
            parameters: vec![ModeParameter {
                name: "docking".to_string(),
                value: String::new(),
            }],
            ..ModeRequest::default()
        };

        Self {
            robot_name: robot_name.to_string(),
            graph,
            traits,
            publisher,
            timing,
            travel: TravelState::new(updater),
            last_known_state: None,
            interrupted: false,
            current_path_request,
            path_requested_at: None,
            current_dock_request,
            dock_requested_at: None,
            dock_target_waypoint: None,
            dock_finished_callback: None,
            dock_schedule_pushed_at: None,
            interruptions: HashMap::new(),
            action_execution: None,
            next_task_id: 0,
            last_progress_at: now,
        }
    }

    pub fn robot_name(&self) -> &str {
        &self.robot_name
    }

    pub fn last_known_state(&self) -> Option<&RobotState> {
        self.last_known_state.as_ref()
    }

    /// Last graph waypoint the robot was known to be on
    pub fn last_known_waypoint(&self) -> Option<usize> {
        self.travel.last_known_waypoint
    }

    /// No completion callback is pending and no action is running
    pub fn is_idle(&self) -> bool {
        !self.travel.is_following()
            && self.dock_finished_callback.is_none()
            && self.action_execution.is_none()
    }

    fn clear_last_command(&mut self) {
        self.travel.clear_command();
        self.dock_finished_callback = None;
    }

    /// Command the robot to follow a new timed path
    pub fn follow_new_path(
        &mut self,
        waypoints: Vec<PlanWaypoint>,
        next_arrival_estimator: ArrivalEstimator,
        path_finished_callback: RequestCompleted,
        now: Instant,
    ) {
        self.clear_last_command();

        self.travel.target_plan_index = None;
        self.travel.waypoints = waypoints;
        self.travel.next_arrival_estimator = Some(next_arrival_estimator);
        self.travel.path_finished_callback = Some(path_finished_callback);
        self.interrupted = false;

        self.next_task_id += 1;
        let path: Vec<Location> = self
            .travel
            .waypoints
            .iter()
            .map(|wp| self.driver_location(wp))
            .collect();
        self.current_path_request.task_id = self.next_task_id.to_string();
        self.current_path_request.path = path;

        log::info!(
            "[{}] following a new path with {} waypoints (task {})",
            self.robot_name,
            self.travel.waypoints.len(),
            self.current_path_request.task_id
        );

        self.path_requested_at = Some(now);
        self.last_progress_at = now;
        if let Err(e) = self.publisher.publish_path_request(&self.current_path_request) {
            log::error!("[{}] failed to publish path request: {}", self.robot_name, e);
        }
    }

    /// Translate a plan waypoint into a driver-facing location
    ///
    /// The speed limit is the minimum over all approach lanes' limits; the
    /// level name is left blank when the waypoint is off the graph.
    fn driver_location(&self, wp: &PlanWaypoint) -> Location {
        let mut speed_limit: Option<f64> = None;
        for &lane in &wp.approach_lanes {
            if let Some(limit) = self.graph.lanes[lane].speed_limit {
                speed_limit = Some(match speed_limit {
                    Some(current) => current.min(limit),
                    None => limit,
                });
            }
        }

        Location {
            t: wp.time,
            x: wp.position[0],
            y: wp.position[1],
            yaw: wp.position[2],
            level_name: wp
                .graph_index
                .map(|i| self.graph.waypoints[i].map.clone())
                .unwrap_or_default(),
            approach_speed_limit: speed_limit,
        }
    }

    /// Command the robot to hold at its last known location
    ///
    /// Publishes a single-waypoint path and leaves the handle Idle; fails
    /// silently (with a warning) when no telemetry has ever arrived.
    pub fn stop(&mut self, now: Instant) {
        self.clear_last_command();
        self.travel.target_plan_index = None;

        let Some(state) = &self.last_known_state else {
            log::warn!(
                "Cannot ask [{}] to stop because we have never received a state from it",
                self.robot_name
            );
            return;
        };

        self.next_task_id += 1;
        self.current_path_request.task_id = self.next_task_id.to_string();
        self.current_path_request.path = vec![state.location.clone()];

        self.path_requested_at = Some(now);
        if let Err(e) = self.publisher.publish_path_request(&self.current_path_request) {
            log::error!("[{}] failed to publish stop request: {}", self.robot_name, e);
        }
    }

    /// Command the robot to perform the named docking maneuver
    pub fn dock(&mut self, dock_name: &str, finished_callback: RequestCompleted, now: Instant) {
        self.clear_last_command();

        let Some(dock_lane) = self.graph.find_dock_lane(dock_name) else {
            // The graph's dock inventory is logged at startup; a miss here
            // means the planner and the graph disagree about dock names.
            log::error!(
                "[{}] was asked to dock at [{}] but no lane in the graph docks there",
                self.robot_name,
                dock_name
            );
            debug_assert!(false, "unknown dock name {dock_name}");
            return;
        };
        let dock_target = self.graph.lanes[dock_lane].entry;
        self.dock_target_waypoint = Some(dock_target);

        self.dock_finished_callback = Some(finished_callback);
        self.next_task_id += 1;
        self.current_dock_request.task_id = self.next_task_id.to_string();
        self.current_dock_request.parameters[0].value = dock_name.to_string();

        log::info!(
            "[{}] docking into waypoint [{}]",
            self.robot_name,
            self.graph.waypoint_name(dock_target)
        );

        self.dock_requested_at = Some(now);
        self.last_progress_at = now;
        if let Err(e) = self.publisher.publish_mode_request(&self.current_dock_request) {
            log::error!("[{}] failed to publish dock request: {}", self.robot_name, e);
        }
    }

    /// Reconcile a fresh telemetry snapshot with the active command
    pub fn update_state(&mut self, state: RobotState, now: Instant) {
        let battery_soc = state.battery_percent / 100.0;
        if (0.0..=1.0).contains(&battery_soc) {
            self.travel.updater.update_battery_soc(battery_soc);
        } else {
            log::error!(
                "[{}] reported battery percentage [{}] outside the valid range [0, 100]; \
                 the state of charge will not be updated",
                state.name,
                state.battery_percent
            );
        }

        self.last_known_state = Some(state.clone());

        // Estimation refills this from the new snapshot as needed.
        self.travel.target_plan_index = None;

        if self.travel.is_following() {
            debug_assert!(self.dock_finished_callback.is_none());
            self.update_following(&state, now);
        } else if self.dock_finished_callback.is_some() {
            self.update_docking(&state, now);
        } else {
            // Not under our command: keep the schedule aware of where the
            // robot is, but do not issue anything.
            estimation::estimate_state(&self.robot_name, &state.location, &mut self.travel, &self.graph);
        }
    }

    fn update_following(&mut self, state: &RobotState, now: Instant) {
        if state.task_id != self.current_path_request.task_id {
            // The driver has not received our path request yet.
            self.resend_path_request(now);
            estimation::estimate_state(&self.robot_name, &state.location, &mut self.travel, &self.graph);
            return;
        }

        if state.mode == RobotMode::AdapterError {
            if self.interrupted {
                // This interruption was already noticed.
                return;
            }

            log::info!(
                "[{}] driver reported a need to replan",
                self.robot_name
            );
            self.interrupted = true;
            estimation::estimate_state(&self.robot_name, &state.location, &mut self.travel, &self.graph);
            self.travel.updater.replan();
            return;
        }

        if state.path.is_empty() {
            // An empty path means the driver believes it has arrived.
            self.check_path_finish(state, now);
            return;
        }

        estimation::estimate_path_traveling(
            &self.robot_name,
            state,
            &mut self.travel,
            &self.graph,
            &self.traits,
        );
        self.last_progress_at = now;
    }

    fn resend_path_request(&mut self, now: Instant) {
        let due = self
            .path_requested_at
            .map_or(true, |at| now.duration_since(at) >= self.timing.command_resend_interval());
        if due {
            self.path_requested_at = Some(now);
            log::debug!(
                "[{}] rebroadcasting path request (task {})",
                self.robot_name,
                self.current_path_request.task_id
            );
            if let Err(e) = self.publisher.publish_path_request(&self.current_path_request) {
                log::error!("[{}] failed to rebroadcast path request: {}", self.robot_name, e);
            }
        }
    }

    fn check_path_finish(&mut self, state: &RobotState, now: Instant) {
        if !estimation::is_path_finished(state, &self.travel) {
            log::warn!(
                "[{}] reports an empty path but has not reached its destination",
                self.robot_name
            );
            estimation::estimate_path_traveling(
                &self.robot_name,
                state,
                &mut self.travel,
                &self.graph,
                &self.traits,
            );
            self.last_progress_at = now;
            return;
        }

        let (checkpoints, graph_index) = match self.travel.waypoints.last() {
            Some(last) => (last.arrival_checkpoints.clone(), last.graph_index),
            None => (Vec::new(), None),
        };
        for checkpoint in checkpoints {
            self.travel.updater.mark_arrival(checkpoint);
        }
        match graph_index {
            Some(index) => {
                self.travel.last_known_waypoint = Some(index);
                self.travel.updater.update_position(
                    state.location.position(),
                    crate::planner::PositionHint::Waypoint(index),
                );
            }
            None => {
                estimation::estimate_state(
                    &self.robot_name,
                    &state.location,
                    &mut self.travel,
                    &self.graph,
                );
            }
        }

        log::info!("[{}] has reached the end of its path", self.robot_name);
        self.travel.next_arrival_estimator = None;
        self.last_progress_at = now;
        if let Some(callback) = self.travel.path_finished_callback.take() {
            callback();
        }
    }

    fn update_docking(&mut self, state: &RobotState, now: Instant) {
        if state.task_id != self.current_dock_request.task_id {
            let due = self
                .dock_requested_at
                .map_or(true, |at| now.duration_since(at) >= self.timing.command_resend_interval());
            if due {
                self.dock_requested_at = Some(now);
                log::debug!(
                    "[{}] rebroadcasting dock request (task {})",
                    self.robot_name,
                    self.current_dock_request.task_id
                );
                if let Err(e) = self.publisher.publish_mode_request(&self.current_dock_request) {
                    log::error!("[{}] failed to rebroadcast dock request: {}", self.robot_name, e);
                }
            }
            return;
        }

        if state.mode != RobotMode::Docking {
            // The robot has finished its docking maneuver.
            estimation::estimate_waypoint(&self.robot_name, &state.location, &mut self.travel, &self.graph);
            self.travel.last_known_waypoint = self.dock_target_waypoint;
            log::info!("[{}] has completed docking", self.robot_name);
            self.last_progress_at = now;
            if let Some(callback) = self.dock_finished_callback.take() {
                callback();
            }
            return;
        }

        // Still docking: publish the docking path into the shared schedule,
        // throttled so continuous telemetry does not spam the database.
        if state.path.is_empty() {
            return;
        }
        let due = self
            .dock_schedule_pushed_at
            .map_or(true, |at| {
                now.duration_since(at) >= self.timing.dock_schedule_push_interval()
            });
        if !due {
            return;
        }

        let mut positions = Vec::with_capacity(state.path.len() + 1);
        positions.push(state.location.position());
        for location in &state.path {
            positions.push(location.position());
        }

        let trajectory = self.traits.interpolate_positions(state.location.t, &positions);
        if trajectory.len() < 2 {
            return;
        }

        let participant = self.travel.updater.schedule_participant();
        let plan_id = participant.assign_plan_id();
        participant.set_itinerary(
            plan_id,
            vec![Route {
                map: state.location.level_name.clone(),
                trajectory,
            }],
        );
        self.dock_schedule_pushed_at = Some(now);
    }

    /// React to lanes that have just been closed
    ///
    /// When the robot is caught strictly between the endpoints of a closed
    /// approach lane it is repositioned onto the reverse lane if one
    /// exists, otherwise anchored at the closed lane's entry waypoint.
    /// Any closed lane in the remainder of the plan triggers a replan.
    pub fn newly_closed_lanes(&mut self, closed: &BTreeSet<usize>) {
        let mut need_to_replan = false;

        let active = self.travel.target_plan_index.and_then(|target| {
            self.travel
                .waypoints
                .get(target)
                .map(|wp| (target, wp.approach_lanes.clone()))
        });
        if let Some((target, approach_lanes)) = active {
            for lane_index in approach_lanes {
                if !closed.contains(&lane_index) {
                    continue;
                }
                need_to_replan = true;
                self.reposition_if_stranded(lane_index);
            }

            if !need_to_replan {
                'scan: for wp in &self.travel.waypoints[target..] {
                    for lane in &wp.approach_lanes {
                        if closed.contains(lane) {
                            need_to_replan = true;
                            break 'scan;
                        }
                    }
                }
            }
        }

        if need_to_replan {
            log::info!(
                "[{}] replanning because its path uses a newly closed lane",
                self.robot_name
            );
            self.travel.updater.replan();
        }
    }

    /// The robot may be on the closed lane right now; check and reposition
    fn reposition_if_stranded(&mut self, lane_index: usize) {
        let Some(state) = &self.last_known_state else {
            return;
        };
        let p = [state.location.x, state.location.y];

        let lane = &self.graph.lanes[lane_index];
        let p0 = self.graph.waypoints[lane.entry].position();
        let p1 = self.graph.waypoints[lane.exit].position();
        let d = [p1[0] - p0[0], p1[1] - p0[1]];

        let before_lane = (p[0] - p0[0]) * d[0] + (p[1] - p0[1]) * d[1] < 0.0;
        let after_lane = (p[0] - p1[0]) * d[0] + (p[1] - p1[1]) * d[1] >= 0.0;
        if before_lane || after_lane {
            return;
        }

        // Strictly between the endpoints: the robot needs to reverse out.
        let position = [p[0], p[1], state.location.yaw];
        match self.graph.reverse_lane(lane_index) {
            Some(reverse) => {
                log::info!(
                    "[{}] is on closed lane [{}]; repositioning onto its reverse lane [{}]",
                    self.robot_name,
                    lane_index,
                    reverse
                );
                self.travel
                    .updater
                    .update_position(position, crate::planner::PositionHint::Lanes(vec![reverse]));
            }
            None => {
                log::info!(
                    "[{}] is on closed lane [{}] with no reverse lane; anchoring at its entry",
                    self.robot_name,
                    lane_index
                );
                self.travel
                    .updater
                    .update_position(position, crate::planner::PositionHint::Target(lane.entry));
            }
        }
    }

    /// Two-message interruption protocol: INTERRUPT registers, RESUME
    /// releases; both are idempotent per interrupt id
    pub fn handle_interrupt_request(&mut self, request: &InterruptRequest) {
        match self.interruptions.entry(request.interrupt_id.clone()) {
            Entry::Vacant(entry) => {
                if request.r#type == InterruptType::Resume {
                    return;
                }

                let robot = self.robot_name.clone();
                let id = request.interrupt_id.clone();
                let handle = self.travel.updater.interrupt(
                    request.labels.clone(),
                    Box::new(move || {
                        log::info!("[{}] is interrupted for [{}]", robot, id);
                    }),
                );
                entry.insert(handle);
            }
            Entry::Occupied(entry) => {
                if request.r#type == InterruptType::Interrupt {
                    return;
                }

                log::info!(
                    "[{}] asked to resume for [{}]",
                    self.robot_name,
                    request.interrupt_id
                );
                entry.remove().resume(request.labels.clone());
            }
        }
    }

    /// Store the execution slot of a teleop action the planner started
    pub fn set_action_execution(&mut self, execution: ActionExecution) {
        log::debug!("[{}] began performing an action", self.robot_name);
        self.action_execution = Some(execution);
    }

    /// Notify the planner that the robot's current action is done
    pub fn complete_robot_action(&mut self) {
        let Some(execution) = self.action_execution.take() else {
            return;
        };
        execution.finished();
        log::info!(
            "[{}] has completed the action it was performing",
            self.robot_name
        );
    }

    pub fn enable_responsive_wait(&mut self, enabled: bool) {
        self.travel.updater.enable_responsive_wait(enabled);
    }

    /// Replan when a path command has made no observable progress
    ///
    /// Driven by the worker tick so it fires even when telemetry stops.
    pub fn check_stall(&mut self, now: Instant) {
        if !self.travel.is_following() {
            return;
        }
        if now.duration_since(self.last_progress_at) < self.timing.update_stall_timeout() {
            return;
        }

        log::warn!(
            "[{}] requesting replan because its command has been unresponsive",
            self.robot_name
        );
        self.last_progress_at = now;
        self.travel.updater.replan();
    }
}
