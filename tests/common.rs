//! Shared mocks and builders for the fleet adapter integration tests.
//!
//! The planner, updater, schedule participant, and command publisher are
//! all recording fakes: every call is appended to a shared log that the
//! tests inspect afterward.

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use marga_fleet::app::CommandPublisher;
use marga_fleet::config::FleetConfig;
use marga_fleet::fleet::{FleetCoordinator, FleetEvent};
use marga_fleet::graph::{GraphElement, Lane, LaneEvent, NavGraph, Waypoint};
use marga_fleet::messages::{
    ClosedLanes, FleetState, Location, ModeRequest, PathRequest, RobotMode, RobotState, SpeedLimit,
};
use marga_fleet::planner::{
    ActionExecutor, ArrivalCheckpoint, FleetPlanner, FleetPlannerConfig, InterruptionHandle,
    LiftWatchdog, LiftWatchdogService, PlanStart, PositionHint, RobotUpdater, ScheduleParticipant,
};
use marga_fleet::vehicle::Route;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Registration succeeds when the robot is within this range of a waypoint
const PLAN_START_RADIUS: f64 = 0.5;

// ============================================================================
// Recording logs
// ============================================================================

#[derive(Default)]
pub struct UpdaterLog {
    pub battery: Vec<f64>,
    pub positions: Vec<([f64; 3], PositionHint)>,
    pub replans: usize,
    pub interrupt_labels: Vec<Vec<String>>,
    pub resume_labels: Vec<Vec<String>>,
    pub arrivals: Vec<ArrivalCheckpoint>,
    pub responsive_wait: Vec<bool>,
    pub itineraries: Vec<(u64, Vec<Route>)>,
    pub has_action_executor: bool,
    pub has_lift_watchdog: bool,
}

impl UpdaterLog {
    pub fn last_hint(&self) -> Option<&PositionHint> {
        self.positions.last().map(|(_, hint)| hint)
    }
}

#[derive(Default)]
pub struct PlannerLog {
    pub configured: Option<FleetPlannerConfig>,
    pub plan_start_queries: usize,
    pub opened_lanes: Vec<Vec<usize>>,
    pub closed_lanes: Vec<Vec<usize>>,
    pub speed_limits: Vec<Vec<SpeedLimit>>,
    pub removed_limits: Vec<Vec<usize>>,
    pub updaters: HashMap<String, Arc<Mutex<UpdaterLog>>>,
}

#[derive(Default)]
pub struct PublisherLog {
    pub path_requests: Vec<PathRequest>,
    pub mode_requests: Vec<ModeRequest>,
    pub closed_lanes: Vec<ClosedLanes>,
}

// ============================================================================
// Mock updater + schedule participant
// ============================================================================

struct MockParticipant {
    log: Arc<Mutex<UpdaterLog>>,
    next_plan_id: u64,
}

impl ScheduleParticipant for MockParticipant {
    fn assign_plan_id(&mut self) -> u64 {
        let id = self.next_plan_id;
        self.next_plan_id += 1;
        id
    }

    fn set_itinerary(&mut self, plan_id: u64, routes: Vec<Route>) {
        self.log.lock().itineraries.push((plan_id, routes));
    }
}

struct MockInterruption {
    log: Arc<Mutex<UpdaterLog>>,
}

impl InterruptionHandle for MockInterruption {
    fn resume(self: Box<Self>, labels: Vec<String>) {
        self.log.lock().resume_labels.push(labels);
    }
}

struct MockUpdater {
    log: Arc<Mutex<UpdaterLog>>,
    participant: MockParticipant,
}

impl MockUpdater {
    fn new(log: Arc<Mutex<UpdaterLog>>) -> Self {
        let participant = MockParticipant {
            log: Arc::clone(&log),
            next_plan_id: 0,
        };
        Self { log, participant }
    }
}

impl RobotUpdater for MockUpdater {
    fn update_battery_soc(&mut self, soc: f64) {
        self.log.lock().battery.push(soc);
    }

    fn update_position(&mut self, position: [f64; 3], hint: PositionHint) {
        self.log.lock().positions.push((position, hint));
    }

    fn replan(&mut self) {
        self.log.lock().replans += 1;
    }

    fn interrupt(
        &mut self,
        labels: Vec<String>,
        on_interrupted: Box<dyn FnOnce() + Send>,
    ) -> Box<dyn InterruptionHandle> {
        self.log.lock().interrupt_labels.push(labels);
        // The mock interruption takes hold immediately.
        on_interrupted();
        Box::new(MockInterruption {
            log: Arc::clone(&self.log),
        })
    }

    fn enable_responsive_wait(&mut self, enabled: bool) {
        self.log.lock().responsive_wait.push(enabled);
    }

    fn set_action_executor(&mut self, _executor: ActionExecutor) {
        self.log.lock().has_action_executor = true;
    }

    fn set_lift_entry_watchdog(&mut self, _watchdog: LiftWatchdog) {
        self.log.lock().has_lift_watchdog = true;
    }

    fn mark_arrival(&mut self, checkpoint: ArrivalCheckpoint) {
        let mut log = self.log.lock();
        if !log.arrivals.contains(&checkpoint) {
            log.arrivals.push(checkpoint);
        }
    }

    fn schedule_participant(&mut self) -> &mut dyn ScheduleParticipant {
        &mut self.participant
    }
}

// ============================================================================
// Mock planner
// ============================================================================

pub struct MockPlanner {
    log: Arc<Mutex<PlannerLog>>,
}

impl MockPlanner {
    pub fn new(log: Arc<Mutex<PlannerLog>>) -> Self {
        Self { log }
    }
}

impl FleetPlanner for MockPlanner {
    fn configure(&mut self, config: FleetPlannerConfig) {
        self.log.lock().configured = Some(config);
    }

    fn compute_plan_starts(
        &self,
        graph: &NavGraph,
        map: &str,
        position: [f64; 3],
        time: f64,
    ) -> Vec<PlanStart> {
        self.log.lock().plan_start_queries += 1;

        match graph.nearest(map, [position[0], position[1]]) {
            Some(hit) if hit.distance <= PLAN_START_RADIUS => {
                let (waypoint, lane) = match hit.kind {
                    GraphElement::Waypoint => (hit.index, None),
                    GraphElement::Lane => (graph.lanes[hit.index].exit, Some(hit.index)),
                };
                vec![PlanStart {
                    waypoint,
                    orientation: position[2],
                    time,
                    location: Some([position[0], position[1]]),
                    lane,
                }]
            }
            _ => vec![],
        }
    }

    fn add_robot(&mut self, name: &str, _starts: Vec<PlanStart>) -> Box<dyn RobotUpdater> {
        let log = Arc::new(Mutex::new(UpdaterLog::default()));
        self.log
            .lock()
            .updaters
            .insert(name.to_string(), Arc::clone(&log));
        Box::new(MockUpdater::new(log))
    }

    fn open_lanes(&mut self, lanes: &[usize]) {
        self.log.lock().opened_lanes.push(lanes.to_vec());
    }

    fn close_lanes(&mut self, lanes: &[usize]) {
        self.log.lock().closed_lanes.push(lanes.to_vec());
    }

    fn limit_lane_speeds(&mut self, limits: &[SpeedLimit]) {
        self.log.lock().speed_limits.push(limits.to_vec());
    }

    fn remove_speed_limits(&mut self, lanes: &[usize]) {
        self.log.lock().removed_limits.push(lanes.to_vec());
    }
}

// ============================================================================
// Mock publisher
// ============================================================================

pub struct MockPublisher {
    log: Arc<Mutex<PublisherLog>>,
}

impl MockPublisher {
    pub fn new(log: Arc<Mutex<PublisherLog>>) -> Self {
        Self { log }
    }
}

impl CommandPublisher for MockPublisher {
    fn publish_path_request(&self, request: &PathRequest) -> marga_fleet::Result<()> {
        self.log.lock().path_requests.push(request.clone());
        Ok(())
    }

    fn publish_mode_request(&self, request: &ModeRequest) -> marga_fleet::Result<()> {
        self.log.lock().mode_requests.push(request.clone());
        Ok(())
    }

    fn publish_closed_lanes(&self, status: &ClosedLanes) -> marga_fleet::Result<()> {
        self.log.lock().closed_lanes.push(status.clone());
        Ok(())
    }
}

/// Lift clearance service answering every request with a fixed code
pub struct MockLiftService {
    pub decision: u32,
}

impl LiftWatchdogService for MockLiftService {
    fn request_clearance(&self, _robot_name: &str, _lift_name: &str) -> marga_fleet::Result<u32> {
        Ok(self.decision)
    }
}

// ============================================================================
// Graph builders
// ============================================================================

/// W0 (0,0) --L0--> W1 (10,0) --L1--> W2 (10,10), reverse lane L2: W1 -> W0,
/// dock lane L3: W2 -> W3 with dock event "charger_1". All on map "L1".
pub fn test_graph() -> NavGraph {
    let wp = |name: Option<&str>, x: f64, y: f64| Waypoint {
        name: name.map(|n| n.to_string()),
        map: "L1".to_string(),
        x,
        y,
    };

    NavGraph {
        waypoints: vec![
            wp(Some("W0"), 0.0, 0.0),
            wp(Some("W1"), 10.0, 0.0),
            wp(Some("W2"), 10.0, 10.0),
            wp(Some("charger"), 12.0, 10.0),
        ],
        lanes: vec![
            Lane {
                entry: 0,
                exit: 1,
                speed_limit: Some(1.5),
                event: None,
            },
            Lane {
                entry: 1,
                exit: 2,
                speed_limit: None,
                event: None,
            },
            Lane {
                entry: 1,
                exit: 0,
                speed_limit: None,
                event: None,
            },
            Lane {
                entry: 2,
                exit: 3,
                speed_limit: None,
                event: Some(LaneEvent::Dock {
                    name: "charger_1".to_string(),
                }),
            },
        ],
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub coordinator: FleetCoordinator,
    pub planner_log: Arc<Mutex<PlannerLog>>,
    pub publisher_log: Arc<Mutex<PublisherLog>>,
    pub events: Receiver<FleetEvent>,
    pub base: Instant,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_graph(test_graph())
    }

    pub fn with_graph(graph: NavGraph) -> Self {
        Self::build(graph, None)
    }

    pub fn with_lift_watchdog(decision: u32) -> Self {
        Self::build(test_graph(), Some(Arc::new(MockLiftService { decision })))
    }

    fn build(graph: NavGraph, lift: Option<Arc<MockLiftService>>) -> Self {
        env_logger::try_init().ok();

        let config: FleetConfig = toml::from_str(
            r#"
fleet_name = "tinyRobot"
nav_graph_file = "nav.yaml"
"#,
        )
        .unwrap();

        let planner_log = Arc::new(Mutex::new(PlannerLog::default()));
        let publisher_log = Arc::new(Mutex::new(PublisherLog::default()));
        let (tx, rx) = marga_fleet::app::event_channel();

        let coordinator = FleetCoordinator::new(
            config,
            Arc::new(graph),
            Box::new(MockPlanner::new(Arc::clone(&planner_log))),
            Arc::new(MockPublisher::new(Arc::clone(&publisher_log))),
            lift.map(|service| service as Arc<dyn LiftWatchdogService>),
            tx,
        );

        Self {
            coordinator,
            planner_log,
            publisher_log,
            events: rx,
            base: Instant::now(),
        }
    }

    /// Shared recording log of the named robot's updater
    pub fn updater(&self, robot: &str) -> Arc<Mutex<UpdaterLog>> {
        Arc::clone(
            self.planner_log
                .lock()
                .updaters
                .get(robot)
                .expect("robot not registered"),
        )
    }

    /// Feed one telemetry batch containing a single robot state
    pub fn telemetry(&mut self, state: RobotState, now: Instant) {
        self.coordinator.handle_event(
            FleetEvent::FleetState(FleetState {
                name: "tinyRobot".to_string(),
                robots: vec![state],
            }),
            now,
        );
    }
}

// ============================================================================
// State builders
// ============================================================================

pub fn location(x: f64, y: f64) -> Location {
    Location {
        t: 0.0,
        x,
        y,
        yaw: 0.0,
        level_name: "L1".to_string(),
        approach_speed_limit: None,
    }
}

pub fn robot_state(name: &str, task_id: &str, mode: RobotMode, x: f64, y: f64) -> RobotState {
    RobotState {
        name: name.to_string(),
        task_id: task_id.to_string(),
        mode,
        battery_percent: 50.0,
        location: location(x, y),
        path: vec![],
    }
}

pub fn plan_waypoint(
    x: f64,
    y: f64,
    graph_index: Option<usize>,
    approach_lanes: Vec<usize>,
) -> marga_fleet::travel::PlanWaypoint {
    marga_fleet::travel::PlanWaypoint {
        position: [x, y, 0.0],
        time: 0.0,
        graph_index,
        event: None,
        approach_lanes,
        arrival_checkpoints: vec![],
    }
}
