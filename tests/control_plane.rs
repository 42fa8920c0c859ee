//! Fleet-level control plane: lane closures, speed limits, interruptions,
//! and teleop action completion.

mod common;

use common::*;
use marga_fleet::fleet::FleetEvent;
use marga_fleet::messages::{
    InterruptRequest, InterruptType, LaneRequest, ModeRequest, RequestedMode, RobotMode,
    SpeedLimit, SpeedLimitRequest,
};
use marga_fleet::planner::{ActionExecution, PositionHint};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Register r1 and put it mid-journey on the lane toward the given target
fn traveling_fixture(x: f64, y: f64, residual: Vec<marga_fleet::messages::Location>) -> Fixture {
    let mut fx = Fixture::new();
    fx.telemetry(robot_state("r1", "", RobotMode::Idle, 0.0, 0.0), fx.base);

    fx.coordinator.robot_mut("r1").unwrap().follow_new_path(
        vec![
            plan_waypoint(0.0, 0.0, Some(0), vec![]),
            plan_waypoint(10.0, 0.0, Some(1), vec![0]),
            plan_waypoint(10.0, 10.0, Some(2), vec![1]),
        ],
        Box::new(|_, _| {}),
        Box::new(|| {}),
        fx.base,
    );

    let mut state = robot_state("r1", "1", RobotMode::Moving, x, y);
    state.path = residual;
    fx.telemetry(state, fx.base + Duration::from_millis(100));
    fx
}

fn lane_request(close: Vec<usize>, open: Vec<usize>) -> LaneRequest {
    LaneRequest {
        fleet_name: "tinyRobot".to_string(),
        close_lanes: close,
        open_lanes: open,
    }
}

#[test]
fn closing_a_lane_later_in_the_plan_triggers_replan() {
    // Robot on lane 0 heading to W1; lane 1 is needed later for W2.
    let mut fx = traveling_fixture(5.0, 0.0, vec![location(10.0, 0.0), location(10.0, 10.0)]);
    let updater = fx.updater("r1");
    let positions_before = updater.lock().positions.len();

    fx.coordinator
        .handle_event(FleetEvent::LaneClosure(lane_request(vec![1], vec![])), fx.base);

    let log = updater.lock();
    assert_eq!(log.replans, 1);
    // The robot is not on the closed lane, so it was not repositioned.
    assert_eq!(log.positions.len(), positions_before);
}

#[test]
fn robot_stranded_on_closed_lane_reverses_out() {
    // Robot halfway along lane 0 (W0 -> W1), which has reverse lane 2.
    let mut fx = traveling_fixture(5.0, 0.0, vec![location(10.0, 0.0), location(10.0, 10.0)]);
    let updater = fx.updater("r1");

    fx.coordinator
        .handle_event(FleetEvent::LaneClosure(lane_request(vec![0], vec![])), fx.base);

    let log = updater.lock();
    assert_eq!(log.replans, 1);
    let (position, hint) = log.positions.last().unwrap();
    assert_eq!(*hint, PositionHint::Lanes(vec![2]));
    assert_eq!(position[0], 5.0);
    assert_eq!(position[1], 0.0);
}

#[test]
fn stranded_robot_without_reverse_lane_anchors_at_entry() {
    // Robot halfway along lane 1 (W1 -> W2), which has no reverse lane.
    let mut fx = traveling_fixture(10.0, 5.0, vec![location(10.0, 10.0)]);
    let updater = fx.updater("r1");

    fx.coordinator
        .handle_event(FleetEvent::LaneClosure(lane_request(vec![1], vec![])), fx.base);

    let log = updater.lock();
    assert_eq!(log.replans, 1);
    let (_, hint) = log.positions.last().unwrap();
    // Exactly one of reverse-lane / entry-anchor, never both: the entry
    // waypoint of lane 1 is W1.
    assert_eq!(*hint, PositionHint::Target(1));
    assert!(!log
        .positions
        .iter()
        .any(|(_, h)| matches!(h, PositionHint::Lanes(lanes) if lanes == &vec![2usize])));
}

#[test]
fn idle_robot_ignores_lane_closures() {
    let mut fx = Fixture::new();
    fx.telemetry(robot_state("r1", "", RobotMode::Idle, 0.0, 0.0), fx.base);
    let updater = fx.updater("r1");

    fx.coordinator
        .handle_event(FleetEvent::LaneClosure(lane_request(vec![0, 1], vec![])), fx.base);

    assert_eq!(updater.lock().replans, 0);
}

#[test]
fn closed_lane_set_is_maintained_and_broadcast() {
    let mut fx = Fixture::new();

    fx.coordinator
        .handle_event(FleetEvent::LaneClosure(lane_request(vec![0, 1], vec![])), fx.base);
    fx.coordinator
        .handle_event(FleetEvent::LaneClosure(lane_request(vec![1, 2], vec![0])), fx.base);

    assert_eq!(
        fx.coordinator.closed_lanes().iter().copied().collect::<Vec<_>>(),
        vec![1, 2]
    );

    let log = fx.publisher_log.lock();
    assert_eq!(log.closed_lanes.len(), 2);
    assert_eq!(log.closed_lanes[0].closed_lanes, vec![0, 1]);
    assert_eq!(log.closed_lanes[1].closed_lanes, vec![1, 2]);

    // Open/close lists were forwarded to the planner as-is.
    let planner = fx.planner_log.lock();
    assert_eq!(planner.closed_lanes, vec![vec![0, 1], vec![1, 2]]);
    assert_eq!(planner.opened_lanes, vec![vec![], vec![0]]);
}

#[test]
fn lane_requests_for_other_fleets_are_ignored() {
    let mut fx = Fixture::new();

    let mut request = lane_request(vec![0], vec![]);
    request.fleet_name = "otherFleet".to_string();
    fx.coordinator
        .handle_event(FleetEvent::LaneClosure(request), fx.base);

    assert!(fx.coordinator.closed_lanes().is_empty());
    assert!(fx.publisher_log.lock().closed_lanes.is_empty());
}

#[test]
fn speed_limits_are_forwarded_to_the_planner() {
    let mut fx = Fixture::new();

    fx.coordinator.handle_event(
        FleetEvent::SpeedLimit(SpeedLimitRequest {
            fleet_name: "tinyRobot".to_string(),
            speed_limits: vec![SpeedLimit {
                lane_index: 0,
                speed_limit: 0.5,
            }],
            remove_limits: vec![3],
        }),
        fx.base,
    );

    let planner = fx.planner_log.lock();
    assert_eq!(planner.speed_limits.len(), 1);
    assert_eq!(planner.speed_limits[0][0].lane_index, 0);
    assert_eq!(planner.removed_limits, vec![vec![3]]);
}

fn interrupt(id: &str, r#type: InterruptType, labels: Vec<&str>) -> InterruptRequest {
    InterruptRequest {
        fleet_name: "tinyRobot".to_string(),
        robot_name: "r1".to_string(),
        interrupt_id: id.to_string(),
        r#type,
        labels: labels.into_iter().map(|l| l.to_string()).collect(),
    }
}

#[test]
fn interrupt_protocol_is_idempotent() {
    let mut fx = Fixture::new();
    fx.telemetry(robot_state("r1", "", RobotMode::Idle, 0.0, 0.0), fx.base);
    let updater = fx.updater("r1");

    // INTERRUPT for an unknown id registers it.
    fx.coordinator.handle_event(
        FleetEvent::Interrupt(interrupt("x", InterruptType::Interrupt, vec!["a"])),
        fx.base,
    );
    assert_eq!(updater.lock().interrupt_labels, vec![vec!["a"]]);

    // Duplicate INTERRUPT is a no-op.
    fx.coordinator.handle_event(
        FleetEvent::Interrupt(interrupt("x", InterruptType::Interrupt, vec!["a"])),
        fx.base,
    );
    assert_eq!(updater.lock().interrupt_labels.len(), 1);

    // RESUME for an unknown id is a no-op.
    fx.coordinator.handle_event(
        FleetEvent::Interrupt(interrupt("y", InterruptType::Resume, vec![])),
        fx.base,
    );
    assert!(updater.lock().resume_labels.is_empty());

    // RESUME for the known id releases it with the resume labels.
    fx.coordinator.handle_event(
        FleetEvent::Interrupt(interrupt("x", InterruptType::Resume, vec!["b"])),
        fx.base,
    );
    assert_eq!(updater.lock().resume_labels, vec![vec!["b"]]);

    // The entry was removed, so the id can be registered again.
    fx.coordinator.handle_event(
        FleetEvent::Interrupt(interrupt("x", InterruptType::Interrupt, vec!["c"])),
        fx.base,
    );
    assert_eq!(updater.lock().interrupt_labels.len(), 2);
}

#[test]
fn teleop_action_completes_on_idle_notice() {
    let mut fx = Fixture::new();
    fx.telemetry(robot_state("r1", "", RobotMode::Idle, 0.0, 0.0), fx.base);

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completed);
    fx.coordinator.handle_event(
        FleetEvent::ActionExecution {
            robot: "r1".to_string(),
            execution: ActionExecution::new(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        },
        fx.base,
    );

    let notice = |mode| ModeRequest {
        fleet_name: "tinyRobot".to_string(),
        robot_name: "r1".to_string(),
        task_id: String::new(),
        mode,
        parameters: vec![],
    };

    // A non-idle notice does not end the action.
    fx.coordinator
        .handle_event(FleetEvent::ActionNotice(notice(RequestedMode::Moving)), fx.base);
    assert_eq!(completed.load(Ordering::SeqCst), 0);

    fx.coordinator
        .handle_event(FleetEvent::ActionNotice(notice(RequestedMode::Idle)), fx.base);
    assert_eq!(completed.load(Ordering::SeqCst), 1);

    // The slot was cleared: another idle notice is a no-op.
    fx.coordinator
        .handle_event(FleetEvent::ActionNotice(notice(RequestedMode::Idle)), fx.base);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn responsive_wait_updates_fan_out_to_all_robots() {
    let mut fx = Fixture::new();
    fx.telemetry(robot_state("r1", "", RobotMode::Idle, 0.0, 0.0), fx.base);
    fx.telemetry(robot_state("r2", "", RobotMode::Idle, 10.0, 0.0), fx.base);

    fx.coordinator
        .handle_event(FleetEvent::SetResponsiveWait(false), fx.base);

    for robot in ["r1", "r2"] {
        let updater = fx.updater(robot);
        assert_eq!(updater.lock().responsive_wait, vec![true, false]);
    }
}
