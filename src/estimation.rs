//! Estimation procedures for reconciling driver telemetry with the plan.
//!
//! These are stateless with respect to everything except the
//! [`TravelState`] they are handed: each takes a fresh telemetry snapshot,
//! updates the estimated graph position through the robot's updater, and
//! advances the plan bookkeeping. The command handle decides *which*
//! procedure applies; these decide *what the telemetry means*.

use crate::graph::{distance, GraphElement, NavGraph};
use crate::messages::{Location, RobotState};
use crate::travel::TravelState;
use crate::vehicle::VehicleTraits;
use std::time::Duration;

/// A robot closer than this to a graph waypoint is considered on it
pub const WAYPOINT_SNAP_RADIUS: f64 = 0.25;

/// Position tolerance for declaring the final plan waypoint reached
pub const ARRIVAL_TOLERANCE: f64 = 0.1;

/// Index of the waypoint nearest to `p` on the named map, if any
fn nearest_waypoint(graph: &NavGraph, map: &str, p: [f64; 2]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, wp) in graph.waypoints.iter().enumerate() {
        if wp.map != map {
            continue;
        }
        let dist = distance(p, wp.position());
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((i, dist));
        }
    }
    best
}

/// Estimate the position of a robot that is not following a plan
///
/// Projects the reported pose onto the graph so the schedule keeps
/// reflecting the robot's whereabouts even while it is idle, teleoperated,
/// or waiting for a command acknowledgement.
pub fn estimate_state(robot: &str, location: &Location, travel: &mut TravelState, graph: &NavGraph) {
    let position = location.position();
    let p = [location.x, location.y];

    // A waypoint within the snap radius wins over a lane projection even
    // when the lane passes directly under the robot.
    if let Some((index, dist)) = nearest_waypoint(graph, &location.level_name, p) {
        if dist <= WAYPOINT_SNAP_RADIUS {
            travel.last_known_waypoint = Some(index);
            travel
                .updater
                .update_position(position, crate::planner::PositionHint::Waypoint(index));
            return;
        }
    }

    match graph.nearest(&location.level_name, p) {
        Some(hit) if hit.kind == GraphElement::Lane && hit.distance <= WAYPOINT_SNAP_RADIUS => {
            travel
                .updater
                .update_position(position, crate::planner::PositionHint::Lanes(vec![hit.index]));
        }
        _ => match travel.last_known_waypoint {
            Some(wp) => {
                travel
                    .updater
                    .update_position(position, crate::planner::PositionHint::Target(wp));
            }
            None => {
                log::warn!(
                    "[{}] cannot be placed on the graph; reporting an off-grid pose on [{}]",
                    robot,
                    location.level_name
                );
                travel.updater.update_position(
                    position,
                    crate::planner::PositionHint::OffGrid {
                        map: location.level_name.clone(),
                    },
                );
            }
        },
    }
}

/// Single-shot estimate snapping the robot to its nearest graph waypoint
///
/// Used when a maneuver is known to end on a waypoint, e.g. right after a
/// docking sequence completes.
pub fn estimate_waypoint(
    robot: &str,
    location: &Location,
    travel: &mut TravelState,
    graph: &NavGraph,
) {
    let position = location.position();
    let p = [location.x, location.y];

    match nearest_waypoint(graph, &location.level_name, p) {
        Some((index, dist)) if dist <= WAYPOINT_SNAP_RADIUS => {
            travel.last_known_waypoint = Some(index);
            travel
                .updater
                .update_position(position, crate::planner::PositionHint::Waypoint(index));
        }
        Some((index, dist)) => {
            log::debug!(
                "[{}] finished its maneuver {:.2}m away from waypoint [{}]",
                robot,
                dist,
                graph.waypoint_name(index)
            );
            travel
                .updater
                .update_position(position, crate::planner::PositionHint::Target(index));
        }
        None => {
            log::warn!(
                "[{}] finished its maneuver on unknown map [{}]",
                robot,
                location.level_name
            );
            travel.updater.update_position(
                position,
                crate::planner::PositionHint::OffGrid {
                    map: location.level_name.clone(),
                },
            );
        }
    }
}

/// Advance the plan index for a robot that is actively following its path
///
/// The driver reports the residual path it has not yet reached, which
/// pins the next expected plan waypoint. Checkpoints of waypoints already
/// passed are (re-)marked — the updater treats that as idempotent. Ends by
/// reporting the remaining-time estimate through the arrival estimator.
pub fn estimate_path_traveling(
    robot: &str,
    state: &RobotState,
    travel: &mut TravelState,
    graph: &NavGraph,
    traits: &VehicleTraits,
) {
    let n = travel.waypoints.len();
    if n == 0 {
        estimate_state(robot, &state.location, travel, graph);
        return;
    }

    let remaining = state.path.len();
    let target = n.saturating_sub(remaining).min(n - 1);
    travel.target_plan_index = Some(target);

    for i in 0..target {
        let checkpoints = travel.waypoints[i].arrival_checkpoints.clone();
        for checkpoint in checkpoints {
            travel.updater.mark_arrival(checkpoint);
        }
    }

    let position = state.location.position();
    let p = [position[0], position[1]];

    // Relate the pose to the graph: co-located with a plan waypoint beats
    // being on the approach lanes, which beats a bare target anchor.
    let co_located = co_located_graph_waypoint(travel, graph, target, p);
    if let Some(index) = co_located {
        travel.last_known_waypoint = Some(index);
        travel
            .updater
            .update_position(position, crate::planner::PositionHint::Waypoint(index));
    } else {
        let target_wp = &travel.waypoints[target];
        if !target_wp.approach_lanes.is_empty() {
            let lanes = target_wp.approach_lanes.clone();
            travel
                .updater
                .update_position(position, crate::planner::PositionHint::Lanes(lanes));
        } else if let Some(anchor) = target_wp.graph_index.or(travel.last_known_waypoint) {
            travel
                .updater
                .update_position(position, crate::planner::PositionHint::Target(anchor));
        } else {
            travel.updater.update_position(
                position,
                crate::planner::PositionHint::OffGrid {
                    map: state.location.level_name.clone(),
                },
            );
        }
    }

    let eta = remaining_time_estimate(travel, traits, position, target);
    if let Some(estimator) = travel.next_arrival_estimator.as_mut() {
        estimator(target, eta);
    }
}

/// Graph waypoint the robot currently sits on, searched around the target
fn co_located_graph_waypoint(
    travel: &TravelState,
    graph: &NavGraph,
    target: usize,
    p: [f64; 2],
) -> Option<usize> {
    let candidates = [
        travel.waypoints[target].graph_index,
        target
            .checked_sub(1)
            .and_then(|i| travel.waypoints[i].graph_index),
    ];
    for index in candidates.into_iter().flatten() {
        if distance(p, graph.waypoints[index].position()) <= WAYPOINT_SNAP_RADIUS {
            return Some(index);
        }
    }
    None
}

/// Time to finish the rest of the plan at nominal speeds
fn remaining_time_estimate(
    travel: &TravelState,
    traits: &VehicleTraits,
    position: [f64; 3],
    target: usize,
) -> Duration {
    let mut total = traits.estimate_travel_time(position, travel.waypoints[target].position);
    for pair in travel.waypoints[target..].windows(2) {
        total += traits.estimate_travel_time(pair[0].position, pair[1].position);
    }
    Duration::from_secs_f64(total.max(0.0))
}

/// Whether the reported pose is close enough to the final plan waypoint
/// to count the path as finished
pub fn is_path_finished(state: &RobotState, travel: &TravelState) -> bool {
    let Some(last) = travel.waypoints.last() else {
        return true;
    };
    let p = [state.location.x, state.location.y];
    distance(p, [last.position[0], last.position[1]]) <= ARRIVAL_TOLERANCE
}
