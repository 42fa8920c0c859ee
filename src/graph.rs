//! Navigation graph: waypoints, directed lanes, and geometry utilities.
//!
//! The graph is built once from a YAML file at startup and shared immutably
//! afterward. Lanes are directed; a bidirectional passage is two lanes. A
//! lane may carry an entry event (docking, doors, lifts, waiting) and an
//! optional speed limit.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

/// A named position on one map
#[derive(Debug, Clone, Deserialize)]
pub struct Waypoint {
    #[serde(default)]
    pub name: Option<String>,
    pub map: String,
    pub x: f64,
    pub y: f64,
}

impl Waypoint {
    pub fn position(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// Event triggered when a robot enters a lane
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaneEvent {
    Dock { name: String },
    DoorOpen,
    DoorClose,
    LiftSessionBegin,
    LiftMove,
    LiftDoorOpen,
    LiftSessionEnd,
    Wait,
}

/// A directed lane between two waypoints
#[derive(Debug, Clone, Deserialize)]
pub struct Lane {
    /// Index of the waypoint this lane starts from
    pub entry: usize,
    /// Index of the waypoint this lane ends at
    pub exit: usize,
    #[serde(default)]
    pub speed_limit: Option<f64>,
    #[serde(default)]
    pub event: Option<LaneEvent>,
}

/// The navigation graph shared by every robot in the fleet
#[derive(Debug, Clone, Deserialize)]
pub struct NavGraph {
    pub waypoints: Vec<Waypoint>,
    pub lanes: Vec<Lane>,
}

/// Which kind of graph element a distance query matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphElement {
    Waypoint,
    Lane,
}

/// Result of projecting a location onto the graph
///
/// Used purely for diagnostics when a robot cannot be placed on the graph.
#[derive(Debug, Clone, Copy)]
pub struct DistanceFromGraph {
    pub kind: GraphElement,
    pub index: usize,
    pub distance: f64,
}

/// Lanes shorter than this are degenerate and skipped by projections
const MIN_LANE_LENGTH: f64 = 1e-8;

impl NavGraph {
    /// Load and validate a graph from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Graph(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a graph from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let graph: NavGraph = serde_yaml::from_str(text)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Check that every lane references existing waypoints
    pub fn validate(&self) -> Result<()> {
        for (i, lane) in self.lanes.iter().enumerate() {
            for wp in [lane.entry, lane.exit] {
                if wp >= self.waypoints.len() {
                    return Err(Error::Graph(format!(
                        "lane {} references waypoint {} but the graph only has {} waypoints",
                        i,
                        wp,
                        self.waypoints.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Human-readable name for a waypoint, falling back to its index
    pub fn waypoint_name(&self, index: usize) -> String {
        match self.waypoints[index].name.as_deref() {
            Some(name) => name.to_string(),
            None => format!("#{}", index),
        }
    }

    /// All dock names that appear as lane entry events
    pub fn dock_names(&self) -> BTreeSet<&str> {
        self.lanes
            .iter()
            .filter_map(|lane| match &lane.event {
                Some(LaneEvent::Dock { name }) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Log the named waypoints and dock inventory of this graph
    ///
    /// Run once at startup so that configuration mistakes (a task naming a
    /// dock the graph does not have) surface before any robot is commanded.
    pub fn log_inventory(&self) {
        let named: Vec<&str> = self
            .waypoints
            .iter()
            .filter_map(|wp| wp.name.as_deref())
            .collect();
        log::info!(
            "Graph: {} waypoints ({} named), {} lanes",
            self.waypoints.len(),
            named.len(),
            self.lanes.len()
        );
        for name in named {
            log::info!("Graph: named waypoint [{}]", name);
        }
        for dock in self.dock_names() {
            log::info!("Graph: dock [{}]", dock);
        }
    }

    /// Nearest graph element to a location on the named map
    ///
    /// Waypoints are considered before lanes; a lane is only admitted where
    /// the perpendicular foot of the point falls between its endpoints.
    /// Returns `None` when no waypoint or lane touches the map.
    pub fn nearest(&self, map: &str, p: [f64; 2]) -> Option<DistanceFromGraph> {
        let mut output: Option<DistanceFromGraph> = None;

        for (i, wp) in self.waypoints.iter().enumerate() {
            if wp.map != map {
                continue;
            }
            let dist = distance(p, wp.position());
            if output.map_or(true, |best| dist < best.distance) {
                output = Some(DistanceFromGraph {
                    kind: GraphElement::Waypoint,
                    index: i,
                    distance: dist,
                });
            }
        }

        for (i, lane) in self.lanes.iter().enumerate() {
            let wp0 = &self.waypoints[lane.entry];
            let wp1 = &self.waypoints[lane.exit];
            if wp0.map != map && wp1.map != map {
                continue;
            }

            let p0 = wp0.position();
            let p1 = wp1.position();
            let dp = [p[0] - p0[0], p[1] - p0[1]];
            let dp1 = [p1[0] - p0[0], p1[1] - p0[1]];

            let lane_length = (dp1[0] * dp1[0] + dp1[1] * dp1[1]).sqrt();
            if lane_length < MIN_LANE_LENGTH {
                continue;
            }

            let u = (dp[0] * dp1[0] + dp[1] * dp1[1]) / lane_length;
            if u < 0.0 || lane_length < u {
                continue;
            }

            let rx = dp[0] - u * dp1[0] / lane_length;
            let ry = dp[1] - u * dp1[1] / lane_length;
            let dist = (rx * rx + ry * ry).sqrt();
            if output.map_or(true, |best| dist < best.distance) {
                output = Some(DistanceFromGraph {
                    kind: GraphElement::Lane,
                    index: i,
                    distance: dist,
                });
            }
        }

        output
    }

    /// Lane whose entry event docks at `dock_name`, if any
    ///
    /// First match wins; dock names are expected to be unique per graph.
    pub fn find_dock_lane(&self, dock_name: &str) -> Option<usize> {
        self.lanes.iter().position(|lane| {
            matches!(&lane.event, Some(LaneEvent::Dock { name }) if name == dock_name)
        })
    }

    /// The lane going from `from_wp` to `to_wp`, if one exists
    pub fn lane_between(&self, from_wp: usize, to_wp: usize) -> Option<usize> {
        self.lanes
            .iter()
            .position(|lane| lane.entry == from_wp && lane.exit == to_wp)
    }

    /// Lane that traverses the given lane's span in the opposite direction
    ///
    /// Used to reposition a robot trapped on a closed lane.
    pub fn reverse_lane(&self, lane_index: usize) -> Option<usize> {
        let lane = &self.lanes[lane_index];
        self.lane_between(lane.exit, lane.entry)
    }
}

/// Euclidean distance between two points
pub fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}
