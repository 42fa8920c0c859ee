//! Vehicle kinematics: nominal motion limits and trajectory interpolation.
//!
//! The traits describe what the fleet's robots can do, not what any one
//! robot is currently doing. They feed two things: arrival-time estimates
//! for the planner, and the interpolated trajectories pushed into the
//! shared traffic schedule while a robot docks.

use serde::Deserialize;

/// Nominal kinematic limits shared by every robot in the fleet
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VehicleTraits {
    /// Nominal linear velocity (m/s)
    #[serde(default = "default_linear_velocity")]
    pub linear_velocity: f64,

    /// Nominal linear acceleration (m/s^2)
    #[serde(default = "default_linear_acceleration")]
    pub linear_acceleration: f64,

    /// Nominal angular velocity (rad/s)
    #[serde(default = "default_angular_velocity")]
    pub angular_velocity: f64,

    /// Nominal angular acceleration (rad/s^2)
    #[serde(default = "default_angular_acceleration")]
    pub angular_acceleration: f64,

    /// Physical footprint radius (m)
    #[serde(default = "default_footprint_radius")]
    pub footprint_radius: f64,

    /// Radius other traffic should keep clear of (m)
    #[serde(default = "default_vicinity_radius")]
    pub vicinity_radius: f64,
}

fn default_linear_velocity() -> f64 {
    0.7
}
fn default_linear_acceleration() -> f64 {
    0.3
}
fn default_angular_velocity() -> f64 {
    0.5
}
fn default_angular_acceleration() -> f64 {
    1.5
}
fn default_footprint_radius() -> f64 {
    0.5
}
fn default_vicinity_radius() -> f64 {
    1.5
}

impl Default for VehicleTraits {
    fn default() -> Self {
        Self {
            linear_velocity: default_linear_velocity(),
            linear_acceleration: default_linear_acceleration(),
            angular_velocity: default_angular_velocity(),
            angular_acceleration: default_angular_acceleration(),
            footprint_radius: default_footprint_radius(),
            vicinity_radius: default_vicinity_radius(),
        }
    }
}

/// One timed pose of an interpolated trajectory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    /// Seconds since the epoch
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

/// A trajectory pinned to one map, ready for the traffic schedule
#[derive(Debug, Clone)]
pub struct Route {
    pub map: String,
    pub trajectory: Vec<TrajectoryPoint>,
}

/// Positions closer than this are treated as the same point
const MIN_SEGMENT_LENGTH: f64 = 1e-4;

/// Yaw differences smaller than this need no rotation segment
const MIN_YAW_CHANGE: f64 = 1e-3;

impl VehicleTraits {
    /// Check that the nominal velocities are usable
    pub fn validate(&self) -> bool {
        self.linear_velocity > 0.0 && self.angular_velocity > 0.0
    }

    /// Interpolate a timed trajectory through a sequence of poses
    ///
    /// Each segment is timed as a turn-in-place at nominal angular velocity
    /// followed by a straight translation at nominal linear velocity.
    /// Near-duplicate positions are merged. The result can have fewer
    /// points than the input; callers should discard trajectories with
    /// fewer than 2 points rather than scheduling them.
    pub fn interpolate_positions(
        &self,
        start_time: f64,
        positions: &[[f64; 3]],
    ) -> Vec<TrajectoryPoint> {
        let mut trajectory: Vec<TrajectoryPoint> = Vec::with_capacity(positions.len());
        let mut t = start_time;

        for pose in positions {
            let Some(last) = trajectory.last().copied() else {
                trajectory.push(TrajectoryPoint {
                    t,
                    x: pose[0],
                    y: pose[1],
                    yaw: pose[2],
                });
                continue;
            };

            let dx = pose[0] - last.x;
            let dy = pose[1] - last.y;
            let translation = (dx * dx + dy * dy).sqrt();
            let rotation = wrap_angle(pose[2] - last.yaw).abs();

            if translation < MIN_SEGMENT_LENGTH && rotation < MIN_YAW_CHANGE {
                continue;
            }

            t += rotation / self.angular_velocity + translation / self.linear_velocity;
            trajectory.push(TrajectoryPoint {
                t,
                x: pose[0],
                y: pose[1],
                yaw: pose[2],
            });
        }

        trajectory
    }

    /// Rough time to move from `from` to `to`, turning first
    pub fn estimate_travel_time(&self, from: [f64; 3], to: [f64; 3]) -> f64 {
        let dx = to[0] - from[0];
        let dy = to[1] - from[1];
        let translation = (dx * dx + dy * dy).sqrt();
        let rotation = wrap_angle(to[2] - from[2]).abs();
        rotation / self.angular_velocity + translation / self.linear_velocity
    }
}

/// Normalize an angle to (-π, π]
pub fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % std::f64::consts::TAU;
    if a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    } else if a <= -std::f64::consts::PI {
        a += std::f64::consts::TAU;
    }
    a
}
