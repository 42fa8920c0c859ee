//! Configuration loading for the fleet adapter

use crate::error::{Error, Result};
use crate::vehicle::VehicleTraits;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// What the task planner should do with a robot that has no work left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishingRequest {
    Charge,
    Park,
    Nothing,
}

/// Main configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct FleetConfig {
    /// Name of the fleet this adapter commands (required)
    pub fleet_name: String,

    /// Path to the navigation graph YAML file (required)
    pub nav_graph_file: String,

    /// Whether idle robots periodically replan to yield to others
    #[serde(default = "default_true")]
    pub enable_responsive_wait: bool,

    /// Optional API server URI forwarded to the planner
    #[serde(default)]
    pub server_uri: Option<String>,

    /// Optional lift clearance service name; empty disables the watchdog
    #[serde(default)]
    pub experimental_lift_watchdog_service: Option<String>,

    /// One of "charge", "park", "nothing"; unknown values fall back to
    /// "nothing" with a warning
    #[serde(default = "default_finishing_request")]
    pub finishing_request: String,

    #[serde(default)]
    pub perform_loop: bool,

    #[serde(default)]
    pub perform_deliveries: bool,

    #[serde(default)]
    pub perform_cleaning: bool,

    /// Maximum schedule delay tolerated before the planner intervenes
    #[serde(default = "default_delay_threshold")]
    pub delay_threshold_secs: f64,

    #[serde(default)]
    pub disable_delay_threshold: bool,

    #[serde(default)]
    pub vehicle: VehicleTraits,

    #[serde(default)]
    pub battery: BatteryConfig,

    #[serde(default)]
    pub mechanical: MechanicalConfig,

    #[serde(default)]
    pub power: PowerConfig,

    #[serde(default)]
    pub timing: TimingConfig,
}

/// Battery system parameters for task planning
#[derive(Clone, Debug, Deserialize)]
pub struct BatteryConfig {
    #[serde(default = "default_battery_voltage")]
    pub voltage: f64,

    /// Capacity in ampere-hours
    #[serde(default = "default_battery_capacity")]
    pub capacity: f64,

    #[serde(default = "default_charging_current")]
    pub charging_current: f64,

    /// Whether task planning should model battery drain at all
    #[serde(default)]
    pub drain_battery: bool,

    /// State of charge below which the robot must recharge
    #[serde(default = "default_recharge_threshold")]
    pub recharge_threshold: f64,

    /// State of charge a recharge aims for
    #[serde(default = "default_recharge_soc")]
    pub recharge_soc: f64,
}

/// Mechanical parameters feeding the motion power sink
#[derive(Clone, Debug, Deserialize)]
pub struct MechanicalConfig {
    #[serde(default = "default_mass")]
    pub mass: f64,

    #[serde(default = "default_moment_of_inertia")]
    pub moment_of_inertia: f64,

    #[serde(default = "default_friction_coefficient")]
    pub friction_coefficient: f64,
}

/// Constant power drains for the ambient and tool sinks
#[derive(Clone, Debug, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_ambient_drain")]
    pub ambient_drain_watts: f64,

    #[serde(default = "default_tool_drain")]
    pub tool_drain_watts: f64,
}

/// Timers and thresholds of the reconciliation loop
#[derive(Clone, Debug, Deserialize)]
pub struct TimingConfig {
    /// Rebroadcast interval while the driver has not echoed our task-id
    #[serde(default = "default_command_resend_ms")]
    pub command_resend_ms: u64,

    /// Minimum gap between schedule pushes during a docking maneuver
    #[serde(default = "default_dock_schedule_push_ms")]
    pub dock_schedule_push_ms: u64,

    /// Replan when a path command makes no progress for this long
    #[serde(default = "default_update_stall_timeout_secs")]
    pub update_stall_timeout_secs: u64,
}

impl TimingConfig {
    pub fn command_resend_interval(&self) -> Duration {
        Duration::from_millis(self.command_resend_ms)
    }

    pub fn dock_schedule_push_interval(&self) -> Duration {
        Duration::from_millis(self.dock_schedule_push_ms)
    }

    pub fn update_stall_timeout(&self) -> Duration {
        Duration::from_secs(self.update_stall_timeout_secs)
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_finishing_request() -> String {
    "nothing".to_string()
}
fn default_delay_threshold() -> f64 {
    10.0
}
fn default_battery_voltage() -> f64 {
    24.0
}
fn default_battery_capacity() -> f64 {
    40.0
}
fn default_charging_current() -> f64 {
    8.8
}
fn default_recharge_threshold() -> f64 {
    0.2
}
fn default_recharge_soc() -> f64 {
    1.0
}
fn default_mass() -> f64 {
    70.0
}
fn default_moment_of_inertia() -> f64 {
    40.0
}
fn default_friction_coefficient() -> f64 {
    0.22
}
fn default_ambient_drain() -> f64 {
    20.0
}
fn default_tool_drain() -> f64 {
    10.0
}
fn default_command_resend_ms() -> u64 {
    200
}
fn default_dock_schedule_push_ms() -> u64 {
    1000
}
fn default_update_stall_timeout_secs() -> u64 {
    10
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            voltage: default_battery_voltage(),
            capacity: default_battery_capacity(),
            charging_current: default_charging_current(),
            drain_battery: false,
            recharge_threshold: default_recharge_threshold(),
            recharge_soc: default_recharge_soc(),
        }
    }
}

impl Default for MechanicalConfig {
    fn default() -> Self {
        Self {
            mass: default_mass(),
            moment_of_inertia: default_moment_of_inertia(),
            friction_coefficient: default_friction_coefficient(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            ambient_drain_watts: default_ambient_drain(),
            tool_drain_watts: default_tool_drain(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            command_resend_ms: default_command_resend_ms(),
            dock_schedule_push_ms: default_dock_schedule_push_ms(),
            update_stall_timeout_secs: default_update_stall_timeout_secs(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required values beyond what deserialization enforces
    pub fn validate(&self) -> Result<()> {
        if self.fleet_name.is_empty() {
            return Err(Error::Config("fleet_name must not be empty".to_string()));
        }
        if self.nav_graph_file.is_empty() {
            return Err(Error::Config("nav_graph_file must not be empty".to_string()));
        }
        if !self.vehicle.validate() {
            return Err(Error::Config(
                "vehicle velocities must be positive".to_string(),
            ));
        }
        if self.battery.voltage <= 0.0 || self.battery.capacity <= 0.0 {
            return Err(Error::Config(
                "battery voltage and capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed finishing request, warning once on an unknown value
    pub fn finishing_request(&self) -> FinishingRequest {
        match self.finishing_request.as_str() {
            "charge" => FinishingRequest::Charge,
            "park" => FinishingRequest::Park,
            "nothing" => FinishingRequest::Nothing,
            other => {
                log::warn!(
                    "Fleet: finishing request [{}] is unsupported; valid values are \
                     [charge, park, nothing]. Defaulting to [nothing].",
                    other
                );
                FinishingRequest::Nothing
            }
        }
    }

    /// Delay threshold the planner should tolerate, if enabled
    pub fn delay_threshold(&self) -> Option<Duration> {
        if self.disable_delay_threshold {
            None
        } else {
            Some(Duration::from_secs_f64(self.delay_threshold_secs))
        }
    }
}
