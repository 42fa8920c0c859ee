//! MargaFleet - Full-control fleet adapter core
//!
//! The command and state-reconciliation engine that sits between a
//! traffic-aware planner (which emits timed waypoint paths) and a fleet
//! driver (which reports telemetry and executes navigation and docking
//! commands). For each robot the core drives the robot along planned
//! paths, detects divergence, requests replans, tracks docking, publishes
//! the intended trajectory into the shared traffic schedule, and reacts to
//! lane closures and interruptions.
//!
//! ## Architecture
//!
//! One worker thread per fleet serializes every event:
//!
//! - **Telemetry** is routed to the matching [`handle::RobotCommandHandle`],
//!   which resends unacknowledged commands, runs the estimation procedures
//!   in [`estimation`], and fires completion callbacks into the planner.
//! - **Control-plane events** (lane closures, speed limits, interruptions,
//!   action notices) fan out through the [`fleet::FleetCoordinator`].
//! - **Planner callbacks** re-enter through the same event channel, so no
//!   per-robot locking is needed.
//!
//! The planner, schedule, and transport are reached only through the
//! interfaces in [`planner`] and [`app`].

pub mod app;
pub mod config;
pub mod error;
pub mod estimation;
pub mod fleet;
pub mod graph;
pub mod handle;
pub mod messages;
pub mod planner;
pub mod travel;
pub mod vehicle;

// Re-export commonly used types
pub use config::FleetConfig;
pub use error::{Error, Result};
pub use fleet::{FleetCoordinator, FleetEvent};
pub use graph::NavGraph;
pub use handle::RobotCommandHandle;
pub use vehicle::VehicleTraits;
