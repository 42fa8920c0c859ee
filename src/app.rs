//! Adapter glue: outbound publish seam and the fleet worker thread.
//!
//! The transport (whatever carries the pub/sub topics of the deployment)
//! lives outside this crate. It feeds inbound messages into the worker's
//! event channel and implements [`CommandPublisher`] for the outbound
//! direction. The worker thread is the single place where fleet state is
//! mutated: telemetry, control-plane events, timer ticks, and planner
//! callbacks all arrive here one at a time.

use crate::error::Result;
use crate::fleet::{FleetCoordinator, FleetEvent};
use crate::messages::{ClosedLanes, ModeRequest, PathRequest};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Outbound commands and status messages toward the fleet driver
///
/// Publishing must not block: implementations are expected to hand the
/// message to the transport and return. Failures are reported so the
/// caller can log them, but commands are rebroadcast by the resend timers
/// anyway, so a dropped publish is not fatal.
pub trait CommandPublisher: Send + Sync {
    fn publish_path_request(&self, request: &PathRequest) -> Result<()>;

    fn publish_mode_request(&self, request: &ModeRequest) -> Result<()>;

    fn publish_closed_lanes(&self, status: &ClosedLanes) -> Result<()>;
}

/// Worker wake-up interval; bounds stall-watchdog latency when idle
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Create the event channel shared by transport, planner, and worker
pub fn event_channel() -> (Sender<FleetEvent>, Receiver<FleetEvent>) {
    unbounded()
}

/// The single-threaded event loop that owns a [`FleetCoordinator`]
pub struct FleetWorker {
    coordinator: FleetCoordinator,
    events: Receiver<FleetEvent>,
    shutdown: Arc<AtomicBool>,
}

impl FleetWorker {
    pub fn new(
        coordinator: FleetCoordinator,
        events: Receiver<FleetEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            coordinator,
            events,
            shutdown,
        }
    }

    /// Drain events until shutdown, ticking the watchdogs between them
    pub fn run(&mut self) {
        log::info!(
            "Fleet: worker started for fleet [{}]",
            self.coordinator.fleet_name()
        );

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.events.recv_timeout(TICK_INTERVAL) {
                Ok(event) => self.coordinator.handle_event(event, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Fleet: event channel closed, stopping worker");
                    break;
                }
            }

            self.coordinator.check_stalls(Instant::now());
        }

        log::info!(
            "Fleet: worker stopped for fleet [{}]",
            self.coordinator.fleet_name()
        );
    }

    /// Run the worker on its own named thread
    pub fn spawn(mut self) -> Result<JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name("fleet-worker".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }
}
