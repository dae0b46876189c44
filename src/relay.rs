//! Relay: latest-value hand-off into the consumer's context
//!
//! Runs as a background task on the consumer's runtime. Each cycle it checks
//! its stop flag, waits (bounded) for either inbound channel to change, then
//! takes only the newest pending value of every changed channel and publishes
//! it to [`TelemetryState`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::channels::RelayInputs;
use crate::state::TelemetryState;
use crate::{Result, TelemetryError};

/// Counters reported when the relay stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub navdata_relayed: u64,
    pub frames_relayed: u64,
    /// Cycles where the wait timed out with nothing new.
    pub idle_cycles: u64,
}

/// Which inbound channel woke the relay.
enum Wake {
    Navdata(std::result::Result<(), watch::error::RecvError>),
    Frame(std::result::Result<(), watch::error::RecvError>),
    /// Both channels closed; nothing left to wait on.
    Closed,
}

/// Relay between the multiplexer channels and the consumer state.
pub struct Relay {
    inputs: RelayInputs,
    state: Arc<TelemetryState>,
    poll_interval: Duration,
    stop: CancellationToken,
    navdata_open: bool,
    frames_open: bool,
    stats: RelayStats,
}

impl Relay {
    pub fn new(inputs: RelayInputs, state: Arc<TelemetryState>, poll_interval: Duration) -> Self {
        Self {
            inputs,
            state,
            poll_interval,
            stop: CancellationToken::new(),
            navdata_open: true,
            frames_open: true,
            stats: RelayStats::default(),
        }
    }

    /// Spawn the relay on the current tokio runtime.
    pub fn spawn(self) -> RelayHandle {
        let stop = self.stop.clone();
        let task = tokio::spawn(self.run());
        RelayHandle { stop, task }
    }

    /// Run until the stop token is cancelled.
    pub async fn run(mut self) -> RelayStats {
        info!(poll_interval = ?self.poll_interval, "Relay started");

        while !self.stop.is_cancelled() {
            self.cycle().await;
        }

        info!(
            navdata = self.stats.navdata_relayed,
            frames = self.stats.frames_relayed,
            idle = self.stats.idle_cycles,
            "Relay stopped"
        );
        self.stats
    }

    /// One wait-and-publish cycle.
    async fn cycle(&mut self) {
        let navdata_open = self.navdata_open;
        let frames_open = self.frames_open;
        let poll_interval = self.poll_interval;
        let navdata_rx = &mut self.inputs.navdata;
        let frame_rx = &mut self.inputs.frames;

        let waited = tokio::time::timeout(poll_interval, async {
            tokio::select! {
                result = navdata_rx.changed(), if navdata_open => Wake::Navdata(result),
                result = frame_rx.changed(), if frames_open => Wake::Frame(result),
                else => {
                    tokio::time::sleep(poll_interval).await;
                    Wake::Closed
                }
            }
        })
        .await;

        let wake = match waited {
            Ok(wake) => wake,
            Err(_) => {
                self.stats.idle_cycles += 1;
                trace!("Relay wait timed out");
                return;
            }
        };

        // `changed()` marks the woken channel as seen; take its value now and
        // check the other one for a pending change too.
        match wake {
            Wake::Navdata(Ok(())) => {
                self.publish_navdata();
                if self.frames_open && self.inputs.frames.has_changed().unwrap_or(false) {
                    self.publish_frame();
                }
            }
            Wake::Frame(Ok(())) => {
                self.publish_frame();
                if self.navdata_open && self.inputs.navdata.has_changed().unwrap_or(false) {
                    self.publish_navdata();
                }
            }
            Wake::Navdata(Err(_)) => {
                debug!("Navdata channel closed upstream");
                self.navdata_open = false;
            }
            Wake::Frame(Err(_)) => {
                debug!("Video channel closed upstream");
                self.frames_open = false;
            }
            Wake::Closed => {
                self.stats.idle_cycles += 1;
            }
        }
    }

    fn publish_navdata(&mut self) {
        let latest = self.inputs.navdata.borrow_and_update().clone();
        if let Some(navdata) = latest {
            trace!(sequence = navdata.sequence, "Relaying navdata");
            self.state.publish_navdata(navdata);
            self.stats.navdata_relayed += 1;
        }
    }

    fn publish_frame(&mut self) {
        let latest = self.inputs.frames.borrow_and_update().clone();
        if let Some(frame) = latest {
            trace!(width = frame.width, height = frame.height, "Relaying video frame");
            self.state.publish_frame(frame);
            self.stats.frames_relayed += 1;
        }
    }
}

/// Handle to a spawned relay task.
pub struct RelayHandle {
    stop: CancellationToken,
    task: JoinHandle<RelayStats>,
}

impl RelayHandle {
    /// Ask the relay to stop. Takes effect at the start of its next cycle.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Wait for the relay task to finish and collect its counters.
    pub async fn join(self) -> Result<RelayStats> {
        self.task
            .await
            .map_err(|e| TelemetryError::worker(format!("relay task failed: {}", e)))
    }
}
