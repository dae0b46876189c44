//! Navdata decoding and latest-value relay for AR.Drone-style UDP telemetry.
//!
//! The drone pushes two independent UDP streams: navdata (status and sensor
//! records) on port 5554 and video on port 5555. Dronewire decodes the navdata
//! wire format and republishes only the freshest value of each stream to the
//! application, discarding anything stale instead of queueing it.
//!
//! # Pipeline
//!
//! ```text
//! UDP sockets ──▶ Multiplexer (own thread) ──▶ watch channels ──▶ Relay (task) ──▶ TelemetryState
//!                  drain to latest, decode                         drain to latest
//! ```
//!
//! - [`multiplexer`]: waits on both sockets and a stop signal, keeps the last
//!   datagram of every burst, decodes it and overwrites the outbound channel
//! - [`relay`]: runs on the application's runtime and copies the newest value
//!   of each channel into [`TelemetryState`]
//! - [`navdata`]: the wire format decoder
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dronewire::{DroneLink, LinkConfig, VideoFrame};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> dronewire::Result<()> {
//!     let decoder = |raw: &[u8]| -> dronewire::Result<VideoFrame> {
//!         // Hand the datagram to a real video codec here.
//!         Ok(VideoFrame::new(0, 0, raw.to_vec(), std::time::Duration::ZERO))
//!     };
//!
//!     let link = DroneLink::connect(LinkConfig::default(), decoder).await?;
//!     let mut updates = Box::pin(link.navdata_updates());
//!
//!     while let Some(navdata) = updates.next().await {
//!         if let Some(demo) = navdata.demo() {
//!             println!("battery {}% altitude {}", demo.battery, demo.altitude);
//!         }
//!     }
//!     link.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod error;
#[cfg(test)]
mod test_utils;

pub mod channels;
pub mod config;
pub mod logging;
pub mod multiplexer;
pub mod navdata;
pub mod relay;
pub mod state;
pub mod transport;
pub mod video;

pub use config::LinkConfig;
pub use error::*;
pub use multiplexer::{Multiplexer, MultiplexerHandle, MultiplexerStats};
pub use navdata::{DemoData, DroneState, Navdata, NavdataOption, StateFlag, decode_navdata};
pub use relay::{Relay, RelayHandle, RelayStats};
pub use state::TelemetryState;
pub use video::{FrameDecoder, VideoFrame};

use futures::stream::BoxStream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Counters from both pipeline stages, returned by [`DroneLink::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub multiplexer: MultiplexerStats,
    pub relay: RelayStats,
}

/// A running navdata/video link to one drone.
///
/// Dropping the link signals both stages to stop; call [`DroneLink::shutdown`]
/// to wait for them and collect their counters.
pub struct DroneLink {
    state: Arc<TelemetryState>,
    multiplexer: Option<MultiplexerHandle>,
    relay: Option<RelayHandle>,
    local_addrs: (SocketAddr, SocketAddr),
}

impl DroneLink {
    /// Bind the sockets, handshake with the drone and start both stages.
    ///
    /// Must be called from within a tokio runtime; the relay runs as a task
    /// on it while the multiplexer gets its own thread.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - Either socket cannot be bound
    /// - A handshake datagram cannot be sent
    /// - The multiplexer thread cannot be started
    pub async fn connect<D: FrameDecoder>(config: LinkConfig, decoder: D) -> Result<Self> {
        config.validate()?;
        info!(drone = %config.drone_addr, "Connecting to drone");

        let (outputs, inputs) = channels::link_channels();
        let state = Arc::new(TelemetryState::new());

        let multiplexer = Multiplexer::spawn_udp(&config, decoder, outputs)?;
        let local_addrs = multiplexer.local_addrs();
        let relay = Relay::new(inputs, Arc::clone(&state), config.relay_poll_interval()).spawn();

        info!("Drone link established");
        Ok(Self { state, multiplexer: Some(multiplexer), relay: Some(relay), local_addrs })
    }

    /// Latest decoded navdata record.
    pub fn navdata(&self) -> Option<Arc<Navdata>> {
        self.state.latest_navdata()
    }

    /// Latest decoded video frame.
    pub fn video_frame(&self) -> Option<Arc<VideoFrame>> {
        self.state.latest_frame()
    }

    /// Stream of navdata records as the relay publishes them.
    pub fn navdata_updates(&self) -> BoxStream<'static, Arc<Navdata>> {
        self.state.navdata_updates()
    }

    /// Stream of video frames as the relay publishes them.
    pub fn frame_updates(&self) -> BoxStream<'static, Arc<VideoFrame>> {
        self.state.frame_updates()
    }

    /// Shared consumer state, for readers on other threads.
    pub fn state(&self) -> Arc<TelemetryState> {
        Arc::clone(&self.state)
    }

    /// Local (navdata, video) socket addresses.
    pub fn local_addrs(&self) -> (SocketAddr, SocketAddr) {
        self.local_addrs
    }

    /// Wait up to `timeout` for the first navdata record.
    ///
    /// Returns [`TelemetryError::Timeout`] if the drone stays silent.
    pub async fn wait_for_navdata(&self, timeout: Duration) -> Result<Arc<Navdata>> {
        self.state.wait_for_navdata(timeout).await
    }

    /// Whether the multiplexer is still running. Turns `false` once it has
    /// exited, e.g. after a transport failure.
    pub fn is_receiving(&self) -> bool {
        self.multiplexer.as_ref().is_some_and(|multiplexer| !multiplexer.is_finished())
    }

    /// Stop both stages and wait for them.
    ///
    /// The last published navdata and frame stay readable through any
    /// [`TelemetryState`] handle obtained earlier.
    pub async fn shutdown(mut self) -> Result<LinkStats> {
        debug!("Shutting down drone link");
        let (Some(multiplexer), Some(relay)) = (self.multiplexer.take(), self.relay.take()) else {
            return Err(TelemetryError::worker("drone link already shut down"));
        };

        // Multiplexer first: it treats a vanished relay as an error.
        let multiplexer_result = multiplexer.shutdown().await;
        relay.stop();
        let relay_result = relay.join().await;

        let stats = LinkStats { multiplexer: multiplexer_result?, relay: relay_result? };
        info!(?stats, "Drone link shut down");
        Ok(stats)
    }
}

impl Drop for DroneLink {
    fn drop(&mut self) {
        debug!("Dropping drone link");
        if let Some(multiplexer) = self.multiplexer.as_mut() {
            multiplexer.stop();
        }
        if let Some(relay) = self.relay.as_ref() {
            relay.stop();
        }
    }
}
