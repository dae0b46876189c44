//! Link configuration.
//!
//! Defaults match the AR.Drone network layout: the drone sits at
//! `192.168.1.1`, navdata flows over UDP 5554 and video over UDP 5555, and the
//! local sockets bind the same port numbers on every interface.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::{Result, TelemetryError};

/// Default drone address on its own access point.
pub const DEFAULT_DRONE_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

/// Navdata (sensor telemetry) UDP port.
pub const NAVDATA_PORT: u16 = 5554;

/// Video UDP port.
pub const VIDEO_PORT: u16 = 5555;

/// Largest datagram the multiplexer will read.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Smallest accepted receive buffer. A full navdata packet with every option
/// enabled stays well below this.
pub const MIN_DATAGRAM_SIZE: usize = 4096;

/// Configuration for a [`DroneLink`](crate::DroneLink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address the handshakes are sent to.
    pub drone_addr: IpAddr,

    /// Local interface to bind both sockets on.
    pub bind_addr: IpAddr,

    /// Remote navdata port.
    pub navdata_port: u16,

    /// Remote video port.
    pub video_port: u16,

    /// Local navdata port; `None` binds the same number as `navdata_port`.
    pub local_navdata_port: Option<u16>,

    /// Local video port; `None` binds the same number as `video_port`.
    pub local_video_port: Option<u16>,

    /// Upper bound on one relay wait, in milliseconds.
    pub relay_poll_ms: u64,

    /// Receive buffer size per socket.
    ///
    /// A datagram longer than this is cut to the buffer length by the OS
    /// without any error, and the cut tail looks like a clean end of packet to
    /// the decoder. Keep it at or above the largest datagram the drone sends.
    pub max_datagram_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            drone_addr: DEFAULT_DRONE_ADDR,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            navdata_port: NAVDATA_PORT,
            video_port: VIDEO_PORT,
            local_navdata_port: None,
            local_video_port: None,
            relay_poll_ms: 1000,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl LinkConfig {
    /// Parse a configuration from YAML. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LinkConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| TelemetryError::config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading link configuration from {}", path.display());

        let text =
            std::fs::read_to_string(path).map_err(|e| TelemetryError::config_file(path, e))?;
        let config: LinkConfig =
            serde_yaml_ng::from_str(&text).map_err(|e| TelemetryError::config_file(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.navdata_port == 0 || self.video_port == 0 {
            return Err(TelemetryError::config("remote ports must be non-zero"));
        }
        if self.relay_poll_ms == 0 {
            return Err(TelemetryError::config("relay_poll_ms must be non-zero"));
        }
        if self.max_datagram_size < MIN_DATAGRAM_SIZE {
            return Err(TelemetryError::config(format!(
                "max_datagram_size {} is below the minimum of {}; longer datagrams would be truncated",
                self.max_datagram_size, MIN_DATAGRAM_SIZE
            )));
        }
        if self.max_datagram_size > MAX_DATAGRAM_SIZE {
            return Err(TelemetryError::config(format!(
                "max_datagram_size {} exceeds the UDP limit of {}",
                self.max_datagram_size, MAX_DATAGRAM_SIZE
            )));
        }
        Ok(())
    }

    /// Local address of the navdata socket.
    pub fn navdata_local(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.local_navdata_port.unwrap_or(self.navdata_port))
    }

    /// Remote address the navdata handshake goes to.
    pub fn navdata_remote(&self) -> SocketAddr {
        SocketAddr::new(self.drone_addr, self.navdata_port)
    }

    /// Local address of the video socket.
    pub fn video_local(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.local_video_port.unwrap_or(self.video_port))
    }

    /// Remote address the video handshake goes to.
    pub fn video_remote(&self) -> SocketAddr {
        SocketAddr::new(self.drone_addr, self.video_port)
    }

    pub fn relay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay_poll_ms)
    }
}
