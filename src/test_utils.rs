//! Test helpers: navdata packet builder, in-memory datagram source, and a
//! trivial frame decoder.

#![cfg(test)]

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::navdata::NAVDATA_DEMO_TAG;
use crate::transport::DatagramSource;
use crate::video::VideoFrame;
use crate::{Result, TelemetryError};

/// Builds navdata datagrams in wire format.
#[derive(Debug, Clone)]
pub struct NavdataBuilder {
    bytes: Vec<u8>,
}

impl NavdataBuilder {
    pub fn new(header: u32, state: u32, sequence: u32, vision_flag: u32) -> Self {
        let mut bytes = Vec::with_capacity(64);
        for word in [header, state, sequence, vision_flag] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        Self { bytes }
    }

    /// Append an option record; the size field counts its 4 byte header.
    pub fn option(mut self, tag: u16, payload: &[u8]) -> Self {
        let size = u16::try_from(payload.len() + 4).expect("option fits in u16");
        self.bytes.extend_from_slice(&tag.to_le_bytes());
        self.bytes.extend_from_slice(&size.to_le_bytes());
        self.bytes.extend_from_slice(payload);
        self
    }

    /// Append a demo option. Angles are in millidegrees.
    #[allow(clippy::too_many_arguments)]
    pub fn demo(
        self,
        ctrl_state: u32,
        battery: u32,
        theta: f32,
        phi: f32,
        psi: f32,
        altitude: f32,
        vx: f32,
        vy: f32,
        vz: f32,
        num_frames: u32,
    ) -> Self {
        let payload =
            demo_payload(ctrl_state, battery, theta, phi, psi, altitude, vx, vy, vz, num_frames);
        self.option(NAVDATA_DEMO_TAG, &payload)
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Raw 40 byte demo payload.
#[allow(clippy::too_many_arguments)]
pub fn demo_payload(
    ctrl_state: u32,
    battery: u32,
    theta: f32,
    phi: f32,
    psi: f32,
    altitude: f32,
    vx: f32,
    vy: f32,
    vz: f32,
    num_frames: u32,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(40);
    payload.extend_from_slice(&ctrl_state.to_le_bytes());
    payload.extend_from_slice(&battery.to_le_bytes());
    for value in [theta, phi, psi, altitude, vx, vy, vz] {
        payload.extend_from_slice(&value.to_le_bytes());
    }
    payload.extend_from_slice(&num_frames.to_le_bytes());
    payload
}

/// In-memory datagram source. Queued items are read in order; an error item
/// is returned from `try_recv` when it reaches the front.
#[derive(Debug, Default)]
pub struct QueuedSource {
    queue: Mutex<VecDeque<std::result::Result<Vec<u8>, io::ErrorKind>>>,
    notify: Notify,
    reads: AtomicUsize,
}

impl QueuedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, datagram: Vec<u8>) {
        self.queue.lock().unwrap().push_back(Ok(datagram));
        self.notify.notify_one();
    }

    pub fn fail_with(&self, kind: io::ErrorKind) {
        self.queue.lock().unwrap().push_back(Err(kind));
        self.notify.notify_one();
    }

    /// Number of `try_recv` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn has_pending(&self) -> bool {
        !self.queue.lock().unwrap().is_empty()
    }
}

#[async_trait::async_trait]
impl DatagramSource for QueuedSource {
    async fn readable(&self) -> io::Result<()> {
        loop {
            let notified = self.notify.notified();
            if self.has_pending() {
                return Ok(());
            }
            notified.await;
        }
    }

    fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().unwrap().pop_front() {
            Some(Ok(datagram)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            Some(Err(kind)) => Err(io::Error::from(kind)),
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

/// Frame with the given bytes as pixels.
pub fn test_frame(pixels: &[u8]) -> VideoFrame {
    VideoFrame::new(pixels.len() as u32, 1, pixels.to_vec(), Duration::ZERO)
}

/// Decoder that wraps the datagram as a one-row frame and rejects empty input.
pub fn test_decoder() -> impl FnMut(&[u8]) -> Result<VideoFrame> + Send + 'static {
    |datagram: &[u8]| {
        if datagram.is_empty() {
            return Err(TelemetryError::decode("video frame", "empty datagram"));
        }
        Ok(test_frame(datagram))
    }
}
