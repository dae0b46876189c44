//! Video frames and the frame decoder seam
//!
//! Pixel decoding lives outside this crate. The multiplexer hands each drained
//! video datagram to a [`FrameDecoder`] and forwards whatever frame it returns.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::Result;

/// A decoded video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,

    /// Pixel buffer, layout defined by the decoder.
    pub pixels: Arc<[u8]>,

    /// Capture or decode timestamp reported by the decoder.
    pub timestamp: Duration,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, timestamp: Duration) -> Self {
        Self { width, height, pixels: pixels.into(), timestamp }
    }
}

/// Turns one raw video datagram into a frame.
///
/// Errors are treated as decode failures: the datagram is dropped and the
/// multiplexer keeps running. Closures of the right shape implement this
/// trait directly.
pub trait FrameDecoder: Send + 'static {
    fn decode_frame(&mut self, datagram: &[u8]) -> Result<VideoFrame>;
}

impl<F> FrameDecoder for F
where
    F: FnMut(&[u8]) -> Result<VideoFrame> + Send + 'static,
{
    fn decode_frame(&mut self, datagram: &[u8]) -> Result<VideoFrame> {
        self(datagram)
    }
}
