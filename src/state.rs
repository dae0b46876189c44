//! Consumer-visible telemetry state
//!
//! The relay is the only writer. Each publish swaps in a new `Arc`, so readers
//! on any thread get either the previous or the new value, never a torn one.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::navdata::Navdata;
use crate::video::VideoFrame;
use crate::{Result, TelemetryError};

/// Latest navdata record and video frame seen by the relay.
#[derive(Debug)]
pub struct TelemetryState {
    navdata: watch::Sender<Option<Arc<Navdata>>>,
    frame: watch::Sender<Option<Arc<VideoFrame>>>,
    navdata_generation: AtomicU64,
    frame_generation: AtomicU64,
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryState {
    pub fn new() -> Self {
        Self {
            navdata: watch::Sender::new(None),
            frame: watch::Sender::new(None),
            navdata_generation: AtomicU64::new(0),
            frame_generation: AtomicU64::new(0),
        }
    }

    /// Most recent navdata record, if any arrived yet.
    pub fn latest_navdata(&self) -> Option<Arc<Navdata>> {
        self.navdata.borrow().clone()
    }

    /// Most recent video frame, if any arrived yet.
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frame.borrow().clone()
    }

    /// Number of navdata records published so far.
    ///
    /// Consumers that need staleness detection can compare this between reads.
    pub fn navdata_generation(&self) -> u64 {
        self.navdata_generation.load(Ordering::Acquire)
    }

    /// Number of video frames published so far.
    pub fn frame_generation(&self) -> u64 {
        self.frame_generation.load(Ordering::Acquire)
    }

    /// Stream of navdata records: the current one (if any), then every update.
    ///
    /// Slow readers skip intermediate values.
    pub fn navdata_updates(&self) -> BoxStream<'static, Arc<Navdata>> {
        WatchStream::new(self.navdata.subscribe()).filter_map(|opt| async move { opt }).boxed()
    }

    /// Stream of video frames, same semantics as [`Self::navdata_updates`].
    pub fn frame_updates(&self) -> BoxStream<'static, Arc<VideoFrame>> {
        WatchStream::new(self.frame.subscribe()).filter_map(|opt| async move { opt }).boxed()
    }

    /// Wait for a navdata record to be available.
    ///
    /// Resolves at once if one was already published. Fails with
    /// [`TelemetryError::Timeout`] when nothing arrives within `timeout`, which
    /// usually means the drone is not streaming.
    pub async fn wait_for_navdata(&self, timeout: Duration) -> Result<Arc<Navdata>> {
        let mut rx = self.navdata.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(latest)) => latest.clone().ok_or_else(|| TelemetryError::channel_closed("navdata")),
            Ok(Err(_)) => Err(TelemetryError::channel_closed("navdata")),
            Err(_) => {
                warn!(?timeout, "Timeout waiting for navdata");
                Err(TelemetryError::Timeout { duration: timeout })
            }
        }
    }

    pub(crate) fn publish_navdata(&self, navdata: Arc<Navdata>) {
        self.navdata.send_replace(Some(navdata));
        self.navdata_generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn publish_frame(&self, frame: Arc<VideoFrame>) {
        self.frame.send_replace(Some(frame));
        self.frame_generation.fetch_add(1, Ordering::AcqRel);
    }
}
