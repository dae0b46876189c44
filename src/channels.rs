//! Single-slot channels between the multiplexer and the relay
//!
//! Each stream gets one `watch` channel. Sending replaces whatever value is
//! still unread, so the producer never blocks and the reader always sees the
//! freshest value. Only fully decoded values cross; raw datagrams never do.

use std::sync::Arc;
use tokio::sync::watch;

use crate::navdata::Navdata;
use crate::video::VideoFrame;

/// Producer half, owned by the multiplexer.
#[derive(Debug)]
pub struct MultiplexerOutputs {
    navdata: watch::Sender<Option<Arc<Navdata>>>,
    frames: watch::Sender<Option<Arc<VideoFrame>>>,
}

/// Consumer half, owned by the relay.
#[derive(Debug)]
pub struct RelayInputs {
    pub navdata: watch::Receiver<Option<Arc<Navdata>>>,
    pub frames: watch::Receiver<Option<Arc<VideoFrame>>>,
}

/// Create the navdata and video channel pair.
pub fn link_channels() -> (MultiplexerOutputs, RelayInputs) {
    let (navdata_tx, navdata_rx) = watch::channel(None);
    let (frame_tx, frame_rx) = watch::channel(None);

    (
        MultiplexerOutputs { navdata: navdata_tx, frames: frame_tx },
        RelayInputs { navdata: navdata_rx, frames: frame_rx },
    )
}

impl MultiplexerOutputs {
    /// Publish a navdata record, overwriting any unread one.
    ///
    /// Returns `false` when the relay side has gone away.
    pub fn send_navdata(&self, navdata: Navdata) -> bool {
        self.navdata.send_replace(Some(Arc::new(navdata)));
        !self.navdata.is_closed()
    }

    /// Publish a video frame, overwriting any unread one.
    pub fn send_frame(&self, frame: VideoFrame) -> bool {
        self.frames.send_replace(Some(Arc::new(frame)));
        !self.frames.is_closed()
    }
}
