//! Multiplexer: socket side of the pipeline
//!
//! Owns the navdata socket, the video socket and a one-shot control channel.
//! Each wake it drains every readable socket down to its newest datagram,
//! decodes that datagram, and overwrites the matching outbound channel. Older
//! datagrams queued in the same wake are discarded: backlog is never built up.
//!
//! [`Multiplexer::spawn_udp`] runs the loop on its own OS thread with its own
//! current-thread runtime, so a stall here never blocks the consumer's
//! scheduler. The two sides share nothing but channels.

use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::channels::MultiplexerOutputs;
use crate::config::LinkConfig;
use crate::navdata::decode_navdata;
use crate::transport::{DatagramSource, bind_udp, drain_latest, send_handshake};
use crate::video::FrameDecoder;
use crate::{Result, TelemetryError};

/// Counters reported when the multiplexer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    pub navdata_forwarded: u64,
    pub frames_forwarded: u64,
    /// Datagrams read but superseded by a newer one in the same drain.
    pub datagrams_discarded: u64,
    pub decode_failures: u64,
}

enum Ready {
    Stop,
    Navdata(io::Result<()>),
    Video(io::Result<()>),
}

/// Drains two datagram sources into the relay channels.
pub struct Multiplexer<N, V, D> {
    navdata: N,
    video: V,
    decoder: D,
    outputs: MultiplexerOutputs,
    buf: Vec<u8>,
    stats: MultiplexerStats,
}

impl<N, V, D> Multiplexer<N, V, D>
where
    N: DatagramSource,
    V: DatagramSource,
    D: FrameDecoder,
{
    pub fn new(
        navdata: N,
        video: V,
        decoder: D,
        outputs: MultiplexerOutputs,
        max_datagram_size: usize,
    ) -> Self {
        Self {
            navdata,
            video,
            decoder,
            outputs,
            buf: vec![0u8; max_datagram_size],
            stats: MultiplexerStats::default(),
        }
    }

    /// Run until `control` fires (or its sender is dropped).
    ///
    /// A transport error, or a relay that dropped its [`RelayInputs`], ends the
    /// loop with `Err`; decode errors only drop the datagram. Sources are
    /// released when this returns, on every path.
    ///
    /// [`RelayInputs`]: crate::channels::RelayInputs
    pub async fn run(mut self, mut control: oneshot::Receiver<()>) -> Result<MultiplexerStats> {
        info!("Multiplexer started");

        loop {
            // Control first: once a stop is pending no socket is read again.
            let ready = tokio::select! {
                biased;
                _ = &mut control => Ready::Stop,
                result = self.navdata.readable() => Ready::Navdata(result),
                result = self.video.readable() => Ready::Video(result),
            };

            match ready {
                Ready::Stop => {
                    debug!("Stop signal received");
                    break;
                }
                Ready::Navdata(result) => {
                    result.map_err(|e| self.fail("wait for navdata", e))?;
                }
                Ready::Video(result) => {
                    result.map_err(|e| self.fail("wait for video", e))?;
                }
            }

            // Service both sockets; one that is not ready drains to nothing.
            self.service_navdata()?;
            self.service_video()?;
        }

        info!(
            navdata = self.stats.navdata_forwarded,
            frames = self.stats.frames_forwarded,
            discarded = self.stats.datagrams_discarded,
            decode_failures = self.stats.decode_failures,
            "Multiplexer stopped"
        );
        Ok(self.stats)
    }

    fn service_navdata(&mut self) -> Result<()> {
        let drained = match drain_latest(&self.navdata, &mut self.buf) {
            Ok(Some(drained)) => drained,
            Ok(None) => return Ok(()),
            Err(e) => return Err(self.fail("receive navdata", e)),
        };
        self.stats.datagrams_discarded += drained.discarded as u64;

        match decode_navdata(&self.buf[..drained.len]) {
            Ok(navdata) => {
                trace!(sequence = navdata.sequence, discarded = drained.discarded, "Forwarding navdata");
                if !self.outputs.send_navdata(navdata) {
                    return Err(self.closed("navdata"));
                }
                self.stats.navdata_forwarded += 1;
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(len = drained.len, "Dropping navdata datagram: {}", e);
            }
        }
        Ok(())
    }

    fn service_video(&mut self) -> Result<()> {
        let drained = match drain_latest(&self.video, &mut self.buf) {
            Ok(Some(drained)) => drained,
            Ok(None) => return Ok(()),
            Err(e) => return Err(self.fail("receive video", e)),
        };
        self.stats.datagrams_discarded += drained.discarded as u64;

        match self.decoder.decode_frame(&self.buf[..drained.len]) {
            Ok(frame) => {
                trace!(width = frame.width, height = frame.height, "Forwarding video frame");
                if !self.outputs.send_frame(frame) {
                    return Err(self.closed("video"));
                }
                self.stats.frames_forwarded += 1;
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(len = drained.len, "Dropping video datagram: {}", e);
            }
        }
        Ok(())
    }

    fn closed(&self, channel: &str) -> TelemetryError {
        error!(channel, "Relay side is gone, multiplexer shutting down");
        TelemetryError::channel_closed(channel)
    }

    fn fail(&self, operation: &str, source: io::Error) -> TelemetryError {
        error!(operation, "Transport failure, multiplexer shutting down: {}", source);
        TelemetryError::transport(operation, source)
    }
}

impl<D: FrameDecoder> Multiplexer<tokio::net::UdpSocket, tokio::net::UdpSocket, D> {
    /// Bind both sockets, send both handshakes, and start the loop on a
    /// dedicated thread.
    ///
    /// Bind and handshake failures are returned here, before any thread is
    /// started.
    pub fn spawn_udp(
        config: &LinkConfig,
        decoder: D,
        outputs: MultiplexerOutputs,
    ) -> Result<MultiplexerHandle> {
        config.validate()?;

        let video = bind_udp(config.video_local())?;
        send_handshake(&video, config.video_remote())?;
        let navdata = bind_udp(config.navdata_local())?;
        send_handshake(&navdata, config.navdata_remote())?;

        let navdata_addr = navdata
            .local_addr()
            .map_err(|e| TelemetryError::transport("query navdata address", e))?;
        let video_addr =
            video.local_addr().map_err(|e| TelemetryError::transport("query video address", e))?;

        let (control_tx, control_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let max_datagram_size = config.max_datagram_size;

        let thread = std::thread::Builder::new()
            .name("dronewire-mux".to_string())
            .spawn(move || {
                let result =
                    run_isolated(navdata, video, decoder, outputs, max_datagram_size, control_rx);
                if let Err(e) = &result {
                    error!("Multiplexer thread ended with error: {}", e);
                }
                let _ = done_tx.send(result);
            })
            .map_err(|e| TelemetryError::worker(format!("spawn multiplexer thread: {}", e)))?;

        info!(%navdata_addr, %video_addr, "Multiplexer thread started");

        Ok(MultiplexerHandle {
            control: Some(control_tx),
            done: done_rx,
            thread: Some(thread),
            navdata_addr,
            video_addr,
        })
    }
}

fn run_isolated<D: FrameDecoder>(
    navdata: StdUdpSocket,
    video: StdUdpSocket,
    decoder: D,
    outputs: MultiplexerOutputs,
    max_datagram_size: usize,
    control: oneshot::Receiver<()>,
) -> Result<MultiplexerStats> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TelemetryError::worker(format!("build multiplexer runtime: {}", e)))?;

    runtime.block_on(async move {
        let navdata = tokio::net::UdpSocket::from_std(navdata)
            .map_err(|e| TelemetryError::transport("register navdata socket", e))?;
        let video = tokio::net::UdpSocket::from_std(video)
            .map_err(|e| TelemetryError::transport("register video socket", e))?;

        Multiplexer::new(navdata, video, decoder, outputs, max_datagram_size).run(control).await
    })
}

/// Handle to a multiplexer running on its own thread.
///
/// Dropping the handle sends the stop signal.
pub struct MultiplexerHandle {
    control: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<Result<MultiplexerStats>>,
    thread: Option<JoinHandle<()>>,
    navdata_addr: SocketAddr,
    video_addr: SocketAddr,
}

impl MultiplexerHandle {
    /// Send the one-shot stop signal. Further calls do nothing.
    pub fn stop(&mut self) {
        if let Some(control) = self.control.take() {
            debug!("Signalling multiplexer to stop");
            let _ = control.send(());
        }
    }

    /// Local addresses of the navdata and video sockets.
    pub fn local_addrs(&self) -> (SocketAddr, SocketAddr) {
        (self.navdata_addr, self.video_addr)
    }

    /// Whether the multiplexer thread has exited (stopped or failed).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|thread| thread.is_finished())
    }

    /// Stop the multiplexer and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<MultiplexerStats> {
        self.stop();

        let result = (&mut self.done).await.map_err(|_| {
            TelemetryError::worker("multiplexer thread exited without reporting a result")
        })?;

        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Multiplexer thread did not join cleanly");
            }
        }

        result
    }
}

impl Drop for MultiplexerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::link_channels;
    use crate::relay::Relay;
    use crate::state::TelemetryState;
    use crate::test_utils::{NavdataBuilder, QueuedSource, test_decoder};
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;

    fn navdata_packet(seq: u32) -> Vec<u8> {
        NavdataBuilder::new(0x5566_7788, 1, seq, 0)
            .demo(0, 60, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, seq)
            .build()
    }

    #[tokio::test]
    async fn three_queued_datagrams_forward_one() {
        let _ = tracing_subscriber::fmt::try_init();
        let navdata = Arc::new(QueuedSource::new());
        let video = Arc::new(QueuedSource::new());
        for seq in 1..=3 {
            navdata.push(navdata_packet(seq));
        }

        let (outputs, mut inputs) = link_channels();
        let (control_tx, control_rx) = oneshot::channel();
        let mux = Multiplexer::new(Arc::clone(&navdata), video, test_decoder(), outputs, 2048);
        let task = tokio::spawn(mux.run(control_rx));

        tokio::time::timeout(Duration::from_secs(1), inputs.navdata.changed())
            .await
            .expect("navdata forwarded")
            .unwrap();
        let latest = inputs.navdata.borrow_and_update().clone().unwrap();
        assert_eq!(latest.sequence, 3);
        assert_eq!(latest.demo().unwrap().num_frames, 3);

        control_tx.send(()).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.navdata_forwarded, 1);
        assert_eq!(stats.datagrams_discarded, 2);
        assert_eq!(stats.frames_forwarded, 0);
    }

    #[tokio::test]
    async fn queued_burst_reaches_consumer_state_once() {
        let _ = tracing_subscriber::fmt::try_init();
        let navdata = Arc::new(QueuedSource::new());
        for seq in 1..=3 {
            navdata.push(navdata_packet(seq));
        }

        let (outputs, inputs) = link_channels();
        let state = Arc::new(TelemetryState::new());
        let mut updates = state.navdata_updates();
        let relay = Relay::new(inputs, Arc::clone(&state), Duration::from_millis(50)).spawn();

        let (control_tx, control_rx) = oneshot::channel();
        let mux = Multiplexer::new(
            Arc::clone(&navdata),
            Arc::new(QueuedSource::new()),
            test_decoder(),
            outputs,
            2048,
        );
        let task = tokio::spawn(mux.run(control_rx));

        let latest = tokio::time::timeout(Duration::from_secs(1), updates.next())
            .await
            .expect("navdata reaches consumer state")
            .unwrap();
        assert_eq!(latest.sequence, 3);

        control_tx.send(()).unwrap();
        let mux_stats = task.await.unwrap().unwrap();
        relay.stop();
        let relay_stats = relay.join().await.unwrap();

        assert_eq!(state.navdata_generation(), 1);
        assert_eq!(state.latest_navdata().unwrap().sequence, 3);
        assert_eq!(mux_stats.navdata_forwarded, 1);
        assert_eq!(mux_stats.datagrams_discarded, 2);
        assert_eq!(relay_stats.navdata_relayed, 1);
    }

    #[tokio::test]
    async fn dropped_relay_inputs_end_the_loop() {
        let navdata = Arc::new(QueuedSource::new());
        navdata.push(navdata_packet(4));

        let (outputs, inputs) = link_channels();
        drop(inputs);
        let (_control_tx, control_rx) = oneshot::channel();
        let mux = Multiplexer::new(
            Arc::clone(&navdata),
            Arc::new(QueuedSource::new()),
            test_decoder(),
            outputs,
            2048,
        );

        let err = tokio::time::timeout(Duration::from_secs(1), mux.run(control_rx))
            .await
            .expect("exits once the relay is gone")
            .unwrap_err();
        assert!(err.is_fatal());
        match err {
            TelemetryError::ChannelClosed { channel } => assert_eq!(channel, "navdata"),
            other => panic!("Expected ChannelClosed, got {other:?}"),
        }
        assert_eq!(Arc::strong_count(&navdata), 1);
    }

    #[tokio::test]
    async fn video_goes_through_frame_decoder() {
        let navdata = Arc::new(QueuedSource::new());
        let video = Arc::new(QueuedSource::new());
        video.push(vec![1, 1]);
        video.push(vec![2, 2, 2]);

        let (outputs, mut inputs) = link_channels();
        let (control_tx, control_rx) = oneshot::channel();
        let mux = Multiplexer::new(navdata, Arc::clone(&video), test_decoder(), outputs, 2048);
        let task = tokio::spawn(mux.run(control_rx));

        tokio::time::timeout(Duration::from_secs(1), inputs.frames.changed())
            .await
            .expect("frame forwarded")
            .unwrap();
        let frame = inputs.frames.borrow_and_update().clone().unwrap();
        assert_eq!(&frame.pixels[..], &[2, 2, 2]);

        control_tx.send(()).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.frames_forwarded, 1);
        assert_eq!(stats.datagrams_discarded, 1);
    }

    #[tokio::test]
    async fn decode_failures_do_not_stop_the_loop() {
        let navdata = Arc::new(QueuedSource::new());
        let video = Arc::new(QueuedSource::new());
        navdata.push(vec![0x01, 0x02, 0x03]);
        // The test decoder rejects empty datagrams.
        video.push(Vec::new());

        let (outputs, mut inputs) = link_channels();
        let (control_tx, control_rx) = oneshot::channel();
        let mux = Multiplexer::new(Arc::clone(&navdata), video, test_decoder(), outputs, 2048);
        let task = tokio::spawn(mux.run(control_rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        navdata.push(navdata_packet(9));

        tokio::time::timeout(Duration::from_secs(1), inputs.navdata.changed())
            .await
            .expect("loop still alive after bad datagrams")
            .unwrap();
        assert_eq!(inputs.navdata.borrow().as_ref().unwrap().sequence, 9);
        assert!(inputs.frames.borrow().is_none());

        control_tx.send(()).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.decode_failures, 2);
        assert_eq!(stats.navdata_forwarded, 1);
    }

    #[tokio::test]
    async fn pending_stop_wins_over_ready_sockets() {
        let navdata = Arc::new(QueuedSource::new());
        let video = Arc::new(QueuedSource::new());
        navdata.push(navdata_packet(1));
        video.push(vec![5]);

        let (outputs, inputs) = link_channels();
        let (control_tx, control_rx) = oneshot::channel();
        control_tx.send(()).unwrap();

        let mux = Multiplexer::new(
            Arc::clone(&navdata),
            Arc::clone(&video),
            test_decoder(),
            outputs,
            2048,
        );
        let stats = tokio::time::timeout(Duration::from_secs(1), mux.run(control_rx))
            .await
            .expect("stops immediately")
            .unwrap();

        assert_eq!(stats, MultiplexerStats::default());
        assert_eq!(navdata.reads(), 0);
        assert_eq!(video.reads(), 0);
        assert!(inputs.navdata.borrow().is_none());
        // Sources were released with the multiplexer.
        assert_eq!(Arc::strong_count(&navdata), 1);
        assert_eq!(Arc::strong_count(&video), 1);
    }

    #[tokio::test]
    async fn dropped_control_sender_stops() {
        let (outputs, _inputs) = link_channels();
        let (control_tx, control_rx) = oneshot::channel::<()>();
        let mux = Multiplexer::new(
            Arc::new(QueuedSource::new()),
            Arc::new(QueuedSource::new()),
            test_decoder(),
            outputs,
            2048,
        );
        drop(control_tx);
        let result = tokio::time::timeout(Duration::from_secs(1), mux.run(control_rx)).await;
        assert!(result.expect("exits").is_ok());
    }

    #[tokio::test]
    async fn receive_errors_are_fatal() {
        let navdata = Arc::new(QueuedSource::new());
        navdata.fail_with(io::ErrorKind::ConnectionRefused);

        let (outputs, _inputs) = link_channels();
        let (_control_tx, control_rx) = oneshot::channel();
        let mux = Multiplexer::new(
            Arc::clone(&navdata),
            Arc::new(QueuedSource::new()),
            test_decoder(),
            outputs,
            2048,
        );

        let err = tokio::time::timeout(Duration::from_secs(1), mux.run(control_rx))
            .await
            .expect("fails promptly")
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Transport { .. }));
        assert!(err.is_fatal());
        assert_eq!(Arc::strong_count(&navdata), 1);
    }

    #[tokio::test]
    async fn spawn_udp_handshakes_and_stops() {
        let _ = tracing_subscriber::fmt::try_init();

        let drone = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let drone_addr = drone.local_addr().unwrap();
        let config = LinkConfig {
            drone_addr: drone_addr.ip(),
            bind_addr: "127.0.0.1".parse().unwrap(),
            navdata_port: drone_addr.port(),
            video_port: drone_addr.port(),
            local_navdata_port: Some(0),
            local_video_port: Some(0),
            ..LinkConfig::default()
        };

        let (outputs, mut inputs) = link_channels();
        let handle = Multiplexer::spawn_udp(&config, test_decoder(), outputs).unwrap();
        let (navdata_addr, video_addr) = handle.local_addrs();

        let mut buf = [0u8; 16];
        let mut senders = Vec::new();
        for _ in 0..2 {
            let (len, from) =
                tokio::time::timeout(Duration::from_secs(2), drone.recv_from(&mut buf))
                    .await
                    .expect("handshake received")
                    .unwrap();
            assert_eq!(&buf[..len], &crate::transport::HANDSHAKE);
            senders.push(from);
        }
        senders.sort();
        let mut expected = vec![navdata_addr, video_addr];
        expected.sort();
        assert_eq!(senders, expected);

        drone.send_to(&navdata_packet(77), navdata_addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), inputs.navdata.changed())
            .await
            .expect("navdata crosses the thread boundary")
            .unwrap();
        assert_eq!(inputs.navdata.borrow().as_ref().unwrap().sequence, 77);

        let stats = tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown completes")
            .unwrap();
        assert_eq!(stats.navdata_forwarded, 1);

        // Ports are free again once the thread has exited.
        assert!(std::net::UdpSocket::bind(navdata_addr).is_ok());
        assert!(std::net::UdpSocket::bind(video_addr).is_ok());
    }
}
