// One device session: a reader thread feeding the router, a debounced command
// path, and an ordered shutdown
//
// Threads and ownership:
// - the reader (blocking thread) owns the read half, the decoder, the router,
//   and the recorder; it publishes each new `Snapshot` through a watch channel
// - the dispatcher's timer tasks write through the shared `CommandWriter`
// - the caller owns `Link` and drives pause / shutdown

use chrono::Local;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{CommandDispatcher, CommandWriter};
use crate::config::LinkConfig;
use crate::messages::{CommandRequest, LinkHealth, ParamEvent, TelemetryFrame};
use crate::protocol::FrameDecoder;
use crate::recorder::Recorder;
use crate::telemetry::{Snapshot, TelemetryRouter};
use crate::transport::{self, TransportError, TransportRead, TransportWrite};

const READ_CHUNK: usize = 1024;

/// Messages from the session owner to the reader thread
enum ReaderControl {
    Pause(bool),
    StartRecording(Box<dyn Recorder>),
    StopRecording,
    Shutdown,
}

/// Fatal transport errors from either direction of the link
pub struct LinkFaults {
    rx: mpsc::UnboundedReceiver<TransportError>,
}

impl LinkFaults {
    /// Resolves with the first fatal error. Pending forever if none occurs.
    pub async fn next(&mut self) -> TransportError {
        match self.rx.recv().await {
            Some(e) => e,
            None => std::future::pending().await,
        }
    }
}

pub struct Link {
    dispatcher: CommandDispatcher,
    writer: Arc<CommandWriter>,
    control: mpsc::UnboundedSender<ReaderControl>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    reader: Option<JoinHandle<Result<(), TransportError>>>,
    paused: bool,
}

impl Link {
    /// Open the configured serial port and start a session on it
    pub fn open_serial(config: Arc<LinkConfig>) -> Result<(Self, LinkFaults), TransportError> {
        info!(
            "Opening serial link on {} at {} baud ({:?})",
            config.port, config.baud_rate, config.wire_format
        );
        let (reader, writer) =
            transport::open_serial(&config.port, config.baud_rate, config.read_timeout())?;
        Ok(Self::start(config, Box::new(reader), Box::new(writer)))
    }

    /// Start a session over an already-open transport. Must be called inside a
    /// tokio runtime.
    pub fn start(
        config: Arc<LinkConfig>,
        source: Box<dyn TransportRead>,
        sink: Box<dyn TransportWrite>,
    ) -> (Self, LinkFaults) {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let router = TelemetryRouter::new(&config);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(router.snapshot()));

        let writer = Arc::new(CommandWriter::new(sink));
        let dispatcher = CommandDispatcher::new(&config, Arc::clone(&writer), fault_tx.clone());

        let reader = Reader {
            source,
            decoder: FrameDecoder::new(config.wire_format, config.binary_values),
            router,
            control: control_rx,
            snapshots: snapshot_tx,
            faults: fault_tx,
            recorder: None,
            paused: false,
        };
        let handle = tokio::task::spawn_blocking(move || reader.run());

        info!(
            "Link started: {} sample history, {}ms debounce, settling band +/-{}",
            config.buffer_capacity, config.send_delay_ms, config.settling_threshold
        );

        (
            Self {
                dispatcher,
                writer,
                control: control_tx,
                snapshots: snapshot_rx,
                reader: Some(handle),
                paused: false,
            },
            LinkFaults { rx: fault_rx },
        )
    }

    /// Queue a slider change for debounced sending
    pub fn request(&self, event: ParamEvent) -> Option<CommandRequest> {
        self.dispatcher.request(event)
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Stop applying frames. The reader keeps draining the transport and
    /// discards what it reads.
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            self.paused = paused;
            let _ = self.control.send(ReaderControl::Pause(paused));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn start_recording(&self, recorder: Box<dyn Recorder>) {
        let _ = self.control.send(ReaderControl::StartRecording(recorder));
    }

    pub fn stop_recording(&self) {
        let _ = self.control.send(ReaderControl::StopRecording);
    }

    /// Receiver for published snapshots; `borrow()` never observes a partial update
    pub fn snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshots.borrow())
    }

    /// Stop the reader, cancel pending commands without sending them, then
    /// release the transport. Returns the reader's fatal error, if it had one.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        info!("Shutting down link");
        self.writer.seal();

        let _ = self.control.send(ReaderControl::Shutdown);
        self.dispatcher.cancel_all();
        drop(self.writer.release());

        let result = match self.reader.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Reader(e.to_string())),
            },
            None => Ok(()),
        };
        info!("Link closed");
        result
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // Dropped without shutdown(): same ordering, without waiting for the reader
        if self.reader.is_some() {
            warn!("Link dropped without shutdown");
            self.writer.seal();
            let _ = self.control.send(ReaderControl::Shutdown);
            self.dispatcher.cancel_all();
            drop(self.writer.release());
        }
    }
}

struct Reader {
    source: Box<dyn TransportRead>,
    decoder: FrameDecoder,
    router: TelemetryRouter,
    control: mpsc::UnboundedReceiver<ReaderControl>,
    snapshots: watch::Sender<Arc<Snapshot>>,
    faults: mpsc::UnboundedSender<TransportError>,
    recorder: Option<Box<dyn Recorder>>,
    paused: bool,
}

impl Reader {
    fn run(mut self) -> Result<(), TransportError> {
        debug!("Reader started");
        let mut buf = [0u8; READ_CHUNK];

        loop {
            if !self.handle_control() {
                debug!("Reader stopping");
                return Ok(());
            }

            let n = match self.source.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    error!("Transport read failed: {}", e);
                    self.router.set_health(LinkHealth::Failed);
                    self.publish();
                    let summary = e.to_string();
                    let _ = self.faults.send(e);
                    return Err(TransportError::Reader(summary));
                }
            };
            if n == 0 {
                continue;
            }

            self.decoder.push(&buf[..n]);
            let drops = self.router.drops();
            let mut applied = false;
            while let Some(result) = self.decoder.next_frame() {
                match result {
                    Ok(_) if self.paused => self.router.note_paused_frame(),
                    Ok(frame) => {
                        self.router.ingest(&frame, Instant::now());
                        self.record(&frame);
                        applied = true;
                    }
                    Err(e) => self.router.note_dropped(&e),
                }
            }
            self.router.note_noise(self.decoder.take_skipped());

            // Drop counts alone are news too: a wrong baud or format
            // produces nothing but errors
            if applied || self.router.drops() != drops {
                self.publish();
            }
        }
    }

    /// Apply queued control messages. Returns false when the reader should exit.
    fn handle_control(&mut self) -> bool {
        loop {
            match self.control.try_recv() {
                Ok(ReaderControl::Pause(paused)) => {
                    info!("{}", if paused { "Paused" } else { "Resumed" });
                    self.paused = paused;
                    self.router.set_health(if paused {
                        LinkHealth::Paused
                    } else {
                        LinkHealth::Running
                    });
                    self.publish();
                }
                Ok(ReaderControl::StartRecording(recorder)) => {
                    info!("Recording started");
                    self.recorder = Some(recorder);
                }
                Ok(ReaderControl::StopRecording) => {
                    if self.recorder.take().is_some() {
                        info!("Recording stopped");
                    }
                }
                Ok(ReaderControl::Shutdown) => return false,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn record(&mut self, frame: &TelemetryFrame) {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(Local::now(), frame) {
                warn!("Recording stopped: {}", e);
                self.recorder = None;
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(Arc::new(self.router.snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireFormat;
    use crate::messages::{ChannelId, ParamId};
    use crate::protocol::PacketCodec;
    use crate::transport::memory::{self, MemoryFeed, MemoryWriter};
    use std::sync::Mutex;
    use std::time::Duration;

    const LINE: &str = "100\t60\t12.5\t7.5\t20\t7\t-10\t-9\t0\t1\t2\t3\n";

    fn config(format: WireFormat) -> Arc<LinkConfig> {
        Arc::new(LinkConfig {
            wire_format: format,
            buffer_capacity: 8,
            send_delay_ms: 50,
            read_timeout_ms: 5,
            ..LinkConfig::default()
        })
    }

    fn start(format: WireFormat) -> (Link, LinkFaults, MemoryFeed, MemoryWriter) {
        let (feed, reader) = memory::reader(Duration::from_millis(5));
        let sink = MemoryWriter::default();
        let (link, faults) = Link::start(config(format), Box::new(reader), Box::new(sink.clone()));
        (link, faults, feed, sink)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<Arc<Snapshot>>,
        pred: impl Fn(&Snapshot) -> bool,
    ) -> Arc<Snapshot> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snap = Arc::clone(&*rx.borrow_and_update());
                if pred(&snap) {
                    return snap;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    #[tokio::test]
    async fn test_text_frames_reach_snapshot() {
        let (link, _faults, feed, _sink) = start(WireFormat::Text);
        let mut rx = link.snapshots();

        feed.send(LINE.as_bytes().to_vec()).unwrap();
        let snap = wait_for(&mut rx, |s| s.sequence == 1).await;

        let one = snap.channel(ChannelId::One);
        assert_eq!(one.trace.len(), 8);
        assert_eq!(one.trace[7].setpoint, 100.0);
        assert_eq!(one.trace[7].position, 60.0);
        assert_eq!(one.latest.unwrap().output, 12.5);
        assert_eq!(one.baseline.unwrap().kp, 500);
        assert_eq!(snap.channel(ChannelId::Two).latest.unwrap().kd, 3.0);

        // A bad line is counted and skipped, the stream continues
        feed.send(b"1\t2\t3\n".to_vec()).unwrap();
        feed.send(LINE.as_bytes().to_vec()).unwrap();
        let snap = wait_for(&mut rx, |s| s.sequence == 2).await;
        assert_eq!(snap.drops.parse_errors, 1);

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_frames_reach_snapshot() {
        let (link, _faults, feed, _sink) = start(WireFormat::Binary);
        let mut rx = link.snapshots();

        let values = [1500, 1490, 30, 3, 1, 0, -800, -790, -5, 2, 0, 1];
        let mut corrupt = PacketCodec::encode(&values);
        corrupt[3] ^= 0x10;
        feed.send(corrupt).unwrap();
        feed.send(PacketCodec::encode(&values)).unwrap();

        let snap = wait_for(&mut rx, |s| s.sequence == 1).await;
        assert!(snap.drops.decode_errors >= 1);
        assert_eq!(snap.channel(ChannelId::One).latest.unwrap().setpoint, 1500.0);
        assert_eq!(snap.channel(ChannelId::Two).latest.unwrap().position, -790.0);
        assert_eq!(snap.channel(ChannelId::One).settling_ms, None);

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_input_only_publishes_counts() {
        let (link, _faults, feed, _sink) = start(WireFormat::Text);
        let mut rx = link.snapshots();

        for _ in 0..5 {
            feed.send(b"1\t2\t3\n".to_vec()).unwrap();
        }
        let snap = wait_for(&mut rx, |s| s.drops.parse_errors == 5).await;
        assert_eq!(snap.sequence, 0);
        assert!(snap.channel(ChannelId::One).latest.is_none());

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_noise_is_counted() {
        let (link, _faults, feed, _sink) = start(WireFormat::Binary);
        let mut rx = link.snapshots();

        feed.send(vec![0x00, 0x11, 0x22, 0x5A]).unwrap();
        feed.send(vec![0x33; 10]).unwrap();
        let snap = wait_for(&mut rx, |s| s.drops.noise_bytes == 14).await;
        assert_eq!(snap.sequence, 0);
        assert_eq!(snap.drops.decode_errors, 0);

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_discards_without_queueing() {
        let (mut link, _faults, feed, _sink) = start(WireFormat::Text);
        let mut rx = link.snapshots();

        feed.send(LINE.as_bytes().to_vec()).unwrap();
        wait_for(&mut rx, |s| s.sequence == 1).await;

        link.set_paused(true);
        assert!(link.is_paused());
        wait_for(&mut rx, |s| s.health == LinkHealth::Paused).await;
        for _ in 0..3 {
            feed.send(LINE.as_bytes().to_vec()).unwrap();
        }
        // Discarded frames only move the counter
        let snap = wait_for(&mut rx, |s| s.drops.paused == 3).await;
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.health, LinkHealth::Paused);

        link.set_paused(false);
        let snap = wait_for(&mut rx, |s| s.health == LinkHealth::Running).await;
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.drops.paused, 3);

        feed.send(LINE.as_bytes().to_vec()).unwrap();
        let snap = wait_for(&mut rx, |s| s.sequence == 2).await;
        assert_eq!(snap.drops.paused, 3);

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_debounced_over_link() {
        let (link, _faults, _feed, sink) = start(WireFormat::Text);

        for raw in [100, 400, 1000] {
            link.request(ParamEvent {
                param: ParamId::Target,
                channel: ChannelId::Two,
                raw,
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sink.lines(), vec!["tar2=41720.0000".to_string()]);
        assert_eq!(link.dispatcher().sent_count(), 1);
        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_sends_nothing_pending() {
        let (link, _faults, _feed, sink) = start(WireFormat::Text);

        link.request(ParamEvent {
            param: ParamId::Kp,
            channel: ChannelId::One,
            raw: 10,
        });
        assert_eq!(link.dispatcher().pending_count(), 1);
        link.shutdown().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_fatal() {
        let (link, mut faults, feed, _sink) = start(WireFormat::Text);
        let mut rx = link.snapshots();

        drop(feed);
        let fault = tokio::time::timeout(Duration::from_secs(2), faults.next())
            .await
            .unwrap();
        assert!(matches!(fault, TransportError::Disconnected));
        wait_for(&mut rx, |s| s.health == LinkHealth::Failed).await;

        assert!(matches!(
            link.shutdown().await,
            Err(TransportError::Reader(_))
        ));
    }

    struct Rows(Arc<Mutex<Vec<TelemetryFrame>>>);

    impl Recorder for Rows {
        fn record(
            &mut self,
            _at: chrono::DateTime<Local>,
            frame: &TelemetryFrame,
        ) -> std::io::Result<()> {
            self.0.lock().unwrap().push(*frame);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_recording_follows_applied_frames() {
        let (link, _faults, feed, _sink) = start(WireFormat::Text);
        let mut rx = link.snapshots();
        let rows = Arc::new(Mutex::new(Vec::new()));

        link.start_recording(Box::new(Rows(Arc::clone(&rows))));
        feed.send(LINE.as_bytes().to_vec()).unwrap();
        feed.send(LINE.as_bytes().to_vec()).unwrap();
        wait_for(&mut rx, |s| s.sequence == 2).await;

        link.stop_recording();
        feed.send(LINE.as_bytes().to_vec()).unwrap();
        wait_for(&mut rx, |s| s.sequence == 3).await;

        assert_eq!(rows.lock().unwrap().len(), 2);
        assert_eq!(rows.lock().unwrap()[0].values()[0], 100.0);
        link.shutdown().await.unwrap();
    }
}
