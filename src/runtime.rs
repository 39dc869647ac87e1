// Zenoh bridge around one link session
// UI slider events and pause/resume come in over zenoh; snapshots go out at
// RENDER_HZ, only when something new was applied, and health every tick.
// A transport failure ends the session; reconnecting is a new run.

use std::error::Error;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, interval};
use tracing::{debug, error, info, warn};

// local imports
use crate::config::{
    LinkConfig, RENDER_HZ, TOPIC_CMD_LINK, TOPIC_CMD_PARAM, TOPIC_HEALTH, TOPIC_SNAPSHOT,
};
use crate::link::{Link, LinkFaults};
use crate::messages::{LinkControl, ParamEvent};
use crate::recorder::CsvRecorder;
use crate::telemetry::Snapshot;
use crate::transport::TransportError;

type BoxError = Box<dyn Error + Send + Sync>;

pub struct Bridge {
    link: Link,
    published: Option<Arc<Snapshot>>,
}

impl Bridge {
    pub fn new(link: Link) -> Self {
        Self {
            link,
            published: None,
        }
    }

    /// Forward a slider change to the debouncer
    pub fn on_param(&self, event: ParamEvent) {
        debug!("Slider {}{} -> {}", event.param, event.channel, event.raw);
        self.link.request(event);
    }

    pub fn on_control(&mut self, control: LinkControl) {
        match control {
            LinkControl::Pause => self.link.set_paused(true),
            LinkControl::Resume => self.link.set_paused(false),
        }
    }

    /// Latest snapshot, if it is not the one published last
    pub fn take_changed(&mut self) -> Option<Arc<Snapshot>> {
        let snapshot = self.link.snapshot();
        if let Some(last) = &self.published {
            if Arc::ptr_eq(last, &snapshot) {
                return None;
            }
        }
        self.published = Some(Arc::clone(&snapshot));
        Some(snapshot)
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn into_link(self) -> Link {
        self.link
    }
}

pub async fn run(config: LinkConfig, record: Option<PathBuf>) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    let (link, mut faults) = Link::open_serial(Arc::new(config))?;
    if let Some(path) = record {
        link.start_recording(Box::new(CsvRecorder::create(&path)?));
        info!("Recording to {}", path.display());
    }

    let mut bridge = Bridge::new(link);
    let outcome = serve(&session, &mut bridge, &mut faults).await;

    let closed = bridge.into_link().shutdown().await;
    outcome?;
    closed?;
    Ok(())
}

async fn serve(
    session: &zenoh::Session,
    bridge: &mut Bridge,
    faults: &mut LinkFaults,
) -> Result<(), BoxError> {
    info!("Setting up publishers and subscribers...");
    let sub_param = session.declare_subscriber(TOPIC_CMD_PARAM).await?;
    let sub_link = session.declare_subscriber(TOPIC_CMD_LINK).await?;
    let pub_snapshot = session.declare_publisher(TOPIC_SNAPSHOT).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / RENDER_HZ));

    // One signal listener for the whole session, so a ctrl-c that lands
    // while the loop body runs is still seen on the next pass
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(stop);

    info!("Bridge started: {}Hz snapshot rate", RENDER_HZ);
    info!("Subscribed to: {}, {}", TOPIC_CMD_PARAM, TOPIC_CMD_LINK);
    info!("Publishing to: {}, {}", TOPIC_SNAPSHOT, TOPIC_HEALTH);

    loop {
        match next_wake(&mut tick, faults, stop.as_mut()).await {
            Wake::Tick => {}
            Wake::Fault(fault) => {
                error!("Link failed: {}", fault);
                return Err(fault.into());
            }
            Wake::Stop => {
                info!("Interrupted, closing link");
                return Ok(());
            }
        }

        // 1. Drain pending UI events (non-blocking)
        while let Ok(Some(sample)) = sub_link.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<LinkControl>(&payload) {
                Ok(control) => bridge.on_control(control),
                Err(e) => warn!("Failed to parse link control: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_param.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<ParamEvent>(&payload) {
                Ok(event) => bridge.on_param(event),
                Err(e) => warn!("Failed to parse param event: {}", e),
            }
        }

        // 2. Publish the latest snapshot if the reader produced a new one
        if let Some(snapshot) = bridge.take_changed() {
            pub_snapshot.put(serde_json::to_string(&*snapshot)?).await?;
        }

        // 3. Publish health
        let health = bridge.link().snapshot().health;
        pub_health.put(serde_json::to_string(&health)?).await?;
    }
}

#[derive(Debug)]
enum Wake {
    Tick,
    Fault(TransportError),
    Stop,
}

/// Wait for the next reason to run the loop body. `stop` is polled across
/// calls, so it must not be re-created per pass.
async fn next_wake<F: Future<Output = ()>>(
    tick: &mut Interval,
    faults: &mut LinkFaults,
    stop: Pin<&mut F>,
) -> Wake {
    tokio::select! {
        biased;
        _ = stop => Wake::Stop,
        fault = faults.next() => Wake::Fault(fault),
        _ = tick.tick() => Wake::Tick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireFormat;
    use crate::messages::{ChannelId, LinkHealth, ParamId};
    use crate::transport::memory::{self, MemoryWriter};

    fn bridge() -> (Bridge, memory::MemoryFeed, MemoryWriter) {
        let config = Arc::new(LinkConfig {
            wire_format: WireFormat::Text,
            send_delay_ms: 20,
            read_timeout_ms: 5,
            ..LinkConfig::default()
        });
        let (feed, reader) = memory::reader(Duration::from_millis(5));
        let sink = MemoryWriter::default();
        let (link, _faults) = Link::start(config, Box::new(reader), Box::new(sink.clone()));
        (Bridge::new(link), feed, sink)
    }

    #[tokio::test]
    async fn test_snapshot_published_once_per_change() {
        let (mut bridge, feed, _sink) = bridge();

        assert!(bridge.take_changed().is_some());
        assert!(bridge.take_changed().is_none());

        let mut rx = bridge.link().snapshots();
        let _ = rx.borrow_and_update();
        feed.send(b"1\t1\t0\t0\t0\t0\t2\t2\t0\t0\t0\t0\n".to_vec())
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();

        let snapshot = bridge.take_changed().unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert!(bridge.take_changed().is_none());

        bridge.into_link().shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_seen_after_loop_body() {
        let config = Arc::new(LinkConfig {
            read_timeout_ms: 5,
            ..LinkConfig::default()
        });
        let (_feed, reader) = memory::reader(Duration::from_millis(5));
        let (link, mut faults) =
            Link::start(config, Box::new(reader), Box::new(MemoryWriter::default()));
        let mut tick = interval(Duration::from_millis(10));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let stop = async {
            let _ = rx.await;
        };
        tokio::pin!(stop);

        assert!(matches!(
            next_wake(&mut tick, &mut faults, stop.as_mut()).await,
            Wake::Tick
        ));
        // Signal arrives while the body would be running
        tx.send(()).unwrap();
        assert!(matches!(
            next_wake(&mut tick, &mut faults, stop.as_mut()).await,
            Wake::Stop
        ));

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_reach_link() {
        let (mut bridge, _feed, sink) = bridge();

        let event: ParamEvent =
            serde_json::from_str(r#"{"param":"ki","channel":1,"raw":500}"#).unwrap();
        assert_eq!(event.param, ParamId::Ki);
        assert_eq!(event.channel, ChannelId::One);
        bridge.on_param(event);

        let control: LinkControl = serde_json::from_str(r#""pause""#).unwrap();
        bridge.on_control(control);
        assert!(bridge.link().is_paused());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.lines(), vec!["ki1=20.0000".to_string()]);
        assert_eq!(bridge.link().snapshot().health, LinkHealth::Paused);

        bridge.into_link().shutdown().await.unwrap();
    }
}
