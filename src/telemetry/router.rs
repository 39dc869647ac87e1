// Fans decoded frames into per-channel state and produces renderer snapshots
//
// Owned and mutated by the reader thread only. Renderers never see the router,
// just the immutable `Snapshot` values it hands out.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use super::ring::RingBuffer;
use super::settling::{SettlingState, SettlingTracker};
use crate::config::{LinkConfig, ParamRanges};
use crate::messages::{ChannelFrame, ChannelId, LinkHealth, ParamId, TelemetryFrame};
use crate::protocol::SampleError;

/// One plotted sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TracePoint {
    pub setpoint: f64,
    pub position: f64,
}

/// Slider positions (0..=1000) matching the controller's reported state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBaseline {
    pub tar: u16,
    pub kp: u16,
    pub ki: u16,
    pub kd: u16,
}

impl CommandBaseline {
    pub fn from_frame(frame: &ChannelFrame, ranges: &ParamRanges) -> Self {
        Self {
            tar: ranges.tar.to_raw(frame.setpoint),
            kp: ranges.kp.to_raw(frame.kp),
            ki: ranges.ki.to_raw(frame.ki),
            kd: ranges.kd.to_raw(frame.kd),
        }
    }

    pub fn raw(&self, param: ParamId) -> u16 {
        match param {
            ParamId::Target => self.tar,
            ParamId::Kp => self.kp,
            ParamId::Ki => self.ki,
            ParamId::Kd => self.kd,
        }
    }
}

/// Units dropped by the reader, per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DropCounters {
    /// Binary packets failing length/header/footer/checksum
    pub decode_errors: u64,
    /// Text lines failing arity/number/encoding
    pub parse_errors: u64,
    /// Valid frames discarded while paused
    pub paused: u64,
    /// Binary bytes discarded while hunting for a packet header
    pub noise_bytes: u64,
}

/// Live state for one motor channel
#[derive(Debug, Clone)]
pub struct ChannelState {
    id: ChannelId,
    trace: RingBuffer<TracePoint>,
    settling: SettlingTracker,
    latest: Option<ChannelFrame>,
    baseline: Option<CommandBaseline>,
    seeded: bool,
}

impl ChannelState {
    fn new(id: ChannelId, config: &LinkConfig) -> Self {
        Self {
            id,
            trace: RingBuffer::new(config.buffer_capacity),
            settling: SettlingTracker::new(config.settling_threshold),
            latest: None,
            baseline: None,
            seeded: false,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn trace(&self) -> &RingBuffer<TracePoint> {
        &self.trace
    }

    pub fn settling(&self) -> &SettlingTracker {
        &self.settling
    }

    pub fn latest(&self) -> Option<&ChannelFrame> {
        self.latest.as_ref()
    }

    pub fn baseline(&self) -> Option<&CommandBaseline> {
        self.baseline.as_ref()
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Returns true when this sample seeded the command baseline
    fn apply(&mut self, frame: ChannelFrame, ranges: &ParamRanges, now: Instant) -> bool {
        self.trace.push(TracePoint {
            setpoint: frame.setpoint,
            position: frame.position,
        });
        self.settling.observe(frame.setpoint, frame.position, now);
        self.latest = Some(frame);

        if self.seeded {
            return false;
        }
        self.baseline = Some(CommandBaseline::from_frame(&frame, ranges));
        self.seeded = true;
        true
    }

    fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.id,
            trace: self.trace.snapshot(),
            settling_state: self.settling.state(),
            settling_ms: self.settling.elapsed().map(|d| d.as_millis() as u64),
            latest: self.latest,
            baseline: self.baseline,
        }
    }
}

/// Immutable per-channel view for the renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub channel: ChannelId,
    /// Exactly `buffer_capacity` points, oldest first
    pub trace: Vec<TracePoint>,
    pub settling_state: SettlingState,
    /// `None` renders as "unknown"
    pub settling_ms: Option<u64>,
    pub latest: Option<ChannelFrame>,
    pub baseline: Option<CommandBaseline>,
}

/// Immutable view of the whole session, published after every applied batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Frames applied so far this session
    pub sequence: u64,
    pub health: LinkHealth,
    pub drops: DropCounters,
    pub channels: [ChannelSnapshot; 2],
}

impl Snapshot {
    pub fn channel(&self, id: ChannelId) -> &ChannelSnapshot {
        &self.channels[id.index()]
    }
}

pub struct TelemetryRouter {
    ranges: ParamRanges,
    channels: [ChannelState; 2],
    sequence: u64,
    drops: DropCounters,
    health: LinkHealth,
}

impl TelemetryRouter {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            ranges: config.ranges,
            channels: ChannelId::ALL.map(|id| ChannelState::new(id, config)),
            sequence: 0,
            drops: DropCounters::default(),
            health: LinkHealth::Running,
        }
    }

    /// Apply one frame: channel 1 takes fields 0-5, channel 2 fields 6-11
    pub fn ingest(&mut self, frame: &TelemetryFrame, now: Instant) {
        for id in ChannelId::ALL {
            let channel_frame = frame.channel(id);
            if self.channels[id.index()].apply(channel_frame, &self.ranges, now) {
                info!(
                    "Channel {} seeded from controller: target={}, kp={}, ki={}, kd={}",
                    id, channel_frame.setpoint, channel_frame.kp, channel_frame.ki, channel_frame.kd
                );
            }
        }
        self.sequence += 1;
    }

    /// Count a unit that never reached the channels
    pub fn note_dropped(&mut self, error: &SampleError) {
        debug!("Dropped sample: {}", error);
        match error {
            SampleError::Decode(_) => self.drops.decode_errors += 1,
            SampleError::Parse(_) => self.drops.parse_errors += 1,
        }
    }

    pub fn note_noise(&mut self, bytes: usize) {
        if bytes > 0 {
            debug!("Skipped {} noise byte(s)", bytes);
            self.drops.noise_bytes += bytes as u64;
        }
    }

    pub fn note_paused_frame(&mut self) {
        self.drops.paused += 1;
    }

    pub fn set_health(&mut self, health: LinkHealth) {
        self.health = health;
    }

    pub fn health(&self) -> LinkHealth {
        self.health
    }

    pub fn channel(&self, id: ChannelId) -> &ChannelState {
        &self.channels[id.index()]
    }

    pub fn drops(&self) -> DropCounters {
        self.drops
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sequence: self.sequence,
            health: self.health,
            drops: self.drops,
            channels: [self.channels[0].snapshot(), self.channels[1].snapshot()],
        }
    }
}
