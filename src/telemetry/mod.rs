// Read side of the link: rolling history, settling detection, and the router
// that turns frames into renderer snapshots

pub mod ring;
pub mod router;
pub mod settling;

pub use ring::RingBuffer;
pub use router::{
    ChannelSnapshot, ChannelState, CommandBaseline, DropCounters, Snapshot, TelemetryRouter,
    TracePoint,
};
pub use settling::{SettlingState, SettlingTracker};
