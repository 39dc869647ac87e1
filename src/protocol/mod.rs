// Wire protocols spoken by the PID controller firmware
//
// Provides:
// - Framed binary int32 packets with payload checksum (BLE bridge)
// - Tab-separated telemetry lines (serial)
// - Stream framing that turns transport reads into telemetry frames

pub mod framing;
pub mod packet;
pub mod text;

pub use framing::{FrameDecoder, SampleError};
pub use packet::{DecodeError, Packet, PacketCodec};
pub use text::{ParseError, TelemetryFrameParser};
