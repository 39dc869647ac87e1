// Re-assembles arbitrary transport reads into protocol units
//
// Text: bytes up to each '\n' form one line.
// Binary: hunt for the 0xA5 header, then take exactly one frame length.
// A candidate that fails to decode gives up its header byte and the hunt
// restarts from the next byte, so a misaligned stream resynchronises.

use crate::config::{TELEMETRY_VALUES, WireFormat};
use crate::messages::TelemetryFrame;

use super::packet::{DecodeError, HEADER, PacketCodec};
use super::text::{ParseError, TelemetryFrameParser};

/// Longest line accepted before the buffer is discarded
pub const MAX_LINE_LEN: usize = 1024;

/// Why a unit was dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    // Dropping the tail of an oversized line until the next newline
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete, non-blank line
    pub fn next_line(&mut self) -> Option<Result<String, ParseError>> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_LINE_LEN {
                    self.buf.clear();
                    if !std::mem::replace(&mut self.discarding, true) {
                        return Some(Err(ParseError::LineTooLong {
                            limit: MAX_LINE_LEN,
                        }));
                    }
                }
                return None;
            };

            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }

            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > MAX_LINE_LEN {
                return Some(Err(ParseError::LineTooLong {
                    limit: MAX_LINE_LEN,
                }));
            }

            return Some(String::from_utf8(line).map_err(|_| ParseError::Encoding));
        }
    }
}

#[derive(Debug)]
pub struct PacketFramer {
    buf: Vec<u8>,
    values: usize,
    // Bytes thrown away while hunting for a header
    skipped: usize,
}

impl PacketFramer {
    pub fn new(values: usize) -> Self {
        Self {
            buf: Vec::new(),
            values,
            skipped: 0,
        }
    }

    /// Noise bytes discarded since the last call
    pub fn take_skipped(&mut self) -> usize {
        std::mem::take(&mut self.skipped)
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next decoded packet, or the error for one failed candidate
    pub fn next_packet(&mut self) -> Option<Result<Vec<i32>, DecodeError>> {
        match self.buf.iter().position(|&b| b == HEADER) {
            Some(start) => {
                self.skipped += start;
                self.buf.drain(..start);
            }
            None => {
                self.skipped += self.buf.len();
                self.buf.clear();
                return None;
            }
        }

        let Some(frame_len) = PacketCodec::frame_len(self.values) else {
            self.skipped += self.buf.len();
            self.buf.clear();
            return None;
        };
        if self.buf.len() < frame_len {
            return None;
        }

        match PacketCodec::decode(&self.buf[..frame_len], self.values) {
            Ok(values) => {
                self.buf.drain(..frame_len);
                Some(Ok(values))
            }
            Err(e) => {
                self.buf.drain(..1);
                Some(Err(e))
            }
        }
    }
}

/// Turns raw transport bytes into telemetry frames for either wire format
#[derive(Debug)]
pub enum FrameDecoder {
    Text(LineFramer),
    Binary(PacketFramer),
}

impl FrameDecoder {
    pub fn new(format: WireFormat, binary_values: usize) -> Self {
        match format {
            WireFormat::Text => FrameDecoder::Text(LineFramer::new()),
            WireFormat::Binary => FrameDecoder::Binary(PacketFramer::new(binary_values)),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        match self {
            FrameDecoder::Text(f) => f.push(bytes),
            FrameDecoder::Binary(f) => f.push(bytes),
        }
    }

    /// Bytes that never became a unit (binary noise) since the last call
    pub fn take_skipped(&mut self) -> usize {
        match self {
            FrameDecoder::Text(_) => 0,
            FrameDecoder::Binary(f) => f.take_skipped(),
        }
    }

    pub fn next_frame(&mut self) -> Option<Result<TelemetryFrame, SampleError>> {
        match self {
            FrameDecoder::Text(f) => {
                let line = f.next_line()?;
                Some(
                    line.and_then(|l| TelemetryFrameParser::parse(&l))
                        .map_err(SampleError::from),
                )
            }
            FrameDecoder::Binary(f) => {
                let packet = f.next_packet()?;
                Some(packet.map_err(SampleError::from).and_then(widen))
            }
        }
    }
}

/// int32 packet values -> telemetry fields, in order
fn widen(values: Vec<i32>) -> Result<TelemetryFrame, SampleError> {
    let mut fields = [0.0; TELEMETRY_VALUES];
    if values.len() != fields.len() {
        return Err(ParseError::FieldCount {
            expected: TELEMETRY_VALUES,
            actual: values.len(),
        }
        .into());
    }
    for (slot, v) in fields.iter_mut().zip(values) {
        *slot = v as f64;
    }
    Ok(TelemetryFrame::new(fields))
}
