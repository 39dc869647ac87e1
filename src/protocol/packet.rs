// Framed binary protocol used by the BLE bridge
//
// Packet format: [0xA5, int32_le x N, Checksum, 0x5A]
// Checksum = sum(payload bytes) mod 256 (header and footer excluded)

/// Packet delimiters
pub const HEADER: u8 = 0xA5;
pub const FOOTER: u8 = 0x5A;

/// Header + checksum + footer
pub const FRAME_OVERHEAD: usize = 3;

/// Bytes per encoded value
pub const VALUE_LEN: usize = 4;

/// Validation failures, reported in the order they are checked
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame length {actual} does not match expected {expected}")]
    FrameLength { expected: usize, actual: usize },

    #[error("Invalid header: 0x{0:02X}")]
    Header(u8),

    #[error("Invalid footer: 0x{0:02X}")]
    Footer(u8),

    #[error("Checksum mismatch: expected 0x{expected:02X}, received 0x{received:02X}")]
    Checksum { expected: u8, received: u8 },

    #[error("{0} values do not fit in one frame")]
    ValueCount(usize),
}

/// A validated packet. Only constructed by encoding values or by passing every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    checksum: u8,
}

impl Packet {
    /// Wrap a payload, computing its checksum
    pub fn new(payload: Vec<u8>) -> Self {
        let checksum = PacketCodec::checksum(&payload);
        Self { payload, checksum }
    }

    /// Validate header, footer, and checksum of a raw frame of any payload length
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(DecodeError::FrameLength {
                expected: FRAME_OVERHEAD,
                actual: bytes.len(),
            });
        }
        if bytes[0] != HEADER {
            return Err(DecodeError::Header(bytes[0]));
        }
        let last = bytes[bytes.len() - 1];
        if last != FOOTER {
            return Err(DecodeError::Footer(last));
        }

        let payload = &bytes[1..bytes.len() - 2];
        let expected = PacketCodec::checksum(payload);
        let received = bytes[bytes.len() - 2];
        if expected != received {
            return Err(DecodeError::Checksum { expected, received });
        }

        Ok(Self {
            payload: payload.to_vec(),
            checksum: received,
        })
    }

    pub fn header(&self) -> u8 {
        HEADER
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    pub fn footer(&self) -> u8 {
        FOOTER
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        bytes.push(HEADER);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.checksum);
        bytes.push(FOOTER);
        bytes
    }
}

/// Encoder / decoder for int32 packets
pub struct PacketCodec;

impl PacketCodec {
    /// Checksum over payload bytes only
    pub fn checksum(payload: &[u8]) -> u8 {
        payload.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
    }

    /// Total frame length for a given value count, `None` if it overflows
    pub const fn frame_len(count: usize) -> Option<usize> {
        match count.checked_mul(VALUE_LEN) {
            Some(payload) => payload.checked_add(FRAME_OVERHEAD),
            None => None,
        }
    }

    pub fn encode(values: &[i32]) -> Vec<u8> {
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Packet::new(payload).to_bytes()
    }

    /// Decode exactly `expected_count` values. Nothing is returned from a frame
    /// that fails any check.
    pub fn decode(bytes: &[u8], expected_count: usize) -> Result<Vec<i32>, DecodeError> {
        let Some(expected) = Self::frame_len(expected_count) else {
            return Err(DecodeError::ValueCount(expected_count));
        };
        if bytes.len() != expected {
            return Err(DecodeError::FrameLength {
                expected,
                actual: bytes.len(),
            });
        }

        let packet = Packet::parse(bytes)?;
        Ok(packet
            .payload()
            .chunks_exact(VALUE_LEN)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_value_count() {
        assert_eq!(PacketCodec::frame_len(12), Some(51));
        assert_eq!(PacketCodec::frame_len(usize::MAX), None);
        assert_eq!(PacketCodec::frame_len(usize::MAX / 4 + 1), None);
        assert_eq!(
            PacketCodec::decode(&PacketCodec::encode(&[1, 2]), usize::MAX / 2),
            Err(DecodeError::ValueCount(usize::MAX / 2))
        );
    }

    #[test]
    fn test_checksum_wraps() {
        // 0x7F + 0x7F + 0x81 = 0x17F -> 0x7F
        assert_eq!(PacketCodec::checksum(&[0x7F, 0x7F, 0x81]), 0x7F);
        assert_eq!(PacketCodec::checksum(&[]), 0);
    }

    #[test]
    fn test_parse_reference_frame() {
        let packet = Packet::parse(&[0xA5, 0x7F, 0x7F, 0x81, 0x7F, 0x5A]).unwrap();
        assert_eq!(packet.payload(), &[0x7F, 0x7F, 0x81]);
        assert_eq!(packet.checksum(), 0x7F);

        let err = Packet::parse(&[0xA5, 0x7F, 0x7F, 0x81, 0x24, 0x5A]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Checksum {
                expected: 0x7F,
                received: 0x24
            }
        );
    }

    #[test]
    fn test_encode_layout() {
        let bytes = PacketCodec::encode(&[1, -2]);
        assert_eq!(
            bytes,
            vec![0xA5, 0x01, 0x00, 0x00, 0x00, 0xFE, 0xFF, 0xFF, 0xFF, 0xFC, 0x5A]
        );
        assert_eq!(Some(bytes.len()), PacketCodec::frame_len(2));
    }

    #[test]
    fn test_decode_captured_packet() {
        // Captured from the BLE bridge: two values
        let bytes = [
            0xA5, 0x00, 0x00, 0x01, 0xF4, 0xFF, 0xFF, 0xFE, 0x0C, 0xFD, 0x5A,
        ];
        let values = PacketCodec::decode(&bytes, 2).unwrap();
        assert_eq!(values, vec![-201_261_056, 218_038_271]);
    }

    #[test]
    fn test_round_trip_extremes() {
        let values = [0, 1, -1, i32::MAX, i32::MIN, 41_720, -41_720, 0x7F7F_7F7F];
        let bytes = PacketCodec::encode(&values);
        assert_eq!(PacketCodec::decode(&bytes, values.len()).unwrap(), values);

        assert_eq!(PacketCodec::decode(&PacketCodec::encode(&[]), 0).unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn test_any_payload_flip_is_checksum_error() {
        let values = [1500, -3, 77, 123_456];
        let good = PacketCodec::encode(&values);

        for i in 1..good.len() - 2 {
            let mut bad = good.clone();
            bad[i] ^= 0x01;
            match PacketCodec::decode(&bad, values.len()) {
                Err(DecodeError::Checksum { expected, received }) => {
                    assert_eq!(received, good[good.len() - 2]);
                    assert_ne!(expected, received);
                }
                other => panic!("byte {} flip gave {:?}", i, other),
            }
        }
    }

    #[test]
    fn test_check_order() {
        let good = PacketCodec::encode(&[42]);

        // Length is checked before anything else
        assert_eq!(
            PacketCodec::decode(&good[..good.len() - 1], 1),
            Err(DecodeError::FrameLength {
                expected: 7,
                actual: 6
            })
        );

        // Bad header and bad footer together: header wins
        let mut bad = good.clone();
        bad[0] = 0x00;
        let last = bad.len() - 1;
        bad[last] = 0x00;
        assert_eq!(PacketCodec::decode(&bad, 1), Err(DecodeError::Header(0x00)));

        // Bad footer and bad checksum together: footer wins
        let mut bad = good.clone();
        bad[last] = 0xFF;
        bad[last - 1] ^= 0xFF;
        assert_eq!(PacketCodec::decode(&bad, 1), Err(DecodeError::Footer(0xFF)));
    }

    #[test]
    fn test_checksum_excludes_delimiters() {
        // A checksum that (wrongly) includes header and footer must be rejected
        let payload = 1500i32.to_le_bytes();
        let wrong = PacketCodec::checksum(&payload)
            .wrapping_add(HEADER)
            .wrapping_add(FOOTER);
        let mut bytes = vec![HEADER];
        bytes.extend_from_slice(&payload);
        bytes.push(wrong);
        bytes.push(FOOTER);

        assert!(matches!(
            PacketCodec::decode(&bytes, 1),
            Err(DecodeError::Checksum { .. })
        ));
    }
}
