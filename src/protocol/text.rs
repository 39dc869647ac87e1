// Line-oriented telemetry protocol used over serial
//
// Line format: 12 tab-separated decimals, newline-terminated:
// sp1 pos1 out1 kp1 ki1 kd1 sp2 pos2 out2 kp2 ki2 kd2
// There is no checksum at this layer; integrity comes from line framing.

use crate::config::TELEMETRY_VALUES;
use crate::messages::TelemetryFrame;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Field {index} is not a number: {value:?}")]
    InvalidNumber { index: usize, value: String },

    #[error("Line is not valid UTF-8")]
    Encoding,

    #[error("Line exceeds {limit} bytes without a newline")]
    LineTooLong { limit: usize },
}

pub struct TelemetryFrameParser;

impl TelemetryFrameParser {
    /// Parse one line into a frame. Either every field parses or nothing is returned.
    pub fn parse(line: &str) -> Result<TelemetryFrame, ParseError> {
        let parts: Vec<&str> = line.trim().split('\t').collect();
        if parts.len() != TELEMETRY_VALUES {
            return Err(ParseError::FieldCount {
                expected: TELEMETRY_VALUES,
                actual: parts.len(),
            });
        }

        let mut fields = [0.0; TELEMETRY_VALUES];
        for (index, (slot, part)) in fields.iter_mut().zip(&parts).enumerate() {
            *slot = part
                .trim()
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidNumber {
                    index,
                    value: part.to_string(),
                })?;
        }

        Ok(TelemetryFrame::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChannelId;

    fn line(fields: &[&str]) -> String {
        fields.join("\t")
    }

    #[test]
    fn test_parse_keeps_field_order() {
        let input = "1500\t1497.5\t-12.5\t3.2\t0.8\t0.05\t-200\t-180\t40\t2\t1\t0";
        let frame = TelemetryFrameParser::parse(input).unwrap();

        assert_eq!(
            frame.values(),
            &[1500.0, 1497.5, -12.5, 3.2, 0.8, 0.05, -200.0, -180.0, 40.0, 2.0, 1.0, 0.0]
        );
        assert_eq!(frame.channel(ChannelId::Two).position, -180.0);
    }

    #[test]
    fn test_parse_tolerates_line_ending() {
        let input = format!("{}\r\n", line(&["0"; 12]));
        assert!(TelemetryFrameParser::parse(&input).is_ok());
    }

    #[test]
    fn test_wrong_arity() {
        assert_eq!(
            TelemetryFrameParser::parse(&line(&["1"; 11])),
            Err(ParseError::FieldCount {
                expected: 12,
                actual: 11
            })
        );
        assert_eq!(
            TelemetryFrameParser::parse(&line(&["1"; 13])),
            Err(ParseError::FieldCount {
                expected: 12,
                actual: 13
            })
        );
    }

    #[test]
    fn test_bad_number() {
        let mut fields = ["1"; 12];
        fields[4] = "1.2.3";
        assert_eq!(
            TelemetryFrameParser::parse(&line(&fields)),
            Err(ParseError::InvalidNumber {
                index: 4,
                value: "1.2.3".to_string()
            })
        );

        // Firmware boot banner on the same port
        assert!(TelemetryFrameParser::parse("ets Jun  8 2016 00:22:57").is_err());
    }

    #[test]
    fn test_spaces_are_not_separators() {
        let input = "1 2 3 4 5 6 7 8 9 10 11 12";
        assert!(matches!(
            TelemetryFrameParser::parse(input),
            Err(ParseError::FieldCount { actual: 1, .. })
        ));
    }
}
