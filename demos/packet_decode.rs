// Packet inspector: READ-ONLY breakdown of one captured binary telemetry packet
//
// Prints every byte, checks header / checksum / footer, and decodes the
// little-endian int32 values. Nothing is opened or sent.
//
// Usage: cargo run --example packet_decode -- <hex> [value_count]
// Example: cargo run --example packet_decode -- A5000001F4FFFFFE0CFD5A 2

use pidlink::protocol::packet::{FOOTER, HEADER};
use pidlink::protocol::{Packet, PacketCodec};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let Some(hex) = args.next() else {
        println!("Usage: packet_decode <hex> [value_count]");
        return Ok(());
    };
    let count: usize = match args.next() {
        Some(n) => n.parse()?,
        None => pidlink::config::TELEMETRY_VALUES,
    };

    let bytes = parse_hex(&hex)?;
    println!("Raw data: {} ({} bytes)", hex, bytes.len());
    println!();

    println!("Byte breakdown:");
    for (i, b) in bytes.iter().enumerate() {
        println!("  Byte {:>2}: 0x{:02X} ({})", i, b, *b as i8);
    }
    println!();

    println!("Protocol analysis:");
    match Packet::parse(&bytes) {
        Ok(packet) => {
            println!("  Header:   0x{:02X} ✓", packet.header());
            println!("  Payload:  {} bytes", packet.payload().len());
            println!("  Checksum: 0x{:02X} ✓", packet.checksum());
            println!("  Footer:   0x{:02X} ✓", packet.footer());
        }
        Err(e) => {
            println!("  ✗ {}", e);
            if bytes.len() >= 3 {
                let payload = &bytes[1..bytes.len() - 2];
                println!(
                    "  Header 0x{:02X} (expected 0x{:02X}), footer 0x{:02X} (expected 0x{:02X})",
                    bytes[0],
                    HEADER,
                    bytes[bytes.len() - 1],
                    FOOTER
                );
                println!(
                    "  Checksum received 0x{:02X}, calculated 0x{:02X}",
                    bytes[bytes.len() - 2],
                    PacketCodec::checksum(payload)
                );
            }
        }
    }
    println!();

    match PacketCodec::frame_len(count) {
        Some(len) => println!("Decode as {} values ({} bytes expected):", count, len),
        None => println!("Decode as {} values (too many for one frame):", count),
    }
    match PacketCodec::decode(&bytes, count) {
        Ok(values) => {
            for (i, v) in values.iter().enumerate() {
                println!("  Value {:>2}: {}", i, v);
            }
        }
        Err(e) => println!("  ✗ {}", e),
    }

    Ok(())
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() {
        return Err(format!("not a hex string: {:?}", s));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("bad hex at {}: {}", i, e))
        })
        .collect()
}
