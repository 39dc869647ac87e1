// Byte transport under the link: the serial port in production, in-memory
// channels in tests
//
// Reads are bounded by a poll timeout so the reader can notice shutdown.
// Writes go through `CommandWriter`, which serializes them.

use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link disconnected")]
    Disconnected,

    #[error("Link closed")]
    Closed,

    #[error("Reader task failed: {0}")]
    Reader(String),
}

pub trait TransportRead: Send {
    /// Read whatever is available. `Ok(0)` means the poll timeout elapsed with
    /// nothing to read; errors end the session.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

pub trait TransportWrite: Send {
    /// Write one command followed by a newline
    fn write_line(&mut self, line: &str) -> Result<(), TransportError>;
}

/// Reading half of a serial link
pub struct SerialReader {
    port: Box<dyn SerialPort>,
}

/// Writing half of a serial link
pub struct SerialWriter {
    port: Box<dyn SerialPort>,
}

/// Open a serial port and split it into independent read and write handles
pub fn open_serial(
    port_name: &str,
    baudrate: u32,
    read_timeout: Duration,
) -> Result<(SerialReader, SerialWriter), TransportError> {
    debug!("Opening serial port {} at {} baud", port_name, baudrate);
    let port = serialport::new(port_name, baudrate)
        .timeout(read_timeout)
        .open()?;
    let writer = port.try_clone()?;

    Ok((SerialReader { port }, SerialWriter { port: writer }))
}

impl TransportRead for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl TransportWrite for SerialWriter {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.port.write_all(format!("{}\n", line).as_bytes())?;
        self.port.flush()?;
        Ok(())
    }
}
