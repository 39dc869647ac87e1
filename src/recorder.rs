// Recording sink: one row per applied telemetry frame
//
// Row format: `Timestamp,Data...` header, then the wall-clock time followed by
// the 12 raw telemetry values.

use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::messages::TelemetryFrame;

pub const HEADER_ROW: &str = "Timestamp,Data...";

pub trait Recorder: Send {
    fn record(&mut self, at: DateTime<Local>, frame: &TelemetryFrame) -> io::Result<()>;
}

/// Append-only comma-separated rows, flushed after every frame
pub struct CsvRecorder<W: Write + Send> {
    out: W,
}

impl CsvRecorder<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write + Send> CsvRecorder<W> {
    /// Writes the header row immediately
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{}", HEADER_ROW)?;
        out.flush()?;
        Ok(Self { out })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Recorder for CsvRecorder<W> {
    fn record(&mut self, at: DateTime<Local>, frame: &TelemetryFrame) -> io::Result<()> {
        write!(self.out, "{}", at.format("%Y-%m-%d %H:%M:%S%.6f"))?;
        for v in frame.values() {
            write!(self.out, ",{:?}", v)?;
        }
        writeln!(self.out)?;
        self.out.flush()
    }
}
