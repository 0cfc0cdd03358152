/// Inbound transfer: drain a byte stream, counting bytes and wall time.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::chunk::CHUNK_SIZE;
use crate::meter::speed_mbps;

/// Totals for one drained stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkReport {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl SinkReport {
    /// Elapsed milliseconds, floored to 1. The floor only guards the rate
    /// division; it is not a measurement.
    pub fn duration_ms(&self) -> u64 {
        (self.elapsed.as_millis() as u64).max(1)
    }

    /// Elapsed seconds, floored to 0.001 for the same reason.
    pub fn seconds(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 { 0.001 } else { secs }
    }

    pub fn speed_mbps(&self) -> f64 {
        speed_mbps(self.bytes, self.seconds())
    }
}

/// Reads into a fixed scratch buffer until end-of-stream. Content is ignored.
pub struct ByteSink {
    buf: Vec<u8>,
}

impl ByteSink {
    pub fn new() -> Self {
        Self::with_buffer(CHUNK_SIZE)
    }

    pub fn with_buffer(size: usize) -> Self {
        Self {
            buf: vec![0u8; size.max(1)],
        }
    }

    /// Drain `reader`. Any read error other than clean EOF is returned as-is;
    /// nothing is retried. `on_read` sees the length of every non-empty read.
    pub async fn consume<R, F>(&mut self, reader: &mut R, mut on_read: F) -> io::Result<SinkReport>
    where
        R: AsyncRead + Unpin + ?Sized,
        F: FnMut(usize),
    {
        let started = Instant::now();
        let mut bytes: u64 = 0;
        loop {
            let n = reader.read(&mut self.buf).await?;
            if n == 0 {
                break;
            }
            bytes += n as u64;
            on_read(n);
        }
        Ok(SinkReport {
            bytes,
            elapsed: started.elapsed(),
        })
    }
}

impl Default for ByteSink {
    fn default() -> Self {
        Self::new()
    }
}
