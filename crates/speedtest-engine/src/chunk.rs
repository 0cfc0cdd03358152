/// Outbound transfer: fixed-size chunks of fresh random bytes.
///
/// Every chunk is refilled from a CSPRNG so transport-level compression
/// cannot inflate the measured throughput.

use std::io;

use bytes::Bytes;
use rand::RngCore;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// 64 KiB per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// One "MB" as used by the `size` query parameter.
pub const MB: u64 = 1024 * 1024;
pub const DEFAULT_DOWNLOAD_MB: i64 = 25;
pub const MAX_DOWNLOAD_MB: i64 = 100;

/// Total size and chunking of one outbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_bytes: u64,
    pub chunk_size: usize,
}

impl ChunkPlan {
    pub fn new(total_bytes: u64, chunk_size: usize) -> Self {
        Self {
            total_bytes,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Plan for a requested size in MB, clamped to `[1, max_mb]`.
    pub fn from_size_mb(requested_mb: i64, max_mb: i64) -> Self {
        let mb = requested_mb.clamp(1, max_mb.max(1)) as u64;
        Self::new(mb * MB, CHUNK_SIZE)
    }

    pub fn size_mb(&self) -> u64 {
        self.total_bytes / MB
    }

    pub fn chunk_count(&self) -> u64 {
        self.total_bytes.div_ceil(self.chunk_size as u64)
    }

    /// Length of the final chunk; a full chunk when the total divides evenly.
    pub fn last_chunk_len(&self) -> usize {
        match (self.total_bytes % self.chunk_size as u64) as usize {
            0 if self.total_bytes > 0 => self.chunk_size,
            rem => rem,
        }
    }
}

/// How a [`ChunkGenerator::write_to`] run ended.
#[derive(Debug)]
pub enum WriteOutcome {
    /// Every planned byte was written and flushed.
    Complete { bytes: u64 },
    /// The writer failed (normally the client went away). Not an error for
    /// anyone; nothing further was written.
    Interrupted { bytes: u64, error: io::Error },
}

/// Lazy, finite, non-restartable chunk sequence for one [`ChunkPlan`].
pub struct ChunkGenerator {
    plan: ChunkPlan,
    emitted: u64,
    buf: Vec<u8>,
}

impl ChunkGenerator {
    pub fn new(plan: ChunkPlan) -> Self {
        let cap = (plan.chunk_size as u64).min(plan.total_bytes) as usize;
        Self {
            plan,
            emitted: 0,
            buf: vec![0u8; cap],
        }
    }

    pub fn plan(&self) -> ChunkPlan {
        self.plan
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn remaining(&self) -> u64 {
        self.plan.total_bytes - self.emitted
    }

    /// Refill the scratch buffer with the next chunk. `None` once the plan is
    /// exhausted.
    pub fn next_chunk(&mut self) -> Option<&[u8]> {
        let len = self.remaining().min(self.plan.chunk_size as u64) as usize;
        if len == 0 {
            return None;
        }
        let chunk = &mut self.buf[..len];
        rand::rng().fill_bytes(chunk);
        self.emitted += len as u64;
        Some(chunk)
    }

    /// Write every remaining chunk, flushing after each one so the peer sees
    /// bytes as they are produced. Stops at the first write or flush failure.
    ///
    /// `on_chunk` is called with each chunk length once it has been flushed.
    pub async fn write_to<W, F>(&mut self, writer: &mut W, mut on_chunk: F) -> WriteOutcome
    where
        W: AsyncWrite + Unpin + ?Sized,
        F: FnMut(usize),
    {
        let mut written: u64 = 0;
        while let Some(chunk) = self.next_chunk() {
            let len = chunk.len();
            let result = match writer.write_all(chunk).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                return WriteOutcome::Interrupted {
                    bytes: written,
                    error,
                };
            }
            written += len as u64;
            on_chunk(len);
        }
        WriteOutcome::Complete { bytes: written }
    }
}

impl Iterator for ChunkGenerator {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.next_chunk().map(Bytes::copy_from_slice)
    }
}
