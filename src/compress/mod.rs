/*!
 * Whole-file compression codec: streaming zstd with a fixed level, or
 * adaptive level selection when the configured level is `0`. Decompression
 * is level-agnostic by construction: zstd frames self-describe the
 * parameters used to produce them.
 */

pub mod delta;

use std::io::{self, Read, Write};
use std::time::Instant;

use crate::error::{Error, Result};

/// Bounds for adaptive level selection: never drop below the fastest level,
/// never climb past a level where diminishing returns make the extra CPU
/// not worth it for a bulk-copy workload.
const ADAPTIVE_MIN_LEVEL: i32 = 1;
const ADAPTIVE_MAX_LEVEL: i32 = 9;
const ADAPTIVE_DEFAULT_LEVEL: i32 = 3;

/// Picks a compression level from observed history across files in a job:
/// a small piece of state a worker carries across files rather than
/// recomputing from scratch each time. Each completed file's ratio and
/// throughput nudge the next file's level up or down by one step.
#[derive(Debug, Clone)]
pub struct AdaptiveLevel {
    current: i32,
}

impl Default for AdaptiveLevel {
    fn default() -> Self {
        Self { current: ADAPTIVE_DEFAULT_LEVEL }
    }
}

impl AdaptiveLevel {
    pub fn current(&self) -> i32 {
        self.current
    }

    /// Record how the last file compressed and adjust the level used for
    /// the next one. A poor ratio (content already compressed, e.g. media
    /// or archives) steps the level down to save CPU; a strong ratio with
    /// throughput to spare steps it up.
    pub fn observe(&mut self, ratio: f64, elapsed: std::time::Duration, input_len: usize) {
        let throughput_mb_s = if elapsed.as_secs_f64() > 0.0 {
            (input_len as f64 / (1024.0 * 1024.0)) / elapsed.as_secs_f64()
        } else {
            f64::INFINITY
        };

        if ratio > 0.9 {
            // Barely compressing: not worth the CPU, back off.
            self.current = (self.current - 2).max(ADAPTIVE_MIN_LEVEL);
        } else if ratio < 0.5 && throughput_mb_s > 50.0 {
            self.current = (self.current + 1).min(ADAPTIVE_MAX_LEVEL);
        } else if throughput_mb_s < 10.0 {
            self.current = (self.current - 1).max(ADAPTIVE_MIN_LEVEL);
        }
    }
}

/// The result of compressing one file's worth of data: the compressed
/// bytes, and the level that was actually used (reported into
/// `compressionLevelSum`/`compressionAverageLevel`).
pub struct CompressOutcome {
    pub compressed: Vec<u8>,
    pub level_used: i32,
    pub elapsed: std::time::Duration,
}

/// Compress `input` at a fixed level (`level != 0`) or adaptively
/// (`level == 0`, using and advancing `adaptive`).
pub fn compress(input: &[u8], level: i32, adaptive: Option<&mut AdaptiveLevel>) -> Result<CompressOutcome> {
    let started = Instant::now();
    let level_used = if level == 0 {
        adaptive.as_deref().map(|a| a.current()).unwrap_or(ADAPTIVE_DEFAULT_LEVEL)
    } else {
        level
    };

    let compressed = zstd::bulk::compress(input, level_used)
        .map_err(|e| Error::ProtocolError(format!("compression failed: {}", e)))?;
    let elapsed = started.elapsed();

    if let Some(adaptive) = adaptive {
        if level == 0 && !input.is_empty() {
            let ratio = compressed.len() as f64 / input.len() as f64;
            adaptive.observe(ratio, elapsed, input.len());
        }
    }

    Ok(CompressOutcome { compressed, level_used, elapsed })
}

/// Decompress a zstd frame produced by [`compress`]. Level-agnostic: the
/// frame header carries everything the decoder needs.
pub fn decompress(input: &[u8], expected_size_hint: usize) -> Result<Vec<u8>> {
    zstd::bulk::decompress(input, expected_size_hint.max(input.len() * 4))
        .map_err(|e| Error::ProtocolError(format!("decompression failed: {}", e)))
}

/// Streaming compressor for staged read/compress/send pipelines where the
/// whole file should not be buffered into memory at once.
pub struct StreamCompressor<W: Write> {
    encoder: zstd::stream::Encoder<'static, W>,
}

impl<W: Write> StreamCompressor<W> {
    pub fn new(writer: W, level: i32) -> Result<Self> {
        let encoder = zstd::stream::Encoder::new(writer, level)
            .map_err(|e| Error::ProtocolError(format!("failed to start compressor: {}", e)))?;
        Ok(Self { encoder })
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.encoder.write_all(buf)
    }

    pub fn finish(self) -> Result<W> {
        self.encoder
            .finish()
            .map_err(|e| Error::ProtocolError(format!("failed to finish compressor: {}", e)))
    }
}

/// Streaming decompressor counterpart to [`StreamCompressor`].
pub struct StreamDecompressor<R: Read> {
    decoder: zstd::stream::Decoder<'static, io::BufReader<R>>,
}

impl<R: Read> StreamDecompressor<R> {
    pub fn new(reader: R) -> Result<Self> {
        let decoder = zstd::stream::Decoder::new(reader)
            .map_err(|e| Error::ProtocolError(format!("failed to start decompressor: {}", e)))?;
        Ok(Self { decoder })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}
