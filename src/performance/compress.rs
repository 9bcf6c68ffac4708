//! Output compression
//!
//! Shrinks large textual or binary results. Payloads above the threshold
//! are compressed with gzip or zlib; textual results carry the compressed
//! bytes base64-encoded so the result type is preserved. The matching
//! decompression wrapper reverses the transformation and passes through
//! unchanged anything it cannot decode.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::trace;

use crate::error::{WorkError, WorkResult};
use crate::work::Work;

/// Compression codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// RFC 1952
    #[default]
    Gzip,
    /// RFC 1950
    Zlib,
}

/// Speed/ratio trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fastest
    Fast,
    /// Middle ground
    #[default]
    Balanced,
    /// Smallest output
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Balanced => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Compression parameters
#[derive(Debug, Clone, Copy)]
pub struct CompressConfig {
    /// Codec
    pub algorithm: CompressionAlgorithm,
    /// Trade-off
    pub level: CompressionLevel,
    /// Payloads at or below this many bytes pass through unchanged
    pub threshold: usize,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Gzip,
            level: CompressionLevel::Balanced,
            threshold: 1024,
        }
    }
}

impl CompressConfig {
    /// Gzip at balanced level above `threshold` bytes
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Select the codec
    pub fn with_algorithm(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Select the trade-off
    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }
}

/// Compress raw bytes with the configured codec
pub fn compress_bytes(data: &[u8], config: &CompressConfig) -> WorkResult<Vec<u8>> {
    let level = config.level.to_flate2();
    let result = match config.algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), level);
            encoder.write_all(data).and_then(|()| encoder.finish())
        }
        CompressionAlgorithm::Zlib => {
            let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data).and_then(|()| encoder.finish())
        }
    };
    result.map_err(WorkError::user)
}

/// Decompress raw bytes; fails if the input is not valid for the codec
pub fn decompress_bytes(data: &[u8], config: &CompressConfig) -> WorkResult<Vec<u8>> {
    let mut out = Vec::new();
    let result = match config.algorithm {
        CompressionAlgorithm::Gzip => {
            flate2::read::GzDecoder::new(data).read_to_end(&mut out)
        }
        CompressionAlgorithm::Zlib => {
            flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)
        }
    };
    result.map_err(WorkError::user)?;
    Ok(out)
}

/// Result types the compression wrappers understand
pub trait CompressiblePayload: Sized + Send {
    /// Payload size in bytes before any transformation
    fn payload_len(&self) -> usize;
    /// Compress; returns `self` unchanged when at or below the threshold
    fn compress(self, config: &CompressConfig) -> WorkResult<Self>;
    /// Reverse [`compress`](CompressiblePayload::compress); inputs that do
    /// not decode pass through unchanged
    fn decompress(self, config: &CompressConfig) -> Self;
}

impl CompressiblePayload for Vec<u8> {
    fn payload_len(&self) -> usize {
        self.len()
    }

    fn compress(self, config: &CompressConfig) -> WorkResult<Self> {
        if self.len() <= config.threshold {
            return Ok(self);
        }
        trace!(len = self.len(), "compressing binary payload");
        compress_bytes(&self, config)
    }

    fn decompress(self, config: &CompressConfig) -> Self {
        match decompress_bytes(&self, config) {
            Ok(restored) => restored,
            Err(_) => self,
        }
    }
}

impl CompressiblePayload for String {
    fn payload_len(&self) -> usize {
        self.len()
    }

    fn compress(self, config: &CompressConfig) -> WorkResult<Self> {
        if self.len() <= config.threshold {
            return Ok(self);
        }
        trace!(len = self.len(), "compressing textual payload");
        let compressed = compress_bytes(self.as_bytes(), config)?;
        Ok(BASE64.encode(compressed))
    }

    fn decompress(self, config: &CompressConfig) -> Self {
        let Ok(decoded) = BASE64.decode(self.as_bytes()) else {
            return self;
        };
        match decompress_bytes(&decoded, config) {
            Ok(restored) => match String::from_utf8(restored) {
                Ok(text) => text,
                Err(_) => self,
            },
            Err(_) => self,
        }
    }
}

impl<Args, R> Work<Args, R>
where
    Args: Send + 'static,
    R: CompressiblePayload + 'static,
{
    /// Compress results larger than the configured threshold
    pub fn compress_output(self, config: CompressConfig) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = std::sync::Arc::clone(&inner);
            Box::pin(async move { inner(args).await?.compress(&config) })
        })
    }

    /// Undo [`compress_output`](Work::compress_output) on the result
    ///
    /// Results that were below the threshold, or were never compressed,
    /// pass through unchanged.
    pub fn decompress_output(self, config: CompressConfig) -> Work<Args, R> {
        let inner = self.runner();
        Work::wrap(move |args| {
            let inner = std::sync::Arc::clone(&inner);
            Box::pin(async move { Ok(inner(args).await?.decompress(&config)) })
        })
    }
}
