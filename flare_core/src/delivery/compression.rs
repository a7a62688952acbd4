/**
 * Gzip codec for batch payloads.
 *
 * Payloads below `threshold_bytes` are sent as-is. Larger ones are gzipped
 * and wrapped as `{"compressed": true, "data": "<base64>"}` by the caller.
 * A compression failure never blocks delivery: the caller falls back to the
 * uncompressed body.
 */
use std::io::{Read, Write};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::config::CompressionConfig;
use crate::error::CompressionError;
use crate::protocol::types::CompressedBody;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompressionStats {
    pub total_compressions: u64,
    pub bytes_saved: i64,

    /// Running mean of `compressed / original`.
    pub average_ratio: f64,
}

#[derive(Debug)]
pub struct CompressionCodec {
    threshold: usize,
    enabled: bool,
    stats: Mutex<CompressionStats>,
}

impl CompressionCodec {
    pub fn new(config: &CompressionConfig, enabled: bool) -> Self {
        Self {
            threshold: config.threshold_bytes,
            enabled,
            stats: Mutex::new(CompressionStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn should_compress(&self, payload: &[u8]) -> bool {
        self.enabled && payload.len() >= self.threshold
    }

    pub fn compress(&self, payload: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if !self.enabled {
            return Err(CompressionError::Unsupported);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(payload)
            .and_then(|_| encoder.finish())
            .map(|compressed| {
                self.record(payload.len(), compressed.len());
                compressed
            })
            .map_err(|e| CompressionError::Corrupt(e.to_string()))
    }

    pub fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if !self.enabled {
            return Err(CompressionError::Unsupported);
        }

        let mut out = Vec::new();
        GzDecoder::new(compressed)
            .read_to_end(&mut out)
            .map_err(|e| CompressionError::Corrupt(e.to_string()))?;
        Ok(out)
    }

    /// Compresses `payload` into the `{compressed, data}` wire envelope.
    pub fn encode_body(&self, payload: &[u8]) -> Result<CompressedBody, CompressionError> {
        let compressed = self.compress(payload)?;
        Ok(CompressedBody {
            compressed: true,
            data: BASE64.encode(compressed),
        })
    }

    /// Inverse of [`encode_body`](Self::encode_body).
    pub fn decode_body(&self, body: &CompressedBody) -> Result<Vec<u8>, CompressionError> {
        let raw = BASE64
            .decode(&body.data)
            .map_err(|e| CompressionError::Corrupt(e.to_string()))?;
        self.decompress(&raw)
    }

    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn record(&self, original: usize, compressed: usize) {
        if original == 0 {
            return;
        }
        if let Ok(mut stats) = self.stats.lock() {
            stats.total_compressions += 1;
            stats.bytes_saved += original as i64 - compressed as i64;

            let ratio = compressed as f64 / original as f64;
            let n = stats.total_compressions as f64;
            stats.average_ratio += (ratio - stats.average_ratio) / n;
        }
    }
}
