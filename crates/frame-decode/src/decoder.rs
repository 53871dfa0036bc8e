//! Transport payload decoding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::{DecodeError, RasterFrame};

/// Decoder limits
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Largest accepted encoded payload (bytes, after base64 decoding)
    pub max_encoded_bytes: usize,
    /// Smallest accepted decoded edge (pixels)
    pub min_edge: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_encoded_bytes: 8 * 1024 * 1024,
            min_edge: 32,
        }
    }
}

/// Stateless frame decoder
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    config: DecoderConfig,
}

impl FrameDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Decode a base64 payload. A `data:<mime>;base64,` prefix is stripped.
    pub fn decode_base64(&self, payload: &str) -> Result<RasterFrame, DecodeError> {
        let encoded = match payload.split_once(',') {
            Some((_, rest)) => rest,
            None => payload,
        };
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(DecodeError::Empty);
        }

        // base64 inflates by 4/3; reject before allocating
        let approx = encoded.len() / 4 * 3;
        if approx > self.config.max_encoded_bytes {
            return Err(DecodeError::TooLarge {
                size: approx,
                limit: self.config.max_encoded_bytes,
            });
        }

        let bytes = STANDARD.decode(encoded)?;
        self.decode_bytes(&bytes)
    }

    /// Decode a binary image buffer
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<RasterFrame, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        if bytes.len() > self.config.max_encoded_bytes {
            return Err(DecodeError::TooLarge {
                size: bytes.len(),
                limit: self.config.max_encoded_bytes,
            });
        }

        let img = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = img.dimensions();
        if width < self.config.min_edge || height < self.config.min_edge {
            return Err(DecodeError::TooSmall {
                width,
                height,
                min_edge: self.config.min_edge,
            });
        }

        debug!("Decoded {}x{} frame from {} bytes", width, height, bytes.len());
        Ok(RasterFrame::from(img))
    }
}
