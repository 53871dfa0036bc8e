//! Frame Decoding for Visual Proctoring
//!
//! Turns transport-level webcam uploads into decoded RGB rasters:
//! - Base64 payloads, with or without a `data:image/...;base64,` prefix
//! - Raw binary buffers (JPEG, PNG, WebP, anything `image` can sniff)
//!
//! Decoding is stateless; a failure only means "could not decode".

pub mod decoder;
pub mod frame;

pub use decoder::{DecoderConfig, FrameDecoder};
pub use frame::RasterFrame;

use thiserror::Error;

/// Frame decoding error types
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Frame payload too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame too small: {width}x{height} (minimum edge {min_edge})")]
    TooSmall { width: u32, height: u32, min_edge: u32 },
}
