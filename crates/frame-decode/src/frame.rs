//! Decoded raster frame

use image::{imageops, imageops::FilterType, RgbImage};

/// Decoded RGB frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterFrame {
    /// RGB pixel data (width * height * 3), row-major
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
}

impl RasterFrame {
    /// Create a frame from raw RGB data. Returns `None` when the buffer
    /// length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) * 3 {
            return None;
        }
        Some(Self { data, width, height })
    }

    /// Solid-colour frame, mostly useful for tests and warm-up inference
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * 3)
            .collect();
        Self { data, width, height }
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Number of pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Crop a region of the frame. Empty or out-of-bounds regions yield `None`.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<RasterFrame> {
        if w == 0 || h == 0 {
            return None;
        }
        if x.checked_add(w)? > self.width || y.checked_add(h)? > self.height {
            return None;
        }

        let mut cropped = Vec::with_capacity((w as usize) * (h as usize) * 3);
        for row in y..(y + h) {
            let start = ((row as usize) * (self.width as usize) + x as usize) * 3;
            let end = start + (w as usize) * 3;
            cropped.extend_from_slice(&self.data[start..end]);
        }

        Some(RasterFrame {
            data: cropped,
            width: w,
            height: h,
        })
    }

    /// Resize with bilinear filtering
    pub fn resize(&self, new_width: u32, new_height: u32) -> RasterFrame {
        if new_width == self.width && new_height == self.height {
            return self.clone();
        }
        let resized = imageops::resize(&self.to_image(), new_width, new_height, FilterType::Triangle);
        RasterFrame {
            data: resized.into_raw(),
            width: new_width,
            height: new_height,
        }
    }

    /// Borrow-free conversion into an `image` buffer
    pub fn to_image(&self) -> RgbImage {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

impl From<RgbImage> for RasterFrame {
    fn from(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }
}
