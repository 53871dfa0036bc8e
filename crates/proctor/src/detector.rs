//! Face location and head pose capabilities

use frame_decode::RasterFrame;
use serde::{Deserialize, Serialize};

use crate::DetectionError;

/// Face bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Box center (cx, cy)
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Integer pixel region (x, y, w, h) for cropping
    pub fn pixel_region(&self) -> (u32, u32, u32, u32) {
        let x = self.x.max(0.0).floor() as u32;
        let y = self.y.max(0.0).floor() as u32;
        let w = self.width.max(0.0).round() as u32;
        let h = self.height.max(0.0).round() as u32;
        (x, y, w, h)
    }
}

/// Head pose (Euler angles)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    /// Yaw (left-right rotation) in degrees
    pub yaw: f32,
    /// Pitch (up-down tilt) in degrees
    pub pitch: f32,
    /// Roll (side tilt) in degrees
    pub roll: f32,
}

impl HeadPose {
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }
}

/// Locates faces in a decoded frame.
///
/// Implementations return only boxes that pass their confidence and
/// relative-area filter (see [`FaceFilter`]).
pub trait FaceLocator: Send + Sync {
    fn locate(&self, frame: &RasterFrame) -> Result<Vec<FaceBox>, DetectionError>;
}

/// Estimates head pose for one face region of a frame
pub trait PoseEstimator: Send + Sync {
    fn estimate(&self, frame: &RasterFrame, face: &FaceBox) -> Result<HeadPose, DetectionError>;
}

/// Pick the largest face by area
pub fn largest_face(faces: &[FaceBox]) -> Option<FaceBox> {
    faces
        .iter()
        .copied()
        .max_by(|a, b| a.area().total_cmp(&b.area()))
}

/// Confidence and size filter applied to raw detections
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceFilter {
    pub min_confidence: f32,
    /// Minimum box area relative to the frame area
    pub min_area_ratio: f32,
}

impl Default for FaceFilter {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            min_area_ratio: 0.02,
        }
    }
}

impl FaceFilter {
    /// Clamp boxes to the frame and drop weak or tiny detections
    pub fn apply(&self, boxes: Vec<FaceBox>, frame_width: u32, frame_height: u32) -> Vec<FaceBox> {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let min_area = self.min_area_ratio * fw * fh;

        boxes
            .into_iter()
            .filter(|b| b.confidence >= self.min_confidence)
            .filter_map(|b| {
                let x1 = b.x.max(0.0);
                let y1 = b.y.max(0.0);
                let x2 = (b.x + b.width).min(fw - 1.0);
                let y2 = (b.y + b.height).min(fh - 1.0);
                let clamped = FaceBox::new(x1, y1, x2 - x1, y2 - y1, b.confidence);
                if clamped.width <= 0.0 || clamped.height <= 0.0 || clamped.area() < min_area {
                    return None;
                }
                Some(clamped)
            })
            .collect()
    }
}
