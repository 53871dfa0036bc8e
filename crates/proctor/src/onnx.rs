//! ONNX-backed face detector and head pose estimator (tract runtime)
//!
//! Both models take planar BGR `f32` input in the 0..255 range, the layout
//! of the OpenVINO `face-detection-adas` / `head-pose-estimation-adas`
//! families exported to ONNX.

use std::path::Path;

use frame_decode::RasterFrame;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::detector::{FaceBox, FaceFilter, FaceLocator, HeadPose, PoseEstimator};
use crate::DetectionError;

type OnnxPlan = TypedRunnableModel<TypedModel>;

/// Values per SSD detection row: image_id, label, conf, xmin, ymin, xmax, ymax
const DETECTION_ROW: usize = 7;

fn load_error(path: &Path, e: impl std::fmt::Display) -> DetectionError {
    DetectionError::ModelLoad(format!("{}: {}", path.display(), e))
}

/// Output names as declared by the ONNX graph, in output order
fn declared_outputs(model: &InferenceModel) -> TractResult<Vec<String>> {
    Ok(model
        .output_outlets()?
        .iter()
        .map(|outlet| {
            model
                .outlet_label(*outlet)
                .map(str::to_string)
                .unwrap_or_else(|| model.node(outlet.node).name.clone())
        })
        .collect())
}

/// Runnable plan plus the declared output names. Names are read before
/// optimization, which may rename or fuse the producing nodes.
fn load_plan(path: &Path, width: usize, height: usize) -> Result<(OnnxPlan, Vec<String>), DetectionError> {
    info!("Loading ONNX model from {} ({}x{})", path.display(), width, height);
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .and_then(|model| model.with_input_fact(0, f32::fact([1, 3, height, width]).into()))
        .map_err(|e| load_error(path, e))?;
    let outputs = declared_outputs(&model).map_err(|e| load_error(path, e))?;
    let plan = model
        .into_optimized()
        .and_then(|model| model.into_runnable())
        .map_err(|e| load_error(path, e))?;
    Ok((plan, outputs))
}

/// Resize and lay out a frame as a 1x3xHxW BGR tensor
fn bgr_planar_tensor(frame: &RasterFrame, width: u32, height: u32) -> Result<Tensor, DetectionError> {
    let resized = frame.resize(width, height);
    let plane = (width as usize) * (height as usize);
    let mut data = vec![0f32; plane * 3];
    for (i, px) in resized.data.chunks_exact(3).enumerate() {
        data[i] = px[2] as f32;
        data[plane + i] = px[1] as f32;
        data[2 * plane + i] = px[0] as f32;
    }
    Tensor::from_shape(&[1, 3, height as usize, width as usize], &data)
        .map_err(|e| DetectionError::Inference(e.to_string()))
}

/// Parse SSD rows into pixel-space boxes
fn parse_detections(raw: &[f32], frame_width: u32, frame_height: u32) -> Vec<FaceBox> {
    let fw = frame_width as f32;
    let fh = frame_height as f32;
    raw.chunks_exact(DETECTION_ROW)
        // image_id < 0 terminates the detection list
        .take_while(|row| row[0] >= 0.0)
        .map(|row| {
            let (xmin, ymin) = (row[3] * fw, row[4] * fh);
            let (xmax, ymax) = (row[5] * fw, row[6] * fh);
            FaceBox::new(xmin, ymin, xmax - xmin, ymax - ymin, row[2])
        })
        .collect()
}

/// Face detector running an SSD-style ONNX model
pub struct OnnxFaceLocator {
    plan: OnnxPlan,
    input_width: u32,
    input_height: u32,
    filter: FaceFilter,
}

impl OnnxFaceLocator {
    pub fn from_path(
        path: impl AsRef<Path>,
        input_width: u32,
        input_height: u32,
        filter: FaceFilter,
    ) -> Result<Self, DetectionError> {
        let (plan, _) = load_plan(path.as_ref(), input_width as usize, input_height as usize)?;
        Ok(Self {
            plan,
            input_width,
            input_height,
            filter,
        })
    }
}

impl FaceLocator for OnnxFaceLocator {
    fn locate(&self, frame: &RasterFrame) -> Result<Vec<FaceBox>, DetectionError> {
        let input = bgr_planar_tensor(frame, self.input_width, self.input_height)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let first = outputs
            .first()
            .ok_or_else(|| DetectionError::OutputContract("face model produced no outputs".into()))?;
        let raw = first
            .as_slice::<f32>()
            .map_err(|e| DetectionError::OutputContract(e.to_string()))?;
        if raw.len() % DETECTION_ROW != 0 {
            return Err(DetectionError::OutputContract(format!(
                "detection output length {} is not a multiple of {}",
                raw.len(),
                DETECTION_ROW
            )));
        }

        let boxes = self
            .filter
            .apply(parse_detections(raw, frame.width, frame.height), frame.width, frame.height);
        debug!("Located {} face(s)", boxes.len());
        Ok(boxes)
    }
}

/// Index of each Euler angle within the model outputs, resolved by name
#[derive(Debug, Clone, Copy, PartialEq)]
struct AngleOutputs {
    yaw: usize,
    pitch: usize,
    roll: usize,
}

impl AngleOutputs {
    /// Match `angle_y*`, `angle_p*`, `angle_r*`. Order is never guessed.
    fn resolve(names: &[String]) -> Result<Self, DetectionError> {
        let find = |prefix: &str| {
            names
                .iter()
                .position(|n| n.contains(prefix))
                .ok_or_else(|| {
                    DetectionError::OutputContract(format!(
                        "pose model has no output named like '{}' (outputs: {:?})",
                        prefix, names
                    ))
                })
        };
        Ok(Self {
            yaw: find("angle_y")?,
            pitch: find("angle_p")?,
            roll: find("angle_r")?,
        })
    }
}

/// Head pose estimator running a three-output ONNX model
pub struct OnnxPoseEstimator {
    plan: OnnxPlan,
    input_width: u32,
    input_height: u32,
    outputs: AngleOutputs,
}

impl OnnxPoseEstimator {
    pub fn from_path(
        path: impl AsRef<Path>,
        input_width: u32,
        input_height: u32,
    ) -> Result<Self, DetectionError> {
        let (plan, names) = load_plan(path.as_ref(), input_width as usize, input_height as usize)?;
        let outputs = AngleOutputs::resolve(&names)?;

        Ok(Self {
            plan,
            input_width,
            input_height,
            outputs,
        })
    }
}

impl PoseEstimator for OnnxPoseEstimator {
    fn estimate(&self, frame: &RasterFrame, face: &FaceBox) -> Result<HeadPose, DetectionError> {
        let (x, y, w, h) = face.pixel_region();
        let crop = frame.crop(x, y, w, h).ok_or_else(|| {
            DetectionError::InvalidRegion(format!(
                "{}x{} at ({}, {}) outside {}x{} frame",
                w, h, x, y, frame.width, frame.height
            ))
        })?;

        let input = bgr_planar_tensor(&crop, self.input_width, self.input_height)?;
        let results = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let angle = |idx: usize| -> Result<f32, DetectionError> {
            results
                .get(idx)
                .and_then(|t| t.as_slice::<f32>().ok())
                .and_then(|s| s.first().copied())
                .ok_or_else(|| DetectionError::OutputContract(format!("pose output {} is empty", idx)))
        };

        Ok(HeadPose::new(
            angle(self.outputs.yaw)?,
            angle(self.outputs.pitch)?,
            angle(self.outputs.roll)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detections_scales_and_stops() {
        let raw = [
            0.0, 1.0, 0.9, 0.25, 0.25, 0.75, 0.75, //
            0.0, 1.0, 0.4, 0.0, 0.0, 0.1, 0.1, //
            -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.9, 0.0, 0.0, 0.5, 0.5,
        ];
        let boxes = parse_detections(&raw, 400, 200);

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0], FaceBox::new(100.0, 50.0, 200.0, 100.0, 0.9));
        assert_eq!(boxes[1].confidence, 0.4);
    }

    #[test]
    fn test_angle_outputs_by_name() {
        let names = vec![
            "angle_r_fc".to_string(),
            "angle_y_fc".to_string(),
            "angle_p_fc".to_string(),
        ];
        let outputs = AngleOutputs::resolve(&names).unwrap();
        assert_eq!(outputs, AngleOutputs { yaw: 1, pitch: 2, roll: 0 });
    }

    #[test]
    fn test_angle_outputs_never_guess_order() {
        let names = vec!["out0".to_string(), "out1".to_string(), "out2".to_string()];
        let err = AngleOutputs::resolve(&names).unwrap_err();
        assert!(matches!(err, DetectionError::OutputContract(_)));
    }

    #[test]
    fn test_bgr_planar_layout() {
        let frame = RasterFrame::filled(4, 2, [10, 20, 30]);
        let tensor = bgr_planar_tensor(&frame, 4, 2).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);

        let data = tensor.as_slice::<f32>().unwrap();
        assert_eq!(data[0], 30.0);
        assert_eq!(data[8], 20.0);
        assert_eq!(data[16], 10.0);
    }

    #[test]
    fn test_declared_outputs_use_graph_labels() {
        // node names differ from the declared tensor names
        let mut model = InferenceModel::default();
        let mut outlets = Vec::new();
        for (node, label) in [("fc_1", "angle_p_fc"), ("fc_2", "angle_r_fc"), ("fc_3", "angle_y_fc")] {
            let outlet = model.add_source(node, f32::fact([1, 1]).into()).unwrap();
            model.set_outlet_label(outlet, label.to_string()).unwrap();
            outlets.push(outlet);
        }
        model.set_output_outlets(&outlets).unwrap();

        let names = declared_outputs(&model).unwrap();
        assert_eq!(names, vec!["angle_p_fc", "angle_r_fc", "angle_y_fc"]);
        assert_eq!(
            AngleOutputs::resolve(&names).unwrap(),
            AngleOutputs { yaw: 2, pitch: 0, roll: 1 }
        );
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let result = OnnxFaceLocator::from_path("/nonexistent/face.onnx", 672, 384, FaceFilter::default());
        assert!(matches!(result, Err(DetectionError::ModelLoad(_))));
    }
}
