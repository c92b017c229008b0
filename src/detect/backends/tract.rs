#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Loads a local model with a `[1, 3, S, S]` input and a `[1, 4 + classes,
/// anchors]` output (center-x, center-y, width, height, then one score per
/// class). Frames are stretched to the input size; boxes are scaled back to
/// frame pixels, filtered by confidence, and deduplicated with class-agnostic
/// non-maximum suppression.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and NMS IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [batch, channels, anchors]")?;
        let channels = preds.shape()[1];
        let anchors = preds.shape()[2];
        if channels <= 4 {
            return Err(anyhow!("model output has no class scores"));
        }

        let scale_x = frame.width() as f32 / self.input_size as f32;
        let scale_y = frame.height() as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..channels - 4 {
                let score = preds[[0, 4 + class, anchor]];
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }
            let bbox = BoundingBox::from_center(
                preds[[0, 0, anchor]] * scale_x,
                preds[[0, 1, anchor]] * scale_y,
                preds[[0, 2, anchor]] * scale_x,
                preds[[0, 3, anchor]] * scale_y,
            )
            .clamp_to(frame.width(), frame.height());
            detections.push(Detection::new(bbox, best_class as u32, best_score));
        }
        Ok(non_max_suppression(detections, self.iou_threshold))
    }
}

/// Keep the highest-confidence box of every overlapping cluster.
pub(crate) fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if kept.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_strongest_of_overlapping_boxes() {
        let a = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0, 0.6);
        let b = Detection::new(BoundingBox::new(1.0, 0.0, 11.0, 10.0), 1, 0.9);
        let c = Detection::new(BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0, 0.3);
        let kept = non_max_suppression(vec![a, b.clone(), c.clone()], 0.45);
        assert_eq!(kept, vec![b, c]);
    }
}
