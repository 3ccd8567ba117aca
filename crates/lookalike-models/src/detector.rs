//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. The same model
//! serves as face locator on full images and as landmark extractor on
//! face crops.

use crate::tensor::{letterbox_tensor, Letterbox};
use image::RgbImage;
use lookalike_core::inference::{FaceLocator, InferenceError, LandmarkExtractor};
use lookalike_core::types::{BoundingBox, Landmarks};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KEYPOINTS: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<DetectorError> for InferenceError {
    fn from(e: DetectorError) -> Self {
        InferenceError::Model {
            model: "scrfd",
            message: e.to_string(),
        }
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

pub struct ScrfdDetector {
    session: Session,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output mapping");

        Ok(Self { session, stride_indices })
    }

    /// All faces in `image`, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = letterbox_tensor(image, SCRFD_INPUT_SIZE, SCRFD_MEAN, |_, v| {
            (v - SCRFD_MEAN) / SCRFD_STD
        });

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "kps")?;
            candidates.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD))
    }
}

impl FaceLocator for ScrfdDetector {
    fn detect_face_bounds(
        &mut self,
        image: &RgbImage,
    ) -> Result<Option<BoundingBox>, InferenceError> {
        Ok(self.detect(image)?.into_iter().next())
    }
}

impl LandmarkExtractor for ScrfdDetector {
    fn extract_landmarks(&mut self, face: &RgbImage) -> Result<Option<Landmarks>, InferenceError> {
        let top = self.detect(face)?.into_iter().next();
        Ok(top.and_then(|b| normalized_keypoints(&b, face.width(), face.height())))
    }
}

/// Keypoints of `face` as fractions of the crop size, flattened x0,y0,x1,y1...
fn normalized_keypoints(face: &BoundingBox, width: u32, height: u32) -> Option<Landmarks> {
    let points = face.landmarks.as_ref()?;
    let (w, h) = (width as f32, height as f32);
    Some(Landmarks(points.iter().flat_map(|&(x, y)| [x / w, y / h]).collect()))
}

/// Map output tensors to strides by name ("score_8", "bbox_16", ...), or
/// fall back to positional order [scores 8/16/32, bboxes, kps].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named.and_then(|v| <[StrideOutputIndices; 3]>::try_from(v).ok()) {
        Some(indices) => indices,
        None => {
            tracing::info!(?names, "SCRFD output names not recognised, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode the anchors of one stride that score above `threshold`, in
/// source image coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= threshold {
            continue;
        }
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * s;
        let ay = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.to_source(ax - offsets[0] * s, ay - offsets[1] * s);
        let (x2, y2) = letterbox.to_source(ax + offsets[2] * s, ay + offsets[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 2 * SCRFD_KEYPOINTS).map(|k| {
            std::array::from_fn(|i| letterbox.to_source(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    detections
}

/// Greedy non-maximum suppression. Output is sorted by confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    fn identity_letterbox() -> Letterbox {
        Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 }
    }

    #[test]
    fn test_iou() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &make_bbox(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
        // 5x10 overlap over a 150 union
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_most_confident_of_overlap() {
        let detections = vec![
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = nms(detections, 0.4);
        let conf: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(conf, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let stride = 32;
        let cells = (SCRFD_INPUT_SIZE / stride).pow(2) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; cells];
        let mut bboxes = vec![0.0; cells * 4];
        let mut kps = vec![0.0; cells * 10];

        // Anchor 43 sits in cell 21: column 1, row 1 of the 20-wide grid.
        let idx = 43;
        scores[idx] = 0.95;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.5, 1.0, 1.0]);
        kps[idx * 10..idx * 10 + 2].copy_from_slice(&[0.25, 0.25]);

        let dets = decode_stride(&scores, &bboxes, &kps, stride, &identity_letterbox(), 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y), (16.0, 16.0));
        assert_eq!((d.width, d.height), (48.0, 48.0));
        let lms = d.landmarks.unwrap();
        assert_eq!(lms[0], (40.0, 40.0));
        assert_eq!(lms[4], (32.0, 32.0));
    }

    #[test]
    fn test_decode_stride_respects_letterbox() {
        let lb = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 160.0 };
        let scores = [0.9, 0.0];
        let bboxes = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let dets = decode_stride(&scores, &bboxes, &[], 32, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        assert_eq!((dets[0].x, dets[0].y), (0.0, -80.0));
        assert_eq!(dets[0].width, 16.0);
        assert!(dets[0].landmarks.is_none(), "missing kps tensor");
    }

    #[test]
    fn test_normalized_keypoints() {
        let mut face = make_bbox(0.0, 0.0, 100.0, 50.0, 0.9);
        assert!(normalized_keypoints(&face, 100, 50).is_none());

        face.landmarks = Some([(10.0, 5.0), (90.0, 5.0), (50.0, 25.0), (20.0, 45.0), (80.0, 45.0)]);
        let lms = normalized_keypoints(&face, 100, 50).unwrap();
        assert_eq!(lms.0.len(), 10);
        assert_eq!(&lms.0[..4], &[0.1, 0.1, 0.9, 0.1]);
        assert_eq!(&lms.0[8..], &[0.8, 0.9]);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ScrfdDetector::load(Path::new("/nonexistent/det_10g.onnx")).err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
