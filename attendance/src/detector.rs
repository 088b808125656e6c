use serde::{Deserialize, Serialize};

/// Pixel-space rectangle around a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A face found in a frame together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: BoundingBox,

    /// Raw embedding as produced by the model; the engine normalizes it.
    pub embedding: Vec<f32>,
}

/// Finds faces in a camera frame and embeds each one.
///
/// The engine never looks inside a frame; it only needs the embeddings,
/// which must have [`FaceDetector::dimension`] components and come from the
/// same model that produced the gallery references.
///
/// # Thread Safety
///
/// Implementations must be safe for concurrent use; one detector is
/// typically shared by every camera task.
pub trait FaceDetector: Send + Sync {
    type Frame;

    fn detect_faces(&self, frame: &Self::Frame) -> Result<Vec<DetectedFace>, String>;

    /// Returns the dimensionality of the embeddings (e.g., 512).
    fn dimension(&self) -> usize;
}
