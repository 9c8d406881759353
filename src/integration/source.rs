//! Trait for segmentation inference backends.

use crate::model::Frame;
use crate::segmentation::Segmentation;

/// Trait for segmentation inference backends.
///
/// Implement this trait to connect any segmentation model to the tracking
/// pipeline. The frame handed in carries the raster and no cells yet.
///
/// # Example
///
/// ```ignore
/// use celltrack_rs::{Frame, Segmentation, SegmentationSource};
///
/// struct Threshold(f32);
///
/// impl SegmentationSource for Threshold {
///     type Error = std::convert::Infallible;
///
///     fn segment(&mut self, frame: &Frame) -> Result<Segmentation, Self::Error> {
///         Ok(Segmentation {
///             cell: Some(frame.raster().mapv(|v| v > self.0)),
///             ..Default::default()
///         })
///     }
/// }
/// ```
pub trait SegmentationSource {
    /// Error type for segmentation failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce the channels for one frame. Every returned channel must
    /// have the frame's shape.
    fn segment(&mut self, frame: &Frame) -> Result<Segmentation, Self::Error>;
}
