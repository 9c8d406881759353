//! Builder for creating Segmentation objects from various input formats.

use ndarray::{Array2, ArrayView2};

use crate::segmentation::{Channel, Segmentation};
use crate::{Result, TrackingError};

/// Builder for creating `Segmentation` objects from boolean masks or label
/// images.
#[derive(Debug, Clone, Default)]
pub struct SegmentationBuilder {
    shape: Option<(usize, usize)>,
    segmentation: Segmentation,
}

impl SegmentationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require every channel to have this shape.
    pub fn shape(mut self, rows: usize, cols: usize) -> Self {
        self.shape = Some((rows, cols));
        self
    }

    /// Whole-cell mask.
    pub fn cell(self, mask: Array2<bool>) -> Self {
        self.channel(Channel::Cell, mask)
    }

    /// Cytoplasm mask; becomes the outer channel when present.
    pub fn cytoplasm(self, mask: Array2<bool>) -> Self {
        self.channel(Channel::Cytoplasm, mask)
    }

    /// Nucleus mask.
    pub fn nucleus(self, mask: Array2<bool>) -> Self {
        self.channel(Channel::Nucleus, mask)
    }

    /// Set a channel from a label image; every non-zero label is foreground.
    pub fn labels(self, channel: Channel, labels: ArrayView2<'_, u32>) -> Self {
        self.channel(channel, labels.mapv(|l| l != 0))
    }

    /// Set a channel from a probability map, keeping pixels above `threshold`.
    pub fn probabilities(self, channel: Channel, map: ArrayView2<'_, f32>, threshold: f32) -> Self {
        self.channel(channel, map.mapv(|p| p > threshold))
    }

    /// Set the mask of any channel.
    pub fn channel(mut self, channel: Channel, mask: Array2<bool>) -> Self {
        self.segmentation.set_channel(channel, mask);
        self
    }

    /// Build the final `Segmentation`.
    ///
    /// All channels must share one shape: the one given to
    /// [`shape`](Self::shape), or else the shape of the first present channel.
    pub fn build(self) -> Result<Segmentation> {
        let expected = self
            .shape
            .or_else(|| self.segmentation.channels().next().map(|(_, m)| m.dim()));
        if let Some(expected) = expected {
            if expected.0 == 0 || expected.1 == 0 {
                return Err(TrackingError::Shape(format!(
                    "segmentation shape {expected:?} has no pixels"
                )));
            }
            self.segmentation.check_shape(expected)?;
        }
        Ok(self.segmentation)
    }
}
