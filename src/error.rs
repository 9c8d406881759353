//! Error taxonomy for segmentation extraction and tracking runs.

/// Unified error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// Invalid thresholds or parameters supplied at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A mask or raster has an unusable shape (empty region, wrong dimensionality).
    #[error("shape error: {0}")]
    Shape(String),

    /// An operation is not valid for the current state of a cell.
    #[error("state error: {0}")]
    State(String),

    /// Tracker methods were called out of order.
    #[error("tracker protocol violation: {0}")]
    Protocol(&'static str),

    /// The assignment solver could not solve a cost matrix.
    #[error("assignment error: {0}")]
    Assignment(String),

    /// A segmentation channel does not match the frame raster.
    #[error("channel `{channel}` has shape {found:?}, expected {expected:?}")]
    ChannelShape {
        channel: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// An outer region was associated with more than two nuclei.
    #[error("cell with more than two nuclei (label {label}, {count} associations)")]
    TooManyNuclei { label: u32, count: usize },

    /// A frame produced no cells, which breaks the index space of later frames.
    #[error("frame {frame_index} contains no cells")]
    EmptyFrame { frame_index: usize },

    /// A fatal error raised while processing a specific frame.
    #[error("tracking stopped at frame {frame_index}: {source}")]
    AtFrame {
        frame_index: usize,
        #[source]
        source: Box<TrackingError>,
    },

    /// The external segmentation producer failed.
    #[error("segmentation source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackingError {
    /// Whether this error belongs to the data-error family (bad input that
    /// aborts the whole run).
    pub fn is_data_error(&self) -> bool {
        match self {
            Self::ChannelShape { .. } | Self::TooManyNuclei { .. } | Self::EmptyFrame { .. } => {
                true
            }
            Self::AtFrame { source, .. } => source.is_data_error(),
            _ => false,
        }
    }

    /// Attach a frame index, unless one is already attached.
    pub fn at_frame(self, frame_index: usize) -> Self {
        match self {
            Self::AtFrame { .. } | Self::EmptyFrame { .. } => self,
            other => Self::AtFrame {
                frame_index,
                source: Box::new(other),
            },
        }
    }

    /// Frame index at which the error was raised, when known.
    pub fn frame_index(&self) -> Option<usize> {
        match self {
            Self::AtFrame { frame_index, .. } | Self::EmptyFrame { frame_index } => {
                Some(*frame_index)
            }
            _ => None,
        }
    }
}
