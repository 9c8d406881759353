//! Frame-by-frame cell lineage tracking for segmented microscopy image sequences.
//!
//! Segmentation channels are turned into [`Cell`]s on a [`Frame`], a
//! [`Tracker`] links each frame's cells to their predecessors, and the
//! [`TrackAssembler`] compiles the accepted links into lineage [`Track`]s,
//! including divisions.

mod error;

pub mod integration;
pub mod model;
pub mod segmentation;
pub mod tracker;

pub use error::TrackingError;

pub type Result<T> = std::result::Result<T, TrackingError>;

pub use integration::{
    FeatureExtractor, FeatureRegistry, PipelineConfig, SegmentationBuilder, SegmentationSource,
    TrackingPipeline,
};
pub use model::{BoundingBox, Cell, CellState, Compartment, FeatureValue, Frame, PackedMask};
pub use segmentation::{
    Channel, ConsistencyWarning, CorrectionConfig, CorrectionReport, Segmentation,
    TemporalCorrector,
};
pub use tracker::{
    Association, CellRef, GlobalMatchingTracker, Lineage, Track, TrackAssembler, TrackId,
    Tracker, TrackerConfig, TrackerKind, assemble,
};
