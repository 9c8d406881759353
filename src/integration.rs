//! Integration module for connecting segmentation producers and feature
//! extractors with the tracker.
//!
//! The pipeline in this module drives temporal correction, cell extraction,
//! feature installation and lineage assembly over a frame stream.

mod builder;
mod features;
mod pipeline;
mod source;

pub use builder::SegmentationBuilder;
pub use features::{
    Area, Centroid, FeatureExtractor, FeatureRegistry, FeatureRegistryBuilder, MeanIntensity,
    NucleusCount,
};
pub use pipeline::{PipelineConfig, TrackingPipeline};
pub use source::SegmentationSource;
