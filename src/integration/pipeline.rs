//! TrackingPipeline for combining segmentation with lineage tracking.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::integration::features::FeatureRegistry;
use crate::integration::source::SegmentationSource;
use crate::model::Frame;
use crate::segmentation::{
    ConsistencyWarning, CorrectionConfig, CorrectionReport, Segmentation, TemporalCorrector,
};
use crate::tracker::{Lineage, TrackAssembler, Tracker, TrackerKind};
use crate::{Result, TrackingError};

/// Everything needed to set up a [`TrackingPipeline`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tracker: TrackerKind,
    /// Temporal correction is skipped when `None`.
    pub correction: Option<CorrectionConfig>,
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the tracker and correction settings.
    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        if let Some(correction) = &self.correction {
            correction.validate()?;
        }
        Ok(())
    }
}

/// Runs correction, cell extraction, feature installation and lineage
/// assembly over a stream of frames.
///
/// The first fatal error stops the pipeline; it is returned with the index
/// of the frame that caused it and every later call fails.
pub struct TrackingPipeline {
    corrector: Option<TemporalCorrector>,
    features: FeatureRegistry,
    assembler: TrackAssembler<Box<dyn Tracker>>,
    warnings: Vec<(usize, ConsistencyWarning)>,
    halted: bool,
}

impl TrackingPipeline {
    /// Build the tracker and optional corrector described by `config`.
    ///
    /// No features are extracted until [`TrackingPipeline::with_features`] is used.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let corrector = config
            .correction
            .clone()
            .map(TemporalCorrector::new)
            .transpose()?;
        Ok(Self {
            corrector,
            features: FeatureRegistry::default(),
            assembler: TrackAssembler::new(config.tracker.build()?),
            warnings: Vec::new(),
            halted: false,
        })
    }

    /// Create a pipeline with the default global-matching tracker and no correction.
    pub fn with_default_config() -> Result<Self> {
        Self::new(&PipelineConfig::default())
    }

    /// Install `features` on every extracted cell.
    pub fn with_features(mut self, features: FeatureRegistry) -> Self {
        self.features = features;
        self
    }

    /// Number of frames processed so far.
    pub fn frame_count(&self) -> usize {
        self.assembler.frame_count()
    }

    /// Consistency warnings collected so far, tagged with their frame index.
    pub fn warnings(&self) -> &[(usize, ConsistencyWarning)] {
        &self.warnings
    }

    /// Correction counts, or `None` when correction is disabled.
    pub fn correction_report(&self) -> Option<&CorrectionReport> {
        self.corrector.as_ref().map(TemporalCorrector::report)
    }

    /// Process one frame given its raster and segmentation.
    pub fn push(&mut self, raster: Array2<f32>, segmentation: Segmentation) -> Result<()> {
        self.ingest(Frame::new(raster), segmentation)
    }

    /// Segment the raster with `source`, then process it like [`push`](Self::push).
    pub fn process_frame<S: SegmentationSource>(
        &mut self,
        source: &mut S,
        raster: Array2<f32>,
    ) -> Result<()> {
        self.check_running()?;
        let frame = Frame::new(raster);
        match source.segment(&frame) {
            Ok(segmentation) => self.ingest(frame, segmentation),
            Err(e) => Err(self.fail(TrackingError::Source(Box::new(e)))),
        }
    }

    /// Push every `(raster, segmentation)` pair and compile the lineage.
    pub fn run<I>(mut self, frames: I) -> Result<Lineage>
    where
        I: IntoIterator<Item = (Array2<f32>, Segmentation)>,
    {
        for (raster, segmentation) in frames {
            self.push(raster, segmentation)?;
        }
        Ok(self.finish())
    }

    /// Compile the tracks of every frame processed so far.
    pub fn finish(self) -> Lineage {
        if !self.warnings.is_empty() {
            info!(warnings = self.warnings.len(), "pipeline finished with consistency warnings");
        }
        self.assembler.finish()
    }

    fn ingest(&mut self, mut frame: Frame, segmentation: Segmentation) -> Result<()> {
        self.check_running()?;
        let frame_index = self.assembler.frame_count();
        let prepared = self.prepare(&mut frame, segmentation);
        let warnings = match prepared {
            Ok(w) => w,
            Err(e) => return Err(self.fail(e)),
        };
        self.assembler
            .push_frame(frame)
            .map_err(|e| self.fail(e))?;
        self.warnings
            .extend(warnings.into_iter().map(|w| (frame_index, w)));
        Ok(())
    }

    fn prepare(
        &mut self,
        frame: &mut Frame,
        segmentation: Segmentation,
    ) -> Result<Vec<ConsistencyWarning>> {
        segmentation.check_shape(frame.shape())?;
        let segmentation = match &mut self.corrector {
            Some(corrector) => corrector.push(segmentation)?,
            None => segmentation,
        };
        let warnings = frame.add_cells_from_segmentation(&segmentation)?;
        self.features.apply(frame)?;
        Ok(warnings)
    }

    fn check_running(&self) -> Result<()> {
        if self.halted {
            return Err(TrackingError::Protocol(
                "pipeline halted by an earlier fatal error",
            ));
        }
        Ok(())
    }

    fn fail(&mut self, error: TrackingError) -> TrackingError {
        self.halted = true;
        let error = error.at_frame(self.assembler.frame_count());
        warn!(%error, "tracking pipeline stopped");
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::SegmentationBuilder;
    use crate::model::CellState;
    use crate::tracker::TrackerConfig;
    use std::ops::Range;

    fn block(shape: (usize, usize), r: Range<usize>, c: Range<usize>) -> Array2<bool> {
        Array2::from_shape_fn(shape, |(i, j)| r.contains(&i) && c.contains(&j))
    }

    fn seg(mask: Array2<bool>) -> Segmentation {
        SegmentationBuilder::new().cell(mask).build().unwrap()
    }

    #[derive(Debug, thiserror::Error)]
    #[error("model unavailable")]
    struct Offline;

    struct MockSource {
        masks: Vec<Array2<bool>>,
    }

    impl SegmentationSource for MockSource {
        type Error = Offline;

        fn segment(&mut self, _frame: &Frame) -> std::result::Result<Segmentation, Self::Error> {
            if self.masks.is_empty() {
                return Err(Offline);
            }
            Ok(seg(self.masks.remove(0)))
        }
    }

    #[test]
    fn test_config_from_json() {
        let config = PipelineConfig::from_json_str(
            r#"{"tracker": {"kind": "global_matching", "min_jaccard": 0.6},
                "correction": {"min_jaccard": 0.2}}"#,
        )
        .unwrap();
        assert_eq!(
            config.tracker,
            TrackerKind::GlobalMatching(TrackerConfig {
                min_jaccard: 0.6,
                division_min_jaccard: None,
            })
        );
        assert_eq!(config.correction.as_ref().map(|c| c.max_area_discrepancy), Some(0.5));

        assert_eq!(PipelineConfig::from_json_str("{}").unwrap(), PipelineConfig::default());
        let bad = r#"{"tracker": {"kind": "global_matching", "min_jaccard": 2.0}}"#;
        assert!(PipelineConfig::from_json_str(bad).is_err());
        assert!(matches!(
            PipelineConfig::from_json_str("not json"),
            Err(TrackingError::Json(_))
        ));
    }

    #[test]
    fn test_tracking_pipeline() {
        let mut pipeline = TrackingPipeline::with_default_config()
            .unwrap()
            .with_features(FeatureRegistry::with_defaults());
        for _ in 0..3 {
            pipeline
                .push(Array2::zeros((8, 8)), seg(block((8, 8), 2..5, 2..5)))
                .unwrap();
        }
        assert_eq!(pipeline.frame_count(), 3);
        assert!(pipeline.correction_report().is_none());

        let lineage = pipeline.finish();
        assert_eq!(lineage.tracks().len(), 1);
        assert_eq!(lineage.tracks()[0].len(), 3);
        let cell = &lineage.frames()[2].cells()[0];
        assert_eq!(cell.state(), CellState::Living);
        assert!(cell.feature("area").is_some());
    }

    #[test]
    fn test_empty_frame_stops_pipeline() {
        let mut pipeline = TrackingPipeline::with_default_config().unwrap();
        pipeline
            .push(Array2::zeros((6, 6)), seg(block((6, 6), 0..3, 0..3)))
            .unwrap();
        let err = pipeline
            .push(Array2::zeros((6, 6)), seg(Array2::from_elem((6, 6), false)))
            .unwrap_err();
        assert!(err.is_data_error());
        assert_eq!(err.frame_index(), Some(1));
        assert!(pipeline.push(Array2::zeros((6, 6)), seg(block((6, 6), 0..3, 0..3))).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let mut pipeline = TrackingPipeline::with_default_config().unwrap();
        let err = pipeline
            .push(Array2::zeros((6, 6)), seg(block((5, 6), 0..3, 0..3)))
            .unwrap_err();
        assert_eq!(err.frame_index(), Some(0));
        assert!(err.is_data_error());
    }

    #[test]
    fn test_process_frame_with_source() {
        let mut source = MockSource {
            masks: vec![block((6, 6), 1..4, 1..4), block((6, 6), 1..4, 1..5)],
        };
        let mut pipeline = TrackingPipeline::with_default_config().unwrap();
        pipeline.process_frame(&mut source, Array2::zeros((6, 6))).unwrap();
        pipeline.process_frame(&mut source, Array2::zeros((6, 6))).unwrap();

        let err = pipeline.process_frame(&mut source, Array2::zeros((6, 6))).unwrap_err();
        assert_eq!(err.frame_index(), Some(2));
        assert!(!err.is_data_error());

        let lineage = pipeline.finish();
        assert_eq!(lineage.edges().len(), 1);
        assert!((lineage.edges()[0].affinity - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_correction_is_reported() {
        let config = PipelineConfig {
            correction: Some(CorrectionConfig::default()),
            ..Default::default()
        };
        let frames = vec![
            (Array2::zeros((8, 8)), seg(block((8, 8), 0..6, 0..6))),
            (Array2::zeros((8, 8)), seg(block((8, 8), 0..6, 0..6))),
        ];
        let mut pipeline = TrackingPipeline::new(&config).unwrap();
        for (raster, s) in frames {
            pipeline.push(raster, s).unwrap();
        }
        assert_eq!(pipeline.correction_report().map(|r| r.total), Some(0));
        assert_eq!(pipeline.finish().tracks().len(), 1);
    }
}
