//! Pluggable per-cell feature extraction.
//!
//! Region properties proper (shape descriptors, texture and the like) are
//! left to caller-supplied extractors. The built-ins below are minimal
//! examples of the trait and cover only what the tracking model already
//! knows about a cell.

use std::collections::HashSet;

use tracing::debug;

use crate::model::{Cell, FeatureValue, Frame};
use crate::{Result, TrackingError};

/// Computes one named feature for a cell.
///
/// The value is installed on the cell's outer compartment under
/// [`name`](FeatureExtractor::name).
pub trait FeatureExtractor: Send + Sync {
    /// Key the value is stored under; unique within a registry.
    fn name(&self) -> &str;

    /// Compute the value for `cell`, which lives on `frame`.
    fn extract(&self, cell: &Cell, frame: &Frame) -> FeatureValue;
}

/// Pixel count of the outer region.
#[derive(Debug, Clone, Copy, Default)]
pub struct Area;

impl FeatureExtractor for Area {
    fn name(&self) -> &str {
        "area"
    }

    fn extract(&self, cell: &Cell, _frame: &Frame) -> FeatureValue {
        (cell.outline().area() as f64).into()
    }
}

/// `[row, col]` centroid of the outer region.
#[derive(Debug, Clone, Copy, Default)]
pub struct Centroid;

impl FeatureExtractor for Centroid {
    fn name(&self) -> &str {
        "centroid"
    }

    fn extract(&self, cell: &Cell, _frame: &Frame) -> FeatureValue {
        let c = cell.centroid();
        vec![c.x, c.y].into()
    }
}

/// Mean raster intensity over the outer region.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanIntensity;

impl FeatureExtractor for MeanIntensity {
    fn name(&self) -> &str {
        "mean_intensity"
    }

    fn extract(&self, cell: &Cell, frame: &Frame) -> FeatureValue {
        let region = cell.outline();
        let (r0, c0) = (region.bbox.row_start, region.bbox.col_start);
        let (sum, n) = region
            .packed_mask()
            .iter_set()
            .filter_map(|(r, c)| frame.raster().get([r0 + r, c0 + c]))
            .fold((0.0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
        let mean = if n == 0 { 0.0 } else { sum / n as f64 };
        mean.into()
    }
}

/// Number of nuclei attached to the cell; 2 while it divides.
#[derive(Debug, Clone, Copy, Default)]
pub struct NucleusCount;

impl FeatureExtractor for NucleusCount {
    fn name(&self) -> &str {
        "nucleus_count"
    }

    fn extract(&self, cell: &Cell, _frame: &Frame) -> FeatureValue {
        (cell.nuclei().len() as f64).into()
    }
}

/// An ordered, fixed set of extractors with unique names.
#[derive(Default)]
pub struct FeatureRegistry {
    extractors: Vec<Box<dyn FeatureExtractor>>,
}

impl FeatureRegistry {
    /// Start an empty registry.
    pub fn builder() -> FeatureRegistryBuilder {
        FeatureRegistryBuilder::default()
    }

    /// Registry with every built-in extractor.
    pub fn with_defaults() -> Self {
        Self {
            extractors: vec![
                Box::new(Area),
                Box::new(Centroid),
                Box::new(MeanIntensity),
                Box::new(NucleusCount),
            ],
        }
    }

    /// Extractor names in application order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extractors.iter().map(|e| e.name())
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Install every registered feature on every cell of `frame`.
    pub fn apply(&self, frame: &mut Frame) -> Result<()> {
        if self.extractors.is_empty() {
            return Ok(());
        }
        let snapshot: &Frame = frame;
        let values: Vec<Vec<FeatureValue>> = snapshot
            .cells()
            .iter()
            .map(|cell| self.extractors.iter().map(|e| e.extract(cell, snapshot)).collect())
            .collect();
        for (cell, row) in frame.cells_mut().iter_mut().zip(values) {
            for (extractor, value) in self.extractors.iter().zip(row) {
                cell.add_feature(extractor.name(), value)?;
            }
        }
        debug!(
            cells = frame.cells().len(),
            features = self.extractors.len(),
            "installed features"
        );
        Ok(())
    }
}

impl std::fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[derive(Default)]
pub struct FeatureRegistryBuilder {
    extractors: Vec<Box<dyn FeatureExtractor>>,
}

impl FeatureRegistryBuilder {
    /// Append an extractor; it runs after those already added.
    pub fn with<E: FeatureExtractor + 'static>(mut self, extractor: E) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    pub fn with_boxed(mut self, extractor: Box<dyn FeatureExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Fails on an empty or duplicate feature name.
    pub fn build(self) -> Result<FeatureRegistry> {
        let mut seen = HashSet::new();
        for e in &self.extractors {
            let name = e.name();
            if name.is_empty() {
                return Err(TrackingError::Configuration(
                    "feature name must not be empty".into(),
                ));
            }
            if !seen.insert(name) {
                return Err(TrackingError::Configuration(format!(
                    "feature `{name}` registered twice"
                )));
            }
        }
        Ok(FeatureRegistry {
            extractors: self.extractors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn frame() -> Frame {
        let raster = Array2::from_shape_fn((6, 6), |(r, _)| r as f32);
        let mut frame = Frame::new(raster);
        let mask =
            Array2::from_shape_fn((6, 6), |(r, c)| (1..3).contains(&r) && (2..5).contains(&c));
        frame
            .push_cell(Cell::from_masks(1, Some(mask.view()), None, None).unwrap())
            .unwrap();
        frame
    }

    #[test]
    fn test_default_features() {
        let mut frame = frame();
        let registry = FeatureRegistry::with_defaults();
        registry.apply(&mut frame).unwrap();

        let cell = &frame.cells()[0];
        assert_eq!(cell.feature("area"), Some(&FeatureValue::Scalar(6.0)));
        assert_eq!(cell.feature("centroid"), Some(&FeatureValue::Vector(vec![1.5, 3.0])));
        assert_eq!(cell.feature("mean_intensity"), Some(&FeatureValue::Scalar(1.5)));
        assert_eq!(cell.feature("nucleus_count"), Some(&FeatureValue::Scalar(0.0)));
    }

    struct Constant(&'static str);

    impl FeatureExtractor for Constant {
        fn name(&self) -> &str {
            self.0
        }

        fn extract(&self, _cell: &Cell, _frame: &Frame) -> FeatureValue {
            FeatureValue::Scalar(7.0)
        }
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let registry = FeatureRegistry::builder()
            .with(Area)
            .with(Constant("seven"))
            .build()
            .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["area", "seven"]);

        assert!(FeatureRegistry::builder().with(Area).with(Area).build().is_err());
        assert!(FeatureRegistry::builder().with(Constant("")).build().is_err());
    }
}
