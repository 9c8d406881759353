//! A single contiguous region: centroid, bounding box, cropped mask and features.

use std::collections::BTreeMap;

use nalgebra::Point2;
use ndarray::{Array2, ArrayView2, s};
use serde::{Deserialize, Serialize};

use crate::model::bbox::BoundingBox;
use crate::model::mask::PackedMask;
use crate::{Result, TrackingError};

/// Value installed by a feature-extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f64>> for FeatureValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Vector(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCompartment")]
pub struct Compartment {
    /// Mean (row, col) of the region's pixels in frame coordinates
    pub centroid: Point2<f64>,
    /// Tightest box around the region
    pub bbox: BoundingBox,
    mask: PackedMask,
    features: BTreeMap<String, FeatureValue>,
}

/// Unchecked serialized form of a [`Compartment`].
#[derive(Deserialize)]
struct RawCompartment {
    centroid: Point2<f64>,
    bbox: BoundingBox,
    mask: PackedMask,
    #[serde(default)]
    features: BTreeMap<String, FeatureValue>,
}

impl TryFrom<RawCompartment> for Compartment {
    type Error = TrackingError;

    fn try_from(raw: RawCompartment) -> Result<Self> {
        if raw.mask.dim() != raw.bbox.shape() {
            return Err(TrackingError::Shape(format!(
                "mask of shape {:?} does not match bounding box {:?}",
                raw.mask.dim(),
                raw.bbox
            )));
        }
        if raw.mask.count() == 0 {
            return Err(TrackingError::Shape("mask has no foreground pixel".into()));
        }
        Ok(Self {
            centroid: raw.centroid,
            bbox: raw.bbox,
            mask: raw.mask,
            features: raw.features,
        })
    }
}

impl Compartment {
    /// Build a compartment from a full-frame boolean mask.
    ///
    /// Fails with [`TrackingError::Shape`] if the mask has no set pixel.
    pub fn from_mask(mask: ArrayView2<'_, bool>) -> Result<Self> {
        Self::from_cropped(mask, (0, 0))
    }

    /// Build a compartment from a window of a frame mask whose top-left
    /// pixel sits at `origin` in frame coordinates. The window need not be
    /// tight around the region.
    pub fn from_cropped(mask: ArrayView2<'_, bool>, origin: (usize, usize)) -> Result<Self> {
        let local = BoundingBox::enclosing(mask.indexed_iter())
            .ok_or_else(|| TrackingError::Shape("mask has no foreground pixel".into()))?;
        let cropped =
            mask.slice(s![local.row_start..local.row_end, local.col_start..local.col_end]);

        let (mut row_sum, mut col_sum, mut n) = (0.0, 0.0, 0usize);
        for ((r, c), &set) in cropped.indexed_iter() {
            if set {
                row_sum += r as f64;
                col_sum += c as f64;
                n += 1;
            }
        }

        let (row0, col0) = (origin.0 + local.row_start, origin.1 + local.col_start);
        let centroid = Point2::new(
            row0 as f64 + row_sum / n as f64,
            col0 as f64 + col_sum / n as f64,
        );
        Ok(Self {
            centroid,
            bbox: BoundingBox::new(row0, row0 + local.height(), col0, col0 + local.width()),
            mask: PackedMask::pack(cropped),
            features: BTreeMap::new(),
        })
    }

    /// The mask cropped to `bbox`.
    #[inline]
    pub fn packed_mask(&self) -> &PackedMask {
        &self.mask
    }

    /// Region mask cropped to `bbox`.
    pub fn cropped_mask(&self) -> Array2<bool> {
        self.mask.unpack()
    }

    /// Number of pixels in the region.
    #[inline]
    pub fn area(&self) -> usize {
        self.mask.count()
    }

    /// Whether the frame pixel `(r, c)` belongs to the region.
    pub fn contains(&self, r: usize, c: usize) -> bool {
        r >= self.bbox.row_start
            && c >= self.bbox.col_start
            && self.mask.get(r - self.bbox.row_start, c - self.bbox.col_start)
    }

    /// Full-size mask with the region placed back at `bbox`.
    pub fn to_mask(&self, frame_shape: (usize, usize)) -> Result<Array2<bool>> {
        self.check_fits(frame_shape)?;
        let mut out = Array2::from_elem(frame_shape, false);
        for (r, c) in self.mask.iter_set() {
            out[[self.bbox.row_start + r, self.bbox.col_start + c]] = true;
        }
        Ok(out)
    }

    /// Write `value` into every region pixel of `raster`.
    pub fn paint<T: Copy>(&self, raster: &mut Array2<T>, value: T) -> Result<()> {
        self.check_fits(raster.dim())?;
        for (r, c) in self.mask.iter_set() {
            raster[[self.bbox.row_start + r, self.bbox.col_start + c]] = value;
        }
        Ok(())
    }

    /// Insert or overwrite a feature.
    pub fn add_feature(&mut self, name: &str, value: impl Into<FeatureValue>) -> Result<()> {
        if name.is_empty() {
            return Err(TrackingError::Configuration(
                "feature name must not be empty".into(),
            ));
        }
        self.features.insert(name.to_owned(), value.into());
        Ok(())
    }

    /// Feature value stored under `name`, if any.
    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    /// All features, ordered by name.
    pub fn features(&self) -> &BTreeMap<String, FeatureValue> {
        &self.features
    }

    pub(crate) fn check_fits(&self, frame_shape: (usize, usize)) -> Result<()> {
        if self.bbox.fits_in(frame_shape) {
            Ok(())
        } else {
            Err(TrackingError::Shape(format!(
                "bounding box {:?} exceeds frame shape {:?}",
                self.bbox, frame_shape
            )))
        }
    }
}
