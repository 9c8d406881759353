//! Temporal-coherence correction of segmentation noise.
//!
//! Each frame is compared with the already corrected frame before it. A
//! component whose best predecessor overlaps it only weakly and differs
//! strongly in area is treated as noise: if another component shares the
//! same predecessor the fragments are merged, otherwise it is suppressed.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2, ArrayViewMut2, Zip, s};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::segmentation::extract::{Channel, Segmentation};
use crate::segmentation::morphology::{component_areas, label_boxes, label_components};
use crate::tracker::matching::pseudo_jaccard;
use crate::{Result, TrackingError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Best-match similarity below which a component becomes a candidate.
    pub min_jaccard: f64,
    /// Relative area difference to the best match above which a candidate is corrected.
    pub max_area_discrepancy: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            min_jaccard: 0.3,
            max_area_discrepancy: 0.5,
        }
    }
}

impl CorrectionConfig {
    /// Check that thresholds lie in their valid ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_jaccard) {
            return Err(TrackingError::Configuration(format!(
                "correction min_jaccard must lie in [0, 1], got {}",
                self.min_jaccard
            )));
        }
        if !(self.max_area_discrepancy.is_finite() && self.max_area_discrepancy >= 0.0) {
            return Err(TrackingError::Configuration(format!(
                "max_area_discrepancy must be a non-negative number, got {}",
                self.max_area_discrepancy
            )));
        }
        Ok(())
    }
}

/// Corrections made per consecutive frame pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionReport {
    /// Entry `i` counts corrections applied to frame `i + 1`
    pub per_pair: Vec<usize>,
    pub total: usize,
}

/// Streaming corrector: feed segmentations in frame order.
pub struct TemporalCorrector {
    config: CorrectionConfig,
    previous: Option<Segmentation>,
    report: CorrectionReport,
}

impl TemporalCorrector {
    /// Corrector with no history; fails on an invalid config.
    pub fn new(config: CorrectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            previous: None,
            report: CorrectionReport::default(),
        })
    }

    /// Correct the segmentation of the next frame against the previous
    /// corrected one. The first frame passes through unchanged.
    pub fn push(&mut self, segmentation: Segmentation) -> Result<Segmentation> {
        let Some(prev) = self.previous.take() else {
            self.previous = Some(segmentation.clone());
            return Ok(segmentation);
        };

        let mut corrected = segmentation;
        let count = self.correct_pair(&prev, &mut corrected)?;
        self.report.per_pair.push(count);
        self.report.total += count;
        info!(
            pair = self.report.per_pair.len(),
            corrections = count,
            total = self.report.total,
            "temporal correction progress"
        );
        self.previous = Some(corrected.clone());
        Ok(corrected)
    }

    /// Corrections counted so far.
    pub fn report(&self) -> &CorrectionReport {
        &self.report
    }

    /// Correct a whole sequence.
    pub fn correct_sequence<I>(
        config: CorrectionConfig,
        segmentations: I,
    ) -> Result<(Vec<Segmentation>, CorrectionReport)>
    where
        I: IntoIterator<Item = Segmentation>,
    {
        let mut corrector = Self::new(config)?;
        let corrected = segmentations
            .into_iter()
            .map(|s| corrector.push(s))
            .collect::<Result<Vec<_>>>()?;
        Ok((corrected, corrector.report))
    }

    /// Correct every channel present in both segmentations; returns the
    /// number of corrected components.
    pub fn correct_pair(&self, prev: &Segmentation, next: &mut Segmentation) -> Result<usize> {
        let mut count = 0;
        for channel in Channel::ALL {
            let (Some(before), Some(after)) = (prev.channel(channel), next.channel_mut(channel))
            else {
                continue;
            };
            if before.dim() != after.dim() {
                return Err(TrackingError::ChannelShape {
                    channel: channel.name(),
                    expected: before.dim(),
                    found: after.dim(),
                });
            }
            let n = self.correct_channel(before.view(), after)?;
            if n > 0 {
                debug!(%channel, corrections = n, "corrected channel");
            }
            count += n;
        }
        Ok(count)
    }

    fn correct_channel(
        &self,
        prev: ArrayView2<'_, bool>,
        next: &mut Array2<bool>,
    ) -> Result<usize> {
        let (prev_labels, prev_count) = label_components(prev);
        let (next_labels, next_count) = label_components(next.view());
        if prev_count == 0 || next_count == 0 {
            return Ok(0);
        }
        let similarity =
            pseudo_jaccard(prev_labels.view(), prev_count, next_labels.view(), next_count)?;
        let prev_area = component_areas(prev_labels.view(), prev_count);
        let next_area = component_areas(next_labels.view(), next_count);
        let next_boxes = label_boxes(next_labels.view(), next_count);

        // next components grouped by best overlapping predecessor, with their noise flag
        let mut groups: BTreeMap<u32, Vec<(u32, bool)>> = BTreeMap::new();
        for (j, column) in similarity.columns().into_iter().enumerate() {
            let mut best: Option<(usize, f64)> = None;
            for (i, &s) in column.iter().enumerate() {
                if s > 0.0 && best.is_none_or(|(_, b)| s > b) {
                    best = Some((i, s));
                }
            }
            let Some((i, s)) = best else {
                continue;
            };
            let (p, q) = (i as u32 + 1, j as u32 + 1);
            let expected = prev_area[p as usize] as f64;
            let discrepancy = (next_area[q as usize] as f64 - expected).abs() / expected;
            let noisy =
                s < self.config.min_jaccard && discrepancy > self.config.max_area_discrepancy;
            groups.entry(p).or_default().push((q, noisy));
        }

        let mut corrections = 0;
        for (p, members) in groups {
            let noisy = members.iter().filter(|(_, n)| *n).count();
            if noisy == 0 {
                continue;
            }
            let labels: Vec<u32> = members.iter().map(|(q, _)| *q).collect();
            let Some(joint) = labels
                .iter()
                .filter_map(|&q| next_boxes[q as usize - 1])
                .reduce(|a, b| a.union(&b))
            else {
                continue;
            };
            let rows = joint.row_start..joint.row_end;
            let cols = joint.col_start..joint.col_end;
            let mut pixels = next.slice_mut(s![rows.clone(), cols.clone()]);
            let own = next_labels.slice(s![rows.clone(), cols.clone()]);
            if labels.len() > 1 {
                let before = prev_labels.slice(s![rows, cols]);
                merge_fragments(pixels.view_mut(), own, before, p);
                debug!(predecessor = p, fragments = labels.len(), "merged fragments");
            } else {
                pixels.zip_mut_with(&own, |px, &l| {
                    if l == labels[0] {
                        *px = false;
                    }
                });
                debug!(predecessor = p, component = labels[0], "suppressed component");
            }
            corrections += noisy;
        }
        Ok(corrections)
    }
}

/// Bridge the gaps between fragments with the predecessor's pixels.
///
/// All views cover the fragments' joint bounding box.
fn merge_fragments(
    mut next: ArrayViewMut2<'_, bool>,
    next_labels: ArrayView2<'_, u32>,
    prev_labels: ArrayView2<'_, u32>,
    predecessor: u32,
) {
    Zip::from(&mut next)
        .and(next_labels)
        .and(prev_labels)
        .for_each(|px, &l, &p| {
            if l == 0 && p == predecessor {
                *px = true;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Range;

    fn rect(shape: (usize, usize), r: Range<usize>, c: Range<usize>) -> Array2<bool> {
        Array2::from_shape_fn(shape, |(i, j)| r.contains(&i) && c.contains(&j))
    }

    fn cells(mask: Array2<bool>) -> Segmentation {
        Segmentation {
            cell: Some(mask),
            ..Default::default()
        }
    }

    fn corrector() -> TemporalCorrector {
        TemporalCorrector::new(CorrectionConfig::default()).unwrap()
    }

    #[test]
    fn test_identical_frames_need_no_correction() {
        let seg = cells(rect((8, 8), 1..5, 1..5));
        let mut next = seg.clone();
        assert_eq!(corrector().correct_pair(&seg, &mut next).unwrap(), 0);
        assert_eq!(next, seg);
    }

    #[test]
    fn test_split_fragment_is_merged() {
        let prev = cells(rect((4, 8), 0..4, 0..8));
        let mut split = rect((4, 8), 0..4, 0..5);
        split.zip_mut_with(&rect((4, 8), 0..4, 6..8), |a, &b| *a |= b);
        let mut next = cells(split);

        let n = corrector().correct_pair(&prev, &mut next).unwrap();
        assert_eq!(n, 1);
        assert_eq!(next, prev);
    }

    #[test]
    fn test_lone_fragment_is_suppressed() {
        let prev = cells(rect((8, 8), 0..6, 0..6));
        let mut next = cells(rect((8, 8), 2..4, 2..4));
        let n = corrector().correct_pair(&prev, &mut next).unwrap();
        assert_eq!(n, 1);
        assert!(next.cell.as_ref().unwrap().iter().all(|&v| !v));
    }

    #[test]
    fn test_new_arrival_is_kept() {
        let prev = cells(rect((10, 10), 0..3, 0..3));
        let mut next = cells(rect((10, 10), 7..9, 7..9));
        let expected = next.clone();
        assert_eq!(corrector().correct_pair(&prev, &mut next).unwrap(), 0);
        assert_eq!(next, expected);
    }

    #[test]
    fn test_sequence_report() {
        let a = cells(rect((8, 8), 0..6, 0..6));
        let noisy = cells(rect((8, 8), 2..4, 2..4));
        let sequence = vec![a.clone(), a.clone(), noisy];
        let (out, report) =
            TemporalCorrector::correct_sequence(CorrectionConfig::default(), sequence).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], a);
        assert_eq!(report.per_pair, vec![0, 1]);
        assert_eq!(report.total, 1);
    }

    #[test]
    fn test_channel_shape_mismatch() {
        let prev = cells(rect((4, 4), 0..2, 0..2));
        let mut next = cells(rect((4, 5), 0..2, 0..2));
        assert!(matches!(
            corrector().correct_pair(&prev, &mut next),
            Err(TrackingError::ChannelShape { .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        let bad = CorrectionConfig {
            min_jaccard: 0.2,
            max_area_discrepancy: -1.0,
        };
        assert!(TemporalCorrector::new(bad).is_err());
    }
}
