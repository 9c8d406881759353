//! Tracker that matches whole frames at once by optimal assignment on
//! pseudo-Jaccard similarity.

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::model::Cell;
use crate::tracker::matching::{self, AssignmentResult};
use crate::tracker::protocol::{Association, Tracker};
use crate::{Result, TrackingError};

/// Configuration for the [`GlobalMatchingTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Similarity a match must exceed in the first assignment pass.
    pub min_jaccard: f64,
    /// Similarity a match must exceed in the second (division) pass.
    /// Defaults to `min_jaccard`.
    pub division_min_jaccard: Option<f64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_jaccard: 0.5,
            division_min_jaccard: None,
        }
    }
}

impl TrackerConfig {
    /// Threshold for the second, division-aware pass.
    ///
    /// Falls back to `min_jaccard` when unset.
    pub fn effective_division_min_jaccard(&self) -> f64 {
        self.division_min_jaccard.unwrap_or(self.min_jaccard)
    }

    /// Check `min_jaccard` lies in `[0, 1)` and the division threshold does not exceed it.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.min_jaccard) {
            return Err(TrackingError::Configuration(format!(
                "min_jaccard must lie in [0, 1), got {}",
                self.min_jaccard
            )));
        }
        let division = self.effective_division_min_jaccard();
        if !(0.0..=self.min_jaccard).contains(&division) {
            return Err(TrackingError::Configuration(format!(
                "division_min_jaccard must lie in [0, min_jaccard], got {division}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LabelRaster {
    labels: Array2<u32>,
    count: u32,
}

impl LabelRaster {
    /// Paint cell `i` with label `i + 1`; later cells win on overlap.
    fn from_cells(cells: &[Cell], shape: (usize, usize)) -> Result<Self> {
        let mut labels = Array2::zeros(shape);
        for (label, cell) in (1..).zip(cells) {
            cell.paint_footprint(&mut labels, label)?;
        }
        Ok(Self {
            labels,
            count: cells.len() as u32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Discovered,
}

pub struct GlobalMatchingTracker {
    config: TrackerConfig,
    permanent: Option<LabelRaster>,
    temporary: Option<LabelRaster>,
    matches: HashMap<usize, Association>,
    phase: Phase,
    step: usize,
}

impl GlobalMatchingTracker {
    /// Tracker with no frames seen; fails on an invalid config.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            permanent: None,
            temporary: None,
            matches: HashMap::new(),
            phase: Phase::Idle,
            step: 0,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Two assignment passes over the similarity matrix (previous × next).
    ///
    /// Pass 1 keeps matches above `min_jaccard`. Pass 2 runs on the next
    /// cells pass 1 left open and keeps matches above the division
    /// threshold; every previous cell may end up with at most two
    /// successors in total, so a cell matched in pass 1 gets one more slot
    /// and an unmatched one gets two.
    fn global_match(&self, similarity: &Array2<f64>) -> Result<HashMap<usize, Association>> {
        let (num_prev, _) = similarity.dim();
        let mut out = HashMap::new();
        let mut taken = vec![0usize; num_prev];

        let AssignmentResult {
            matches,
            unmatched_cols,
            ..
        } = matching::linear_assignment(similarity, self.config.min_jaccard)?;
        for (prev, next, affinity) in matches {
            out.insert(
                next,
                Association {
                    prev_index: prev,
                    affinity,
                },
            );
            taken[prev] += 1;
        }

        if unmatched_cols.is_empty() {
            return Ok(out);
        }

        let slots: Vec<usize> = (0..num_prev)
            .flat_map(|prev| std::iter::repeat_n(prev, 2 - taken[prev]))
            .collect();
        let open = Array2::from_shape_fn((slots.len(), unmatched_cols.len()), |(i, j)| {
            similarity[[slots[i], unmatched_cols[j]]]
        });
        let second =
            matching::linear_assignment(&open, self.config.effective_division_min_jaccard())?;
        for (slot, col, affinity) in second.matches {
            let prev = slots[slot];
            if taken[prev] > 0 {
                debug!(prev, next = unmatched_cols[col], affinity, "second successor matched");
            }
            out.insert(
                unmatched_cols[col],
                Association {
                    prev_index: prev,
                    affinity,
                },
            );
            taken[prev] += 1;
        }
        Ok(out)
    }
}

impl Tracker for GlobalMatchingTracker {
    fn discover_next_cells(
        &mut self,
        next_cells: &[Cell],
        frame_shape: (usize, usize),
    ) -> Result<()> {
        if self.phase == Phase::Discovered {
            return Err(TrackingError::Protocol(
                "discover_next_cells called twice without advance",
            ));
        }

        let next = LabelRaster::from_cells(next_cells, frame_shape)?;
        self.matches.clear();
        if let Some(prev) = &self.permanent {
            let similarity = matching::pseudo_jaccard(
                prev.labels.view(),
                prev.count,
                next.labels.view(),
                next.count,
            )?;
            self.matches = self.global_match(&similarity)?;
        }
        debug!(
            step = self.step,
            cells = next_cells.len(),
            matched = self.matches.len(),
            "discovered next cells"
        );

        self.temporary = Some(next);
        self.phase = Phase::Discovered;
        Ok(())
    }

    fn predecessor_of_cell(
        &self,
        next_cell: &Cell,
        next_cell_index: usize,
    ) -> Result<Option<Association>> {
        if self.phase != Phase::Discovered {
            return Err(TrackingError::Protocol(
                "predecessor_of_cell called before discover_next_cells",
            ));
        }
        let found = self.matches.get(&next_cell_index).copied();
        trace!(label = next_cell.label, index = next_cell_index, ?found, "predecessor lookup");
        Ok(found)
    }

    fn advance(&mut self) -> Result<()> {
        if self.phase != Phase::Discovered {
            return Err(TrackingError::Protocol(
                "advance called without a discovered step",
            ));
        }
        self.permanent = self.temporary.take();
        self.matches.clear();
        self.phase = Phase::Idle;
        self.step += 1;
        Ok(())
    }
}
